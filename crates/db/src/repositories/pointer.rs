use chrono::Utc;
use sqlx::Row;

use prcard_core::domain::card::{CardMessagePointer, ChannelId, MessageId, PrKey};

use super::{decode_error, MessagePointerRepository, RepositoryError};
use crate::DbPool;

pub struct SqlMessagePointerRepository {
    pool: DbPool,
}

impl SqlMessagePointerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_pointer(row: &sqlx::sqlite::SqliteRow) -> Result<CardMessagePointer, RepositoryError> {
    let repository: String = row.try_get("repository").map_err(decode_error)?;
    let number: i64 = row.try_get("pr_number").map_err(decode_error)?;
    let channel: String = row.try_get("channel_id").map_err(decode_error)?;
    let message: String = row.try_get("message_id").map_err(decode_error)?;

    Ok(CardMessagePointer {
        key: PrKey::new(repository, number),
        channel: ChannelId(channel),
        message: MessageId(message),
    })
}

#[async_trait::async_trait]
impl MessagePointerRepository for SqlMessagePointerRepository {
    async fn list_for_pr(&self, key: &PrKey) -> Result<Vec<CardMessagePointer>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT repository, pr_number, channel_id, message_id FROM pr_messages
             WHERE repository = ? AND pr_number = ?
             ORDER BY rowid ASC",
        )
        .bind(&key.repository)
        .bind(key.number)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_pointer).collect()
    }

    async fn find(
        &self,
        key: &PrKey,
        channel: &ChannelId,
    ) -> Result<Option<CardMessagePointer>, RepositoryError> {
        let row = sqlx::query(
            "SELECT repository, pr_number, channel_id, message_id FROM pr_messages
             WHERE repository = ? AND pr_number = ? AND channel_id = ?",
        )
        .bind(&key.repository)
        .bind(key.number)
        .bind(&channel.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_pointer).transpose()
    }

    async fn record_if_absent(&self, pointer: CardMessagePointer) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO pr_messages (repository, pr_number, channel_id, message_id, posted_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(repository, pr_number, channel_id) DO NOTHING",
        )
        .bind(&pointer.key.repository)
        .bind(pointer.key.number)
        .bind(&pointer.channel.0)
        .bind(&pointer.message.0)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
