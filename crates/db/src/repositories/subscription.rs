use chrono::Utc;
use sqlx::Row;

use prcard_core::domain::card::ChannelId;
use prcard_core::signature::generate_webhook_secret;

use super::{decode_error, RepositoryError, SubscriptionRepository};
use crate::DbPool;

pub struct SqlSubscriptionRepository {
    pool: DbPool,
}

impl SqlSubscriptionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SubscriptionRepository for SqlSubscriptionRepository {
    async fn subscribe(
        &self,
        channel: &ChannelId,
        team_id: &str,
        repository: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO repo_subscriptions (channel_id, team_id, repository, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(channel_id, repository) DO NOTHING",
        )
        .bind(&channel.0)
        .bind(team_id)
        .bind(repository)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn unsubscribe(
        &self,
        channel: &ChannelId,
        repository: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM repo_subscriptions WHERE channel_id = ? AND repository = ?")
            .bind(&channel.0)
            .bind(repository)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn channels_for_repository(
        &self,
        repository: &str,
    ) -> Result<Vec<ChannelId>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT channel_id FROM repo_subscriptions
             WHERE repository = ?
             ORDER BY rowid ASC",
        )
        .bind(repository)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("channel_id").map(ChannelId).map_err(decode_error))
            .collect()
    }

    async fn repositories_for_channel(
        &self,
        channel: &ChannelId,
    ) -> Result<Vec<String>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT repository FROM repo_subscriptions
             WHERE channel_id = ?
             ORDER BY repository ASC",
        )
        .bind(&channel.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| row.try_get("repository").map_err(decode_error)).collect()
    }

    async fn webhook_secret(&self, repository: &str) -> Result<Option<String>, RepositoryError> {
        let secret = sqlx::query_scalar::<_, String>(
            "SELECT secret FROM webhook_secrets WHERE repository = ?",
        )
        .bind(repository)
        .fetch_optional(&self.pool)
        .await?;

        Ok(secret)
    }

    async fn get_or_create_webhook_secret(
        &self,
        repository: &str,
    ) -> Result<String, RepositoryError> {
        sqlx::query(
            "INSERT INTO webhook_secrets (repository, secret, created_at)
             VALUES (?, ?, ?)
             ON CONFLICT(repository) DO NOTHING",
        )
        .bind(repository)
        .bind(generate_webhook_secret())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.webhook_secret(repository).await?.ok_or_else(|| {
            RepositoryError::Decode(format!("webhook secret for `{repository}` vanished"))
        })
    }
}
