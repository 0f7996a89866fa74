use chrono::Utc;
use sqlx::Row;

use prcard_core::domain::card::PrKey;

use super::{decode_error, ApprovalRepository, RepositoryError};
use crate::DbPool;

pub struct SqlApprovalRepository {
    pool: DbPool,
}

impl SqlApprovalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ApprovalRepository for SqlApprovalRepository {
    async fn add(&self, key: &PrKey, approver_name: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO pr_approvals (repository, pr_number, approver_name, approved_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(repository, pr_number, approver_name) DO NOTHING",
        )
        .bind(&key.repository)
        .bind(key.number)
        .bind(approver_name)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, key: &PrKey, approver_name: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            "DELETE FROM pr_approvals
             WHERE repository = ? AND pr_number = ? AND approver_name = ?",
        )
        .bind(&key.repository)
        .bind(key.number)
        .bind(approver_name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self, key: &PrKey) -> Result<Vec<String>, RepositoryError> {
        // rowid follows insertion, so a re-approval after removal moves to the end.
        let rows = sqlx::query(
            "SELECT approver_name FROM pr_approvals
             WHERE repository = ? AND pr_number = ?
             ORDER BY rowid ASC",
        )
        .bind(&key.repository)
        .bind(key.number)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| row.try_get("approver_name").map_err(decode_error)).collect()
    }
}
