use sqlx::Row;

use prcard_core::domain::build::{BuildState, BuildStatusRecord};

use super::{decode_error, parse_timestamp, BuildStatusRepository, RepositoryError};
use crate::DbPool;

pub struct SqlBuildStatusRepository {
    pool: DbPool,
}

impl SqlBuildStatusRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_status(row: &sqlx::sqlite::SqliteRow) -> Result<BuildStatusRecord, RepositoryError> {
    let state: String = row.try_get("state").map_err(decode_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_error)?;

    Ok(BuildStatusRecord {
        repository: row.try_get("repository").map_err(decode_error)?,
        commit_hash: row.try_get("commit_hash").map_err(decode_error)?,
        state: BuildState::parse(&state),
        name: row.try_get("name").map_err(decode_error)?,
        url: row.try_get("url").map_err(decode_error)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[async_trait::async_trait]
impl BuildStatusRepository for SqlBuildStatusRepository {
    async fn upsert(&self, record: BuildStatusRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO build_statuses (repository, commit_hash, state, name, url, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(repository, commit_hash) DO UPDATE SET
                 state = excluded.state,
                 name = excluded.name,
                 url = excluded.url,
                 updated_at = excluded.updated_at",
        )
        .bind(&record.repository)
        .bind(&record.commit_hash)
        .bind(record.state.as_wire())
        .bind(&record.name)
        .bind(&record.url)
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(
        &self,
        repository: &str,
        commit_hash: &str,
    ) -> Result<Option<BuildStatusRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT repository, commit_hash, state, name, url, updated_at
             FROM build_statuses WHERE repository = ? AND commit_hash = ?",
        )
        .bind(repository)
        .bind(commit_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_status).transpose()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use prcard_core::domain::build::{BuildState, BuildStatusRecord};

    use super::SqlBuildStatusRepository;
    use crate::repositories::BuildStatusRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlBuildStatusRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlBuildStatusRepository::new(pool)
    }

    #[tokio::test]
    async fn later_arrival_wins_even_with_older_timestamp() {
        let repo = setup().await;
        let now = Utc::now();

        repo.upsert(BuildStatusRecord {
            repository: "acme/api".to_string(),
            commit_hash: "abc123".to_string(),
            state: BuildState::Success,
            name: "pipeline #2".to_string(),
            url: Some("https://ci.example.com/2".to_string()),
            updated_at: now,
        })
        .await
        .expect("first upsert");
        repo.upsert(BuildStatusRecord {
            repository: "acme/api".to_string(),
            commit_hash: "abc123".to_string(),
            state: BuildState::Pending,
            name: "pipeline #1".to_string(),
            url: None,
            updated_at: now - Duration::minutes(5),
        })
        .await
        .expect("second upsert");

        let found = repo.find("acme/api", "abc123").await.expect("find").expect("status");
        assert_eq!(found.state, BuildState::Pending);
        assert_eq!(found.name, "pipeline #1");
        assert_eq!(found.url, None);
    }

    #[tokio::test]
    async fn unknown_commit_is_none_and_unknown_state_survives() {
        let repo = setup().await;
        assert!(repo.find("acme/api", "missing").await.expect("find").is_none());

        repo.upsert(BuildStatusRecord {
            repository: "acme/api".to_string(),
            commit_hash: "abc123".to_string(),
            state: BuildState::Unknown("PAUSED".to_string()),
            name: String::new(),
            url: None,
            updated_at: Utc::now(),
        })
        .await
        .expect("upsert");

        let found = repo.find("acme/api", "abc123").await.expect("find").expect("status");
        assert_eq!(found.state, BuildState::Unknown("PAUSED".to_string()));
    }
}
