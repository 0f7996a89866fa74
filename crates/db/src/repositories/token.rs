use chrono::Utc;
use secrecy::ExposeSecret;
use sqlx::Row;

use prcard_core::oauth::OAuthToken;

use super::{decode_error, parse_timestamp, RepositoryError, TokenRepository};
use crate::DbPool;

pub struct SqlTokenRepository {
    pool: DbPool,
}

impl SqlTokenRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TokenRepository for SqlTokenRepository {
    async fn save(&self, token: OAuthToken) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO oauth_tokens (team_id, workspace, access_token, refresh_token,
                                       expires_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(team_id) DO UPDATE SET
                 workspace = excluded.workspace,
                 access_token = excluded.access_token,
                 refresh_token = excluded.refresh_token,
                 expires_at = excluded.expires_at,
                 updated_at = excluded.updated_at",
        )
        .bind(&token.team_id)
        .bind(&token.workspace)
        .bind(token.access_token.expose_secret())
        .bind(token.refresh_token.expose_secret())
        .bind(token.expires_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, team_id: &str) -> Result<Option<OAuthToken>, RepositoryError> {
        let row = sqlx::query(
            "SELECT team_id, workspace, access_token, refresh_token, expires_at
             FROM oauth_tokens WHERE team_id = ?",
        )
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let access_token: String = row.try_get("access_token").map_err(decode_error)?;
        let refresh_token: String = row.try_get("refresh_token").map_err(decode_error)?;
        let expires_at: String = row.try_get("expires_at").map_err(decode_error)?;

        Ok(Some(OAuthToken {
            team_id: row.try_get("team_id").map_err(decode_error)?,
            workspace: row.try_get("workspace").map_err(decode_error)?,
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: parse_timestamp(&expires_at)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use secrecy::ExposeSecret;

    use prcard_core::oauth::OAuthToken;

    use super::SqlTokenRepository;
    use crate::repositories::TokenRepository;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn token_save_overwrites_per_team() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlTokenRepository::new(pool);
        let expires_at = Utc::now() + Duration::hours(2);

        for access in ["first-access", "second-access"] {
            repo.save(OAuthToken {
                team_id: "T1".to_string(),
                workspace: "acme".to_string(),
                access_token: access.to_string().into(),
                refresh_token: "refresh".to_string().into(),
                expires_at,
            })
            .await
            .expect("save");
        }

        let found = repo.find("T1").await.expect("find").expect("token");
        assert_eq!(found.access_token.expose_secret(), "second-access");
        assert_eq!(found.expires_at.timestamp(), expires_at.timestamp());
        assert!(repo.find("T2").await.expect("find other").is_none());
    }
}
