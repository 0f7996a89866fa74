use chrono::Utc;

use super::{IdentityRepository, RepositoryError};
use crate::DbPool;

pub struct SqlIdentityRepository {
    pool: DbPool,
}

impl SqlIdentityRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl IdentityRepository for SqlIdentityRepository {
    async fn link(
        &self,
        chat_user_id: &str,
        source_display_name: &str,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM user_mappings WHERE source_display_name = ? AND chat_user_id <> ?",
        )
        .bind(source_display_name)
        .bind(chat_user_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO user_mappings (chat_user_id, source_display_name, linked_at)
             VALUES (?, ?, ?)
             ON CONFLICT(chat_user_id) DO UPDATE SET
                 source_display_name = excluded.source_display_name,
                 linked_at = excluded.linked_at",
        )
        .bind(chat_user_id)
        .bind(source_display_name)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(())
    }

    async fn lookup_mention(
        &self,
        source_display_name: &str,
    ) -> Result<Option<String>, RepositoryError> {
        let chat_user_id = sqlx::query_scalar::<_, String>(
            "SELECT chat_user_id FROM user_mappings WHERE source_display_name = ?",
        )
        .bind(source_display_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(chat_user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::SqlIdentityRepository;
    use crate::repositories::IdentityRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlIdentityRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlIdentityRepository::new(pool)
    }

    #[tokio::test]
    async fn linked_user_resolves_and_unknown_is_none() {
        let repo = setup().await;
        repo.link("U100", "Alice Smith").await.expect("link");

        assert_eq!(
            repo.lookup_mention("Alice Smith").await.expect("lookup"),
            Some("U100".to_string())
        );
        assert_eq!(repo.lookup_mention("Nobody").await.expect("lookup"), None);
    }

    #[tokio::test]
    async fn display_name_moves_to_the_latest_chat_user() {
        let repo = setup().await;
        repo.link("U100", "alice").await.expect("link");
        repo.link("U200", "alice").await.expect("link again");

        assert_eq!(repo.lookup_mention("alice").await.expect("lookup"), Some("U200".to_string()));
    }

    #[tokio::test]
    async fn relinking_a_chat_user_replaces_the_old_name() {
        let repo = setup().await;
        repo.link("U100", "alice").await.expect("link");
        repo.link("U100", "Alice Smith").await.expect("relink");

        assert_eq!(repo.lookup_mention("alice").await.expect("old name"), None);
        assert_eq!(
            repo.lookup_mention("Alice Smith").await.expect("new name"),
            Some("U100".to_string())
        );
    }
}
