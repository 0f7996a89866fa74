use sqlx::Row;

use prcard_core::domain::card::{Closure, ClosureKind, PrKey, PullRequestCard};

use super::{decode_error, parse_timestamp, CardRepository, RepositoryError};
use crate::DbPool;

const CARD_COLUMNS: &str = "repository, pr_number, title, url, source_branch, dest_branch,
    author_name, reviewer_names_json, latest_source_commit, closure_kind, closure_actor,
    updated_at";

pub struct SqlCardRepository {
    pool: DbPool,
}

impl SqlCardRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_card(row: &sqlx::sqlite::SqliteRow) -> Result<PullRequestCard, RepositoryError> {
    let repository: String = row.try_get("repository").map_err(decode_error)?;
    let number: i64 = row.try_get("pr_number").map_err(decode_error)?;
    let reviewer_names_json: String = row.try_get("reviewer_names_json").map_err(decode_error)?;
    let closure_kind: Option<String> = row.try_get("closure_kind").map_err(decode_error)?;
    let closure_actor: Option<String> = row.try_get("closure_actor").map_err(decode_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_error)?;

    let reviewer_names: Vec<String> = serde_json::from_str(&reviewer_names_json)
        .map_err(|e| RepositoryError::Decode(format!("reviewer_names_json: {e}")))?;

    let closure = match closure_kind {
        Some(kind) => {
            let kind = ClosureKind::parse(&kind)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown closure kind `{kind}`")))?;
            Some(Closure { kind, actor_name: closure_actor.unwrap_or_default() })
        }
        None => None,
    };

    Ok(PullRequestCard {
        key: PrKey::new(repository, number),
        title: row.try_get("title").map_err(decode_error)?,
        url: row.try_get("url").map_err(decode_error)?,
        source_branch: row.try_get("source_branch").map_err(decode_error)?,
        dest_branch: row.try_get("dest_branch").map_err(decode_error)?,
        author_name: row.try_get("author_name").map_err(decode_error)?,
        reviewer_names,
        latest_source_commit: row.try_get("latest_source_commit").map_err(decode_error)?,
        closure,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[async_trait::async_trait]
impl CardRepository for SqlCardRepository {
    async fn find(&self, key: &PrKey) -> Result<Option<PullRequestCard>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CARD_COLUMNS} FROM pr_cards WHERE repository = ? AND pr_number = ?"
        ))
        .bind(&key.repository)
        .bind(key.number)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_card).transpose()
    }

    async fn save(&self, card: PullRequestCard) -> Result<(), RepositoryError> {
        let reviewer_names_json = serde_json::to_string(&card.reviewer_names)
            .map_err(|e| RepositoryError::Decode(format!("reviewer_names_json: {e}")))?;
        let closure_kind = card.closure.as_ref().map(|closure| closure.kind.as_str());
        let closure_actor = card.closure.as_ref().map(|closure| closure.actor_name.as_str());

        sqlx::query(
            "INSERT INTO pr_cards (repository, pr_number, title, url, source_branch, dest_branch,
                                   author_name, reviewer_names_json, latest_source_commit,
                                   closure_kind, closure_actor, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(repository, pr_number) DO UPDATE SET
                 title = excluded.title,
                 url = excluded.url,
                 source_branch = excluded.source_branch,
                 dest_branch = excluded.dest_branch,
                 author_name = excluded.author_name,
                 reviewer_names_json = excluded.reviewer_names_json,
                 latest_source_commit = excluded.latest_source_commit,
                 closure_kind = excluded.closure_kind,
                 closure_actor = excluded.closure_actor,
                 updated_at = excluded.updated_at",
        )
        .bind(&card.key.repository)
        .bind(card.key.number)
        .bind(&card.title)
        .bind(&card.url)
        .bind(&card.source_branch)
        .bind(&card.dest_branch)
        .bind(&card.author_name)
        .bind(&reviewer_names_json)
        .bind(&card.latest_source_commit)
        .bind(closure_kind)
        .bind(closure_actor)
        .bind(card.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_commit(
        &self,
        repository: &str,
        commit_hash: &str,
    ) -> Result<Vec<PullRequestCard>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {CARD_COLUMNS} FROM pr_cards
             WHERE repository = ? AND latest_source_commit = ?
             ORDER BY pr_number ASC"
        ))
        .bind(repository)
        .bind(commit_hash)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_card).collect()
    }
}
