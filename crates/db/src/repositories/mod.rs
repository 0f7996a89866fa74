use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use prcard_core::domain::build::BuildStatusRecord;
use prcard_core::domain::card::{CardMessagePointer, ChannelId, PrKey, PullRequestCard};
use prcard_core::oauth::OAuthToken;

pub mod approval;
pub mod build_status;
pub mod card;
pub mod identity;
pub mod memory;
pub mod pointer;
pub mod subscription;
pub mod token;

pub use approval::SqlApprovalRepository;
pub use build_status::SqlBuildStatusRepository;
pub use card::SqlCardRepository;
pub use identity::SqlIdentityRepository;
pub use memory::{
    InMemoryApprovalRepository, InMemoryBuildStatusRepository, InMemoryCardRepository,
    InMemoryIdentityRepository, InMemoryMessagePointerRepository, InMemorySubscriptionRepository,
    InMemoryTokenRepository,
};
pub use pointer::SqlMessagePointerRepository;
pub use subscription::SqlSubscriptionRepository;
pub use token::SqlTokenRepository;

use crate::DbPool;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Canonical card content per (repository, PR number).
#[async_trait]
pub trait CardRepository: Send + Sync {
    async fn find(&self, key: &PrKey) -> Result<Option<PullRequestCard>, RepositoryError>;
    async fn save(&self, card: PullRequestCard) -> Result<(), RepositoryError>;
    /// Every card in `repository` whose latest known source commit is `commit_hash`.
    async fn find_by_commit(
        &self,
        repository: &str,
        commit_hash: &str,
    ) -> Result<Vec<PullRequestCard>, RepositoryError>;
}

/// Approver names per PR. Add and remove are idempotent; listing keeps insertion order.
#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn add(&self, key: &PrKey, approver_name: &str) -> Result<(), RepositoryError>;
    async fn remove(&self, key: &PrKey, approver_name: &str) -> Result<(), RepositoryError>;
    async fn list(&self, key: &PrKey) -> Result<Vec<String>, RepositoryError>;
}

#[async_trait]
pub trait MessagePointerRepository: Send + Sync {
    async fn list_for_pr(&self, key: &PrKey) -> Result<Vec<CardMessagePointer>, RepositoryError>;
    async fn find(
        &self,
        key: &PrKey,
        channel: &ChannelId,
    ) -> Result<Option<CardMessagePointer>, RepositoryError>;
    /// Stores the pointer unless one already exists for the same PR and channel.
    /// Returns `false` when an existing pointer was kept.
    async fn record_if_absent(&self, pointer: CardMessagePointer) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait BuildStatusRepository: Send + Sync {
    async fn upsert(&self, record: BuildStatusRecord) -> Result<(), RepositoryError>;
    async fn find(
        &self,
        repository: &str,
        commit_hash: &str,
    ) -> Result<Option<BuildStatusRecord>, RepositoryError>;
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn subscribe(
        &self,
        channel: &ChannelId,
        team_id: &str,
        repository: &str,
    ) -> Result<(), RepositoryError>;
    async fn unsubscribe(&self, channel: &ChannelId, repository: &str)
        -> Result<(), RepositoryError>;
    async fn channels_for_repository(
        &self,
        repository: &str,
    ) -> Result<Vec<ChannelId>, RepositoryError>;
    async fn repositories_for_channel(
        &self,
        channel: &ChannelId,
    ) -> Result<Vec<String>, RepositoryError>;
    async fn webhook_secret(&self, repository: &str) -> Result<Option<String>, RepositoryError>;
    /// Returns the stored secret, generating and storing one first if none exists.
    async fn get_or_create_webhook_secret(&self, repository: &str)
        -> Result<String, RepositoryError>;
}

#[async_trait]
pub trait IdentityRepository: Send + Sync {
    async fn link(
        &self,
        chat_user_id: &str,
        source_display_name: &str,
    ) -> Result<(), RepositoryError>;
    async fn lookup_mention(
        &self,
        source_display_name: &str,
    ) -> Result<Option<String>, RepositoryError>;
}

#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn save(&self, token: OAuthToken) -> Result<(), RepositoryError>;
    async fn find(&self, team_id: &str) -> Result<Option<OAuthToken>, RepositoryError>;
}

/// Every store the relay needs, behind trait objects.
#[derive(Clone)]
pub struct Stores {
    pub cards: Arc<dyn CardRepository>,
    pub approvals: Arc<dyn ApprovalRepository>,
    pub pointers: Arc<dyn MessagePointerRepository>,
    pub builds: Arc<dyn BuildStatusRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub identities: Arc<dyn IdentityRepository>,
    pub tokens: Arc<dyn TokenRepository>,
}

impl Stores {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            cards: Arc::new(SqlCardRepository::new(pool.clone())),
            approvals: Arc::new(SqlApprovalRepository::new(pool.clone())),
            pointers: Arc::new(SqlMessagePointerRepository::new(pool.clone())),
            builds: Arc::new(SqlBuildStatusRepository::new(pool.clone())),
            subscriptions: Arc::new(SqlSubscriptionRepository::new(pool.clone())),
            identities: Arc::new(SqlIdentityRepository::new(pool.clone())),
            tokens: Arc::new(SqlTokenRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            cards: Arc::new(InMemoryCardRepository::default()),
            approvals: Arc::new(InMemoryApprovalRepository::default()),
            pointers: Arc::new(InMemoryMessagePointerRepository::default()),
            builds: Arc::new(InMemoryBuildStatusRepository::default()),
            subscriptions: Arc::new(InMemorySubscriptionRepository::default()),
            identities: Arc::new(InMemoryIdentityRepository::default()),
            tokens: Arc::new(InMemoryTokenRepository::default()),
        }
    }
}

pub(crate) fn decode_error(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

pub(crate) fn parse_timestamp(
    value: &str,
) -> Result<chrono::DateTime<chrono::Utc>, RepositoryError> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid timestamp `{value}`: {error}")))
}
