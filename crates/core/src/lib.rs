pub mod config;
pub mod domain;
pub mod errors;
pub mod oauth;
pub mod signature;

pub use domain::build::{BuildState, BuildStatusRecord};
pub use domain::card::{
    CardMessagePointer, ChannelId, Closure, ClosureKind, MessageId, PrKey, PullRequestCard,
};
pub use domain::event::{
    CommitStatusEvent, PayloadError, PullRequestAction, PullRequestEvent, PullRequestSnapshot,
    WebhookEvent, WebhookEventKind,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use oauth::{OAuthToken, TokenError};
