//! PR card relay: turns authenticated git-host webhooks into one live chat card per pull
//! request per channel, plus thread replies.
//!
//! - `dispatch` - signature check, classification and background scheduling
//! - `reconcile` - merges each event into the stores and republishes affected cards
//! - `identity` - display name to chat mention resolution
//! - `tokens` - git-host OAuth bearer tokens with proactive refresh

pub mod dispatch;
pub mod identity;
pub mod reconcile;
pub mod tokens;

pub use dispatch::{Acceptance, Rejection, WebhookDelivery, WebhookDispatcher};
pub use identity::IdentityResolver;
pub use reconcile::{ReconcileError, ReconcileReport, ReconciliationEngine};
pub use tokens::{AccessTokens, BitbucketOAuthClient, RefreshedToken, TokenRefresher};
