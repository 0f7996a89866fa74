use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use prcard_core::domain::event::{PayloadError, WebhookEvent, WebhookEventKind};
use prcard_core::errors::{ApplicationError, DomainError};
use prcard_core::signature::verify_signature;
use prcard_db::repositories::SubscriptionRepository;
use prcard_db::RepositoryError;

use crate::reconcile::ReconciliationEngine;

/// Raw inbound delivery as read off the wire.
#[derive(Clone, Debug)]
pub struct WebhookDelivery {
    pub event_key: String,
    pub body: Vec<u8>,
    pub signature: Option<String>,
    pub correlation_id: String,
}

#[derive(Debug)]
pub enum Acceptance {
    /// The event kind is not one the relay handles.
    Dropped,
    /// Reconciliation runs in the background; the handle is only useful to tests.
    Scheduled(JoinHandle<()>),
}

#[derive(Debug, Error)]
pub enum Rejection {
    #[error(transparent)]
    Unparseable(#[from] PayloadError),
    #[error("signature mismatch for repository `{repository}`")]
    Unauthorized { repository: String },
    #[error("webhook secret lookup failed: {0}")]
    SecretLookup(#[source] RepositoryError),
}

impl From<Rejection> for ApplicationError {
    fn from(value: Rejection) -> Self {
        match value {
            Rejection::Unparseable(error) => Self::Domain(DomainError::from(error)),
            Rejection::Unauthorized { .. } => Self::Domain(DomainError::SignatureMismatch),
            Rejection::SecretLookup(error) => Self::Persistence(error.to_string()),
        }
    }
}

/// Authenticates and classifies deliveries, then hands accepted events to the engine on a
/// separate task.
#[derive(Clone)]
pub struct WebhookDispatcher {
    subscriptions: Arc<dyn SubscriptionRepository>,
    engine: Arc<ReconciliationEngine>,
}

impl WebhookDispatcher {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        engine: Arc<ReconciliationEngine>,
    ) -> Self {
        Self { subscriptions, engine }
    }

    pub async fn handle(&self, delivery: WebhookDelivery) -> Result<Acceptance, Rejection> {
        let correlation_id = delivery.correlation_id;
        let Some(kind) = WebhookEventKind::from_event_key(&delivery.event_key) else {
            info!(
                event_name = "relay.webhook.dropped",
                correlation_id = %correlation_id,
                event_key = %delivery.event_key,
                "unhandled webhook event kind"
            );
            return Ok(Acceptance::Dropped);
        };

        let event = WebhookEvent::parse(kind, &delivery.body).map_err(|error| {
            warn!(
                event_name = "relay.webhook.unparseable",
                correlation_id = %correlation_id,
                event_kind = kind.as_str(),
                error = %error,
                "webhook payload rejected"
            );
            Rejection::Unparseable(error)
        })?;
        let repository = event.repository().to_string();

        let secret = self.subscriptions.webhook_secret(&repository).await.map_err(|error| {
            error!(
                event_name = "relay.webhook.secret_lookup_failed",
                correlation_id = %correlation_id,
                repository = %repository,
                error = %error,
                "could not load webhook secret"
            );
            Rejection::SecretLookup(error)
        })?;

        match secret {
            Some(secret) => {
                if !verify_signature(&secret, &delivery.body, delivery.signature.as_deref()) {
                    warn!(
                        event_name = "relay.webhook.unauthorized",
                        correlation_id = %correlation_id,
                        repository = %repository,
                        "webhook signature mismatch"
                    );
                    return Err(Rejection::Unauthorized { repository });
                }
            }
            None => {
                warn!(
                    event_name = "relay.webhook.unverified",
                    correlation_id = %correlation_id,
                    repository = %repository,
                    "no webhook secret on file, accepting unverified delivery"
                );
            }
        }

        info!(
            event_name = "relay.webhook.accepted",
            correlation_id = %correlation_id,
            repository = %repository,
            event_kind = kind.as_str(),
            "webhook accepted"
        );

        let engine = Arc::clone(&self.engine);
        let handle = tokio::spawn(async move {
            if let Err(error) = engine.apply(event, &correlation_id).await {
                error!(
                    event_name = "relay.reconcile.failed",
                    correlation_id = %correlation_id,
                    repository = %repository,
                    error = %error,
                    "reconciliation aborted"
                );
            }
        });
        Ok(Acceptance::Scheduled(handle))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use prcard_core::domain::card::ChannelId;
    use prcard_core::errors::{ApplicationError, DomainError};
    use prcard_core::signature::sign;
    use prcard_db::repositories::SubscriptionRepository;
    use prcard_db::{RepositoryError, Stores};
    use prcard_slack::sink::RecordingMessagingSink;

    use super::{Acceptance, Rejection, WebhookDelivery, WebhookDispatcher};
    use crate::reconcile::ReconciliationEngine;

    const BODY: &str = r#"{
        "actor": { "display_name": "alice" },
        "pullrequest": { "id": 3, "title": "Fix" },
        "repository": { "full_name": "acme/api" }
    }"#;

    fn dispatcher(stores: &Stores) -> WebhookDispatcher {
        let engine = ReconciliationEngine::new(
            stores.clone(),
            Arc::new(RecordingMessagingSink::new()),
            "https://bitbucket.org",
        );
        WebhookDispatcher::new(stores.subscriptions.clone(), Arc::new(engine))
    }

    fn delivery(event_key: &str, body: &str, signature: Option<String>) -> WebhookDelivery {
        WebhookDelivery {
            event_key: event_key.to_string(),
            body: body.as_bytes().to_vec(),
            signature,
            correlation_id: "delivery-1".to_string(),
        }
    }

    struct UnavailableSubscriptions;

    fn unavailable() -> RepositoryError {
        RepositoryError::Decode("database is locked".to_string())
    }

    #[async_trait]
    impl SubscriptionRepository for UnavailableSubscriptions {
        async fn subscribe(&self, _: &ChannelId, _: &str, _: &str) -> Result<(), RepositoryError> {
            Err(unavailable())
        }

        async fn unsubscribe(&self, _: &ChannelId, _: &str) -> Result<(), RepositoryError> {
            Err(unavailable())
        }

        async fn channels_for_repository(
            &self,
            _: &str,
        ) -> Result<Vec<ChannelId>, RepositoryError> {
            Err(unavailable())
        }

        async fn repositories_for_channel(
            &self,
            _: &ChannelId,
        ) -> Result<Vec<String>, RepositoryError> {
            Err(unavailable())
        }

        async fn webhook_secret(&self, _: &str) -> Result<Option<String>, RepositoryError> {
            Err(unavailable())
        }

        async fn get_or_create_webhook_secret(&self, _: &str) -> Result<String, RepositoryError> {
            Err(unavailable())
        }
    }

    #[tokio::test]
    async fn unknown_kind_is_dropped_without_parsing() {
        let stores = Stores::in_memory();
        let result = dispatcher(&stores).handle(delivery("repo:push", "not json", None)).await;
        assert!(matches!(result, Ok(Acceptance::Dropped)));
    }

    #[tokio::test]
    async fn malformed_body_is_unparseable() {
        let stores = Stores::in_memory();
        let result =
            dispatcher(&stores).handle(delivery("pullrequest:approved", "{", None)).await;

        let rejection = result.expect_err("malformed body should be rejected");
        assert!(matches!(
            ApplicationError::from(rejection),
            ApplicationError::Domain(DomainError::UnparseablePayload(_))
        ));
    }

    #[tokio::test]
    async fn signature_is_enforced_once_a_secret_exists() {
        let stores = Stores::in_memory();
        let secret =
            stores.subscriptions.get_or_create_webhook_secret("acme/api").await.expect("secret");
        let dispatcher = dispatcher(&stores);

        let unsigned = dispatcher.handle(delivery("pullrequest:approved", BODY, None)).await;
        assert!(matches!(unsigned, Err(Rejection::Unauthorized { .. })));

        let forged = sign("not-the-secret", BODY.as_bytes());
        let forged =
            dispatcher.handle(delivery("pullrequest:approved", BODY, Some(forged))).await;
        assert!(matches!(forged, Err(Rejection::Unauthorized { .. })));

        let signed = sign(&secret, BODY.as_bytes());
        let accepted =
            dispatcher.handle(delivery("pullrequest:approved", BODY, Some(signed))).await;
        match accepted {
            Ok(Acceptance::Scheduled(handle)) => handle.await.expect("task"),
            other => panic!("expected scheduled work, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn repository_without_secret_is_accepted_unverified() {
        let stores = Stores::in_memory();
        let accepted =
            dispatcher(&stores).handle(delivery("pullrequest:approved", BODY, None)).await;
        assert!(matches!(accepted, Ok(Acceptance::Scheduled(_))));
    }

    #[tokio::test]
    async fn secret_lookup_failure_rejects_as_persistence_error() {
        let stores = Stores::in_memory();
        let engine = ReconciliationEngine::new(
            stores.clone(),
            Arc::new(RecordingMessagingSink::new()),
            "https://bitbucket.org",
        );
        let dispatcher =
            WebhookDispatcher::new(Arc::new(UnavailableSubscriptions), Arc::new(engine));

        let result = dispatcher.handle(delivery("pullrequest:approved", BODY, None)).await;

        let rejection = result.expect_err("lookup failure should reject the delivery");
        assert!(matches!(rejection, Rejection::SecretLookup(RepositoryError::Decode(_))));
        assert!(matches!(ApplicationError::from(rejection), ApplicationError::Persistence(_)));
    }
}
