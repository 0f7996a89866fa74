use std::sync::Arc;

use tracing::warn;

use prcard_db::repositories::IdentityRepository;
use prcard_slack::blocks::escape_mrkdwn;

/// Maps git-host display names to chat mentions. Never fails: a missing mapping or a store
/// error falls back to the bolded display name.
#[derive(Clone)]
pub struct IdentityResolver {
    identities: Arc<dyn IdentityRepository>,
}

impl IdentityResolver {
    pub fn new(identities: Arc<dyn IdentityRepository>) -> Self {
        Self { identities }
    }

    pub async fn resolve(&self, display_name: &str) -> String {
        match self.identities.lookup_mention(display_name).await {
            Ok(Some(chat_user_id)) => format!("<@{chat_user_id}>"),
            Ok(None) => fallback_label(display_name),
            Err(error) => {
                warn!(
                    event_name = "relay.identity.lookup_failed",
                    display_name,
                    error = %error,
                    "identity lookup failed, using display name"
                );
                fallback_label(display_name)
            }
        }
    }

    /// Resolves each name in order.
    pub async fn resolve_all(&self, display_names: &[String]) -> Vec<String> {
        let mut labels = Vec::with_capacity(display_names.len());
        for name in display_names {
            labels.push(self.resolve(name).await);
        }
        labels
    }
}

pub fn fallback_label(display_name: &str) -> String {
    let name = display_name.trim();
    if name.is_empty() {
        return "*unknown user*".to_string();
    }
    format!("*{}*", escape_mrkdwn(name))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use prcard_db::repositories::{IdentityRepository, InMemoryIdentityRepository};

    use super::IdentityResolver;

    #[tokio::test]
    async fn mapped_names_become_mentions_and_others_are_bolded() {
        let identities = Arc::new(InMemoryIdentityRepository::default());
        identities.link("U100", "Alice Smith").await.expect("link");
        let resolver = IdentityResolver::new(identities);

        assert_eq!(resolver.resolve("Alice Smith").await, "<@U100>");
        assert_eq!(resolver.resolve("carol").await, "*carol*");
        assert_eq!(resolver.resolve("  ").await, "*unknown user*");
        assert_eq!(
            resolver.resolve_all(&["carol".to_string(), "Alice Smith".to_string()]).await,
            vec!["*carol*", "<@U100>"]
        );
    }

    #[tokio::test]
    async fn unmapped_names_are_trimmed_and_escaped() {
        let resolver = IdentityResolver::new(Arc::new(InMemoryIdentityRepository::default()));

        assert_eq!(resolver.resolve(" Dana <ops> ").await, "*Dana &lt;ops&gt;*");
        assert_eq!(resolver.resolve("").await, "*unknown user*");
    }
}
