use std::collections::HashMap;

use tokio::sync::RwLock;

use prcard_core::domain::build::BuildStatusRecord;
use prcard_core::domain::card::{CardMessagePointer, ChannelId, PrKey, PullRequestCard};
use prcard_core::oauth::OAuthToken;
use prcard_core::signature::generate_webhook_secret;

use super::{
    ApprovalRepository, BuildStatusRepository, CardRepository, IdentityRepository,
    MessagePointerRepository, RepositoryError, SubscriptionRepository, TokenRepository,
};

#[derive(Default)]
pub struct InMemoryCardRepository {
    cards: RwLock<HashMap<PrKey, PullRequestCard>>,
}

#[async_trait::async_trait]
impl CardRepository for InMemoryCardRepository {
    async fn find(&self, key: &PrKey) -> Result<Option<PullRequestCard>, RepositoryError> {
        let cards = self.cards.read().await;
        Ok(cards.get(key).cloned())
    }

    async fn save(&self, card: PullRequestCard) -> Result<(), RepositoryError> {
        let mut cards = self.cards.write().await;
        cards.insert(card.key.clone(), card);
        Ok(())
    }

    async fn find_by_commit(
        &self,
        repository: &str,
        commit_hash: &str,
    ) -> Result<Vec<PullRequestCard>, RepositoryError> {
        let cards = self.cards.read().await;
        let mut matches: Vec<PullRequestCard> = cards
            .values()
            .filter(|card| {
                card.key.repository == repository
                    && card.latest_source_commit.as_deref() == Some(commit_hash)
            })
            .cloned()
            .collect();
        matches.sort_by_key(|card| card.key.number);
        Ok(matches)
    }
}

#[derive(Default)]
pub struct InMemoryApprovalRepository {
    approvals: RwLock<HashMap<PrKey, Vec<String>>>,
}

#[async_trait::async_trait]
impl ApprovalRepository for InMemoryApprovalRepository {
    async fn add(&self, key: &PrKey, approver_name: &str) -> Result<(), RepositoryError> {
        let mut approvals = self.approvals.write().await;
        let approvers = approvals.entry(key.clone()).or_default();
        if !approvers.iter().any(|name| name == approver_name) {
            approvers.push(approver_name.to_string());
        }
        Ok(())
    }

    async fn remove(&self, key: &PrKey, approver_name: &str) -> Result<(), RepositoryError> {
        let mut approvals = self.approvals.write().await;
        if let Some(approvers) = approvals.get_mut(key) {
            approvers.retain(|name| name != approver_name);
        }
        Ok(())
    }

    async fn list(&self, key: &PrKey) -> Result<Vec<String>, RepositoryError> {
        let approvals = self.approvals.read().await;
        Ok(approvals.get(key).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemoryMessagePointerRepository {
    pointers: RwLock<Vec<CardMessagePointer>>,
}

#[async_trait::async_trait]
impl MessagePointerRepository for InMemoryMessagePointerRepository {
    async fn list_for_pr(&self, key: &PrKey) -> Result<Vec<CardMessagePointer>, RepositoryError> {
        let pointers = self.pointers.read().await;
        Ok(pointers.iter().filter(|pointer| &pointer.key == key).cloned().collect())
    }

    async fn find(
        &self,
        key: &PrKey,
        channel: &ChannelId,
    ) -> Result<Option<CardMessagePointer>, RepositoryError> {
        let pointers = self.pointers.read().await;
        Ok(pointers
            .iter()
            .find(|pointer| &pointer.key == key && &pointer.channel == channel)
            .cloned())
    }

    async fn record_if_absent(&self, pointer: CardMessagePointer) -> Result<bool, RepositoryError> {
        let mut pointers = self.pointers.write().await;
        let exists = pointers
            .iter()
            .any(|stored| stored.key == pointer.key && stored.channel == pointer.channel);
        if exists {
            return Ok(false);
        }
        pointers.push(pointer);
        Ok(true)
    }
}

#[derive(Default)]
pub struct InMemoryBuildStatusRepository {
    statuses: RwLock<HashMap<(String, String), BuildStatusRecord>>,
}

#[async_trait::async_trait]
impl BuildStatusRepository for InMemoryBuildStatusRepository {
    async fn upsert(&self, record: BuildStatusRecord) -> Result<(), RepositoryError> {
        let mut statuses = self.statuses.write().await;
        statuses.insert((record.repository.clone(), record.commit_hash.clone()), record);
        Ok(())
    }

    async fn find(
        &self,
        repository: &str,
        commit_hash: &str,
    ) -> Result<Option<BuildStatusRecord>, RepositoryError> {
        let statuses = self.statuses.read().await;
        Ok(statuses.get(&(repository.to_string(), commit_hash.to_string())).cloned())
    }
}

#[derive(Default)]
pub struct InMemorySubscriptionRepository {
    // (channel, team, repository) in subscription order.
    subscriptions: RwLock<Vec<(ChannelId, String, String)>>,
    secrets: RwLock<HashMap<String, String>>,
}

#[async_trait::async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn subscribe(
        &self,
        channel: &ChannelId,
        team_id: &str,
        repository: &str,
    ) -> Result<(), RepositoryError> {
        let mut subscriptions = self.subscriptions.write().await;
        let exists =
            subscriptions.iter().any(|(stored, _, repo)| stored == channel && repo == repository);
        if !exists {
            subscriptions.push((channel.clone(), team_id.to_string(), repository.to_string()));
        }
        Ok(())
    }

    async fn unsubscribe(
        &self,
        channel: &ChannelId,
        repository: &str,
    ) -> Result<(), RepositoryError> {
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions.retain(|(stored, _, repo)| !(stored == channel && repo == repository));
        Ok(())
    }

    async fn channels_for_repository(
        &self,
        repository: &str,
    ) -> Result<Vec<ChannelId>, RepositoryError> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions
            .iter()
            .filter(|(_, _, repo)| repo == repository)
            .map(|(channel, _, _)| channel.clone())
            .collect())
    }

    async fn repositories_for_channel(
        &self,
        channel: &ChannelId,
    ) -> Result<Vec<String>, RepositoryError> {
        let subscriptions = self.subscriptions.read().await;
        let mut repositories: Vec<String> = subscriptions
            .iter()
            .filter(|(stored, _, _)| stored == channel)
            .map(|(_, _, repo)| repo.clone())
            .collect();
        repositories.sort();
        Ok(repositories)
    }

    async fn webhook_secret(&self, repository: &str) -> Result<Option<String>, RepositoryError> {
        let secrets = self.secrets.read().await;
        Ok(secrets.get(repository).cloned())
    }

    async fn get_or_create_webhook_secret(
        &self,
        repository: &str,
    ) -> Result<String, RepositoryError> {
        let mut secrets = self.secrets.write().await;
        Ok(secrets.entry(repository.to_string()).or_insert_with(generate_webhook_secret).clone())
    }
}

#[derive(Default)]
pub struct InMemoryIdentityRepository {
    // chat user id -> source display name
    links: RwLock<HashMap<String, String>>,
}

#[async_trait::async_trait]
impl IdentityRepository for InMemoryIdentityRepository {
    async fn link(
        &self,
        chat_user_id: &str,
        source_display_name: &str,
    ) -> Result<(), RepositoryError> {
        let mut links = self.links.write().await;
        links.retain(|_, name| name != source_display_name);
        links.insert(chat_user_id.to_string(), source_display_name.to_string());
        Ok(())
    }

    async fn lookup_mention(
        &self,
        source_display_name: &str,
    ) -> Result<Option<String>, RepositoryError> {
        let links = self.links.read().await;
        Ok(links
            .iter()
            .find(|(_, name)| name.as_str() == source_display_name)
            .map(|(chat_user_id, _)| chat_user_id.clone()))
    }
}

#[derive(Default)]
pub struct InMemoryTokenRepository {
    tokens: RwLock<HashMap<String, OAuthToken>>,
}

#[async_trait::async_trait]
impl TokenRepository for InMemoryTokenRepository {
    async fn save(&self, token: OAuthToken) -> Result<(), RepositoryError> {
        let mut tokens = self.tokens.write().await;
        tokens.insert(token.team_id.clone(), token);
        Ok(())
    }

    async fn find(&self, team_id: &str) -> Result<Option<OAuthToken>, RepositoryError> {
        let tokens = self.tokens.read().await;
        Ok(tokens.get(team_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use prcard_core::domain::card::{CardMessagePointer, ChannelId, MessageId, PrKey};

    use crate::repositories::{
        ApprovalRepository, InMemoryApprovalRepository, InMemoryMessagePointerRepository,
        MessagePointerRepository,
    };

    #[tokio::test]
    async fn approvals_keep_first_seen_order_without_duplicates() {
        let repo = InMemoryApprovalRepository::default();
        let key = PrKey::new("acme/api", 7);

        repo.add(&key, "alice").await.expect("alice");
        repo.add(&key, "bob").await.expect("bob");
        repo.add(&key, "alice").await.expect("alice again");
        repo.remove(&key, "carol").await.expect("remove absent");

        assert_eq!(repo.list(&key).await.expect("list"), vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn pointer_is_recorded_once_per_channel() {
        let repo = InMemoryMessagePointerRepository::default();
        let key = PrKey::new("acme/api", 7);
        let pointer = |message: &str| CardMessagePointer {
            key: key.clone(),
            channel: ChannelId("C1".to_string()),
            message: MessageId(message.to_string()),
        };

        assert!(repo.record_if_absent(pointer("1.0001")).await.expect("first"));
        assert!(!repo.record_if_absent(pointer("1.0002")).await.expect("second"));

        let stored = repo.list_for_pr(&key).await.expect("list");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].message, MessageId("1.0001".to_string()));
    }
}
