use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::event::PullRequestSnapshot;

/// Identity of a pull request inside one repository.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrKey {
    pub repository: String,
    pub number: i64,
}

impl PrKey {
    pub fn new(repository: impl Into<String>, number: i64) -> Self {
        Self { repository: repository.into(), number }
    }
}

impl fmt::Display for PrKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.repository, self.number)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identifier handed back by the messaging sink for a posted message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosureKind {
    Merged,
    Declined,
}

impl ClosureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merged => "merged",
            Self::Declined => "declined",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "merged" => Some(Self::Merged),
            "declined" => Some(Self::Declined),
            _ => None,
        }
    }
}

/// Terminal annotation on a card. Closing a PR never deletes its card.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Closure {
    pub kind: ClosureKind,
    pub actor_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PullRequestCard {
    pub key: PrKey,
    pub title: String,
    pub url: String,
    pub source_branch: String,
    pub dest_branch: String,
    pub author_name: String,
    pub reviewer_names: Vec<String>,
    pub latest_source_commit: Option<String>,
    pub closure: Option<Closure>,
    pub updated_at: DateTime<Utc>,
}

impl PullRequestCard {
    /// Merges a fresh payload snapshot into whatever is already stored for the same key.
    ///
    /// Payload content always wins for descriptive fields. A snapshot without a source commit
    /// keeps the stored one so late build statuses still find the card, and an existing
    /// closure survives replays of earlier events.
    pub fn merge_snapshot(
        existing: Option<PullRequestCard>,
        repository: &str,
        snapshot: &PullRequestSnapshot,
        now: DateTime<Utc>,
    ) -> Self {
        let key = PrKey::new(repository, snapshot.number);
        let (stored_commit, closure) = match existing {
            Some(card) => (card.latest_source_commit, card.closure),
            None => (None, None),
        };

        Self {
            key,
            title: snapshot.title.clone(),
            url: snapshot.url.clone(),
            source_branch: snapshot.source_branch.clone(),
            dest_branch: snapshot.dest_branch.clone(),
            author_name: snapshot.author_name.clone(),
            reviewer_names: snapshot.reviewer_names.clone(),
            latest_source_commit: snapshot.source_commit.clone().or(stored_commit),
            closure,
            updated_at: now,
        }
    }

    pub fn close(mut self, kind: ClosureKind, actor_name: impl Into<String>) -> Self {
        self.closure = Some(Closure { kind, actor_name: actor_name.into() });
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CardMessagePointer {
    pub key: PrKey,
    pub channel: ChannelId,
    pub message: MessageId,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{ClosureKind, PullRequestCard};
    use crate::domain::event::PullRequestSnapshot;

    fn snapshot(commit: Option<&str>) -> PullRequestSnapshot {
        PullRequestSnapshot {
            number: 7,
            title: "Add retry budget".to_string(),
            url: "https://bitbucket.org/acme/api/pull-requests/7".to_string(),
            source_branch: "feature/retry".to_string(),
            dest_branch: "main".to_string(),
            author_name: "carol".to_string(),
            reviewer_names: vec!["alice".to_string(), "bob".to_string()],
            source_commit: commit.map(str::to_string),
        }
    }

    #[test]
    fn merge_keeps_stored_commit_when_payload_has_none() {
        let first =
            PullRequestCard::merge_snapshot(None, "acme/api", &snapshot(Some("abc123")), Utc::now());
        let second =
            PullRequestCard::merge_snapshot(Some(first), "acme/api", &snapshot(None), Utc::now());

        assert_eq!(second.latest_source_commit.as_deref(), Some("abc123"));
        assert_eq!(second.reviewer_names, vec!["alice", "bob"]);
    }

    #[test]
    fn merge_prefers_payload_commit_and_keeps_closure() {
        let closed =
            PullRequestCard::merge_snapshot(None, "acme/api", &snapshot(Some("abc123")), Utc::now())
                .close(ClosureKind::Merged, "dave");
        let replayed = PullRequestCard::merge_snapshot(
            Some(closed),
            "acme/api",
            &snapshot(Some("def456")),
            Utc::now(),
        );

        assert_eq!(replayed.latest_source_commit.as_deref(), Some("def456"));
        assert_eq!(replayed.closure.map(|closure| closure.kind), Some(ClosureKind::Merged));
    }

    #[test]
    fn pr_key_display_is_repository_and_number() {
        let card = PullRequestCard::merge_snapshot(None, "acme/api", &snapshot(None), Utc::now());
        assert_eq!(card.key.to_string(), "acme/api#7");
    }
}
