//! Inbound git-host webhook events.
//!
//! Classification happens on the event-key header alone, so that unknown kinds can be
//! dropped before the body is touched. Parsing turns the raw body into a typed event or a
//! [`PayloadError`].

use serde::Deserialize;
use thiserror::Error;

use crate::domain::build::BuildState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WebhookEventKind {
    PullRequestCreated,
    PullRequestMerged,
    PullRequestDeclined,
    PullRequestApproved,
    PullRequestUnapproved,
    PullRequestCommented,
    CommitStatus,
}

impl WebhookEventKind {
    pub fn from_event_key(event_key: &str) -> Option<Self> {
        match event_key.trim() {
            "pullrequest:created" => Some(Self::PullRequestCreated),
            "pullrequest:fulfilled" => Some(Self::PullRequestMerged),
            "pullrequest:rejected" => Some(Self::PullRequestDeclined),
            "pullrequest:approved" => Some(Self::PullRequestApproved),
            "pullrequest:unapproved" => Some(Self::PullRequestUnapproved),
            "pullrequest:comment_created" => Some(Self::PullRequestCommented),
            "repo:commit_status_created" | "repo:commit_status_updated" => {
                Some(Self::CommitStatus)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PullRequestCreated => "created",
            Self::PullRequestMerged => "merged",
            Self::PullRequestDeclined => "declined",
            Self::PullRequestApproved => "approved",
            Self::PullRequestUnapproved => "unapproved",
            Self::PullRequestCommented => "commented",
            Self::CommitStatus => "commit_status",
        }
    }
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not valid json for this event: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is missing required field `{0}`")]
    MissingField(&'static str),
}

/// Everything a PR-scoped payload says about the pull request itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PullRequestSnapshot {
    pub number: i64,
    pub title: String,
    pub url: String,
    pub source_branch: String,
    pub dest_branch: String,
    pub author_name: String,
    pub reviewer_names: Vec<String>,
    pub source_commit: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PullRequestAction {
    Created,
    Merged,
    Declined,
    Approved,
    Unapproved,
    Commented { body: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PullRequestEvent {
    pub repository: String,
    pub actor_name: String,
    pub action: PullRequestAction,
    pub pull_request: PullRequestSnapshot,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitStatusEvent {
    pub repository: String,
    pub commit_hash: String,
    pub state: BuildState,
    pub name: String,
    pub url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookEvent {
    PullRequest(PullRequestEvent),
    CommitStatus(CommitStatusEvent),
}

impl WebhookEvent {
    pub fn parse(kind: WebhookEventKind, raw: &[u8]) -> Result<Self, PayloadError> {
        match kind {
            WebhookEventKind::CommitStatus => {
                let envelope: CommitStatusEnvelope = serde_json::from_slice(raw)?;
                envelope.into_event().map(Self::CommitStatus)
            }
            pull_request_kind => {
                let envelope: PullRequestEnvelope = serde_json::from_slice(raw)?;
                let action = pull_request_action(pull_request_kind, envelope.comment.as_ref())?;
                envelope.into_event(action).map(Self::PullRequest)
            }
        }
    }

    pub fn repository(&self) -> &str {
        match self {
            Self::PullRequest(event) => &event.repository,
            Self::CommitStatus(event) => &event.repository,
        }
    }
}

fn pull_request_action(
    kind: WebhookEventKind,
    comment: Option<&CommentBody>,
) -> Result<PullRequestAction, PayloadError> {
    let action = match kind {
        WebhookEventKind::PullRequestCreated => PullRequestAction::Created,
        WebhookEventKind::PullRequestMerged => PullRequestAction::Merged,
        WebhookEventKind::PullRequestDeclined => PullRequestAction::Declined,
        WebhookEventKind::PullRequestApproved => PullRequestAction::Approved,
        WebhookEventKind::PullRequestUnapproved => PullRequestAction::Unapproved,
        WebhookEventKind::PullRequestCommented => {
            let body = comment
                .map(|comment| comment.content.raw.clone())
                .ok_or(PayloadError::MissingField("comment.content.raw"))?;
            PullRequestAction::Commented { body }
        }
        WebhookEventKind::CommitStatus => return Err(PayloadError::MissingField("pullrequest")),
    };
    Ok(action)
}

#[derive(Debug, Default, Deserialize)]
struct Account {
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Default, Deserialize)]
struct BranchRef {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct CommitRef {
    #[serde(default)]
    hash: String,
}

#[derive(Debug, Default, Deserialize)]
struct Endpoint {
    #[serde(default)]
    branch: BranchRef,
    #[serde(default)]
    commit: Option<CommitRef>,
}

#[derive(Debug, Default, Deserialize)]
struct Href {
    #[serde(default)]
    href: String,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(default)]
    html: Href,
}

#[derive(Debug, Deserialize)]
struct PullRequestBody {
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    source: Endpoint,
    #[serde(default)]
    destination: Endpoint,
    #[serde(default)]
    author: Account,
    #[serde(default)]
    reviewers: Vec<Account>,
    #[serde(default)]
    links: Links,
}

#[derive(Debug, Deserialize)]
struct RepositoryRef {
    #[serde(default)]
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct CommentContent {
    #[serde(default)]
    raw: String,
}

#[derive(Debug, Deserialize)]
struct CommentBody {
    content: CommentContent,
}

#[derive(Debug, Deserialize)]
struct PullRequestEnvelope {
    #[serde(default)]
    actor: Account,
    pullrequest: PullRequestBody,
    repository: RepositoryRef,
    #[serde(default)]
    comment: Option<CommentBody>,
}

impl PullRequestEnvelope {
    fn into_event(self, action: PullRequestAction) -> Result<PullRequestEvent, PayloadError> {
        let repository = non_empty(self.repository.full_name, "repository.full_name")?;
        let pr = self.pullrequest;
        let source_commit =
            pr.source.commit.map(|commit| commit.hash).filter(|hash| !hash.trim().is_empty());

        Ok(PullRequestEvent {
            repository,
            actor_name: self.actor.display_name,
            action,
            pull_request: PullRequestSnapshot {
                number: pr.id,
                title: pr.title,
                url: pr.links.html.href,
                source_branch: pr.source.branch.name,
                dest_branch: pr.destination.branch.name,
                author_name: pr.author.display_name,
                reviewer_names: pr
                    .reviewers
                    .into_iter()
                    .map(|reviewer| reviewer.display_name)
                    .filter(|name| !name.is_empty())
                    .collect(),
                source_commit,
            },
        })
    }
}

#[derive(Debug, Deserialize)]
struct CommitStatusBody {
    #[serde(default)]
    state: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    commit: CommitRef,
}

#[derive(Debug, Deserialize)]
struct CommitStatusEnvelope {
    commit_status: CommitStatusBody,
    repository: RepositoryRef,
}

impl CommitStatusEnvelope {
    fn into_event(self) -> Result<CommitStatusEvent, PayloadError> {
        let repository = non_empty(self.repository.full_name, "repository.full_name")?;
        let status = self.commit_status;
        let commit_hash = non_empty(status.commit.hash, "commit_status.commit.hash")?;

        Ok(CommitStatusEvent {
            repository,
            commit_hash,
            state: BuildState::parse(&status.state),
            name: status.name,
            url: Some(status.url).filter(|url| !url.trim().is_empty()),
        })
    }
}

fn non_empty(value: String, field: &'static str) -> Result<String, PayloadError> {
    if value.trim().is_empty() {
        Err(PayloadError::MissingField(field))
    } else {
        Ok(value)
    }
}
