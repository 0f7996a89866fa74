//! Pure rendering of the pull-request card and the short thread replies posted under it.
//!
//! Everything here is deterministic: identical inputs produce byte-identical messages, so an
//! unchanged card can be re-edited without visible churn.

use prcard_core::domain::build::{BuildState, BuildStatusRecord};
use prcard_core::domain::card::ClosureKind;

use crate::blocks::{escape_mrkdwn, MessageBuilder, MessageTemplate};

/// Placeholder for an empty reviewer list or an unknown build.
pub const NO_VALUE: &str = "—";
/// Comment bodies longer than this many characters are cut and suffixed with [`ELLIPSIS`].
pub const COMMENT_REPLY_LIMIT: usize = 300;
pub const ELLIPSIS: &str = "…";

/// Already-resolved inputs for one card rendering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CardView {
    pub number: i64,
    pub title: String,
    pub url: String,
    pub repository: String,
    pub repository_url: String,
    pub source_branch: String,
    pub dest_branch: String,
    pub author_label: String,
    /// Joined reviewer labels, or [`NO_VALUE`].
    pub reviewers_label: String,
    /// Output of [`build_label`].
    pub build_label: String,
    pub status_line: Option<String>,
}

pub fn pr_card_message(view: &CardView) -> MessageTemplate {
    let builder = MessageBuilder::new(format!("PR #{}: {}", view.number, view.title))
        .section("pr.card.summary.v1", |section| {
            section
                .field(format!("*Pull request*\n*<{}|{}>*", view.url, escape_mrkdwn(&view.title)))
                .field(format!("*Repository*\n<{}|{}>", view.repository_url, view.repository));
        })
        .divider("pr.card.divider.summary.v1")
        .section("pr.card.build.v1", |section| {
            section.field(format!("*Build*\n{}", view.build_label)).field(format!(
                "*Branch*\n`{}` → `{}`",
                view.source_branch, view.dest_branch
            ));
        })
        .divider("pr.card.divider.build.v1")
        .section("pr.card.people.v1", |section| {
            section
                .field(format!("*Reviewers*\n{}", view.reviewers_label))
                .field(format!("*Author*\n{}", view.author_label));
        })
        .divider("pr.card.divider.people.v1");

    match view.status_line.as_deref().filter(|line| !line.is_empty()) {
        Some(line) => builder
            .context("pr.card.status.v1", |context| {
                context.mrkdwn(line);
            })
            .build(),
        None => builder.build(),
    }
}

/// Joins resolved labels with `", "`, or [`NO_VALUE`] when there are none.
pub fn join_labels(labels: &[String]) -> String {
    if labels.is_empty() {
        NO_VALUE.to_string()
    } else {
        labels.join(", ")
    }
}

fn build_emoji(state: &BuildState) -> &'static str {
    match state {
        BuildState::Pending => ":hourglass_flowing_sand:",
        BuildState::Success => ":white_check_mark:",
        BuildState::Failure => ":x:",
        BuildState::Stopped => ":octagonal_sign:",
        BuildState::Unknown(_) => ":grey_question:",
    }
}

fn build_link(status: &BuildStatusRecord) -> Option<String> {
    match (status.url.as_deref(), status.name.is_empty()) {
        (Some(url), true) => Some(format!("<{url}|details>")),
        (Some(url), false) => Some(format!("<{url}|{}>", escape_mrkdwn(&status.name))),
        (None, false) => Some(escape_mrkdwn(&status.name)),
        (None, true) => None,
    }
}

pub fn build_label(status: Option<&BuildStatusRecord>) -> String {
    let Some(status) = status else {
        return NO_VALUE.to_string();
    };
    match build_link(status) {
        Some(link) => format!("{} {link}", build_emoji(&status.state)),
        None => build_emoji(&status.state).to_string(),
    }
}

pub fn build_status_reply(status: &BuildStatusRecord) -> String {
    let headline = match &status.state {
        BuildState::Pending => "Build started".to_string(),
        BuildState::Success => "Build passed".to_string(),
        BuildState::Failure => "Build failed".to_string(),
        BuildState::Stopped => "Build stopped".to_string(),
        BuildState::Unknown(raw) => format!("Build: {raw}"),
    };
    match build_link(status) {
        Some(link) => format!("{} {headline}: {link}", build_emoji(&status.state)),
        None => format!("{} {headline}", build_emoji(&status.state)),
    }
}

pub fn closure_line(kind: ClosureKind, actor_label: &str) -> String {
    match kind {
        ClosureKind::Merged => format!(":tada: Merged by {actor_label}"),
        ClosureKind::Declined => format!(":x: Declined by {actor_label}"),
    }
}

pub fn approval_status_line(approver_labels: &[String]) -> Option<String> {
    if approver_labels.is_empty() {
        return None;
    }
    Some(format!(":white_check_mark: Approved by {}", approver_labels.join(", ")))
}

pub fn approved_reply(actor_label: &str) -> String {
    format!(":white_check_mark: {actor_label} approved this PR")
}

pub fn unapproved_reply(actor_label: &str) -> String {
    format!(":leftwards_arrow_with_hook: {actor_label} removed their approval")
}

pub fn comment_reply(actor_label: &str, body: &str) -> String {
    let quoted = truncate_comment(body)
        .lines()
        .map(|line| format!(">{}", escape_mrkdwn(line)))
        .collect::<Vec<_>>()
        .join("\n");
    format!(":speech_balloon: {actor_label} commented:\n{quoted}")
}

/// Cuts `body` to [`COMMENT_REPLY_LIMIT`] characters, appending [`ELLIPSIS`] when anything
/// was dropped.
pub fn truncate_comment(body: &str) -> String {
    match body.char_indices().nth(COMMENT_REPLY_LIMIT) {
        Some((cut, _)) => format!("{}{ELLIPSIS}", &body[..cut]),
        None => body.to_string(),
    }
}
