//! Applies typed webhook events to the stores and republishes the affected cards.
//!
//! Each routine merges the new fact into what is stored, re-renders from stored state and
//! then fans out to every destination channel. A sink failure in one channel is logged and
//! counted; the remaining channels still run. A store failure aborts the event.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use prcard_core::domain::build::BuildStatusRecord;
use prcard_core::domain::card::{
    CardMessagePointer, ChannelId, ClosureKind, PrKey, PullRequestCard,
};
use prcard_core::domain::event::{
    CommitStatusEvent, PullRequestAction, PullRequestEvent, WebhookEvent,
};
use prcard_db::{RepositoryError, Stores};
use prcard_slack::blocks::MessageTemplate;
use prcard_slack::card::{
    approval_status_line, approved_reply, build_label, build_status_reply, closure_line,
    comment_reply, join_labels, pr_card_message, unapproved_reply, CardView,
};
use prcard_slack::sink::MessagingSink;

use crate::identity::IdentityResolver;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("store access failed: {0}")]
    Store(#[from] RepositoryError),
}

/// What one event did to the chat workspace.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub posted: usize,
    pub updated: usize,
    pub replies: usize,
    pub failures: usize,
}

pub struct ReconciliationEngine {
    stores: Stores,
    sink: Arc<dyn MessagingSink>,
    identities: IdentityResolver,
    web_base_url: String,
}

impl ReconciliationEngine {
    pub fn new(stores: Stores, sink: Arc<dyn MessagingSink>, web_base_url: &str) -> Self {
        let identities = IdentityResolver::new(stores.identities.clone());
        Self {
            stores,
            sink,
            identities,
            web_base_url: web_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn apply(
        &self,
        event: WebhookEvent,
        correlation_id: &str,
    ) -> Result<ReconcileReport, ReconcileError> {
        match event {
            WebhookEvent::PullRequest(event) => {
                self.apply_pull_request(event, correlation_id).await
            }
            WebhookEvent::CommitStatus(event) => {
                self.apply_commit_status(event, correlation_id).await
            }
        }
    }

    async fn apply_pull_request(
        &self,
        event: PullRequestEvent,
        correlation_id: &str,
    ) -> Result<ReconcileReport, ReconcileError> {
        let key = PrKey::new(event.repository.as_str(), event.pull_request.number);
        let actor_label = self.identities.resolve(&event.actor_name).await;

        if let PullRequestAction::Commented { body } = &event.action {
            let reply = comment_reply(&actor_label, body);
            return self.reply_under_existing(&key, &reply, correlation_id).await;
        }

        let existing = self.stores.cards.find(&key).await?;
        let mut card = PullRequestCard::merge_snapshot(
            existing,
            &event.repository,
            &event.pull_request,
            Utc::now(),
        );

        let reply = match &event.action {
            PullRequestAction::Created => None,
            PullRequestAction::Merged => {
                card = card.close(ClosureKind::Merged, event.actor_name.as_str());
                Some(closure_line(ClosureKind::Merged, &actor_label))
            }
            PullRequestAction::Declined => {
                card = card.close(ClosureKind::Declined, event.actor_name.as_str());
                Some(closure_line(ClosureKind::Declined, &actor_label))
            }
            PullRequestAction::Approved => {
                self.stores.approvals.add(&key, &event.actor_name).await?;
                Some(approved_reply(&actor_label))
            }
            PullRequestAction::Unapproved => {
                self.stores.approvals.remove(&key, &event.actor_name).await?;
                Some(unapproved_reply(&actor_label))
            }
            PullRequestAction::Commented { .. } => None,
        };

        self.stores.cards.save(card.clone()).await?;
        let message = self.render(&card).await?;

        let report = match reply {
            None => self.publish_created(&key, &message, correlation_id).await?,
            Some(reply) => self.publish_update(&key, &message, &reply, correlation_id).await?,
        };
        info!(
            event_name = "relay.reconcile.pull_request",
            correlation_id,
            repository = %key.repository,
            pr_number = key.number,
            posted = report.posted,
            updated = report.updated,
            replies = report.replies,
            failures = report.failures,
            "pull request event reconciled"
        );
        Ok(report)
    }

    async fn apply_commit_status(
        &self,
        event: CommitStatusEvent,
        correlation_id: &str,
    ) -> Result<ReconcileReport, ReconcileError> {
        let record = BuildStatusRecord {
            repository: event.repository,
            commit_hash: event.commit_hash,
            state: event.state,
            name: event.name,
            url: event.url,
            updated_at: Utc::now(),
        };
        self.stores.builds.upsert(record.clone()).await?;

        let cards =
            self.stores.cards.find_by_commit(&record.repository, &record.commit_hash).await?;
        let reply = build_status_reply(&record);
        let mut report = ReconcileReport::default();

        for card in cards {
            let message = self.render(&card).await?;
            let pointers = self.stores.pointers.list_for_pr(&card.key).await?;
            for pointer in &pointers {
                self.edit_and_reply(pointer, &message, Some(&reply), correlation_id, &mut report)
                    .await;
            }
        }

        info!(
            event_name = "relay.reconcile.commit_status",
            correlation_id,
            repository = %record.repository,
            commit_hash = %record.commit_hash,
            state = record.state.as_wire(),
            updated = report.updated,
            failures = report.failures,
            "build status reconciled"
        );
        Ok(report)
    }

    /// Renders the card from stored approvals, build status and resolved identities.
    async fn render(&self, card: &PullRequestCard) -> Result<MessageTemplate, ReconcileError> {
        let approvers = self.stores.approvals.list(&card.key).await?;
        let build = match card.latest_source_commit.as_deref() {
            Some(commit) => self.stores.builds.find(&card.key.repository, commit).await?,
            None => None,
        };

        let status_line = match &card.closure {
            Some(closure) => {
                let actor_label = self.identities.resolve(&closure.actor_name).await;
                Some(closure_line(closure.kind, &actor_label))
            }
            None => approval_status_line(&self.identities.resolve_all(&approvers).await),
        };

        let view = CardView {
            number: card.key.number,
            title: card.title.clone(),
            url: card.url.clone(),
            repository: card.key.repository.clone(),
            repository_url: format!("{}/{}", self.web_base_url, card.key.repository),
            source_branch: card.source_branch.clone(),
            dest_branch: card.dest_branch.clone(),
            author_label: self.identities.resolve(&card.author_name).await,
            reviewers_label: join_labels(&self.identities.resolve_all(&card.reviewer_names).await),
            build_label: build_label(build.as_ref()),
            status_line,
        };
        Ok(pr_card_message(&view))
    }

    /// Edits the card where a pointer exists for a channel, otherwise posts and records one.
    async fn publish_created(
        &self,
        key: &PrKey,
        message: &MessageTemplate,
        correlation_id: &str,
    ) -> Result<ReconcileReport, ReconcileError> {
        let channels = self.stores.subscriptions.channels_for_repository(&key.repository).await?;
        let mut report = ReconcileReport::default();

        for channel in channels {
            match self.stores.pointers.find(key, &channel).await? {
                Some(pointer) => {
                    self.edit_and_reply(&pointer, message, None, correlation_id, &mut report).await;
                }
                None => {
                    self.post_and_record(key, &channel, message, correlation_id, &mut report)
                        .await?;
                }
            }
        }
        Ok(report)
    }

    /// Edits every existing card and threads `reply` under it. With no card anywhere yet, posts
    /// a fresh card per subscribed channel instead.
    async fn publish_update(
        &self,
        key: &PrKey,
        message: &MessageTemplate,
        reply: &str,
        correlation_id: &str,
    ) -> Result<ReconcileReport, ReconcileError> {
        let pointers = self.stores.pointers.list_for_pr(key).await?;
        let mut report = ReconcileReport::default();

        if pointers.is_empty() {
            info!(
                event_name = "relay.reconcile.fallback_post",
                correlation_id,
                repository = %key.repository,
                pr_number = key.number,
                "no card recorded for pull request, posting fresh cards"
            );
            let channels =
                self.stores.subscriptions.channels_for_repository(&key.repository).await?;
            for channel in channels {
                self.post_and_record(key, &channel, message, correlation_id, &mut report).await?;
            }
            return Ok(report);
        }

        for pointer in &pointers {
            self.edit_and_reply(pointer, message, Some(reply), correlation_id, &mut report).await;
        }
        Ok(report)
    }

    async fn reply_under_existing(
        &self,
        key: &PrKey,
        reply: &str,
        correlation_id: &str,
    ) -> Result<ReconcileReport, ReconcileError> {
        let pointers = self.stores.pointers.list_for_pr(key).await?;
        let mut report = ReconcileReport::default();

        for pointer in &pointers {
            match self.sink.post_thread_reply(&pointer.channel, &pointer.message, reply).await {
                Ok(()) => report.replies += 1,
                Err(error) => {
                    report.failures += 1;
                    warn!(
                        event_name = "relay.sink.reply_failed",
                        correlation_id,
                        repository = %key.repository,
                        pr_number = key.number,
                        channel_id = %pointer.channel,
                        error = %error,
                        "thread reply failed"
                    );
                }
            }
        }
        Ok(report)
    }

    async fn edit_and_reply(
        &self,
        pointer: &CardMessagePointer,
        message: &MessageTemplate,
        reply: Option<&str>,
        correlation_id: &str,
        report: &mut ReconcileReport,
    ) {
        let updated = self.sink.update_message(&pointer.channel, &pointer.message, message).await;
        if let Err(error) = updated {
            report.failures += 1;
            warn!(
                event_name = "relay.sink.update_failed",
                correlation_id,
                repository = %pointer.key.repository,
                pr_number = pointer.key.number,
                channel_id = %pointer.channel,
                error = %error,
                "card update failed"
            );
            return;
        }
        report.updated += 1;

        let Some(reply) = reply else {
            return;
        };
        match self.sink.post_thread_reply(&pointer.channel, &pointer.message, reply).await {
            Ok(()) => report.replies += 1,
            Err(error) => {
                report.failures += 1;
                warn!(
                    event_name = "relay.sink.reply_failed",
                    correlation_id,
                    repository = %pointer.key.repository,
                    pr_number = pointer.key.number,
                    channel_id = %pointer.channel,
                    error = %error,
                    "thread reply failed"
                );
            }
        }
    }

    async fn post_and_record(
        &self,
        key: &PrKey,
        channel: &ChannelId,
        message: &MessageTemplate,
        correlation_id: &str,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        let message_id = match self.sink.post_message(channel, message).await {
            Ok(message_id) => message_id,
            Err(error) => {
                report.failures += 1;
                warn!(
                    event_name = "relay.sink.post_failed",
                    correlation_id,
                    repository = %key.repository,
                    pr_number = key.number,
                    channel_id = %channel,
                    error = %error,
                    "card post failed"
                );
                return Ok(());
            }
        };
        report.posted += 1;

        let pointer =
            CardMessagePointer { key: key.clone(), channel: channel.clone(), message: message_id };
        if !self.stores.pointers.record_if_absent(pointer).await? {
            warn!(
                event_name = "relay.reconcile.pointer_race",
                correlation_id,
                repository = %key.repository,
                pr_number = key.number,
                channel_id = %channel,
                "card pointer was recorded concurrently, keeping the existing one"
            );
        }
        Ok(())
    }
}
