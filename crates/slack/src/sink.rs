use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use prcard_core::domain::card::{ChannelId, MessageId};

use crate::blocks::MessageTemplate;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("slack transport failure: {0}")]
    Transport(String),
    #[error("slack api error: {0}")]
    Api(String),
    #[error("malformed slack response: {0}")]
    Decode(String),
}

/// Outbound chat capability. Each call targets exactly one channel.
#[async_trait]
pub trait MessagingSink: Send + Sync {
    async fn post_message(
        &self,
        channel: &ChannelId,
        message: &MessageTemplate,
    ) -> Result<MessageId, SinkError>;

    async fn update_message(
        &self,
        channel: &ChannelId,
        message_id: &MessageId,
        message: &MessageTemplate,
    ) -> Result<(), SinkError>;

    async fn post_thread_reply(
        &self,
        channel: &ChannelId,
        parent: &MessageId,
        text: &str,
    ) -> Result<(), SinkError>;
}

#[derive(Debug, Deserialize)]
struct WebApiResponse {
    ok: bool,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Posts through `chat.postMessage` and `chat.update` with a bot token.
pub struct SlackWebApiSink {
    client: reqwest::Client,
    api_base_url: String,
    bot_token: SecretString,
}

impl SlackWebApiSink {
    pub fn new(
        api_base_url: impl Into<String>,
        bot_token: SecretString,
        timeout: Duration,
    ) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| SinkError::Transport(error.to_string()))?;
        Ok(Self {
            client,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            bot_token,
        })
    }

    async fn call(&self, method: &str, body: Value) -> Result<WebApiResponse, SinkError> {
        let url = format!("{}/{method}", self.api_base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.bot_token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|error| SinkError::Transport(error.to_string()))?;

        if !response.status().is_success() {
            return Err(SinkError::Transport(format!("{method} returned {}", response.status())));
        }

        let payload: WebApiResponse =
            response.json().await.map_err(|error| SinkError::Decode(error.to_string()))?;
        if !payload.ok {
            return Err(SinkError::Api(
                payload.error.unwrap_or_else(|| "unknown_error".to_string()),
            ));
        }
        debug!(event_name = "slack.api.call", method, "slack web api call succeeded");
        Ok(payload)
    }
}

#[async_trait]
impl MessagingSink for SlackWebApiSink {
    async fn post_message(
        &self,
        channel: &ChannelId,
        message: &MessageTemplate,
    ) -> Result<MessageId, SinkError> {
        let response = self
            .call(
                "chat.postMessage",
                json!({
                    "channel": channel.0,
                    "text": message.fallback_text,
                    "blocks": message.blocks,
                    "unfurl_links": false,
                }),
            )
            .await?;
        response
            .ts
            .map(MessageId)
            .ok_or_else(|| SinkError::Decode("chat.postMessage response has no ts".to_string()))
    }

    async fn update_message(
        &self,
        channel: &ChannelId,
        message_id: &MessageId,
        message: &MessageTemplate,
    ) -> Result<(), SinkError> {
        self.call(
            "chat.update",
            json!({
                "channel": channel.0,
                "ts": message_id.0,
                "text": message.fallback_text,
                "blocks": message.blocks,
            }),
        )
        .await?;
        Ok(())
    }

    async fn post_thread_reply(
        &self,
        channel: &ChannelId,
        parent: &MessageId,
        text: &str,
    ) -> Result<(), SinkError> {
        self.call(
            "chat.postMessage",
            json!({
                "channel": channel.0,
                "thread_ts": parent.0,
                "text": text,
            }),
        )
        .await?;
        Ok(())
    }
}

/// One outbound call captured by [`RecordingMessagingSink`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SentMessage {
    Posted { channel: ChannelId, message_id: MessageId, message: MessageTemplate },
    Updated { channel: ChannelId, message_id: MessageId, message: MessageTemplate },
    ThreadReply { channel: ChannelId, parent: MessageId, text: String },
}

/// In-process sink that records every call and can be told to fail for given channels.
#[derive(Default)]
pub struct RecordingMessagingSink {
    sent: Mutex<Vec<SentMessage>>,
    failing_channels: Mutex<HashSet<ChannelId>>,
    next_id: AtomicU64,
}

impl RecordingMessagingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_channel(&self, channel: ChannelId) {
        self.failing_channels.lock().await.insert(channel);
    }

    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }

    async fn check_channel(&self, channel: &ChannelId) -> Result<(), SinkError> {
        if self.failing_channels.lock().await.contains(channel) {
            return Err(SinkError::Api("channel_not_found".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessagingSink for RecordingMessagingSink {
    async fn post_message(
        &self,
        channel: &ChannelId,
        message: &MessageTemplate,
    ) -> Result<MessageId, SinkError> {
        self.check_channel(channel).await?;
        let sequence = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let message_id = MessageId(format!("1700000000.{sequence:06}"));
        self.sent.lock().await.push(SentMessage::Posted {
            channel: channel.clone(),
            message_id: message_id.clone(),
            message: message.clone(),
        });
        Ok(message_id)
    }

    async fn update_message(
        &self,
        channel: &ChannelId,
        message_id: &MessageId,
        message: &MessageTemplate,
    ) -> Result<(), SinkError> {
        self.check_channel(channel).await?;
        self.sent.lock().await.push(SentMessage::Updated {
            channel: channel.clone(),
            message_id: message_id.clone(),
            message: message.clone(),
        });
        Ok(())
    }

    async fn post_thread_reply(
        &self,
        channel: &ChannelId,
        parent: &MessageId,
        text: &str,
    ) -> Result<(), SinkError> {
        self.check_channel(channel).await?;
        self.sent.lock().await.push(SentMessage::ThreadReply {
            channel: channel.clone(),
            parent: parent.clone(),
            text: text.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use prcard_core::domain::card::{ChannelId, MessageId};

    use super::{MessagingSink, RecordingMessagingSink, SentMessage, SinkError};
    use crate::blocks::MessageBuilder;

    #[tokio::test]
    async fn recording_sink_assigns_distinct_ids_and_records_calls() {
        let sink = RecordingMessagingSink::new();
        let channel = ChannelId("C1".to_string());
        let message = MessageBuilder::new("PR #1: Fix").build();

        let first = sink.post_message(&channel, &message).await.expect("first post");
        let second = sink.post_message(&channel, &message).await.expect("second post");
        sink.post_thread_reply(&channel, &first, "hello").await.expect("reply");

        assert_ne!(first, second);
        let sent = sink.sent().await;
        assert_eq!(sent.len(), 3);
        assert_eq!(
            sent[2],
            SentMessage::ThreadReply { channel, parent: first, text: "hello".to_string() }
        );
    }

    #[tokio::test]
    async fn failing_channel_rejects_without_recording() {
        let sink = RecordingMessagingSink::new();
        let channel = ChannelId("C-broken".to_string());
        sink.fail_channel(channel.clone()).await;

        let message = MessageBuilder::new("x").build();
        let result =
            sink.update_message(&channel, &MessageId("1.0".to_string()), &message).await;

        assert!(matches!(result, Err(SinkError::Api(_))));
        assert!(sink.sent().await.is_empty());
    }
}
