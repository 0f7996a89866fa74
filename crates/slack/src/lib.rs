//! Slack surface for the PR card relay.
//!
//! - **Block Kit** (`blocks`) - typed message model and builder
//! - **Card** (`card`) - pure card renderer and thread-reply formatters
//! - **Sink** (`sink`) - the `MessagingSink` capability, a Web API implementation and a
//!   recording implementation for tests
//!
//! ```text
//! ReconciliationEngine → card::pr_card_message → MessagingSink → chat.postMessage / chat.update
//! ```

pub mod blocks;
pub mod card;
pub mod sink;

pub use blocks::{Block, MessageBuilder, MessageTemplate, TextObject};
pub use card::{pr_card_message, CardView};
pub use sink::{MessagingSink, RecordingMessagingSink, SentMessage, SinkError, SlackWebApiSink};
