//! Conversation transcript collection.
//!
//! Assistant transcripts arrive as fragments while a response streams; they
//! are accumulated per response and emitted as one message. User transcripts
//! arrive complete. Finished messages go to a [`TranscriptSink`], typically
//! a chat-history store.

use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Who said it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finished transcript entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptMessage {
    pub role: Role,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    /// The response was cut short by the user
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub interrupted: bool,
}

/// Receives finished transcript messages.
pub trait TranscriptSink: Send {
    fn emit(&self, message: TranscriptMessage);
}

/// Logs transcripts through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TranscriptSink for TracingSink {
    fn emit(&self, message: TranscriptMessage) {
        info!(
            role = %message.role,
            interrupted = message.interrupted,
            "{}",
            message.text
        );
    }
}

impl TranscriptSink for mpsc::UnboundedSender<TranscriptMessage> {
    fn emit(&self, message: TranscriptMessage) {
        if self.send(message).is_err() {
            debug!("Transcript receiver dropped");
        }
    }
}

/// Fragment buffer for the assistant transcript of one response.
#[derive(Debug, Default)]
pub struct TranscriptAccumulator {
    buffer: String,
    item_id: Option<String>,
}

impl TranscriptAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment in arrival order.
    pub fn push(&mut self, fragment: &str) {
        self.buffer.push_str(fragment);
    }

    pub fn set_item(&mut self, item_id: Option<String>) {
        self.item_id = item_id;
    }

    pub fn is_blank(&self) -> bool {
        self.buffer.trim().is_empty()
    }

    /// Take the accumulated text as one message.
    ///
    /// Returns `None`, and clears the buffer, when only whitespace was
    /// accumulated.
    pub fn take(&mut self, interrupted: bool) -> Option<TranscriptMessage> {
        let text = std::mem::take(&mut self.buffer);
        let item_id = self.item_id.take();
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(TranscriptMessage {
            role: Role::Assistant,
            text: text.to_string(),
            item_id,
            interrupted,
        })
    }

    pub fn discard(&mut self) {
        self.buffer.clear();
        self.item_id = None;
    }
}
