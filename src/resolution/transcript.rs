//! Debate transcripts
//!
//! Messages belong to a session's channel and are append-only. The resolver
//! only reads them.

use crate::error::{DebateError, Result};
use crate::types::{ChannelId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Longest accepted message body, in characters
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// One transcript entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Messaging collaborator
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    /// All messages of a channel ordered by timestamp
    async fn transcript(&self, channel_id: ChannelId) -> Result<Vec<Message>>;

    /// Append a message to a channel
    async fn append(&self, channel_id: ChannelId, author_id: &str, text: &str) -> Result<Message>;
}

/// In-memory transcript storage
#[derive(Debug, Default)]
pub struct InMemoryTranscriptStore {
    channels: RwLock<HashMap<ChannelId, Vec<Message>>>,
}

impl InMemoryTranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a message with an explicit timestamp (imports, tests)
    pub fn insert(&self, message: Message) -> Result<()> {
        let mut channels = self
            .channels
            .write()
            .map_err(|_| DebateError::lock_poisoned("transcripts write"))?;
        channels
            .entry(message.channel_id)
            .or_default()
            .push(message);
        Ok(())
    }

    pub fn message_count(&self, channel_id: ChannelId) -> usize {
        self.channels
            .read()
            .map(|channels| channels.get(&channel_id).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }
}

#[async_trait]
impl TranscriptSource for InMemoryTranscriptStore {
    async fn transcript(&self, channel_id: ChannelId) -> Result<Vec<Message>> {
        let channels = self
            .channels
            .read()
            .map_err(|_| DebateError::lock_poisoned("transcripts read"))?;

        let mut messages = channels.get(&channel_id).cloned().unwrap_or_default();
        // Stable: equal timestamps keep insertion order
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(messages)
    }

    async fn append(&self, channel_id: ChannelId, author_id: &str, text: &str) -> Result<Message> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DebateError::InvalidRequest {
                reason: "Message text cannot be empty".to_string(),
            });
        }
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(DebateError::InvalidRequest {
                reason: format!("Message exceeds {} characters", MAX_MESSAGE_CHARS),
            });
        }

        let message = Message {
            channel_id,
            author_id: author_id.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
        };
        self.insert(message.clone())?;
        Ok(message)
    }
}
