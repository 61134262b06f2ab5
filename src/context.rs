//! Conversation context tracking.
//!
//! Maintains a sliding window of recent messages per channel so the
//! classifier can judge the newest message against short conversational
//! context.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;

/// Maximum messages kept per channel.
pub const MAX_CONTEXT_MESSAGES: usize = 10;

/// A message with context metadata.
#[derive(Debug, Clone)]
pub struct ContextMessage {
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Context tracker for multiple channels.
pub struct ContextTracker {
    /// Channel id -> recent messages.
    channels: DashMap<u64, VecDeque<ContextMessage>>,
    depth: usize,
}

impl Default for ContextTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextTracker {
    /// Create a new context tracker with the default window.
    pub fn new() -> Self {
        Self::with_depth(MAX_CONTEXT_MESSAGES)
    }

    /// Create a tracker with a custom window depth.
    pub fn with_depth(depth: usize) -> Self {
        Self {
            channels: DashMap::new(),
            depth: depth.max(1),
        }
    }

    /// Add a message to a channel's context.
    pub fn add_message(&self, channel_id: u64, message: ContextMessage) {
        let mut entry = self.channels.entry(channel_id).or_default();
        entry.push_back(message);

        while entry.len() > self.depth {
            entry.pop_front();
        }
    }

    /// Snapshot the recent messages for a channel, oldest first.
    pub fn recent(&self, channel_id: u64) -> Vec<ContextMessage> {
        self.channels
            .get(&channel_id)
            .map(|msgs| msgs.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Render a channel's context for inclusion in a classifier prompt.
    pub fn format_for_prompt(&self, channel_id: u64) -> String {
        let messages = self.recent(channel_id);
        if messages.is_empty() {
            return String::new();
        }

        let mut parts = Vec::new();
        parts.push("## Recent Conversation Context".to_string());
        parts.push("The preceding messages in this channel:".to_string());
        parts.push(String::new());

        for msg in &messages {
            parts.push(format!(
                "[{}] {}: {}",
                msg.timestamp.format("%H:%M:%S"),
                msg.author_name,
                msg.content
            ));
        }

        parts.join("\n")
    }

    /// Clear context for a channel.
    pub fn clear_channel(&self, channel_id: u64) {
        self.channels.remove(&channel_id);
    }

    /// Get the number of messages held for a channel.
    pub fn message_count(&self, channel_id: u64) -> usize {
        self.channels.get(&channel_id).map(|m| m.len()).unwrap_or(0)
    }
}
