//! Chat-platform boundary.
//!
//! The sync engine only needs send, edit and delete for messages plus
//! ensure and delete for threads. Everything else about the platform stays
//! behind this trait.

pub mod discord;
pub mod memory;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Opaque reference to a message previously created on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHandle {
    pub channel_id: String,
    pub message_id: String,
}

impl MessageHandle {
    pub fn new(channel_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            message_id: message_id.into(),
        }
    }
}

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel_id, self.message_id)
    }
}

impl FromStr for MessageHandle {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((channel, message)) if !channel.is_empty() && !message.is_empty() => {
                Ok(Self::new(channel, message))
            }
            _ => Err(ChatError::InvalidHandle(s.to_string())),
        }
    }
}

/// Display payload produced by the renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub title: String,
    pub color: u32,
    pub fields: Vec<PayloadField>,
    pub footer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn send_message(&self, channel_id: &str, payload: &Payload)
        -> Result<MessageHandle, ChatError>;

    /// Fails with [`ChatError::NotFound`] when the message is gone.
    async fn edit_message(&self, handle: &MessageHandle, payload: &Payload)
        -> Result<(), ChatError>;

    /// Deletes every handle; already-vanished messages are skipped.
    async fn delete_messages(&self, handles: &[MessageHandle]) -> Result<(), ChatError>;

    /// Returns the channel id of the thread titled `title`, creating it if needed.
    async fn ensure_thread(&self, channel_id: &str, title: &str) -> Result<String, ChatError>;

    /// Fails with [`ChatError::NotFound`] when the thread is gone.
    async fn delete_thread(&self, thread_id: &str) -> Result<(), ChatError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_parse_and_display() {
        let handle: MessageHandle = "123/456".parse().unwrap();
        assert_eq!(handle, MessageHandle::new("123", "456"));
        assert_eq!(handle.to_string(), "123/456");
    }

    #[test]
    fn test_handle_rejects_malformed() {
        assert!("123".parse::<MessageHandle>().is_err());
        assert!("/456".parse::<MessageHandle>().is_err());
        assert!("123/".parse::<MessageHandle>().is_err());
    }
}
