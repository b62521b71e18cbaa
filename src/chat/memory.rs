//! In-memory chat platform used for dry runs.
//!
//! Messages are kept in a map keyed by handle; nothing leaves the process.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::chat::{ChatPlatform, MessageHandle, Payload};
use crate::error::ChatError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatOp {
    Send(MessageHandle),
    Edit(MessageHandle),
    Delete(MessageHandle),
    CreateThread(String),
    DeleteThread(String),
}

#[derive(Default)]
struct DryRunState {
    messages: HashMap<MessageHandle, Payload>,
    threads: HashMap<(String, String), String>,
    log: Vec<ChatOp>,
}

#[derive(Default)]
pub struct InMemoryChat {
    state: Mutex<DryRunState>,
}

impl InMemoryChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn message(&self, handle: &MessageHandle) -> Option<Payload> {
        self.state.lock().await.messages.get(handle).cloned()
    }

    pub async fn message_count(&self) -> usize {
        self.state.lock().await.messages.len()
    }

    pub async fn operations(&self) -> Vec<ChatOp> {
        self.state.lock().await.log.clone()
    }

    pub async fn clear_operations(&self) {
        self.state.lock().await.log.clear();
    }

    /// Drop a message as if a moderator deleted it on the platform.
    pub async fn remove_externally(&self, handle: &MessageHandle) {
        self.state.lock().await.messages.remove(handle);
    }
}

#[async_trait]
impl ChatPlatform for InMemoryChat {
    async fn send_message(
        &self,
        channel_id: &str,
        payload: &Payload,
    ) -> Result<MessageHandle, ChatError> {
        let handle = MessageHandle::new(channel_id, uuid::Uuid::new_v4().to_string());
        let mut state = self.state.lock().await;
        state.messages.insert(handle.clone(), payload.clone());
        state.log.push(ChatOp::Send(handle.clone()));
        info!(handle = %handle, title = %payload.title, "Dry-run message sent");
        Ok(handle)
    }

    async fn edit_message(
        &self,
        handle: &MessageHandle,
        payload: &Payload,
    ) -> Result<(), ChatError> {
        let mut state = self.state.lock().await;
        let Some(existing) = state.messages.get_mut(handle) else {
            return Err(ChatError::NotFound(handle.to_string()));
        };
        *existing = payload.clone();
        state.log.push(ChatOp::Edit(handle.clone()));
        Ok(())
    }

    async fn delete_messages(&self, handles: &[MessageHandle]) -> Result<(), ChatError> {
        let mut state = self.state.lock().await;
        for handle in handles {
            if state.messages.remove(handle).is_some() {
                state.log.push(ChatOp::Delete(handle.clone()));
            }
        }
        Ok(())
    }

    async fn ensure_thread(&self, channel_id: &str, title: &str) -> Result<String, ChatError> {
        let mut state = self.state.lock().await;
        let key = (channel_id.to_string(), title.to_string());
        if let Some(thread_id) = state.threads.get(&key) {
            return Ok(thread_id.clone());
        }
        let thread_id = uuid::Uuid::new_v4().to_string();
        state.threads.insert(key, thread_id.clone());
        state.log.push(ChatOp::CreateThread(thread_id.clone()));
        Ok(thread_id)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<(), ChatError> {
        let mut state = self.state.lock().await;
        let before = state.threads.len();
        state.threads.retain(|_, id| id != thread_id);
        if state.threads.len() == before {
            return Err(ChatError::NotFound(thread_id.to_string()));
        }
        // Messages go with their thread.
        state.messages.retain(|handle, _| handle.channel_id != thread_id);
        state.log.push(ChatOp::DeleteThread(thread_id.to_string()));
        Ok(())
    }
}
