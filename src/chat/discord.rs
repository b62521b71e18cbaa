//! Discord REST client.
//!
//! Posts embeds with a bot token. A thread is looked up by name among the
//! channel's active and archived threads before one is created, and the
//! result is remembered for the lifetime of the process.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::chat::{ChatPlatform, MessageHandle, Payload};
use crate::error::ChatError;

/// Public thread, archived after a week of inactivity.
const PUBLIC_THREAD: u8 = 11;
const THREAD_ARCHIVE_MINUTES: u32 = 10080;

pub struct DiscordClient {
    http: reqwest::Client,
    base_url: String,
    token: SecretString,
    threads: Mutex<HashMap<(String, String), String>>,
}

#[derive(Debug, Serialize)]
struct MessageBody<'a> {
    embeds: [Embed<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Embed<'a> {
    title: &'a str,
    color: u32,
    fields: Vec<EmbedField<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    footer: Option<EmbedFooter<'a>>,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct EmbedField<'a> {
    name: &'a str,
    value: &'a str,
    inline: bool,
}

#[derive(Debug, Serialize)]
struct EmbedFooter<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct ThreadBody<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: u8,
    auto_archive_duration: u32,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ChannelInfo {
    guild_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ThreadList {
    #[serde(default)]
    threads: Vec<ThreadInfo>,
}

#[derive(Debug, Deserialize)]
struct ThreadInfo {
    id: String,
    name: String,
    parent_id: Option<String>,
}

impl ThreadList {
    fn find(self, parent_id: &str, name: &str) -> Option<String> {
        self.threads
            .into_iter()
            .find(|t| t.name == name && t.parent_id.as_deref() == Some(parent_id))
            .map(|t| t.id)
    }
}

impl<'a> MessageBody<'a> {
    fn from_payload(payload: &'a Payload) -> Self {
        Self {
            embeds: [Embed {
                title: &payload.title,
                color: payload.color,
                fields: payload
                    .fields
                    .iter()
                    .map(|f| EmbedField {
                        name: &f.name,
                        value: &f.value,
                        inline: f.inline,
                    })
                    .collect(),
                footer: payload.footer.as_deref().map(|text| EmbedFooter { text }),
                timestamp: chrono::Utc::now().to_rfc3339(),
            }],
        }
    }
}

impl DiscordClient {
    pub fn new(base_url: &str, token: SecretString) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            threads: Mutex::new(HashMap::new()),
        })
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.token.expose_secret())
    }

    async fn check(response: reqwest::Response, target: &str) -> Result<reqwest::Response, ChatError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ChatError::NotFound(target.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status { status, body });
        }
        Ok(response)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        target: &str,
    ) -> Result<T, ChatError> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header("Authorization", self.auth())
            .send()
            .await?;
        Ok(Self::check(response, target).await?.json().await?)
    }

    /// Existing thread under `channel_id` named `title`, active ones first.
    async fn find_thread(&self, channel_id: &str, title: &str) -> Result<Option<String>, ChatError> {
        let channel: ChannelInfo = self
            .get_json(&format!("/channels/{channel_id}"), channel_id)
            .await?;
        if let Some(guild_id) = channel.guild_id {
            let active: ThreadList = self
                .get_json(&format!("/guilds/{guild_id}/threads/active"), &guild_id)
                .await?;
            if let Some(thread_id) = active.find(channel_id, title) {
                return Ok(Some(thread_id));
            }
        }
        let archived: ThreadList = self
            .get_json(
                &format!("/channels/{channel_id}/threads/archived/public"),
                channel_id,
            )
            .await?;
        Ok(archived.find(channel_id, title))
    }

    async fn delete_one(&self, handle: &MessageHandle) -> Result<(), ChatError> {
        let url = format!(
            "{}/channels/{}/messages/{}",
            self.base_url, handle.channel_id, handle.message_id
        );
        let response = self
            .http
            .delete(&url)
            .header("Authorization", self.auth())
            .send()
            .await?;
        Self::check(response, &handle.to_string()).await?;
        Ok(())
    }
}

#[async_trait]
impl ChatPlatform for DiscordClient {
    #[instrument(skip(self, payload))]
    async fn send_message(
        &self,
        channel_id: &str,
        payload: &Payload,
    ) -> Result<MessageHandle, ChatError> {
        let url = format!("{}/channels/{}/messages", self.base_url, channel_id);
        let response = self
            .http
            .post(&url)
            .header("Authorization", self.auth())
            .json(&MessageBody::from_payload(payload))
            .send()
            .await?;
        let created: Created = Self::check(response, channel_id).await?.json().await?;
        Ok(MessageHandle::new(channel_id, created.id))
    }

    #[instrument(skip(self, payload), fields(handle = %handle))]
    async fn edit_message(
        &self,
        handle: &MessageHandle,
        payload: &Payload,
    ) -> Result<(), ChatError> {
        let url = format!(
            "{}/channels/{}/messages/{}",
            self.base_url, handle.channel_id, handle.message_id
        );
        let response = self
            .http
            .patch(&url)
            .header("Authorization", self.auth())
            .json(&MessageBody::from_payload(payload))
            .send()
            .await?;
        Self::check(response, &handle.to_string()).await?;
        Ok(())
    }

    async fn delete_messages(&self, handles: &[MessageHandle]) -> Result<(), ChatError> {
        let mut first_error = None;
        for handle in handles {
            match self.delete_one(handle).await {
                Ok(()) => {}
                Err(ChatError::NotFound(_)) => {
                    warn!(handle = %handle, "Message already deleted");
                }
                Err(e) => {
                    warn!(handle = %handle, error = %e, "Failed to delete message");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn ensure_thread(&self, channel_id: &str, title: &str) -> Result<String, ChatError> {
        let key = (channel_id.to_string(), title.to_string());
        let mut threads = self.threads.lock().await;
        if let Some(thread_id) = threads.get(&key) {
            return Ok(thread_id.clone());
        }

        if let Some(thread_id) = self.find_thread(channel_id, title).await? {
            info!(channel_id, thread_id = %thread_id, title, "Reusing existing thread");
            threads.insert(key, thread_id.clone());
            return Ok(thread_id);
        }

        let url = format!("{}/channels/{}/threads", self.base_url, channel_id);
        let response = self
            .http
            .post(&url)
            .header("Authorization", self.auth())
            .json(&ThreadBody {
                name: title,
                kind: PUBLIC_THREAD,
                auto_archive_duration: THREAD_ARCHIVE_MINUTES,
            })
            .send()
            .await?;
        let created: Created = Self::check(response, channel_id).await?.json().await?;

        info!(channel_id, thread_id = %created.id, title, "Thread created");
        threads.insert(key, created.id.clone());
        Ok(created.id)
    }

    #[instrument(skip(self))]
    async fn delete_thread(&self, thread_id: &str) -> Result<(), ChatError> {
        self.threads.lock().await.retain(|_, id| id != thread_id);

        let url = format!("{}/channels/{}", self.base_url, thread_id);
        let response = self
            .http
            .delete(&url)
            .header("Authorization", self.auth())
            .send()
            .await?;
        Self::check(response, thread_id).await?;
        info!(thread_id, "Thread deleted");
        Ok(())
    }
}
