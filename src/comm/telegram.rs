//! Telegram Bot API adapter (long polling).

use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{ChatPlatform, Update};
use crate::config::TelegramConfig;

/// Telegram rejects messages longer than this many characters.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Long-poll client for one bot token.
pub struct TelegramPlatform {
    client: Client,
    api_base: String,
    token: String,
}

impl std::fmt::Debug for TelegramPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramPlatform")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct RawUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    chat: RawChat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChat {
    id: i64,
}

impl TelegramPlatform {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    pub fn from_config(cfg: &TelegramConfig) -> anyhow::Result<Self> {
        Self::new(&cfg.api_base, &cfg.token)
    }

    fn url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
        timeout: Duration,
    ) -> anyhow::Result<T> {
        let resp = self
            .client
            .post(self.url(method))
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Telegram {method} request failed"))?;

        let status = resp.status();
        let parsed: ApiResponse<T> = resp
            .json()
            .await
            .with_context(|| format!("Telegram {method} returned {status} with an unreadable body"))?;
        if !parsed.ok {
            anyhow::bail!(
                "Telegram {method} returned {status}: {}",
                parsed.description.unwrap_or_default()
            );
        }
        parsed
            .result
            .with_context(|| format!("Telegram {method} response has no result"))
    }
}

#[async_trait]
impl ChatPlatform for TelegramPlatform {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn fetch_updates(&self, offset: i64, timeout: Duration) -> anyhow::Result<Vec<Update>> {
        let body = json!({
            "offset": offset,
            "timeout": timeout.as_secs(),
            "allowed_updates": ["message"],
        });
        let raw: Vec<RawUpdate> = self
            .call("getUpdates", body, timeout + Duration::from_secs(10))
            .await?;
        debug!(count = raw.len(), offset, "fetched updates");

        // Non-message updates are kept (without text) so the offset still
        // moves past them.
        Ok(raw
            .into_iter()
            .map(|u| match u.message {
                Some(msg) => Update {
                    update_id: u.update_id,
                    chat_id: msg.chat.id,
                    text: msg.text,
                },
                None => Update {
                    update_id: u.update_id,
                    chat_id: 0,
                    text: None,
                },
            })
            .collect())
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> anyhow::Result<()> {
        for chunk in crate::utils::chunk_text(text, MAX_MESSAGE_CHARS) {
            if chunk.is_empty() {
                continue;
            }
            let _: serde_json::Value = self
                .call(
                    "sendMessage",
                    json!({"chat_id": chat_id, "text": chunk}),
                    Duration::from_secs(30),
                )
                .await?;
        }
        Ok(())
    }

    async fn send_typing(&self, chat_id: i64) -> anyhow::Result<()> {
        let _: serde_json::Value = self
            .call(
                "sendChatAction",
                json!({"chat_id": chat_id, "action": "typing"}),
                Duration::from_secs(10),
            )
            .await?;
        Ok(())
    }
}
