//! OpenAI-compatible chat-completions backend.
//!
//! Multi-turn context is kept in process, keyed by conversation id, and
//! replayed on each call when `continue_conversation` is set.  A
//! conversation this process has not seen yet starts from the persisted
//! turns passed in `CompletionOptions::history`.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::debug;

use super::{serialize_messages, with_retry, ChatMessage, CompletionOptions, LlmBackend};
use crate::config::ModelConfig;

/// Default endpoint for OpenAI chat completions.
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Messages of history kept per conversation.
const MAX_HISTORY: usize = 40;

/// Backend that talks to an OpenAI-compatible chat completions API.
pub struct OpenAIBackend {
    api_key: String,
    endpoint: String,
    client: Client,
    /// Model name sent in the request body (e.g. "gpt-4o-mini").
    model: String,
    max_retries: usize,
    history: Mutex<HashMap<String, Vec<ChatMessage>>>,
}

impl std::fmt::Debug for OpenAIBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIBackend")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl OpenAIBackend {
    /// Create a backend with explicit configuration.
    pub fn with_config(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        max_retries: usize,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            client,
            model: model.into(),
            max_retries,
            history: Mutex::new(HashMap::new()),
        })
    }

    /// Build from the `model` config section.  An API key is required.
    pub fn from_config(cfg: &ModelConfig) -> anyhow::Result<Self> {
        let api_key = cfg
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .context("model.api_key is not set (use a value or $OPENAI_API_KEY)")?;
        let endpoint = cfg
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        Self::with_config(api_key, endpoint, cfg.model.clone(), cfg.max_retries)
    }

    /// Start the context for `conversation_id` from persisted turns,
    /// unless this process already holds one.
    async fn seed(&self, conversation_id: &str, turns: &[ChatMessage]) {
        let mut history = self.history.lock().await;
        if history.contains_key(conversation_id) {
            return;
        }
        let start = turns.len().saturating_sub(MAX_HISTORY);
        history.insert(conversation_id.to_string(), turns[start..].to_vec());
        debug!(conversation = conversation_id, turns = turns.len() - start, "seeded context");
    }

    /// Build the request messages for one call.
    async fn build_messages(&self, message: &str, opts: &CompletionOptions) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        if let Some(system) = opts.system.as_deref().filter(|s| !s.is_empty()) {
            messages.push(ChatMessage::new("system", system));
        }
        if opts.continue_conversation {
            if let Some(id) = &opts.conversation_id {
                let history = self.history.lock().await;
                if let Some(past) = history.get(id) {
                    messages.extend(past.iter().cloned());
                }
            }
        }
        messages.push(ChatMessage::new("user", message));
        messages
    }

    async fn send_once(&self, model: &str, messages: &[ChatMessage]) -> anyhow::Result<String> {
        let body = json!({
            "model": model,
            "messages": serialize_messages(messages),
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("OpenAI request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API returned {status}: {text}");
        }

        let json: serde_json::Value = resp.json().await.context("decode OpenAI response")?;
        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        Ok(content)
    }

    async fn remember(&self, conversation_id: &str, user: &str, reply: &str) {
        let mut history = self.history.lock().await;
        let past = history.entry(conversation_id.to_string()).or_default();
        past.push(ChatMessage::new("user", user));
        past.push(ChatMessage::new("assistant", reply));
        if past.len() > MAX_HISTORY {
            let excess = past.len() - MAX_HISTORY;
            past.drain(..excess);
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAIBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, message: &str, opts: &CompletionOptions) -> anyhow::Result<String> {
        if opts.continue_conversation {
            if let Some(id) = &opts.conversation_id {
                self.seed(id, &opts.history).await;
            }
        }
        let messages = self.build_messages(message, opts).await;
        let model = opts.model.clone().unwrap_or_else(|| self.model.clone());
        debug!(model = %model, messages = messages.len(), "sending chat completion");

        let reply = with_retry("openai", self.max_retries, || {
            self.send_once(&model, &messages)
        })
        .await?;

        if let Some(id) = &opts.conversation_id {
            self.remember(id, message, &reply).await;
        }
        Ok(reply)
    }

    async fn forget(&self, conversation_id: &str) {
        self.history.lock().await.remove(conversation_id);
    }
}
