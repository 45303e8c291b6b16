//! LLM backend abstractions.
//!
//! Defines the [`LlmBackend`] trait (text + options in, text out), the
//! deterministic [`StubBackend`] used for offline runs and tests, the
//! shared retry helper, and [`build_backend`] which picks an
//! implementation from configuration.

pub mod openai;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::config::{Config, ModelConfig};

pub use openai::OpenAIBackend;

// ---------------------------------------------------------------------------
// ChatMessage
// ---------------------------------------------------------------------------

/// A single chat message with a role and content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Serialise messages into the OpenAI-compatible JSON array format.
pub fn serialize_messages(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| serde_json::json!({ "role": m.role, "content": m.content }))
        .collect()
}

// ---------------------------------------------------------------------------
// LlmBackend trait
// ---------------------------------------------------------------------------

/// Per-call options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionOptions {
    /// System prompt for this call.
    pub system: Option<String>,
    /// Model override; the backend's configured model otherwise.
    pub model: Option<String>,
    /// Key that scopes multi-turn context on the backend side.
    pub conversation_id: Option<String>,
    /// Continue the conversation identified by `conversation_id` rather
    /// than starting from scratch.
    pub continue_conversation: bool,
    /// Persisted turns of the conversation, oldest first.  Seeds the
    /// backend's context when it holds none for `conversation_id`.
    pub history: Vec<ChatMessage>,
}

/// Trait implemented by every LLM backend.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    /// Send `message` and return the reply text.
    async fn complete(&self, message: &str, opts: &CompletionOptions) -> anyhow::Result<String>;

    /// Drop any context held for `conversation_id`.
    async fn forget(&self, _conversation_id: &str) {}
}

// ---------------------------------------------------------------------------
// StubBackend
// ---------------------------------------------------------------------------

/// Deterministic backend: no network, replies `Stub response #N: ...`
/// with N incrementing from 1 per backend instance.
#[derive(Debug, Default)]
pub struct StubBackend {
    counter: AtomicU64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completions served so far.
    pub fn calls(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmBackend for StubBackend {
    fn name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, message: &str, _opts: &CompletionOptions) -> anyhow::Result<String> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let preview = crate::utils::truncate_str(message.trim(), 80);
        Ok(format!("Stub response #{n}: {preview}"))
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Run `call` up to `max_attempts` times with exponential backoff
/// (100 ms × 2^attempt).  Permanent errors (400, 401, 403, 404, 422) are
/// returned immediately.
pub async fn with_retry<T, F, Fut>(label: &str, max_attempts: usize, mut call: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let permanent = is_permanent_error(&e);
                warn!(
                    backend = label,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    permanent,
                    error = %e,
                    "backend call failed"
                );
                attempt += 1;
                if permanent || attempt >= attempts {
                    return Err(e);
                }
                let delay = Duration::from_millis(100 * 2u64.pow(attempt as u32 - 1));
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// `true` for HTTP failures that retrying cannot fix.
///
/// Parses status codes from error messages like "OpenAI API returned 401: …"
pub fn is_permanent_error(err: &anyhow::Error) -> bool {
    let msg = err.to_string();
    ["400", "401", "403", "404", "422"]
        .iter()
        .any(|code| msg.contains(&format!("returned {code}")))
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Build the backend selected by `cfg`.  Stub mode always wins.
pub fn build_backend(cfg: &Config) -> anyhow::Result<Arc<dyn LlmBackend>> {
    if cfg.stub_mode {
        return Ok(Arc::new(StubBackend::new()));
    }
    build_from_model_config(&cfg.model)
}

fn build_from_model_config(model: &ModelConfig) -> anyhow::Result<Arc<dyn LlmBackend>> {
    match model.provider.as_str() {
        "stub" => Ok(Arc::new(StubBackend::new())),
        "openai" | "openai-compat" => Ok(Arc::new(OpenAIBackend::from_config(model)?)),
        other => anyhow::bail!("unknown model provider `{other}` (expected openai or stub)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn stub_is_deterministic_and_incrementing() {
        let stub = StubBackend::new();
        let opts = CompletionOptions::default();
        assert_eq!(
            stub.complete("Hello", &opts).await.unwrap(),
            "Stub response #1: Hello"
        );
        assert_eq!(
            stub.complete("Hello", &opts).await.unwrap(),
            "Stub response #2: Hello"
        );
        assert_eq!(stub.calls(), 2);
    }

    #[test]
    fn permanent_errors_detected() {
        assert!(is_permanent_error(&anyhow::anyhow!(
            "OpenAI API returned 401 Unauthorized: bad key"
        )));
        assert!(!is_permanent_error(&anyhow::anyhow!(
            "OpenAI API returned 503 Service Unavailable"
        )));
    }

    #[tokio::test]
    async fn retry_stops_on_permanent_error() {
        let calls = AtomicUsize::new(0);
        let result: anyhow::Result<()> = with_retry("test", 5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("API returned 403 Forbidden")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_error() {
        let calls = AtomicUsize::new(0);
        let result = with_retry("test", 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    anyhow::bail!("API returned 502 Bad Gateway")
                }
                Ok(n)
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 1);
    }

    #[test]
    fn unknown_provider_rejected() {
        let model = ModelConfig {
            provider: "nope".into(),
            ..ModelConfig::default()
        };
        assert!(build_from_model_config(&model).is_err());
    }
}
