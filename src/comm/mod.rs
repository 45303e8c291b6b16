//! Chat-platform adapter layer.
//!
//! Provides [`Update`] -- a platform-agnostic inbound text message -- and
//! the [`ChatPlatform`] trait the bot loop polls and replies through.
//! [`telegram::TelegramPlatform`] is the concrete long-poll adapter.

pub mod telegram;

use std::time::Duration;

use async_trait::async_trait;

pub use telegram::TelegramPlatform;

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

/// One inbound event from the platform.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Update {
    /// Monotonic cursor assigned by the platform.
    pub update_id: i64,
    /// Chat the event belongs to.
    pub chat_id: i64,
    /// Message text; `None` for non-text content, which the bot skips.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

// ---------------------------------------------------------------------------
// ChatPlatform
// ---------------------------------------------------------------------------

/// Trait implemented by each chat platform adapter.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Short identifier for logs (e.g. `"telegram"`).
    fn name(&self) -> &str;

    /// Fetch updates with `update_id >= offset`, blocking up to `timeout`
    /// when none are pending.
    async fn fetch_updates(&self, offset: i64, timeout: Duration) -> anyhow::Result<Vec<Update>>;

    /// Send a text message to `chat_id`.
    async fn send_message(&self, chat_id: i64, text: &str) -> anyhow::Result<()>;

    /// Show a "typing…" indicator in `chat_id`.
    async fn send_typing(&self, chat_id: i64) -> anyhow::Result<()>;
}
