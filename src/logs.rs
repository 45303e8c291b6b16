//! Observability: the JSONL event log and tracing subscriber setup.
//!
//! [`EventLog`] is the append-only audit trail that mirrors tool dispatch
//! and conversation turns, one `{ts, agent, event, message}` object per
//! line.  It is deliberately separate from `tracing` diagnostics, which go
//! to stderr.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

pub const TOOL_DISPATCH: &str = "tool_dispatch";
pub const TOOL_RESULT: &str = "tool_result";
pub const TOOL_ERROR: &str = "tool_error";
pub const USER_MESSAGE: &str = "user_message";
pub const ASSISTANT_RESPONSE: &str = "assistant_response";
pub const COMMAND: &str = "command";
pub const TURN_ERROR: &str = "turn_error";
pub const DISCOVERY_WARNING: &str = "discovery_warning";

/// One line of the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub ts: String,
    pub agent: String,
    pub event: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// EventLog
// ---------------------------------------------------------------------------

/// Append-only JSONL event sink for one agent.
///
/// Writes are serialised so concurrent turns never interleave partial
/// lines.  Recording is best-effort: failures are reported through
/// `tracing` and never propagate to the caller.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    agent: String,
    lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, agent: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            agent: agent.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Record `event` with a plain-text message.
    pub async fn record(&self, event: &str, message: &str) {
        if let Err(e) = self.try_record(event, message).await {
            warn!(event, path = %self.path.display(), error = %e, "event log write failed");
        }
    }

    /// Record `event` with a JSON payload encoded into the message string.
    pub async fn record_json(&self, event: &str, payload: &serde_json::Value) {
        let message = payload.to_string();
        self.record(event, &message).await;
    }

    /// Fallible variant of [`record`](Self::record).
    pub async fn try_record(&self, event: &str, message: &str) -> anyhow::Result<()> {
        let entry = LogEvent {
            ts: crate::utils::utc_timestamp(),
            agent: self.agent.clone(),
            event: event.to_string(),
            message: message.to_string(),
        };
        let mut line = serde_json::to_string(&entry).context("serialize log event")?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create log dir {}", parent.display()))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("open event log {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Read every well-formed event from a log file.  A missing file yields
/// an empty list.
pub async fn read_events(path: &Path) -> anyhow::Result<Vec<LogEvent>> {
    let content = match fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
    };
    Ok(content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect())
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Install the global tracing subscriber: `RUST_LOG` filter (default
/// `info`) and a stderr fmt layer, JSON-formatted when `json` is set.
pub fn init_tracing(json: bool) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(e) = result {
        eprintln!("tracing already initialised: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_appends_jsonl_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("events.jsonl");
        let log = EventLog::new(&path, "pincer");

        log.record(USER_MESSAGE, "hello").await;
        log.record_json(TOOL_DISPATCH, &serde_json::json!({"tool": "t"}))
            .await;

        let events = read_events(&path).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].agent, "pincer");
        assert_eq!(events[0].event, USER_MESSAGE);
        assert_eq!(events[0].message, "hello");
        let payload: serde_json::Value = serde_json::from_str(&events[1].message).unwrap();
        assert_eq!(payload["tool"], "t");
        assert!(events[0].ts.ends_with('Z'));
    }

    #[tokio::test]
    async fn unwritable_log_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes every open fail.
        let log = EventLog::new(dir.path(), "pincer");
        log.record(COMMAND, "/help").await;
        assert!(log.try_record(COMMAND, "/help").await.is_err());
    }

    #[tokio::test]
    async fn missing_log_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_events(&dir.path().join("nope.jsonl"))
            .await
            .unwrap()
            .is_empty());
    }
}
