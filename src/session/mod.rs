//! Session abstraction: `SessionEntry`, `Role`, and the `SessionStore`
//! trait.
//!
//! A session is an append-only, ordered log of user/assistant turns
//! addressed by a logical key (e.g. `chat_42`).  Clearing a non-empty
//! session moves its entries to a uniquely keyed archive.  Two backends
//! implement the same trait: [`file::FileSessionStore`] (one JSONL file
//! per key) and [`memory::MemorySessionStore`].

pub mod file;
pub mod lock;
pub mod memory;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use file::FileSessionStore;
pub use lock::KeyedLocks;
pub use memory::MemorySessionStore;

// ── Role ─────────────────────────────────────────────────────

/// Author of a session entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role `{other}` (expected user or assistant)")),
        }
    }
}

// ── SessionEntry ─────────────────────────────────────────────

/// One message in a session, serialised as a JSONL line
/// `{"ts": ..., "role": ..., "content": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEntry {
    /// UTC, ISO-8601, second precision.
    pub ts: String,
    pub role: Role,
    pub content: String,
}

impl SessionEntry {
    /// New entry stamped with the current time.
    pub fn now(role: Role, content: impl Into<String>) -> Self {
        Self {
            ts: crate::utils::utc_timestamp(),
            role,
            content: content.into(),
        }
    }

    /// `role: content` projection used by [`SessionStore::load`].
    pub fn render(&self) -> String {
        format!("{}: {}", self.role, self.content)
    }
}

// ── Errors ───────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session key is required")]
    MissingKey,
    #[error("invalid session key `{0}`")]
    InvalidKey(String),
    #[error("unknown archive `{0}`")]
    UnknownArchive(String),
    #[error("session I/O on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialize session entry: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Reject keys that are empty or could address anything outside the
/// session namespace.
pub fn check_key(key: &str) -> Result<(), SessionError> {
    if key.trim().is_empty() {
        return Err(SessionError::MissingKey);
    }
    if key.contains('/')
        || key.contains('\\')
        || key.contains("..")
        || key.contains('\0')
        || key.starts_with('.')
    {
        return Err(SessionError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Archive key for `key` cleared at `stamp`, with an optional
/// disambiguating counter.
pub fn archive_key(key: &str, stamp: &str, n: u32) -> String {
    if n == 0 {
        format!("{key}.jsonl.{stamp}")
    } else {
        format!("{key}.jsonl.{stamp}.{n}")
    }
}

/// Split an archive key back into `(key, stamp, n)`.
pub fn parse_archive_key(archive: &str) -> Option<(&str, &str, u32)> {
    let (key, rest) = archive.split_once(".jsonl.")?;
    if key.is_empty() || rest.is_empty() {
        return None;
    }
    match rest.split_once('.') {
        Some((stamp, n)) => Some((key, stamp, n.parse().ok()?)),
        None => Some((key, rest, 0)),
    }
}

// ── SessionStore ─────────────────────────────────────────────

/// Keyed, append-only conversation log.
///
/// Reads of an absent session are empty, never an error.  Operations on
/// one key are serialised; different keys never block each other.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Append one entry, creating the session if absent.
    async fn append(
        &self,
        key: &str,
        role: Role,
        content: &str,
    ) -> Result<SessionEntry, SessionError>;

    /// All live entries in insertion order.
    async fn entries(&self, key: &str) -> Result<Vec<SessionEntry>, SessionError>;

    /// Archive a non-empty session and reset it to empty.  Returns the
    /// archive key, or `None` when there was nothing to archive.  The live
    /// session exists and is empty afterwards in both cases.
    async fn clear(&self, key: &str) -> Result<Option<String>, SessionError>;

    /// Archive keys for `key`, oldest first.
    async fn archives(&self, key: &str) -> Result<Vec<String>, SessionError>;

    /// Entries of one archive.
    async fn load_archive(&self, archive_key: &str) -> Result<Vec<SessionEntry>, SessionError>;

    /// `role: content` lines in insertion order; `limit` keeps the last N.
    async fn load(&self, key: &str, limit: Option<usize>) -> Result<Vec<String>, SessionError> {
        let mut entries = self.entries(key).await?;
        if let Some(limit) = limit {
            if entries.len() > limit {
                entries = entries.split_off(entries.len() - limit);
            }
        }
        Ok(entries.iter().map(SessionEntry::render).collect())
    }

    /// Number of live entries; 0 for an absent session.
    async fn count(&self, key: &str) -> Result<usize, SessionError> {
        Ok(self.entries(key).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trip() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!(Role::Assistant.to_string(), "assistant");
        assert!("system".parse::<Role>().is_err());
    }

    #[test]
    fn entry_serialises_with_short_keys() {
        let e = SessionEntry {
            ts: "2024-05-01T12:00:00Z".into(),
            role: Role::User,
            content: "Hello".into(),
        };
        let line = serde_json::to_string(&e).unwrap();
        assert_eq!(
            line,
            r#"{"ts":"2024-05-01T12:00:00Z","role":"user","content":"Hello"}"#
        );
        assert_eq!(e.render(), "user: Hello");
    }

    #[test]
    fn key_checks() {
        assert!(matches!(check_key(""), Err(SessionError::MissingKey)));
        assert!(matches!(check_key("  "), Err(SessionError::MissingKey)));
        assert!(matches!(check_key("../x"), Err(SessionError::InvalidKey(_))));
        assert!(matches!(check_key("a/b"), Err(SessionError::InvalidKey(_))));
        assert!(check_key("chat_42").is_ok());
        assert!(check_key("chat_-100123").is_ok());
    }

    #[test]
    fn archive_keys_parse_back() {
        let k = archive_key("chat_1", "20240501T120000Z", 0);
        assert_eq!(k, "chat_1.jsonl.20240501T120000Z");
        assert_eq!(
            parse_archive_key(&k),
            Some(("chat_1", "20240501T120000Z", 0))
        );
        let k = archive_key("chat_1", "20240501T120000Z", 2);
        assert_eq!(
            parse_archive_key(&k),
            Some(("chat_1", "20240501T120000Z", 2))
        );
        assert_eq!(parse_archive_key("chat_1.jsonl"), None);
    }
}
