//! In-memory session store, for tests and ephemeral runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{archive_key, check_key, parse_archive_key, Role, SessionEntry, SessionError, SessionStore};

#[derive(Debug, Default)]
struct State {
    live: HashMap<String, Vec<SessionEntry>>,
    /// Archives per session key, oldest first.
    archives: HashMap<String, Vec<(String, Vec<SessionEntry>)>>,
}

/// Session store holding everything in process memory.
///
/// A single mutex guards all keys; operations never await while holding
/// it, so unrelated sessions only contend for the duration of a copy.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    state: Mutex<State>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn append(
        &self,
        key: &str,
        role: Role,
        content: &str,
    ) -> Result<SessionEntry, SessionError> {
        check_key(key)?;
        let entry = SessionEntry::now(role, content);
        let mut state = self.state.lock().await;
        state
            .live
            .entry(key.to_string())
            .or_default()
            .push(entry.clone());
        Ok(entry)
    }

    async fn entries(&self, key: &str) -> Result<Vec<SessionEntry>, SessionError> {
        check_key(key)?;
        let state = self.state.lock().await;
        Ok(state.live.get(key).cloned().unwrap_or_default())
    }

    async fn clear(&self, key: &str) -> Result<Option<String>, SessionError> {
        check_key(key)?;
        let mut state = self.state.lock().await;
        let prior = std::mem::take(state.live.entry(key.to_string()).or_default());
        if prior.is_empty() {
            return Ok(None);
        }

        let stamp = crate::utils::archive_stamp(Utc::now());
        let archives = state.archives.entry(key.to_string()).or_default();
        let mut n = 0;
        let name = loop {
            let candidate = archive_key(key, &stamp, n);
            if !archives.iter().any(|(existing, _)| *existing == candidate) {
                break candidate;
            }
            n += 1;
        };
        archives.push((name.clone(), prior));
        Ok(Some(name))
    }

    async fn archives(&self, key: &str) -> Result<Vec<String>, SessionError> {
        check_key(key)?;
        let state = self.state.lock().await;
        Ok(state
            .archives
            .get(key)
            .map(|list| list.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default())
    }

    async fn load_archive(&self, archive: &str) -> Result<Vec<SessionEntry>, SessionError> {
        let unknown = || SessionError::UnknownArchive(archive.to_string());
        let (key, _, _) = parse_archive_key(archive).ok_or_else(unknown)?;
        let state = self.state.lock().await;
        state
            .archives
            .get(key)
            .and_then(|list| list.iter().find(|(name, _)| name == archive))
            .map(|(_, entries)| entries.clone())
            .ok_or_else(unknown)
    }
}
