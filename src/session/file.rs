//! JSONL-backed session store.
//!
//! Layout inside the sessions directory:
//!
//! ```text
//! <key>.jsonl                      live session
//! <key>.jsonl.<YYYYMMDDTHHMMSSZ>   archive created by clear
//! <key>.jsonl.<stamp>.<n>          archive when <stamp> was already taken
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::{
    archive_key, check_key, parse_archive_key, KeyedLocks, Role, SessionEntry, SessionError,
    SessionStore,
};

/// Session store writing one JSONL file per key.
#[derive(Debug)]
pub struct FileSessionStore {
    dir: PathBuf,
    locks: KeyedLocks,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: KeyedLocks::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the live file for `key`.
    pub fn live_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.jsonl"))
    }

    async fn ensure_dir(&self) -> Result<(), SessionError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| SessionError::Io {
                path: self.dir.clone(),
                source,
            })
    }

    async fn read_entries(path: &Path) -> Result<Vec<SessionEntry>, SessionError> {
        let content = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(SessionError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let mut entries = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<SessionEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping malformed JSONL line"),
            }
        }
        Ok(entries)
    }

    /// First archive key for `key` at the current second that is not
    /// already on disk.
    async fn free_archive_key(&self, key: &str) -> String {
        let stamp = crate::utils::archive_stamp(Utc::now());
        let mut n = 0;
        loop {
            let candidate = archive_key(key, &stamp, n);
            if !fs::try_exists(self.dir.join(&candidate))
                .await
                .unwrap_or(false)
            {
                return candidate;
            }
            n += 1;
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn append(
        &self,
        key: &str,
        role: Role,
        content: &str,
    ) -> Result<SessionEntry, SessionError> {
        check_key(key)?;
        let entry = SessionEntry::now(role, content);
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let _guard = self.locks.lock(key).await;
        self.ensure_dir().await?;
        let path = self.live_path(key);
        let io_err = |source| SessionError::Io {
            path: path.clone(),
            source,
        };
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_err)?;
        file.write_all(line.as_bytes()).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;

        debug!(key, role = %role, "session entry appended");
        Ok(entry)
    }

    async fn entries(&self, key: &str) -> Result<Vec<SessionEntry>, SessionError> {
        check_key(key)?;
        let _guard = self.locks.lock(key).await;
        Self::read_entries(&self.live_path(key)).await
    }

    async fn clear(&self, key: &str) -> Result<Option<String>, SessionError> {
        check_key(key)?;
        let _guard = self.locks.lock(key).await;
        self.ensure_dir().await?;
        let live = self.live_path(key);

        // Decided on the raw file: lines this store cannot parse are still
        // archived, never discarded.
        let live_len = match fs::metadata(&live).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(source) => {
                return Err(SessionError::Io {
                    path: live.clone(),
                    source,
                })
            }
        };

        let archived = if live_len == 0 {
            None
        } else {
            let archive = self.free_archive_key(key).await;
            let target = self.dir.join(&archive);
            fs::rename(&live, &target)
                .await
                .map_err(|source| SessionError::Io {
                    path: target.clone(),
                    source,
                })?;
            info!(key, archive = %archive, "session archived");
            Some(archive)
        };

        // Truncate (or create) so the live session is empty either way.
        fs::write(&live, b"")
            .await
            .map_err(|source| SessionError::Io {
                path: live.clone(),
                source,
            })?;
        Ok(archived)
    }

    async fn archives(&self, key: &str) -> Result<Vec<String>, SessionError> {
        check_key(key)?;
        let mut rd = match fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(SessionError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut found: Vec<(String, u32, String)> = Vec::new();
        loop {
            let entry = rd.next_entry().await.map_err(|source| SessionError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let Some(entry) = entry else { break };
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some((k, stamp, n)) = parse_archive_key(&name) {
                if k == key {
                    found.push((stamp.to_string(), n, name.clone()));
                }
            }
        }
        found.sort();
        Ok(found.into_iter().map(|(_, _, name)| name).collect())
    }

    async fn load_archive(&self, archive: &str) -> Result<Vec<SessionEntry>, SessionError> {
        let (key, _, _) =
            parse_archive_key(archive).ok_or_else(|| SessionError::UnknownArchive(archive.into()))?;
        check_key(key)?;
        check_key(archive)?;
        let path = self.dir.join(archive);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(SessionError::UnknownArchive(archive.to_string()));
        }
        Self::read_entries(&path).await
    }
}
