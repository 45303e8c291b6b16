//! External-program tools.
//!
//! Every call spawns the executable fresh: describe mode passes
//! [`DESCRIBE_FLAG`](super::DESCRIBE_FLAG) as the single argument, execute
//! mode passes the JSON argument object as the single argument.  Both are
//! bounded by a timeout and the child is killed if it overruns.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{
    DescriptorProblem, DiscoveryError, DispatchError, Tool, ToolDescriptor, ToolOutput,
    ToolSettings, DESCRIBE_FLAG, STUB_ENV,
};

/// `stdout` / `stderr` captured from a tool are truncated to this many
/// bytes.  Otherwise stdout is passed on exactly as written.
const MAX_OUTPUT: usize = 256 * 1024;

/// `ETXTBSY`: the file is still open for writing somewhere (typically a
/// tool that was just installed).  Spawning is retried a few times.
const TEXT_FILE_BUSY: i32 = 26;

/// A tool backed by an executable file.
#[derive(Debug, Clone)]
pub struct ExecutableTool {
    name: String,
    path: PathBuf,
    settings: ToolSettings,
}

impl ExecutableTool {
    /// Wrap `path`.  The dispatch name is the file name with a single
    /// trailing extension removed (`get_weather.sh` → `get_weather`).
    pub fn new(path: impl Into<PathBuf>, settings: ToolSettings) -> Self {
        let path = path.into();
        let name = tool_name_for(&path);
        Self {
            name,
            path,
            settings,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn command(&self, arg: &str) -> Command {
        let mut cmd = Command::new(&self.path);
        cmd.arg(arg)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = self.path.parent() {
            cmd.current_dir(dir);
        }
        if self.settings.stub_mode {
            cmd.env(STUB_ENV, "1");
        } else {
            cmd.env_remove(STUB_ENV);
        }
        cmd
    }

    /// Spawn with `arg` and wait up to `limit`.  `Ok(None)` means the
    /// call timed out (the child is killed on drop).
    async fn run(&self, arg: &str, limit: Duration) -> std::io::Result<Option<ToolOutput>> {
        let mut attempt = 0;
        let child = loop {
            match self.command(arg).spawn() {
                Ok(child) => break child,
                Err(e) if e.raw_os_error() == Some(TEXT_FILE_BUSY) && attempt < 5 => {
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(20 * attempt)).await;
                }
                Err(e) => return Err(e),
            }
        };
        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_elapsed) => return Ok(None),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.len() > MAX_OUTPUT {
            warn!(
                tool = %self.name,
                bytes = stdout.len(),
                limit = MAX_OUTPUT,
                "tool stdout truncated"
            );
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok(Some(ToolOutput {
            stdout: crate::utils::truncate_str(&stdout, MAX_OUTPUT),
            stderr: crate::utils::truncate_str(stderr.trim(), MAX_OUTPUT),
            exit_status: output.status.code().unwrap_or(-1),
        }))
    }
}

/// Derive a tool's dispatch name from its file name.
pub(crate) fn tool_name_for(path: &Path) -> String {
    let file = path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or_default();
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => stem.to_string(),
        _ => file.to_string(),
    }
}

/// `true` when `path` is a regular file with at least one execute bit.
pub(crate) async fn is_executable_file(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file() && has_exec_bit(&meta),
        Err(_) => false,
    }
}

#[cfg(unix)]
fn has_exec_bit(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn has_exec_bit(_meta: &std::fs::Metadata) -> bool {
    true
}

#[async_trait]
impl Tool for ExecutableTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn describe(&self) -> Result<ToolDescriptor, DiscoveryError> {
        let path = self.path.clone();
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() && has_exec_bit(&meta) => {}
            Ok(_) => return Err(DiscoveryError::NotExecutable { path }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DiscoveryError::NotFound { path })
            }
            Err(source) => return Err(DiscoveryError::Io { path, source }),
        }

        let limit = self.settings.describe_timeout;
        let output = match self.run(DESCRIBE_FLAG, limit).await {
            Ok(Some(out)) => out,
            Ok(None) => {
                return Err(DiscoveryError::Timeout {
                    path,
                    secs: limit.as_secs_f64(),
                })
            }
            Err(source) => return Err(DiscoveryError::Io { path, source }),
        };

        if !output.success() {
            return Err(DiscoveryError::DescribeFailed {
                path,
                exit_status: output.exit_status,
                stderr: output.stderr,
            });
        }
        if output.stdout.trim().is_empty() {
            return Err(DiscoveryError::EmptyOutput { path });
        }

        let descriptor = ToolDescriptor::parse(&output.stdout).map_err(|problem| match problem {
            DescriptorProblem::Missing(fields) => DiscoveryError::MissingFields {
                path: path.clone(),
                fields,
            },
            DescriptorProblem::Invalid(reason) => DiscoveryError::InvalidJson {
                path: path.clone(),
                reason,
            },
        })?;
        debug!(tool = %descriptor.name, path = %path.display(), "tool described");
        Ok(descriptor)
    }

    async fn execute(&self, args: &Value) -> Result<ToolOutput, DispatchError> {
        let payload = serde_json::to_string(args).unwrap_or_else(|_| "{}".to_string());
        let limit = self.settings.execute_timeout;
        match self.run(&payload, limit).await {
            Ok(Some(out)) => Ok(out),
            Ok(None) => Err(DispatchError::Timeout {
                tool: self.name.clone(),
                secs: limit.as_secs_f64(),
            }),
            Err(source) => Err(DispatchError::Spawn {
                tool: self.name.clone(),
                source,
            }),
        }
    }
}
