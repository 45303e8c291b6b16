//! Tool discovery: derive a [`Catalog`] from a directory of executables.
//!
//! Discovery is fail-soft.  Each candidate is described independently and
//! a broken tool is reported and skipped, never fatal to the pass.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::executable::{is_executable_file, ExecutableTool};
use super::{Catalog, Tool, ToolDescriptor, ToolSettings};

/// Why a single candidate did not make it into the catalog.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("{}: no such file or directory", path.display())]
    NotFound { path: PathBuf },
    #[error("{}: not an executable file", path.display())]
    NotExecutable { path: PathBuf },
    #[error("{}: describe exited with status {exit_status}: {stderr}", path.display())]
    DescribeFailed {
        path: PathBuf,
        exit_status: i32,
        stderr: String,
    },
    #[error("{}: describe produced no output", path.display())]
    EmptyOutput { path: PathBuf },
    #[error("{}: describe output is not a valid descriptor: {reason}", path.display())]
    InvalidJson { path: PathBuf, reason: String },
    #[error("{}: descriptor is missing {}", path.display(), fields.join(", "))]
    MissingFields { path: PathBuf, fields: Vec<String> },
    #[error("{}: describe timed out after {secs}s", path.display())]
    Timeout { path: PathBuf, secs: f64 },
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DiscoveryError {
    /// The offending path.
    pub fn path(&self) -> &Path {
        match self {
            Self::NotFound { path }
            | Self::NotExecutable { path }
            | Self::DescribeFailed { path, .. }
            | Self::EmptyOutput { path }
            | Self::InvalidJson { path, .. }
            | Self::MissingFields { path, .. }
            | Self::Timeout { path, .. }
            | Self::Io { path, .. } => path,
        }
    }

    /// Short machine-friendly kind, used in warnings and log events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::NotExecutable { .. } => "not_executable",
            Self::DescribeFailed { .. } => "describe_failed",
            Self::EmptyOutput { .. } => "empty_output",
            Self::InvalidJson { .. } => "invalid_json",
            Self::MissingFields { .. } => "missing_fields",
            Self::Timeout { .. } => "timeout",
            Self::Io { .. } => "io",
        }
    }
}

/// Outcome of a discovery pass: the catalog plus one warning per
/// excluded candidate.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub catalog: Catalog,
    pub skipped: Vec<DiscoveryError>,
}

/// Describe a single executable.
pub async fn discover_one(
    path: &Path,
    settings: &ToolSettings,
) -> Result<ToolDescriptor, DiscoveryError> {
    ExecutableTool::new(path, settings.clone()).describe().await
}

/// List the direct entries of `dir` that are executable regular files,
/// sorted by file name.  Hidden files are ignored.
pub(crate) async fn executable_entries(dir: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    let mut rd = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(DiscoveryError::NotFound {
                path: dir.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(DiscoveryError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    let mut paths = Vec::new();
    loop {
        let entry = match rd.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(source) => {
                return Err(DiscoveryError::Io {
                    path: dir.to_path_buf(),
                    source,
                })
            }
        };
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden {
            continue;
        }
        if is_executable_file(&path).await {
            paths.push(path);
        } else {
            debug!(path = %path.display(), "skipping non-executable entry");
        }
    }
    paths.sort();
    Ok(paths)
}

/// Describe every executable directly inside `dir`.
///
/// Only a missing or unreadable directory is an error.  Broken tools are
/// logged, recorded in [`DiscoveryReport::skipped`], and left out.
pub async fn discover_all(
    dir: &Path,
    settings: &ToolSettings,
) -> Result<DiscoveryReport, DiscoveryError> {
    let candidates = executable_entries(dir).await?;
    let mut report = DiscoveryReport::default();
    let mut tools = Vec::with_capacity(candidates.len());

    for path in candidates {
        match discover_one(&path, settings).await {
            Ok(descriptor) => tools.push(descriptor),
            Err(e) => {
                warn!(
                    tool = %super::executable::tool_name_for(&path),
                    kind = e.kind(),
                    error = %e,
                    "tool excluded from catalog"
                );
                report.skipped.push(e);
            }
        }
    }

    report.catalog = Catalog::new(tools);
    info!(
        dir = %dir.display(),
        tools = report.catalog.len(),
        skipped = report.skipped.len(),
        "tool discovery complete"
    );
    Ok(report)
}
