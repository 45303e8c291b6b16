//! Validation and execution of tool calls.
//!
//! [`validate`] checks a call against a [`Catalog`]; [`Dispatcher`]
//! resolves a tool by name (native tools first, then the tools directory)
//! and runs it.  Only names that resolve inside the configured directory
//! or the native registry are ever executed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::discovery::{discover_all, DiscoveryReport};
use super::executable::{is_executable_file, ExecutableTool};
use super::{Catalog, DiscoveryError, Tool, ToolSettings};
use crate::logs::{self, EventLog};

// ── Errors ───────────────────────────────────────────────────

/// A call rejected before anything was executed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("tool {tool} is missing required fields: {}", fields.join(", "))]
    MissingRequired { tool: String, fields: Vec<String> },
}

/// A call that could not be executed, or ran and failed.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("tool not found: {0}")]
    ToolNotFound(String),
    #[error("tool {tool} failed with exit status {exit_status}: {stderr}")]
    ExecutionFailed {
        tool: String,
        stderr: String,
        exit_status: i32,
    },
    #[error("tool {tool} timed out after {secs}s")]
    Timeout { tool: String, secs: f64 },
    #[error("failed to run tool {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl DispatchError {
    /// Short text suitable for showing to a chat user or feeding back to
    /// the model.
    pub fn user_message(&self) -> String {
        match self {
            Self::ExecutionFailed {
                tool,
                stderr,
                exit_status,
            } => {
                if stderr.trim().is_empty() {
                    format!("tool {tool} failed with exit status {exit_status}")
                } else {
                    stderr.clone()
                }
            }
            other => other.to_string(),
        }
    }
}

// ── validate ─────────────────────────────────────────────────

/// Check that `name` is in `catalog` and that `args` carries every
/// required parameter.  Extra keys are accepted.
pub fn validate(catalog: &Catalog, name: &str, args: &Value) -> Result<(), ValidationError> {
    let descriptor = catalog
        .get(name)
        .ok_or_else(|| ValidationError::UnknownTool(name.to_string()))?;

    let present = args.as_object();
    let missing: Vec<String> = descriptor
        .parameters
        .required
        .iter()
        .filter(|field| present.map_or(true, |obj| !obj.contains_key(field.as_str())))
        .cloned()
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::MissingRequired {
            tool: name.to_string(),
            fields: missing,
        })
    }
}

// ── Dispatcher ───────────────────────────────────────────────

/// Resolves and executes tools for one tools directory.
#[derive(Clone)]
pub struct Dispatcher {
    tools_dir: PathBuf,
    settings: ToolSettings,
    native: Vec<Arc<dyn Tool>>,
    events: Option<Arc<EventLog>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tools_dir", &self.tools_dir)
            .field("settings", &self.settings)
            .field(
                "native",
                &self.native.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Dispatcher {
    pub fn new(tools_dir: impl Into<PathBuf>, settings: ToolSettings) -> Self {
        Self {
            tools_dir: tools_dir.into(),
            settings,
            native: Vec::new(),
            events: None,
        }
    }

    /// Mirror dispatch events to `events`.
    pub fn with_event_log(mut self, events: Arc<EventLog>) -> Self {
        self.events = Some(events);
        self
    }

    /// Register an in-process tool.  Native tools shadow directory tools
    /// of the same name.
    pub fn with_native_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.native.push(tool);
        self
    }

    pub fn tools_dir(&self) -> &Path {
        &self.tools_dir
    }

    pub fn settings(&self) -> &ToolSettings {
        &self.settings
    }

    /// Build a catalog: native descriptors first, then everything
    /// discoverable in the tools directory.
    pub async fn discover(&self) -> Result<DiscoveryReport, DiscoveryError> {
        let mut native = Vec::with_capacity(self.native.len());
        let mut skipped = Vec::new();
        for tool in &self.native {
            match tool.describe().await {
                Ok(d) => native.push(d),
                Err(e) => skipped.push(e),
            }
        }

        let mut report = discover_all(&self.tools_dir, &self.settings).await?;
        native.extend(report.catalog.iter().cloned());
        report.catalog = Catalog::new(native);
        skipped.append(&mut report.skipped);
        report.skipped = skipped;
        Ok(report)
    }

    /// Find the tool that `name` refers to.
    ///
    /// Directory tools match on the exact file name or the file name with
    /// one extension removed.  An exact match wins; otherwise the first
    /// match in file-name order.  Names that could escape the directory
    /// never resolve.
    pub async fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        if !is_safe_name(name) {
            return None;
        }
        if let Some(tool) = self.native.iter().find(|t| t.name() == name) {
            return Some(Arc::clone(tool));
        }

        let mut rd = tokio::fs::read_dir(&self.tools_dir).await.ok()?;
        let mut candidates: Vec<(bool, PathBuf)> = Vec::new();
        while let Ok(Some(entry)) = rd.next_entry().await {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let exact = file_name == name;
            let with_ext = file_name
                .strip_prefix(name)
                .and_then(|rest| rest.strip_prefix('.'))
                .is_some_and(|ext| !ext.is_empty() && !ext.contains('.'));
            if exact || with_ext {
                candidates.push((exact, entry.path()));
            }
        }
        // Exact matches first, then by path.
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        for (_, path) in candidates {
            if is_executable_file(&path).await {
                debug!(tool = name, path = %path.display(), "tool resolved");
                let tool: Arc<dyn Tool> =
                    Arc::new(ExecutableTool::new(path, self.settings.clone()));
                return Some(tool);
            }
        }
        None
    }

    /// Execute `name` with `args` without consulting a catalog.
    ///
    /// Returns stdout on exit status 0.  Callers that need required-field
    /// enforcement use [`dispatch_checked`](Self::dispatch_checked).
    pub async fn dispatch(&self, name: &str, args: &Value) -> Result<String, DispatchError> {
        self.emit(logs::TOOL_DISPATCH, json!({"tool": name, "args": args}))
            .await;

        let result = self.run(name, args).await;
        match &result {
            Ok(stdout) => {
                info!(tool = name, "tool call succeeded");
                self.emit(logs::TOOL_RESULT, json!({"tool": name, "result": stdout}))
                    .await;
            }
            Err(e) => {
                warn!(tool = name, error = %e, "tool call failed");
                self.emit(
                    logs::TOOL_ERROR,
                    json!({"tool": name, "error": e.user_message()}),
                )
                .await;
            }
        }
        result
    }

    /// [`validate`] against `catalog`, then [`dispatch`](Self::dispatch).
    /// Nothing is executed when validation fails.
    pub async fn dispatch_checked(
        &self,
        catalog: &Catalog,
        name: &str,
        args: &Value,
    ) -> Result<String, DispatchError> {
        if let Err(e) = validate(catalog, name, args) {
            debug!(tool = name, error = %e, "tool call rejected");
            return Err(e.into());
        }
        self.dispatch(name, args).await
    }

    async fn run(&self, name: &str, args: &Value) -> Result<String, DispatchError> {
        let tool = self
            .resolve(name)
            .await
            .ok_or_else(|| DispatchError::ToolNotFound(name.to_string()))?;
        let output = tool.execute(args).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(DispatchError::ExecutionFailed {
                tool: name.to_string(),
                stderr: output.stderr,
                exit_status: output.exit_status,
            })
        }
    }

    async fn emit(&self, event: &str, payload: Value) {
        if let Some(events) = &self.events {
            events.record_json(event, &payload).await;
        }
    }
}

/// A tool name is a single path component that is not hidden.
fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
        && !name.contains('\0')
}
