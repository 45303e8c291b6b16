use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::tools::ToolSettings;

/// Env var that forces stub mode on when set to `1` / `true`.
pub const STUB_OVERRIDE_ENV: &str = "PINCER_STUB";

/// Upper bound for tool timeouts: one day.
const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Top-level configuration loaded from `config.yaml`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Identifier used in log events and conversation ids.
    #[serde(default = "default_agent_id")]
    pub agent_id: String,
    /// Directory scanned for tool executables.
    #[serde(default = "default_tools_dir")]
    pub tools_dir: PathBuf,
    /// Directory holding session JSONL files.
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,
    /// JSONL event log.  `null` disables it.
    #[serde(default = "default_event_log")]
    pub event_log: Option<PathBuf>,
    /// Deterministic offline mode for tools and the model backend.
    #[serde(default)]
    pub stub_mode: bool,
    /// Inline system prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// File holding the system prompt; wins over `system_prompt`.
    #[serde(default)]
    pub system_prompt_file: Option<PathBuf>,
    /// Maximum tool calls per turn.
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub model: ModelConfig,
    /// Telegram bot settings; required only by `pincer bot`.
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

fn default_agent_id() -> String {
    "pincer".to_string()
}

fn default_tools_dir() -> PathBuf {
    PathBuf::from("tools")
}

fn default_sessions_dir() -> PathBuf {
    PathBuf::from("sessions")
}

fn default_event_log() -> Option<PathBuf> {
    Some(PathBuf::from("logs/events.jsonl"))
}

fn default_max_tool_iterations() -> usize {
    3
}

/// Per-call tool timeouts, in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutsConfig {
    #[serde(default = "default_describe_secs")]
    pub describe_secs: f64,
    #[serde(default = "default_execute_secs")]
    pub execute_secs: f64,
}

fn default_describe_secs() -> f64 {
    5.0
}

fn default_execute_secs() -> f64 {
    30.0
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            describe_secs: default_describe_secs(),
            execute_secs: default_execute_secs(),
        }
    }
}

/// The LLM backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Provider kind: "openai" or "stub".
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model name to request (e.g. "gpt-4o-mini").
    #[serde(default = "default_model")]
    pub model: String,
    /// API key (plain text or env-var reference like `$OPENAI_API_KEY`).
    #[serde(default)]
    pub api_key: Option<String>,
    /// Chat-completions URL for OpenAI-compatible servers.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Attempts per call, including the first.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_retries() -> usize {
    3
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            endpoint: None,
            max_retries: default_max_retries(),
        }
    }
}

/// Telegram-specific settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TelegramConfig {
    /// Bot token – plain string or env-var ref (`$TELEGRAM_BOT_TOKEN`).
    pub token: String,
    /// Long-poll timeout passed to `getUpdates`.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// Pause after a failed fetch.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Bot API base URL.
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent_id: default_agent_id(),
            tools_dir: default_tools_dir(),
            sessions_dir: default_sessions_dir(),
            event_log: default_event_log(),
            stub_mode: false,
            system_prompt: None,
            system_prompt_file: None,
            max_tool_iterations: default_max_tool_iterations(),
            timeouts: TimeoutsConfig::default(),
            model: ModelConfig::default(),
            telegram: None,
        }
    }
}

/// Resolve `$VAR` references against the environment.  Plain values pass
/// through; an unset variable resolves to `None`.
pub fn resolve_env_ref(value: &str) -> Option<String> {
    match value.strip_prefix('$') {
        Some(var) => std::env::var(var).ok().filter(|v| !v.is_empty()),
        None => Some(value.to_string()),
    }
}

fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes")
    )
}

impl Config {
    /// Read and parse a YAML configuration file.
    ///
    /// A missing file yields defaults.  Relative paths resolve against
    /// `home`.  `PINCER_STUB` and `$VAR` references are applied here and
    /// nowhere else.
    pub async fn load(path: &Path, home: &Path) -> anyhow::Result<Config> {
        let mut config = match tokio::fs::read_to_string(path).await {
            Ok(contents) => Self::from_yaml(&contents)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
                Config::default()
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read config file: {}", path.display()));
            }
        };

        if env_flag(STUB_OVERRIDE_ENV) {
            config.stub_mode = true;
        }
        config.resolve_secrets();
        config.resolve_paths(home);
        config.validate()?;

        tracing::debug!(
            agent = %config.agent_id,
            tools_dir = %config.tools_dir.display(),
            stub = config.stub_mode,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Parse YAML without touching the environment or the filesystem.
    pub fn from_yaml(contents: &str) -> anyhow::Result<Config> {
        if contents.trim().is_empty() {
            return Ok(Config::default());
        }
        serde_yaml_ng::from_str(contents).context("failed to parse config YAML")
    }

    fn resolve_secrets(&mut self) {
        self.model.api_key = match self.model.api_key.as_deref() {
            Some(key) => resolve_env_ref(key),
            None => std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
        };
        if let Some(tg) = &mut self.telegram {
            tg.token = resolve_env_ref(&tg.token).unwrap_or_default();
        }
    }

    /// Make every relative path absolute under `home`.
    pub fn resolve_paths(&mut self, home: &Path) {
        let absolute = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = home.join(&*p);
            }
        };
        absolute(&mut self.tools_dir);
        absolute(&mut self.sessions_dir);
        if let Some(log) = &mut self.event_log {
            absolute(log);
        }
        if let Some(file) = &mut self.system_prompt_file {
            absolute(file);
        }
    }

    /// Validate semantic constraints that serde cannot enforce.
    pub fn validate(&self) -> anyhow::Result<()> {
        let id = self.agent_id.trim();
        if id.is_empty() {
            anyhow::bail!("config: agent_id must not be empty");
        }
        if id.contains(['/', '\\', ' ']) {
            anyhow::bail!("config: agent_id '{}' must not contain spaces or slashes", id);
        }
        for (name, secs) in [
            ("timeouts.describe_secs", self.timeouts.describe_secs),
            ("timeouts.execute_secs", self.timeouts.execute_secs),
        ] {
            if !secs.is_finite() || secs <= 0.0 {
                anyhow::bail!("config: {name} must be a positive number of seconds");
            }
            if secs > MAX_TIMEOUT_SECS as f64 {
                anyhow::bail!("config: {name} must be at most {MAX_TIMEOUT_SECS} seconds");
            }
        }
        if self.model.max_retries == 0 {
            anyhow::bail!("config: model.max_retries must be at least 1");
        }
        if let Some(tg) = &self.telegram {
            if tg.poll_timeout_secs == 0 {
                anyhow::bail!("config: telegram.poll_timeout_secs must be at least 1");
            }
        }
        Ok(())
    }

    /// Telegram settings, failing when the bot cannot be started.
    pub fn require_telegram(&self) -> anyhow::Result<&TelegramConfig> {
        let tg = self
            .telegram
            .as_ref()
            .context("config: telegram section is required for the bot")?;
        if tg.token.trim().is_empty() {
            anyhow::bail!("config: telegram.token is empty (is the referenced env var set?)");
        }
        Ok(tg)
    }

    /// Settings handed to every spawned tool.
    pub fn tool_settings(&self) -> ToolSettings {
        ToolSettings {
            describe_timeout: bounded_secs(self.timeouts.describe_secs),
            execute_timeout: bounded_secs(self.timeouts.execute_secs),
            stub_mode: self.stub_mode,
        }
    }

    /// The system prompt: file contents, inline text, or a default.
    pub async fn system_prompt(&self) -> anyhow::Result<String> {
        if let Some(file) = &self.system_prompt_file {
            let text = tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("failed to read system prompt: {}", file.display()))?;
            return Ok(text.trim().to_string());
        }
        Ok(self.system_prompt.clone().unwrap_or_else(|| {
            format!(
                "You are {}, a concise and helpful assistant. Use the available tools when they help answer the user.",
                self.agent_id
            )
        }))
    }
}

/// Seconds as a `Duration`, clamped to `(0, MAX_TIMEOUT_SECS]`.
fn bounded_secs(secs: f64) -> Duration {
    let max = Duration::from_secs(MAX_TIMEOUT_SECS);
    Duration::try_from_secs_f64(secs).map_or(max, |d| d.min(max))
}
