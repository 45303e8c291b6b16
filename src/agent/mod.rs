//! Agent runtime: the [`Orchestrator`] turns one inbound text for one
//! conversation into a reply.
//!
//! A turn runs under the conversation's lock: log the message, append it
//! to the session, call the model with the system prompt and tool
//! catalog, run any requested tools, append the reply, log it.  Commands
//! (`/reset`, `/count`, ...) are handled here too and never reach the
//! model.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::Context;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::conversation::{Conversation, ConversationRouter, Route};
use crate::logs::{self, EventLog};
use crate::models::{build_backend, ChatMessage, CompletionOptions, LlmBackend};
use crate::session::{FileSessionStore, KeyedLocks, Role, SessionStore};
use crate::slash::{self, Command};
use crate::tools::parsing::parse_tool_request;
use crate::tools::{Catalog, Dispatcher};

/// Global counter of in-flight agent turns.
static IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);

/// Returns the number of agent turns currently executing.
pub fn in_flight_count() -> usize {
    IN_FLIGHT.load(Ordering::Relaxed)
}

/// Wait until all in-flight agent turns have completed, polling at
/// a fixed interval.  Returns after `timeout` even if turns remain.
pub async fn drain_in_flight(timeout: std::time::Duration) {
    let start = std::time::Instant::now();
    loop {
        if IN_FLIGHT.load(Ordering::Relaxed) == 0 {
            break;
        }
        if start.elapsed() >= timeout {
            warn!(
                remaining = IN_FLIGHT.load(Ordering::Relaxed),
                "shutdown drain timeout reached, proceeding"
            );
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
}

/// Counts one turn as in flight until dropped.
struct InFlight;

impl InFlight {
    fn enter() -> Self {
        IN_FLIGHT.fetch_add(1, Ordering::Relaxed);
        InFlight
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        IN_FLIGHT.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Persisted entries handed to the model as prior context.
const CONTEXT_ENTRIES: usize = 40;

/// Reply used when the model keeps requesting tools past the limit.
pub const TOOL_LIMIT_REPLY: &str =
    "Sorry, I couldn't finish that request within the allowed number of tool calls.";

/// Sequences conversation turns for one agent.
pub struct Orchestrator {
    router: ConversationRouter,
    sessions: Arc<dyn SessionStore>,
    backend: Arc<dyn LlmBackend>,
    dispatcher: Arc<Dispatcher>,
    events: Option<Arc<EventLog>>,
    system_prompt: String,
    model: Option<String>,
    max_tool_iterations: usize,
    locks: KeyedLocks,
    catalog: RwLock<Arc<Catalog>>,
}

impl Orchestrator {
    pub fn new(
        agent_id: impl Into<String>,
        sessions: Arc<dyn SessionStore>,
        backend: Arc<dyn LlmBackend>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            router: ConversationRouter::new(agent_id),
            sessions,
            backend,
            dispatcher,
            events: None,
            system_prompt: String::new(),
            model: None,
            max_tool_iterations: 3,
            locks: KeyedLocks::new(),
            catalog: RwLock::new(Arc::new(Catalog::default())),
        }
    }

    pub fn with_event_log(mut self, events: Arc<EventLog>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tool_iterations(mut self, n: usize) -> Self {
        self.max_tool_iterations = n;
        self
    }

    /// Wire everything from configuration and run a first discovery pass.
    pub async fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let events = cfg
            .event_log
            .as_ref()
            .map(|path| Arc::new(EventLog::new(path, &cfg.agent_id)));

        let mut dispatcher = Dispatcher::new(&cfg.tools_dir, cfg.tool_settings());
        if let Some(events) = &events {
            dispatcher = dispatcher.with_event_log(Arc::clone(events));
        }

        let sessions: Arc<dyn SessionStore> = Arc::new(FileSessionStore::new(&cfg.sessions_dir));
        let backend = build_backend(cfg).context("failed to build model backend")?;
        let system_prompt = cfg.system_prompt().await?;

        let mut orch = Orchestrator::new(&cfg.agent_id, sessions, backend, Arc::new(dispatcher))
            .with_system_prompt(system_prompt)
            .with_model(&cfg.model.model)
            .with_max_tool_iterations(cfg.max_tool_iterations);
        if let Some(events) = events {
            orch = orch.with_event_log(events);
        }

        orch.refresh_catalog().await;
        info!(
            agent = %cfg.agent_id,
            backend = orch.backend.name(),
            tools = orch.catalog().len(),
            "orchestrator ready"
        );
        Ok(orch)
    }

    pub fn router(&self) -> &ConversationRouter {
        &self.router
    }

    pub fn agent_id(&self) -> &str {
        self.router.agent_id()
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The catalog from the most recent discovery pass.
    pub fn catalog(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog.read().expect("catalog lock poisoned"))
    }

    /// Re-run discovery and swap in the new catalog.  Broken tools are
    /// logged as `discovery_warning` events; a missing tools directory
    /// yields an empty catalog.
    pub async fn refresh_catalog(&self) -> Arc<Catalog> {
        let catalog = match self.dispatcher.discover().await {
            Ok(report) => {
                for skipped in &report.skipped {
                    self.emit(
                        logs::DISCOVERY_WARNING,
                        json!({
                            "tool": skipped.path().display().to_string(),
                            "reason": skipped.to_string(),
                        }),
                    )
                    .await;
                }
                report.catalog
            }
            Err(e) => {
                warn!(error = %e, "tool discovery failed, continuing without tools");
                self.emit(
                    logs::DISCOVERY_WARNING,
                    json!({
                        "tool": e.path().display().to_string(),
                        "reason": e.to_string(),
                    }),
                )
                .await;
                Catalog::default()
            }
        };
        let catalog = Arc::new(catalog);
        *self.catalog.write().expect("catalog lock poisoned") = Arc::clone(&catalog);
        catalog
    }

    /// Handle one inbound text for `conv`: commands are answered
    /// directly, anything else runs a model turn.
    pub async fn handle_input(&self, conv: &Conversation, text: &str) -> anyhow::Result<String> {
        let _in_flight = InFlight::enter();
        let _guard = self.locks.lock(&conv.conversation_id).await;
        match self.router.route(text) {
            Route::Command(cmd) => self.run_command(conv, &cmd).await,
            Route::Message => self.run_turn(conv, text).await,
        }
    }

    async fn run_command(&self, conv: &Conversation, cmd: &Command) -> anyhow::Result<String> {
        debug!(conversation = %conv, command = %cmd, "running command");
        self.emit(
            logs::COMMAND,
            json!({"conversation": conv.conversation_id, "command": cmd.to_string()}),
        )
        .await;

        let reply = match cmd {
            Command::Start => slash::greeting(self.agent_id()),
            Command::Help => slash::help_text(),
            Command::Reset => {
                let archived = self
                    .sessions
                    .clear(&conv.session_key)
                    .await
                    .context("failed to reset session")?;
                self.backend.forget(&conv.conversation_id).await;
                match archived {
                    Some(archive) => {
                        info!(conversation = %conv, archive = %archive, "conversation reset");
                        "Conversation reset. Previous messages were archived.".to_string()
                    }
                    None => "Conversation reset.".to_string(),
                }
            }
            Command::Count => {
                let n = self
                    .sessions
                    .count(&conv.session_key)
                    .await
                    .context("failed to count session")?;
                format!("This conversation has {n} message(s).")
            }
            Command::Unknown(_) => slash::UNKNOWN_REPLY.to_string(),
        };
        Ok(reply)
    }

    async fn run_turn(&self, conv: &Conversation, text: &str) -> anyhow::Result<String> {
        self.emit(
            logs::USER_MESSAGE,
            json!({"conversation": conv.conversation_id, "text": text}),
        )
        .await;

        match self.turn_inner(conv, text).await {
            Ok(reply) => {
                self.emit(
                    logs::ASSISTANT_RESPONSE,
                    json!({"conversation": conv.conversation_id, "text": reply}),
                )
                .await;
                Ok(reply)
            }
            Err(e) => {
                warn!(conversation = %conv, error = %e, "turn failed");
                self.emit(
                    logs::TURN_ERROR,
                    json!({"conversation": conv.conversation_id, "error": format!("{e:#}")}),
                )
                .await;
                Err(e)
            }
        }
    }

    async fn turn_inner(&self, conv: &Conversation, text: &str) -> anyhow::Result<String> {
        let history = self.prior_turns(conv).await?;
        self.sessions
            .append(&conv.session_key, Role::User, text)
            .await
            .context("failed to record user message")?;

        let catalog = self.catalog();
        let opts = CompletionOptions {
            system: Some(self.compose_system_prompt(&catalog)),
            model: self.model.clone(),
            conversation_id: Some(conv.conversation_id.clone()),
            continue_conversation: true,
            history,
        };

        let mut reply = self
            .backend
            .complete(text, &opts)
            .await
            .context("model call failed")?;

        let mut iterations = 0;
        while let Some(request) = parse_tool_request(&reply) {
            if iterations >= self.max_tool_iterations {
                warn!(conversation = %conv, limit = self.max_tool_iterations, "tool iteration limit reached");
                reply = TOOL_LIMIT_REPLY.to_string();
                break;
            }
            iterations += 1;
            debug!(conversation = %conv, tool = %request.name, "invoking tool (fenced)");

            let feedback = match self
                .dispatcher
                .dispatch_checked(&catalog, &request.name, &request.args)
                .await
            {
                Ok(stdout) => format!("[Tool Result for {}]: {}", request.name, stdout),
                Err(e) => format!("[Tool Error for {}]: {}", request.name, e.user_message()),
            };

            reply = self
                .backend
                .complete(&feedback, &opts)
                .await
                .context("model call failed (tool loop)")?;
        }

        self.sessions
            .append(&conv.session_key, Role::Assistant, &reply)
            .await
            .context("failed to record assistant reply")?;
        Ok(reply)
    }

    /// The tail of the persisted session as chat messages.
    async fn prior_turns(&self, conv: &Conversation) -> anyhow::Result<Vec<ChatMessage>> {
        let entries = self
            .sessions
            .entries(&conv.session_key)
            .await
            .context("failed to load session history")?;
        let start = entries.len().saturating_sub(CONTEXT_ENTRIES);
        Ok(entries[start..]
            .iter()
            .map(|e| ChatMessage::new(e.role.as_str(), e.content.as_str()))
            .collect())
    }

    fn compose_system_prompt(&self, catalog: &Catalog) -> String {
        let tools = catalog.prompt_block();
        match (self.system_prompt.trim().is_empty(), tools.is_empty()) {
            (_, true) => self.system_prompt.clone(),
            (true, false) => tools,
            (false, false) => format!("{}\n\n{}", self.system_prompt, tools),
        }
    }

    async fn emit(&self, event: &str, payload: serde_json::Value) {
        if let Some(events) = &self.events {
            events.record_json(event, &payload).await;
        }
    }
}
