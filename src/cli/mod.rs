//! CLI subcommand handlers extracted from `main.rs`.
//!
//! Keeps `main.rs` slim: clap parsing stays there, heavy logic lives here.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::agent::{self, Orchestrator};
use crate::bot::BotLoop;
use crate::comm::TelegramPlatform;
use crate::config::Config;
use crate::conversation::Conversation;
use crate::logs::EventLog;
use crate::session::{FileSessionStore, SessionStore};
use crate::tools::Dispatcher;

/// Chat id used for terminal and pipe conversations.
pub const TERMINAL_CHAT: &str = "cli";

/// How long shutdown waits for in-flight turns.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

// ── Chat / ask ───────────────────────────────────────────────────────────────

/// Read messages line by line from `input` and write replies to `output`.
///
/// With `interactive` set a `> ` prompt is printed before each line.
/// Failed turns are reported on stderr and the loop continues.  Stops at
/// end of input or when `cancel` fires between messages.
pub async fn run_chat<R, W>(
    orch: &Orchestrator,
    conv: &Conversation,
    input: R,
    mut output: W,
    interactive: bool,
    cancel: &CancellationToken,
) -> anyhow::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut answered = 0;
    loop {
        if interactive {
            output.write_all(b"> ").await?;
            output.flush().await?;
        }
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line.context("failed to read input")?,
        };
        let Some(line) = line else { break };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        match orch.handle_input(conv, text).await {
            Ok(reply) => {
                output.write_all(reply.as_bytes()).await?;
                output.write_all(b"\n").await?;
                output.flush().await?;
                answered += 1;
            }
            Err(e) => eprintln!("error: {e:#}"),
        }
    }
    debug!(answered, "chat input closed");
    Ok(answered)
}

/// `pincer chat`: converse over stdin/stdout.
pub async fn chat(cfg: &Config, chat_id: &str, cancel: CancellationToken) -> anyhow::Result<()> {
    let orch = Orchestrator::from_config(cfg).await?;
    let conv = orch.router().conversation(chat_id);
    let interactive = std::io::stdin().is_terminal();
    if interactive {
        println!(
            "{} ready ({} tools). Type /help for commands, Ctrl-D to quit.",
            orch.agent_id(),
            orch.catalog().len()
        );
    }
    let stdin = BufReader::new(tokio::io::stdin());
    run_chat(&orch, &conv, stdin, tokio::io::stdout(), interactive, &cancel).await?;
    agent::drain_in_flight(DRAIN_TIMEOUT).await;
    Ok(())
}

/// `pincer ask`: run one turn and print the reply.
pub async fn ask(cfg: &Config, chat_id: &str, message: &str) -> anyhow::Result<()> {
    let orch = Orchestrator::from_config(cfg).await?;
    let conv = orch.router().conversation(chat_id);
    let reply = orch.handle_input(&conv, message).await?;
    println!("{reply}");
    Ok(())
}

// ── Tools ────────────────────────────────────────────────────────────────────

fn dispatcher_for(cfg: &Config) -> Dispatcher {
    let dispatcher = Dispatcher::new(&cfg.tools_dir, cfg.tool_settings());
    match &cfg.event_log {
        Some(path) => dispatcher.with_event_log(Arc::new(EventLog::new(path, &cfg.agent_id))),
        None => dispatcher,
    }
}

/// `pincer tools list`: print the catalog and any excluded tools.
pub async fn tools_list(cfg: &Config, json: bool) -> anyhow::Result<()> {
    let report = dispatcher_for(cfg)
        .discover()
        .await
        .with_context(|| format!("failed to scan {}", cfg.tools_dir.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report.catalog)?);
    } else if report.catalog.is_empty() {
        println!("No tools found in {}", cfg.tools_dir.display());
    } else {
        for tool in &report.catalog {
            let required = tool.parameters.required.join(", ");
            println!("{:<20} {}", tool.name, tool.description);
            if !required.is_empty() {
                println!("{:<20} required: {required}", "");
            }
        }
    }
    for skipped in &report.skipped {
        eprintln!("warning: {skipped}");
    }
    Ok(())
}

/// `pincer tools call`: validate (unless skipped) and dispatch one call.
pub async fn tools_call(
    cfg: &Config,
    name: &str,
    args: &str,
    skip_validation: bool,
) -> anyhow::Result<()> {
    let args: serde_json::Value =
        serde_json::from_str(args).context("arguments must be a JSON object")?;
    if !args.is_object() {
        anyhow::bail!("arguments must be a JSON object");
    }

    let dispatcher = dispatcher_for(cfg);
    let output = if skip_validation {
        dispatcher.dispatch(name, &args).await
    } else {
        let report = dispatcher.discover().await?;
        dispatcher
            .dispatch_checked(&report.catalog, name, &args)
            .await
    };
    match output {
        Ok(stdout) => {
            print!("{stdout}");
            if !stdout.ends_with('\n') {
                println!();
            }
            Ok(())
        }
        Err(e) => anyhow::bail!("{}", e.user_message()),
    }
}

// ── Sessions ─────────────────────────────────────────────────────────────────

fn session_store(cfg: &Config) -> FileSessionStore {
    FileSessionStore::new(&cfg.sessions_dir)
}

/// `pincer session show`
pub async fn session_show(cfg: &Config, key: &str, limit: Option<usize>) -> anyhow::Result<()> {
    for line in session_store(cfg).load(key, limit).await? {
        println!("{line}");
    }
    Ok(())
}

/// `pincer session count`
pub async fn session_count(cfg: &Config, key: &str) -> anyhow::Result<()> {
    println!("{}", session_store(cfg).count(key).await?);
    Ok(())
}

/// `pincer session clear`
pub async fn session_clear(cfg: &Config, key: &str) -> anyhow::Result<()> {
    match session_store(cfg).clear(key).await? {
        Some(archive) => println!("archived to {archive}"),
        None => println!("session {key} was already empty"),
    }
    Ok(())
}

/// `pincer session archives`
pub async fn session_archives(cfg: &Config, key: &str) -> anyhow::Result<()> {
    let store = session_store(cfg);
    for archive in store.archives(key).await? {
        let n = store.load_archive(&archive).await?.len();
        println!("{archive}\t{n} message(s)");
    }
    Ok(())
}

// ── Bot ──────────────────────────────────────────────────────────────────────

/// `pincer bot`: long-poll Telegram until `cancel` fires, then drain.
pub async fn bot(cfg: &Config, cancel: CancellationToken) -> anyhow::Result<()> {
    let tg = cfg.require_telegram()?;
    let platform = Arc::new(TelegramPlatform::from_config(tg)?);
    let orch = Arc::new(Orchestrator::from_config(cfg).await?);

    let mut bot = BotLoop::new(platform, orch)
        .with_poll_timeout(Duration::from_secs(tg.poll_timeout_secs))
        .with_retry_delay(Duration::from_secs(tg.retry_delay_secs));
    bot.run(cancel).await;

    let in_flight = agent::in_flight_count();
    if in_flight > 0 {
        info!(in_flight, "waiting for in-flight turns to drain…");
    }
    agent::drain_in_flight(DRAIN_TIMEOUT).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StubBackend;
    use crate::session::MemorySessionStore;
    use crate::tools::ToolSettings;

    #[tokio::test]
    async fn chat_answers_each_non_empty_line() {
        let orch = Orchestrator::new(
            "pincer",
            Arc::new(MemorySessionStore::new()),
            Arc::new(StubBackend::new()),
            Arc::new(Dispatcher::new("/nonexistent", ToolSettings::default())),
        );
        let conv = orch.router().conversation(TERMINAL_CHAT);
        let input: &[u8] = b"Hello\n\n/count\n";
        let mut out = Vec::new();
        let answered = run_chat(&orch, &conv, input, &mut out, false, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(answered, 2);
        let out = String::from_utf8(out).unwrap();
        assert_eq!(
            out,
            "Stub response #1: Hello\nThis conversation has 2 message(s).\n"
        );
    }
}
