use pincer::cli;
use pincer::config::Config;
use pincer::logs;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "pincer", version, about = "Chat agent with executable tool plugins")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chat over stdin/stdout
    Chat {
        /// Chat identifier (selects the session)
        #[arg(long, default_value = cli::TERMINAL_CHAT)]
        chat: String,
    },
    /// Run a single turn and print the reply
    Ask {
        /// Chat identifier (selects the session)
        #[arg(long, default_value = cli::TERMINAL_CHAT)]
        chat: String,
        /// Message to send
        message: String,
    },
    /// Inspect and invoke tools
    Tools {
        #[command(subcommand)]
        action: ToolsAction,
    },
    /// Inspect and manage sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Run the Telegram bot until Ctrl-C
    Bot,
}

#[derive(Subcommand, Debug)]
enum ToolsAction {
    /// List discovered tools
    List {
        /// Print the catalog as JSON
        #[arg(long)]
        json: bool,
    },
    /// Invoke a tool directly
    Call {
        /// Tool name
        name: String,
        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        args: String,
        /// Dispatch without checking the catalog first
        #[arg(long)]
        skip_validation: bool,
    },
}

#[derive(Subcommand, Debug)]
enum SessionAction {
    /// Print the rendered history
    Show {
        /// Session key (e.g. chat_42)
        key: String,
        /// Only the last N messages
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print the number of messages
    Count { key: String },
    /// Archive and empty a session
    Clear { key: String },
    /// List archives of a session
    Archives { key: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logs::init_tracing(cli.log_json);

    let home = pincer::pincer_home();
    let config_path = cli.config.unwrap_or_else(|| home.join("config.yaml"));
    let cfg = Config::load(&config_path, &home).await?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received Ctrl-C, shutting down…");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Command::Chat { chat } => cli::chat(&cfg, &chat, cancel).await,
        Command::Ask { chat, message } => cli::ask(&cfg, &chat, &message).await,
        Command::Tools { action } => match action {
            ToolsAction::List { json } => cli::tools_list(&cfg, json).await,
            ToolsAction::Call {
                name,
                args,
                skip_validation,
            } => cli::tools_call(&cfg, &name, &args, skip_validation).await,
        },
        Command::Session { action } => match action {
            SessionAction::Show { key, limit } => cli::session_show(&cfg, &key, limit).await,
            SessionAction::Count { key } => cli::session_count(&cfg, &key).await,
            SessionAction::Clear { key } => cli::session_clear(&cfg, &key).await,
            SessionAction::Archives { key } => cli::session_archives(&cfg, &key).await,
        },
        Command::Bot => {
            cli::bot(&cfg, cancel).await?;
            info!("shutdown complete");
            Ok(())
        }
    }
}
