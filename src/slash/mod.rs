//! Administrative slash commands.
//!
//! The set is closed: `/start`, `/help`, `/reset`, `/count`.  Anything
//! else that starts with `/` parses to [`Command::Unknown`] and gets a
//! fixed reply; command text never reaches the model.

use std::fmt;

/// Prefix marking a chat message as a command.
pub const PREFIX: char = '/';

/// Reply for commands outside the closed set.
pub const UNKNOWN_REPLY: &str = "Unknown command. Try /help.";

/// Metadata describing one command, for help output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandInfo {
    pub name: &'static str,
    pub description: &'static str,
}

/// Every supported command, in help order.
pub const COMMANDS: [CommandInfo; 4] = [
    CommandInfo {
        name: "start",
        description: "Greet and show what I can do",
    },
    CommandInfo {
        name: "help",
        description: "List available commands",
    },
    CommandInfo {
        name: "reset",
        description: "Archive this conversation and start fresh",
    },
    CommandInfo {
        name: "count",
        description: "Show how many messages this conversation holds",
    },
];

/// A parsed administrative command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Reset,
    Count,
    /// Any other `/word`; carries the name without the prefix.
    Unknown(String),
}

impl Command {
    /// Parse `text` as a command.  Returns `None` when it does not start
    /// with [`PREFIX`].
    ///
    /// The command name is the first whitespace-delimited token with the
    /// prefix removed.  A `@botname` suffix (as sent by group chats) is
    /// ignored, and names are case-insensitive.
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim_start();
        let rest = trimmed.strip_prefix(PREFIX)?;
        let token = rest.split_whitespace().next().unwrap_or("");
        let name = token.split('@').next().unwrap_or("").to_ascii_lowercase();
        Some(match name.as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "reset" => Command::Reset,
            "count" => Command::Count,
            _ => Command::Unknown(name),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Command::Start => "start",
            Command::Help => "help",
            Command::Reset => "reset",
            Command::Count => "count",
            Command::Unknown(name) => name,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}", self.name())
    }
}

/// Help text listing [`COMMANDS`].
pub fn help_text() -> String {
    let mut out = String::from("Available commands:\n");
    for cmd in COMMANDS {
        out.push_str(&format!("{PREFIX}{} - {}\n", cmd.name, cmd.description));
    }
    out.trim_end().to_string()
}

/// Greeting for `/start`.
pub fn greeting(agent_id: &str) -> String {
    format!(
        "Hi! I'm {agent_id}. Send me a message and I'll answer, using my tools when they help.\n\n{}",
        help_text()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_commands() {
        assert_eq!(Command::parse("/start"), Some(Command::Start));
        assert_eq!(Command::parse("  /help now"), Some(Command::Help));
        assert_eq!(Command::parse("/reset@pincer_bot"), Some(Command::Reset));
        assert_eq!(Command::parse("/COUNT"), Some(Command::Count));
    }

    #[test]
    fn unknown_and_non_commands() {
        assert_eq!(
            Command::parse("/weather NYC"),
            Some(Command::Unknown("weather".into()))
        );
        assert_eq!(Command::parse("/"), Some(Command::Unknown(String::new())));
        assert_eq!(Command::parse("hello /help"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn help_lists_every_command() {
        let help = help_text();
        for cmd in COMMANDS {
            assert!(help.contains(&format!("/{}", cmd.name)));
        }
        assert!(greeting("pincer").contains("/reset"));
    }
}
