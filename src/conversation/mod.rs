//! Conversation identity and input routing.
//!
//! Every external chat id maps to a session key and an LLM conversation
//! id by pure string derivation, so two chats can never share state and
//! no registry has to be kept in sync.

use std::fmt;

use crate::slash::Command;

/// Session key and conversation id for one external chat.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Conversation {
    pub chat_id: String,
    pub session_key: String,
    pub conversation_id: String,
}

impl fmt::Display for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.conversation_id)
    }
}

/// Where an inbound text should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Command(Command),
    Message,
}

/// Derives conversation identities for one agent.
#[derive(Debug, Clone)]
pub struct ConversationRouter {
    agent_id: String,
}

impl ConversationRouter {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// `chat_<chat>`
    pub fn session_key(&self, chat: impl fmt::Display) -> String {
        format!("chat_{chat}")
    }

    /// `<agent>_<chat>`
    pub fn conversation_id(&self, chat: impl fmt::Display) -> String {
        format!("{}_{chat}", self.agent_id)
    }

    pub fn conversation(&self, chat: impl fmt::Display) -> Conversation {
        let chat_id = chat.to_string();
        Conversation {
            session_key: self.session_key(&chat_id),
            conversation_id: self.conversation_id(&chat_id),
            chat_id,
        }
    }

    /// Commands go to the administrative handler, everything else to the
    /// model.
    pub fn route(&self, text: &str) -> Route {
        match Command::parse(text) {
            Some(cmd) => Route::Command(cmd),
            None => Route::Message,
        }
    }
}
