//! pincer: a chat agent that calls self-describing executable tools.
//!
//! This library crate re-exports modules so integration tests
//! (under `tests/`) can access them.

pub mod agent;
pub mod bot;
pub mod cli;
pub mod comm;
pub mod config;
pub mod conversation;
pub mod logs;
pub mod models;
pub mod session;
pub mod slash;
pub mod tools;
pub mod utils;

/// Return the pincer home directory.
///
/// Resolution order:
/// 1. `PINCER_HOME` environment variable
/// 2. `$HOME/.pincer`
pub fn pincer_home() -> std::path::PathBuf {
    if let Ok(p) = std::env::var("PINCER_HOME") {
        std::path::PathBuf::from(p)
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join(".pincer")
    }
}
