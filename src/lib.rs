//! frontdesk — conversational booking assistant.
//!
//! This library crate re-exports modules so integration tests
//! (under `tests/`) can access them.

pub mod agent;
pub mod booking;
pub mod calendar;
pub mod config;
pub mod convo;
pub mod gateway;
pub mod models;
pub mod notify;
pub mod schedule;
pub mod tools;

/// Return the frontdesk home directory.
///
/// Resolution order:
/// 1. `FRONTDESK_HOME` environment variable
/// 2. `$HOME/.frontdesk`
pub fn frontdesk_home() -> std::path::PathBuf {
    if let Ok(p) = std::env::var("FRONTDESK_HOME") {
        std::path::PathBuf::from(p)
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join(".frontdesk")
    }
}
