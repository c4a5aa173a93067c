//! Builtin tools exposed to the agent.

pub mod availability;
pub mod book;
pub mod cancel;
pub mod handover;
pub mod reschedule;
