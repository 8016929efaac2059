//! CLI command handlers.
//!
//! Lifecycle commands (`start`, `stop`, `restart`) talk to the daemon's
//! HTTP API so the supervisor owns every child; read-only commands
//! (`ps`, `logs`, `inspect`, ...) read the state store directly.

pub mod daemon;
pub mod process;
