//! Supervisor daemon for managing server processes.
//!
//! Provides persistent state storage, process lifecycle management with
//! bounded restarts, file watching, and an HTTP API for remote control.

pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod process;
pub mod state;
pub mod supervisor;
pub mod watch;
