// =============================================================================
// Lint Configuration
// =============================================================================

// Safety: deny unsafe by default
#![deny(unsafe_code)]
// Correctness: Must handle all fallible operations
#![deny(unused_must_use)]
// Quality: Pedantic but pragmatic
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(rust_2018_idioms)]
#![warn(unreachable_pub)]
// Allowed with documented reasons
#![allow(clippy::missing_errors_doc)] // Error returns self-documenting via type
#![allow(clippy::missing_panics_doc)] // Panics documented in main entry points
#![allow(clippy::module_name_repetitions)] // e.g., daemon::DaemonConfig is clearer
#![allow(clippy::doc_markdown)] // Too many false positives in code docs
#![allow(clippy::must_use_candidate)] // Not all returned values need annotation

//! Library crate for vigil - a declarative process supervisor and launcher.
//!
//! vigil keeps one long-running server process alive per descriptor entry:
//! it spawns the process, captures its output to log files, restarts it on
//! crash within a bounded budget, and tears it down gracefully on request.
//!
//! The crate is split into:
//!
//! - [`spec`] - the `vigil.toml` process descriptor (identity, start command,
//!   restart policy, log targets, environment profiles, watch options)
//! - [`daemon`] - the supervisor daemon: process lifecycle, persistent state,
//!   file watching, and the local HTTP management API
//! - [`launcher`] - environment preparation and process-replacing exec of the
//!   real server, with optional first-run bootstrap
//!
//! # Example
//!
//! ```no_run
//! use vigil::spec::Spec;
//!
//! # fn example() -> anyhow::Result<()> {
//! let spec = Spec::load_from("vigil.toml")?;
//! let report = spec.validate()?;
//! for warning in &report.warnings {
//!     eprintln!("warning: {warning}");
//! }
//! # Ok(())
//! # }
//! ```

/// Process descriptor types for vigil.toml.
///
/// Declares how one process should be started, restarted, and logged,
/// including named environment profiles selected at launch time.
pub mod spec;

/// Supervisor daemon: process lifecycle, state storage, watch, HTTP API.
pub mod daemon;

/// Launcher: prepare the environment and exec the real server process.
pub mod launcher;

/// Centralized constants for policy defaults and limits.
///
/// All magic numbers in the supervisor should be defined here with
/// documented rationale.
pub mod constants;

/// Shared utility functions (duration/byte formatting).
pub mod utils;
