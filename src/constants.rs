//! Centralized constants for policy defaults and limits.
//!
//! All magic numbers in the supervisor should be defined here with
//! documented rationale. This enables:
//! - Policy auditing in one place
//! - Consistent limits across modules
//! - Easy tuning without code search

// =============================================================================
// Restart Policy Defaults
// =============================================================================

/// Maximum unhealthy restarts before a process is left stopped (errored).
pub const DEFAULT_MAX_RESTARTS: u32 = 10;

/// Minimum uptime for a run to count as healthy (10 seconds).
/// Runs shorter than this accumulate toward the restart limit.
pub const DEFAULT_MIN_UPTIME_MS: u64 = 10_000;

/// Fixed delay between restart attempts (1 second).
pub const DEFAULT_RESTART_DELAY_MS: u64 = 1_000;

/// Graceful-shutdown window before SIGKILL (5 seconds).
pub const DEFAULT_KILL_TIMEOUT_MS: u64 = 5_000;

// =============================================================================
// Logging
// =============================================================================

/// Maximum log file size before rotation (10 MB).
pub const MAX_LOG_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep per target.
pub const MAX_ROTATED_LOG_FILES: usize = 5;

// =============================================================================
// File Watching
// =============================================================================

/// Interval between watch scans of the working directory (500 ms).
/// Polling keeps the watcher portable and dependency-free.
pub const WATCH_POLL_INTERVAL_MS: u64 = 500;

/// Quiet period after a detected change before a restart fires (2 seconds).
/// Collapses bursts of writes (editor saves, build output) into one restart.
pub const WATCH_DEBOUNCE_MS: u64 = 2_000;

// =============================================================================
// Daemon
// =============================================================================

/// Default port for the daemon HTTP API.
pub const DEFAULT_DAEMON_PORT: u16 = 7070;

/// Maximum request body size for the daemon API (1 MB).
/// Descriptor paths and profile names are small; anything larger is abuse.
pub const MAX_BODY_SIZE_BYTES: usize = 1024 * 1024;

/// How long the CLI waits for an auto-started daemon to become healthy (5 s).
pub const DAEMON_START_TIMEOUT_MS: u64 = 5_000;

/// Default number of log lines returned by logs endpoints.
pub const DEFAULT_LOG_LINES: usize = 50;
