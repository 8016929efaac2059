//! Process primitives for the vigil supervisor.
//!
//! Handles spawning supervised children with their log targets and
//! environment applied, graceful termination, liveness checks, and log
//! file rotation.
//!
//! ## Log Rotation
//!
//! Log files are rotated before each (re)spawn when they exceed a configured
//! size. Rotated logs are renamed with a timestamp suffix
//! (e.g. `api-out.log.20250101-120000`).

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt};
use tokio::process::{Child, Command};

use crate::constants;
use crate::spec::AppSpec;

/// Configuration for log rotation.
#[derive(Debug, Clone)]
pub struct LogRotationConfig {
    /// Maximum log file size in bytes before rotation.
    pub max_size: u64,
    /// Maximum number of rotated log files to keep.
    pub max_files: usize,
}

impl Default for LogRotationConfig {
    fn default() -> Self {
        Self {
            max_size: constants::MAX_LOG_SIZE_BYTES,
            max_files: constants::MAX_ROTATED_LOG_FILES,
        }
    }
}

/// Rotates a log file if it exceeds the configured size.
///
/// When rotation occurs:
/// 1. The current log file is renamed with a timestamp suffix
/// 2. Old rotated files exceeding `max_files` are deleted
/// 3. A new empty log file is created on next open
///
/// Returns `Ok(true)` if rotation occurred, `Ok(false)` if not needed.
pub fn rotate_log_if_needed(log_path: &Path, config: &LogRotationConfig) -> Result<bool> {
    let metadata = match fs::metadata(log_path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e).context("Failed to get log file metadata"),
    };

    if metadata.len() < config.max_size {
        return Ok(false);
    }

    // Generate rotated filename with timestamp
    let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
    let rotated_name = format!(
        "{}.{}",
        log_path.file_name().unwrap_or_default().to_string_lossy(),
        timestamp
    );
    let rotated_path = log_path.with_file_name(rotated_name);

    fs::rename(log_path, &rotated_path)
        .with_context(|| format!("Failed to rotate log file to {}", rotated_path.display()))?;

    tracing::info!(
        log = %log_path.display(),
        rotated_to = %rotated_path.display(),
        size_mb = metadata.len() / (1024 * 1024),
        "Rotated log file"
    );

    cleanup_old_logs(log_path, config.max_files)?;

    Ok(true)
}

/// Cleans up old rotated log files, keeping only the most recent ones.
fn cleanup_old_logs(log_path: &Path, max_files: usize) -> Result<()> {
    let log_dir = log_path.parent().unwrap_or(Path::new("."));
    let log_name = log_path.file_name().unwrap_or_default().to_string_lossy();

    // Find all rotated log files (matching pattern: {name}.{timestamp})
    let mut rotated_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();

    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let filename = path.file_name().unwrap_or_default().to_string_lossy();

            if filename.starts_with(&format!("{log_name}.")) && path != log_path {
                if let Ok(metadata) = fs::metadata(&path) {
                    if let Ok(modified) = metadata.modified() {
                        rotated_files.push((path, modified));
                    }
                }
            }
        }
    }

    // Sort by modification time (newest first)
    rotated_files.sort_by(|a, b| b.1.cmp(&a.1));

    // Delete files beyond the limit
    for (path, _) in rotated_files.iter().skip(max_files) {
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to delete old rotated log"
            );
        } else {
            tracing::debug!(path = %path.display(), "Deleted old rotated log");
        }
    }

    Ok(())
}

/// Opens a log target in append mode, creating parent directories.
fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))
}

/// Spawns the child process declared by an app descriptor.
///
/// The selected environment profile is overlaid on the base env, the
/// working directory is set to the app's `cwd`, and stdout/stderr are
/// wired to the configured log targets. Logs are rotated before opening.
///
/// When `log_date_format` is set the streams are piped through forwarder
/// tasks that prefix each line with a formatted timestamp; otherwise the
/// file handles are passed to the child directly.
///
/// # Errors
///
/// Returns an error if the env profile is unknown, the log files cannot
/// be opened, or the process fails to spawn.
pub async fn spawn_child(app: &AppSpec, profile: Option<&str>) -> Result<Child> {
    let env = app.resolved_env(profile)?;
    let out_path = app.out_file()?;
    let err_path = app.error_file()?;

    let rotation = LogRotationConfig::default();
    rotate_log_if_needed(&out_path, &rotation)?;
    if err_path != out_path {
        rotate_log_if_needed(&err_path, &rotation)?;
    }

    let mut cmd = match &app.interpreter {
        Some(interpreter) => {
            let mut cmd = Command::new(interpreter);
            cmd.arg(&app.script);
            cmd
        },
        None => Command::new(&app.script),
    };

    cmd.args(&app.args)
        .current_dir(&app.cwd)
        .envs(&env)
        .stdin(Stdio::null())
        .kill_on_drop(true);

    let stamped = app.log_date_format.is_some();

    if stamped {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    } else {
        let out_file = open_log_file(&out_path)?;
        let err_file = if err_path == out_path {
            out_file.try_clone().context("Failed to clone log handle")?
        } else {
            open_log_file(&err_path)?
        };
        cmd.stdout(Stdio::from(out_file)).stderr(Stdio::from(err_file));
    }

    let mut child = cmd.spawn().with_context(|| {
        format!(
            "Failed to spawn process '{}' ({})",
            app.name,
            app.script.display()
        )
    })?;

    if stamped {
        let format = app
            .log_date_format
            .clone()
            .unwrap_or_default();

        if let Some(stdout) = child.stdout.take() {
            let file = open_log_file(&out_path)?;
            tokio::spawn(forward_lines(stdout, file, format.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            let file = open_log_file(&err_path)?;
            tokio::spawn(forward_lines(stderr, file, format));
        }
    }

    tracing::info!(
        process = %app.name,
        pid = child.id().unwrap_or_default(),
        out = %out_path.display(),
        err = %err_path.display(),
        profile = profile.unwrap_or("default"),
        "Spawned process"
    );

    Ok(child)
}

/// Forwards lines from a child stream to a log file, prefixing each
/// with a timestamp in the given chrono format.
///
/// Files are opened in append mode, so merged stdout/stderr targets
/// interleave at line granularity.
async fn forward_lines<R>(reader: R, file: File, format: String)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut file = tokio::fs::File::from_std(file);
    let mut lines = tokio::io::BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let stamped = format!("{}: {}\n", Local::now().format(&format), line);
                if let Err(e) = file.write_all(stamped.as_bytes()).await {
                    tracing::warn!(error = %e, "Failed to write log line");
                    break;
                }
            },
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read child output");
                break;
            },
        }
    }

    let _ = file.flush().await;
}

/// Gracefully stops a supervised child.
///
/// Sends SIGTERM and waits up to `timeout` for a clean exit, then falls
/// back to SIGKILL. Returns the exit status when one was collected.
///
/// On non-Unix platforms the child is killed directly (no SIGTERM
/// equivalent for console-less children).
pub async fn graceful_stop(child: &mut Child, timeout: Duration) -> Result<Option<ExitStatus>> {
    let Some(pid) = child.id() else {
        // Already exited; collect the status
        return Ok(Some(child.wait().await.context("Failed to reap child")?));
    };

    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid as NixPid;

        #[allow(clippy::cast_possible_wrap)]
        let nix_pid = NixPid::from_raw(pid as i32);

        signal::kill(nix_pid, Signal::SIGTERM)
            .with_context(|| format!("Failed to send SIGTERM to process {pid}"))?;

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => {
                let status = status.context("Failed to reap child after SIGTERM")?;
                tracing::info!(pid = pid, "Process exited after SIGTERM");
                return Ok(Some(status));
            },
            Err(_) => {
                tracing::warn!(
                    pid = pid,
                    timeout_ms = timeout.as_millis() as u64,
                    "Process didn't exit within kill timeout, sending SIGKILL"
                );
            },
        }
    }

    // Forceful termination (SIGKILL on Unix)
    child.start_kill().context("Failed to kill process")?;
    let status = child.wait().await.context("Failed to reap killed child")?;
    tracing::info!(pid = pid, "Process forcibly terminated");
    Ok(Some(status))
}

/// Terminates a process the daemon no longer holds a handle for.
///
/// Used for orphans left over from a previous daemon run: SIGTERM, poll
/// for exit up to `timeout`, then SIGKILL.
pub fn kill_unmanaged(pid: u32, timeout: Duration) -> Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid as NixPid;

        #[allow(clippy::cast_possible_wrap)]
        let nix_pid = NixPid::from_raw(pid as i32);

        signal::kill(nix_pid, Signal::SIGTERM)
            .with_context(|| format!("Failed to send SIGTERM to process {pid}"))?;

        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if !is_running(pid)? {
                tracing::info!(pid = pid, "Process exited after SIGTERM");
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        tracing::warn!(pid = pid, "Process didn't respond to SIGTERM, sending SIGKILL");
        signal::kill(nix_pid, Signal::SIGKILL)
            .with_context(|| format!("Failed to send SIGKILL to process {pid}"))?;
    }

    #[cfg(not(unix))]
    {
        let _ = timeout;
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        if let Some(proc) = system.process(Pid::from(pid as usize)) {
            proc.kill();
        }
    }

    tracing::info!(pid = pid, "Killed process");
    Ok(())
}

/// Checks if a process with the given PID is currently running.
///
/// Uses sysinfo to query the system's process table. Returns `Ok(false)`
/// for non-existent processes rather than erroring, making it safe for
/// polling process status.
pub fn is_running(pid: u32) -> Result<bool> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    Ok(system.process(Pid::from(pid as usize)).is_some())
}

/// Reads the last N lines from a log file.
///
/// Used by the `vigil logs` command and the logs API endpoint.
pub fn tail_log(log_path: &Path, lines: usize) -> Result<Vec<String>> {
    let file = File::open(log_path)
        .with_context(|| format!("Failed to open log file: {}", log_path.display()))?;

    let reader = BufReader::new(file);
    let all_lines: Vec<String> = reader
        .lines()
        .collect::<std::io::Result<_>>()
        .context("Failed to read log file")?;

    let start = all_lines.len().saturating_sub(lines);
    Ok(all_lines[start..].to_vec())
}
