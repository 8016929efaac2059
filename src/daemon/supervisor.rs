//! Per-process supervision loop.
//!
//! One supervisor task owns one child process: it spawns the child, waits
//! on it, and applies the descriptor's restart policy when it exits.
//!
//! ## Restart accounting
//!
//! A run that lives at least `min_uptime_ms` is healthy and resets the
//! restart counter. A shorter run counts toward `max_restarts`; once the
//! budget is exhausted the process is marked errored and left stopped
//! until manual intervention. Between restarts the supervisor sleeps the
//! fixed `restart_delay_ms`. Manual restarts (CLI/API) never count.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::{Duration, Instant};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::daemon::process;
use crate::daemon::state::{ProcessRecord, StateStore, Status};
use crate::daemon::watch;
use crate::spec::AppSpec;

/// Commands delivered to a running supervisor.
#[derive(Debug)]
pub enum Command {
    /// Gracefully stop the child and end supervision. The sender is
    /// acknowledged once the child has been reaped.
    Stop(oneshot::Sender<()>),
    /// Gracefully stop the child and respawn it immediately.
    /// Does not count toward the restart limit.
    Restart,
}

/// Handle to a running supervisor task.
pub struct SupervisorHandle {
    name: String,
    tx: mpsc::Sender<Command>,
    task: JoinHandle<()>,
    stop_wait: Duration,
}

impl SupervisorHandle {
    /// Name of the supervised process.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the supervision loop has ended (stopped or errored).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Request a graceful stop and wait for the child to be reaped.
    ///
    /// The wait is bounded by the app's kill timeout plus a grace margin.
    pub async fn stop(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Command::Stop(ack_tx))
            .await
            .context("Supervisor is no longer running")?;

        tokio::time::timeout(self.stop_wait, ack_rx)
            .await
            .context("Timed out waiting for process to stop")?
            .context("Supervisor ended without acknowledging stop")?;

        Ok(())
    }

    /// Request a graceful restart.
    pub async fn restart(&self) -> Result<()> {
        self.tx
            .send(Command::Restart)
            .await
            .context("Supervisor is no longer running")
    }
}

/// What ended a supervised run.
enum Event {
    /// Child exited on its own (or waiting on it failed).
    Exited(std::io::Result<ExitStatus>),
    /// Stop requested via handle.
    StopRequested(oneshot::Sender<()>),
    /// Restart requested via handle.
    RestartRequested,
    /// Watched files changed.
    FileChanged,
}

/// Spawns a supervisor task for one app.
///
/// The returned handle controls the task; dropping it does not stop
/// supervision (the daemon stops supervisors explicitly on shutdown).
pub fn spawn(
    app: AppSpec,
    spec_path: PathBuf,
    profile: Option<String>,
    store: StateStore,
) -> SupervisorHandle {
    let (tx, rx) = mpsc::channel(8);
    let name = app.name.clone();
    // SIGTERM wait + SIGKILL reap margin
    let stop_wait = app.kill_timeout() + Duration::from_secs(2);

    let watch_rx = if app.watch {
        Some(watch::spawn_watcher(app.cwd.clone(), app.ignore_watch.clone()))
    } else {
        None
    };

    let task = tokio::spawn(run_loop(app, spec_path, profile, store, rx, watch_rx));

    SupervisorHandle {
        name,
        tx,
        task,
        stop_wait,
    }
}

#[allow(clippy::too_many_lines)]
async fn run_loop(
    app: AppSpec,
    spec_path: PathBuf,
    profile: Option<String>,
    store: StateStore,
    mut rx: mpsc::Receiver<Command>,
    mut watch_rx: Option<mpsc::Receiver<()>>,
) {
    let mut restarts: u32 = 0;
    let mut last_restart_at = None;

    loop {
        let mut child = match process::spawn_child(&app, profile.as_deref()).await {
            Ok(child) => child,
            Err(e) => {
                // A spawn failure is a descriptor/environment problem, not
                // a crash; retrying would fail the same way.
                tracing::error!(process = %app.name, error = %e, "Failed to spawn process");
                save_record(
                    &store,
                    &app,
                    &spec_path,
                    profile.as_deref(),
                    0,
                    Status::Errored,
                    restarts,
                    last_restart_at,
                )
                .await;
                return;
            },
        };

        let pid = child.id().unwrap_or_default();
        let started = Instant::now();
        save_record(
            &store,
            &app,
            &spec_path,
            profile.as_deref(),
            pid,
            Status::Running,
            restarts,
            last_restart_at,
        )
        .await;

        match wait_for_event(&mut child, &mut rx, watch_rx.as_mut()).await {
            Event::StopRequested(ack) => {
                stop_child(&app, &mut child).await;
                let _ = store
                    .set_status_async(app.name.clone(), Status::Stopped)
                    .await;
                let _ = ack.send(());
                return;
            },
            Event::RestartRequested => {
                tracing::info!(process = %app.name, "Restart requested");
                stop_child(&app, &mut child).await;
                last_restart_at = Some(Utc::now());
            },
            Event::FileChanged => {
                tracing::info!(process = %app.name, "Watched files changed, restarting");
                stop_child(&app, &mut child).await;
                last_restart_at = Some(Utc::now());
            },
            Event::Exited(result) => {
                let (exit_code, clean_exit) = match &result {
                    Ok(status) => (status.code().unwrap_or(-1), status.success()),
                    Err(e) => {
                        tracing::error!(process = %app.name, error = %e, "Failed to wait on child");
                        (-1, false)
                    },
                };
                let uptime = started.elapsed();
                let healthy = uptime >= app.min_uptime();

                tracing::warn!(
                    process = %app.name,
                    pid = pid,
                    exit_code = exit_code,
                    uptime_ms = uptime.as_millis() as u64,
                    healthy = healthy,
                    "Process exited"
                );

                if !app.autorestart {
                    let status = if clean_exit {
                        Status::Stopped
                    } else {
                        Status::Crashed { exit_code }
                    };
                    let _ = store.set_status_async(app.name.clone(), status).await;
                    return;
                }

                if healthy {
                    restarts = 0;
                } else {
                    restarts += 1;
                }

                if restarts > app.max_restarts {
                    tracing::error!(
                        process = %app.name,
                        restarts = restarts - 1,
                        max_restarts = app.max_restarts,
                        "Restart limit exhausted, leaving process stopped"
                    );
                    save_record(
                        &store,
                        &app,
                        &spec_path,
                        profile.as_deref(),
                        pid,
                        Status::Errored,
                        restarts - 1,
                        last_restart_at,
                    )
                    .await;
                    return;
                }

                let _ = store
                    .set_status_async(app.name.clone(), Status::Crashed { exit_code })
                    .await;

                // Fixed delay before respawn, still responsive to Stop
                if !wait_restart_delay(&mut rx, app.restart_delay()).await {
                    let _ = store
                        .set_status_async(app.name.clone(), Status::Stopped)
                        .await;
                    return;
                }

                last_restart_at = Some(Utc::now());
            },
        }
    }
}

/// Waits for whichever comes first: child exit, a command, or a watch event.
async fn wait_for_event(
    child: &mut Child,
    rx: &mut mpsc::Receiver<Command>,
    watch_rx: Option<&mut mpsc::Receiver<()>>,
) -> Event {
    let watch_changed = async {
        match watch_rx {
            Some(watch) => {
                watch.recv().await;
            },
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        status = child.wait() => Event::Exited(status),
        cmd = rx.recv() => match cmd {
            Some(Command::Stop(ack)) => Event::StopRequested(ack),
            Some(Command::Restart) => Event::RestartRequested,
            // All handles dropped: treat as stop without ack
            None => {
                let (ack, _) = oneshot::channel();
                Event::StopRequested(ack)
            },
        },
        () = watch_changed => Event::FileChanged,
    }
}

/// Sleeps the restart delay. Returns false when a Stop arrived during
/// the delay (the caller should end supervision); Restart commands just
/// cut the delay short.
async fn wait_restart_delay(rx: &mut mpsc::Receiver<Command>, delay: Duration) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => true,
        cmd = rx.recv() => match cmd {
            Some(Command::Stop(ack)) => {
                let _ = ack.send(());
                false
            },
            Some(Command::Restart) => true,
            None => false,
        },
    }
}

async fn stop_child(app: &AppSpec, child: &mut Child) {
    if let Err(e) = process::graceful_stop(child, app.kill_timeout()).await {
        tracing::warn!(process = %app.name, error = %e, "Failed to stop child cleanly");
    }
}

#[allow(clippy::too_many_arguments)]
async fn save_record(
    store: &StateStore,
    app: &AppSpec,
    spec_path: &std::path::Path,
    profile: Option<&str>,
    pid: u32,
    status: Status,
    restart_count: u32,
    last_restart_at: Option<chrono::DateTime<Utc>>,
) {
    let record = ProcessRecord {
        name: app.name.clone(),
        pid,
        status,
        spec_path: spec_path.to_path_buf(),
        profile: profile.map(ToString::to_string),
        started_at: Utc::now(),
        restart_count,
        last_restart_at,
        out_file: app.out_file().unwrap_or_default(),
        error_file: app.error_file().unwrap_or_default(),
    };

    if let Err(e) = store.save_process_async(record).await {
        tracing::error!(process = %app.name, error = %e, "Failed to persist process record");
    }
}
