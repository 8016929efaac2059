//! CLI command handlers for process lifecycle and inspection.
//!
//! Implements pm2-like commands: start, stop, restart, ps, stats,
//! logs, inspect, prune.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};

use vigil::constants;
use vigil::daemon::config;
use vigil::daemon::process;
use vigil::daemon::state::{StateStore, Status};
use vigil::spec::Spec;
use vigil::utils::{format_bytes, format_duration};

use super::daemon::DaemonClient;

/// Start one or all apps from a descriptor.
///
/// Auto-starts the daemon when no daemon is reachable. With no `--name`,
/// every app in the descriptor is started.
pub async fn start(
    spec_path: &Path,
    name: Option<&str>,
    profile: Option<&str>,
) -> Result<()> {
    let spec_path = spec_path
        .canonicalize()
        .with_context(|| format!("Descriptor not found: {}", spec_path.display()))?;

    // Validate locally first for error messages without a daemon round trip
    let spec = Spec::load_from(&spec_path)?;
    let validation = spec.validate()?;
    for warning in &validation.warnings {
        eprintln!("warning: {warning}");
    }

    let names: Vec<String> = match name {
        Some(name) => vec![spec.app(name)?.name.clone()],
        None => spec.apps.iter().map(|a| a.name.clone()).collect(),
    };

    let client = DaemonClient::from_config();
    client.ensure_running().await?;

    for app_name in &names {
        match client.start_process(&spec_path, app_name, profile).await {
            Ok(_) => println!("Started '{app_name}'"),
            Err(e) => {
                eprintln!("Failed to start '{app_name}': {e}");
            },
        }
    }

    println!("\nManage with:");
    println!("  vigil ps            # List processes");
    if let Some(first) = names.first() {
        println!("  vigil logs {first}    # View logs");
        println!("  vigil stop {first}    # Stop process");
    }

    Ok(())
}

/// Stop a supervised process.
///
/// Goes through the daemon when one is running; otherwise falls back to
/// signalling the recorded PID directly.
pub async fn stop(name: &str) -> Result<()> {
    let client = DaemonClient::from_config();

    if client.is_running().await {
        client.stop_process(name).await?;
        println!("Process '{name}' stopped");
        return Ok(());
    }

    // No daemon: the record is our only handle on the process
    let state_path = config::state_path()?;
    if !state_path.exists() {
        anyhow::bail!("Process '{name}' not found (no daemon, no state)");
    }

    let store = StateStore::open(&state_path)?;
    let record = store
        .get_process(name)?
        .with_context(|| format!("Process '{name}' not found"))?;

    if record.status != Status::Running {
        println!("Process '{name}' is not running (status: {})", record.status);
        return Ok(());
    }

    if process::is_running(record.pid)? {
        println!("Stopping process '{name}' (PID: {})...", record.pid);
        process::kill_unmanaged(
            record.pid,
            Duration::from_millis(constants::DEFAULT_KILL_TIMEOUT_MS),
        )?;
    }

    store.set_status(name, Status::Stopped)?;
    println!("Process '{name}' stopped");
    Ok(())
}

/// Restart a process through the daemon.
///
/// Also revives errored processes with a fresh restart budget.
pub async fn restart(name: &str) -> Result<()> {
    let client = DaemonClient::from_config();
    client.ensure_running().await?;

    client.restart_process(name).await?;
    println!("Process '{name}' restarting");
    Ok(())
}

/// List all tracked processes.
///
/// Shows status, PID, restart count, and uptime for each process.
pub fn ps(json: bool) -> Result<()> {
    let state_path = config::state_path()?;

    if !state_path.exists() {
        if json {
            println!("[]");
        } else {
            println!("No processes found. Start one with 'vigil start <descriptor>'");
        }
        return Ok(());
    }

    let store = StateStore::open(&state_path)?;
    let records = store.list_processes()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No processes found. Start one with 'vigil start <descriptor>'");
        return Ok(());
    }

    println!(
        "{:<16} {:<8} {:<18} {:<9} {:<10} PROFILE",
        "NAME", "PID", "STATUS", "RESTARTS", "UPTIME"
    );
    println!("{}", "─".repeat(76));

    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    for record in records {
        let status = effective_status(&record.status, record.pid, &system);

        let uptime = if status == "running" {
            format_duration(Utc::now().signed_duration_since(record.started_at))
        } else {
            "-".to_string()
        };

        println!(
            "{:<16} {:<8} {:<18} {:<9} {:<10} {}",
            record.name,
            record.pid,
            status,
            record.restart_count,
            uptime,
            record.profile.as_deref().unwrap_or("default")
        );
    }

    Ok(())
}

/// Show real-time CPU and memory statistics.
///
/// Continuously updates until Ctrl+C is pressed.
pub async fn stats() -> Result<()> {
    let state_path = config::state_path()?;

    if !state_path.exists() {
        println!("No processes found. Start one with 'vigil start <descriptor>'");
        return Ok(());
    }

    let store = StateStore::open(&state_path)?;

    println!("Press Ctrl+C to exit\n");

    loop {
        // Clear screen and move cursor to top
        print!("\x1B[2J\x1B[H");

        let records = store.list_processes()?;

        if records.is_empty() {
            println!("No processes found.");
        } else {
            println!(
                "{:<16} {:<8} {:<8} {:<12} {:<9} STATUS",
                "NAME", "PID", "CPU", "MEM", "RESTARTS"
            );
            println!("{}", "─".repeat(70));

            let mut system = System::new();
            system.refresh_processes(ProcessesToUpdate::All, true);

            for record in &records {
                let (cpu, mem, status) = system.process(Pid::from(record.pid as usize)).map_or(
                    ("-".to_string(), "-".to_string(), record.status.to_string()),
                    |proc| {
                        let cpu = format!("{:.1}%", proc.cpu_usage());
                        let mem = format_bytes(proc.memory());
                        (cpu, mem, "running".to_string())
                    },
                );

                println!(
                    "{:<16} {:<8} {:<8} {:<12} {:<9} {}",
                    record.name, record.pid, cpu, mem, record.restart_count, status
                );
            }
        }

        tokio::select! {
            () = tokio::time::sleep(Duration::from_secs(1)) => {},
            _ = tokio::signal::ctrl_c() => {
                println!("\n");
                break;
            }
        }
    }

    Ok(())
}

/// View logs for a process.
///
/// Shows recent lines from the stdout target (or stderr with `--err`),
/// or follows in real-time.
pub async fn logs(name: &str, follow: bool, lines: usize, err: bool) -> Result<()> {
    let state_path = config::state_path()?;
    if !state_path.exists() {
        anyhow::bail!("Process '{name}' not found (no state)");
    }

    let store = StateStore::open(&state_path)?;
    let record = store
        .get_process(name)?
        .with_context(|| format!("Process '{name}' not found"))?;

    let log_path: PathBuf = if err {
        record.error_file
    } else {
        record.out_file
    };

    if !log_path.exists() {
        println!("No logs found for process '{name}'");
        println!("Log path: {}", log_path.display());
        return Ok(());
    }

    if follow {
        println!("Following logs for '{name}' (Ctrl+C to exit)...\n");

        #[cfg(unix)]
        {
            let mut child = std::process::Command::new("tail")
                .args(["-f", "-n", &lines.to_string()])
                .arg(&log_path)
                .spawn()
                .context("Failed to spawn tail command")?;

            tokio::signal::ctrl_c().await?;
            let _ = child.kill();
        }

        #[cfg(not(unix))]
        {
            use std::io::{BufRead, BufReader, Seek, SeekFrom};
            let mut file = std::fs::File::open(&log_path)?;
            file.seek(SeekFrom::End(0))?;
            let mut reader = BufReader::new(file);

            loop {
                let mut line = String::new();
                match reader.read_line(&mut line) {
                    Ok(0) => {
                        tokio::select! {
                            () = tokio::time::sleep(Duration::from_millis(100)) => {},
                            _ = tokio::signal::ctrl_c() => break,
                        }
                    },
                    Ok(_) => print!("{line}"),
                    Err(e) => {
                        eprintln!("Error reading log: {e}");
                        break;
                    },
                }
            }
        }
    } else {
        let log_lines = process::tail_log(&log_path, lines)?;

        if log_lines.is_empty() {
            println!("Log file is empty for process '{name}'");
        } else {
            for line in log_lines {
                println!("{line}");
            }
        }
    }

    Ok(())
}

/// Show detailed information about a process.
pub fn inspect(name: &str) -> Result<()> {
    let state_path = config::state_path()?;
    let store = StateStore::open(&state_path)?;

    let record = store
        .get_process(name)?
        .with_context(|| format!("Process '{name}' not found"))?;

    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let status = effective_status(&record.status, record.pid, &system);

    let uptime = if status == "running" {
        format_duration(Utc::now().signed_duration_since(record.started_at))
    } else {
        "-".to_string()
    };

    println!("Name:        {}", record.name);
    println!("PID:         {}", record.pid);
    println!("Status:      {status}");
    println!("Profile:     {}", record.profile.as_deref().unwrap_or("default"));
    println!(
        "Started:     {}",
        record.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("Uptime:      {uptime}");
    println!("Restarts:    {}", record.restart_count);
    if let Some(last) = record.last_restart_at {
        println!("Last restart: {}", last.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!("Descriptor:  {}", record.spec_path.display());
    println!("Stdout log:  {}", record.out_file.display());
    println!("Stderr log:  {}", record.error_file.display());

    if status == "running" {
        if let Some(proc) = system.process(Pid::from(record.pid as usize)) {
            println!("\nResources:");
            println!("  CPU:       {:.1}%", proc.cpu_usage());
            println!("  Memory:    {}", format_bytes(proc.memory()));
        }
    }

    Ok(())
}

/// Remove records for processes that are no longer running.
pub fn prune() -> Result<()> {
    let state_path = config::state_path()?;

    if !state_path.exists() {
        println!("No processes to prune");
        return Ok(());
    }

    let store = StateStore::open(&state_path)?;
    let records = store.list_processes()?;

    let mut pruned = 0;

    for record in records {
        let should_prune = match &record.status {
            Status::Stopped | Status::Crashed { .. } | Status::Errored => true,
            Status::Running => !process::is_running(record.pid)?,
        };

        if should_prune {
            store.remove_process(&record.name)?;
            println!("Removed: {}", record.name);
            pruned += 1;
        }
    }

    if pruned == 0 {
        println!("No stopped processes to prune");
    } else {
        println!("\nPruned {pruned} process(es)");
    }

    Ok(())
}

/// Resolves the displayed status against the live process table.
///
/// A record can say "running" after the daemon died with its children;
/// the process table is the ground truth.
fn effective_status(status: &Status, pid: u32, system: &System) -> String {
    if *status == Status::Running && system.process(Pid::from(pid as usize)).is_none() {
        "crashed".to_string()
    } else {
        status.to_string()
    }
}
