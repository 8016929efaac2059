//! Daemon lifecycle and the CLI's HTTP client for it.

use anyhow::{Context, Result};
use std::time::Duration;

use vigil::constants;
use vigil::daemon::config::{self, DaemonConfig};
use vigil::daemon::http;
use vigil::daemon::logging::{init_logging, LogConfig, LogFormat};

/// Run the daemon in the foreground.
///
/// `vigil start` spawns this detached when no daemon is reachable; it can
/// also be run directly under systemd or in a terminal.
pub async fn run(port: Option<u16>) -> Result<()> {
    let config = DaemonConfig::load().unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load daemon config: {e}");
        eprintln!("Using default configuration");
        DaemonConfig::default()
    });

    let format: LogFormat = config
        .logging
        .format
        .parse()
        .unwrap_or_else(|e: String| {
            eprintln!("Warning: {e}; using pretty format");
            LogFormat::Pretty
        });
    init_logging(&LogConfig::default().format(format));

    let mut config = config;
    if let Some(port) = port {
        config.daemon.port = port;
    }

    println!("Starting vigil daemon on port {}...", config.daemon.port);
    println!("API endpoint: http://127.0.0.1:{}", config.daemon.port);
    println!("\nEndpoints:");
    println!("  Processes:  /processes, /processes/{{name}}, /processes/{{name}}/restart, /processes/{{name}}/logs");
    println!("  System:     /health, /version");
    println!("\nPress Ctrl+C to stop the daemon\n");

    let state_path = config::state_path()?;
    http::serve(&config, state_path).await
}

/// Stop a running daemon via its PID file.
///
/// Supervised children are stopped gracefully by the daemon's own
/// shutdown path before it exits.
pub fn stop() -> Result<()> {
    let Some(pid) = daemon_pid() else {
        println!("Daemon is not running (no PID file)");
        return Ok(());
    };

    if !vigil::daemon::process::is_running(pid)? {
        println!("Daemon is not running (stale PID file)");
        let _ = std::fs::remove_file(config::daemon_pid_path()?);
        return Ok(());
    }

    println!("Stopping daemon (PID: {pid})...");
    vigil::daemon::process::kill_unmanaged(
        pid,
        Duration::from_millis(constants::DEFAULT_KILL_TIMEOUT_MS),
    )?;
    println!("Daemon stopped");
    Ok(())
}

/// Show daemon status.
pub async fn status() -> Result<()> {
    let config = DaemonConfig::load().unwrap_or_default();
    let client = DaemonClient::new(config.daemon.port);

    match client.health().await {
        Some(health) => {
            println!("Daemon:   running");
            println!("Port:     {}", config.daemon.port);
            if let Some(pid) = daemon_pid() {
                println!("PID:      {pid}");
            }
            if let Some(version) = health.get("version").and_then(|v| v.as_str()) {
                println!("Version:  {version}");
            }
            if let Some(uptime) = health.get("uptime_secs").and_then(serde_json::Value::as_i64) {
                println!(
                    "Uptime:   {}",
                    vigil::utils::format_duration(chrono::Duration::seconds(uptime))
                );
            }
        },
        None => {
            println!("Daemon:   not running");
            println!("Port:     {}", config.daemon.port);
        },
    }

    Ok(())
}

/// Daemon PID from the PID file, if present.
pub fn daemon_pid() -> Option<u32> {
    let path = config::daemon_pid_path().ok()?;
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// HTTP client for the daemon API.
///
/// Forwards `VIGIL_API_KEY` from the CLI's environment when set.
pub struct DaemonClient {
    base: String,
    http: reqwest::Client,
    api_key: Option<String>,
}

impl DaemonClient {
    pub fn new(port: u16) -> Self {
        Self {
            base: format!("http://127.0.0.1:{port}"),
            http: reqwest::Client::new(),
            api_key: std::env::var("VIGIL_API_KEY").ok(),
        }
    }

    /// Client for the configured daemon port.
    pub fn from_config() -> Self {
        let config = DaemonConfig::load().unwrap_or_default();
        Self::new(config.daemon.port)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}{path}", self.base))
            .timeout(Duration::from_secs(30));
        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key);
        }
        builder
    }

    /// Health payload when the daemon is reachable.
    pub async fn health(&self) -> Option<serde_json::Value> {
        self.http
            .get(format!("{}/health", self.base))
            .timeout(Duration::from_millis(500))
            .send()
            .await
            .ok()?
            .json()
            .await
            .ok()
    }

    /// Whether a daemon is answering on the configured port.
    pub async fn is_running(&self) -> bool {
        self.health().await.is_some()
    }

    /// Auto-start the daemon if it isn't reachable.
    ///
    /// Spawns the current executable detached with its output in
    /// `~/.vigil/logs/daemon.log`, then polls health until the daemon
    /// answers or the startup timeout elapses.
    pub async fn ensure_running(&self) -> Result<()> {
        if self.is_running().await {
            return Ok(());
        }

        println!("Starting daemon...");

        let exe = std::env::current_exe().context("Failed to locate vigil executable")?;

        let log_path = vigil::spec::default_log_dir()?.join("daemon.log");
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let log_file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create {}", log_path.display()))?;

        let child = std::process::Command::new(&exe)
            .args(["daemon", "run"])
            .stdin(std::process::Stdio::null())
            .stdout(log_file.try_clone().context("Failed to clone log handle")?)
            .stderr(log_file)
            .spawn()
            .context("Failed to start daemon")?;

        let deadline = std::time::Instant::now()
            + Duration::from_millis(constants::DAEMON_START_TIMEOUT_MS);
        while std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if self.is_running().await {
                println!("Daemon started (PID: {})", child.id());
                return Ok(());
            }
        }

        anyhow::bail!(
            "Daemon failed to start within {}s; see {}",
            constants::DAEMON_START_TIMEOUT_MS / 1000,
            log_path.display()
        )
    }

    /// `POST /processes` - start supervising an app.
    pub async fn start_process(
        &self,
        spec_path: &std::path::Path,
        name: &str,
        profile: Option<&str>,
    ) -> Result<serde_json::Value> {
        let body = serde_json::json!({
            "spec_path": spec_path,
            "name": name,
            "profile": profile,
        });

        let response = self
            .request(reqwest::Method::POST, "/processes")
            .json(&body)
            .send()
            .await
            .context("Failed to reach daemon")?;

        Self::check(response).await
    }

    /// `DELETE /processes/{name}` - stop a process.
    pub async fn stop_process(&self, name: &str) -> Result<serde_json::Value> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/processes/{name}"))
            .send()
            .await
            .context("Failed to reach daemon")?;

        Self::check(response).await
    }

    /// `POST /processes/{name}/restart` - restart a process.
    pub async fn restart_process(&self, name: &str) -> Result<serde_json::Value> {
        let response = self
            .request(reqwest::Method::POST, &format!("/processes/{name}/restart"))
            .send()
            .await
            .context("Failed to reach daemon")?;

        Self::check(response).await
    }

    async fn check(response: reqwest::Response) -> Result<serde_json::Value> {
        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse daemon response")?;

        if status.is_success() {
            Ok(body)
        } else {
            let message = body
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("unknown error");
            anyhow::bail!("{message}")
        }
    }
}
