//! Process descriptor types for vigil.toml.
//!
//! A descriptor declares how one process should be started, restarted, and
//! logged. A single file may hold several `[[apps]]` entries, each managing
//! exactly one child process (fork mode, no built-in load balancing).
//!
//! # Example
//!
//! ```toml
//! [[apps]]
//! name = "api"
//! script = "scripts/start_server.sh"
//! interpreter = "bash"
//! cwd = "/srv/api"
//! max_restarts = 10
//! min_uptime_ms = 10000
//! restart_delay_ms = 1000
//! kill_timeout_ms = 5000
//! out_file = "logs/api-out.log"
//! error_file = "logs/api-error.log"
//! log_date_format = "%Y-%m-%d %H:%M:%S"
//!
//! [apps.env]
//! PYTHONUNBUFFERED = "1"
//! PYTHONPATH = "src"
//!
//! [apps.env_profiles.production]
//! PORT = "8000"
//!
//! [apps.env_profiles.development]
//! PORT = "8888"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants;

/// Result of descriptor validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Non-fatal warnings that should be logged but don't prevent operation.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if there are any warnings.
    #[must_use]
    pub const fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Root of a vigil.toml descriptor file.
#[derive(Debug, Clone, Deserialize)]
pub struct Spec {
    /// Supervised applications, one child process each.
    pub apps: Vec<AppSpec>,
}

/// Declaration of one supervised process.
#[derive(Debug, Clone, Deserialize)]
pub struct AppSpec {
    /// Unique process name (used for state tracking and log files).
    pub name: String,
    /// Path to the executable or script to run.
    pub script: PathBuf,
    /// Interpreter to run the script with (e.g. "bash", "python3").
    /// When absent the script is executed directly.
    #[serde(default)]
    pub interpreter: Option<String>,
    /// Arguments appended after the script path.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory the process runs from.
    pub cwd: PathBuf,
    /// Number of instances. Must be 1; vigil does not load-balance.
    #[serde(default = "default_instances")]
    pub instances: u32,
    /// Execution mode. Must be "fork".
    #[serde(default = "default_exec_mode")]
    pub exec_mode: String,
    /// Restart the process automatically when it exits.
    #[serde(default = "default_true")]
    pub autorestart: bool,
    /// Maximum unhealthy restarts before the process is left stopped.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// Runs shorter than this count toward the restart limit; runs at
    /// least this long reset the counter.
    #[serde(default = "default_min_uptime_ms")]
    pub min_uptime_ms: u64,
    /// Fixed delay between restart attempts.
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
    /// Graceful-shutdown window: SIGTERM, wait this long, then SIGKILL.
    #[serde(default = "default_kill_timeout_ms")]
    pub kill_timeout_ms: u64,
    /// Target file for the child's stdout. Relative paths resolve
    /// against `cwd`. Default: `~/.vigil/logs/{name}-out.log`.
    #[serde(default)]
    pub out_file: Option<PathBuf>,
    /// Target file for the child's stderr.
    /// Default: `~/.vigil/logs/{name}-error.log`.
    #[serde(default)]
    pub error_file: Option<PathBuf>,
    /// Write stderr to the same file as stdout.
    #[serde(default)]
    pub merge_logs: bool,
    /// chrono strftime format; when set, every log line is prefixed
    /// with a formatted timestamp.
    #[serde(default)]
    pub log_date_format: Option<String>,
    /// Restart the process when files under `cwd` change.
    #[serde(default)]
    pub watch: bool,
    /// Path substrings/names excluded from triggering watch restarts.
    #[serde(default)]
    pub ignore_watch: Vec<String>,
    /// Base environment applied to the child.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Named profiles overlaid on the base env when selected at start time.
    #[serde(default)]
    pub env_profiles: BTreeMap<String, BTreeMap<String, String>>,
    /// First-run bootstrap performed by the launcher before exec.
    #[serde(default)]
    pub bootstrap: Option<BootstrapSpec>,
}

/// First-run bootstrap: create missing config/database before starting.
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapSpec {
    /// Environment file the server expects (e.g. ".env"), relative to `cwd`.
    #[serde(default)]
    pub env_file: Option<PathBuf>,
    /// Template copied into place when `env_file` is absent.
    #[serde(default)]
    pub env_template: Option<PathBuf>,
    /// Local database file whose absence triggers `init_command`.
    #[serde(default)]
    pub database_file: Option<PathBuf>,
    /// Command run once to initialize the database (argv form).
    #[serde(default)]
    pub init_command: Vec<String>,
}

const fn default_instances() -> u32 {
    1
}

fn default_exec_mode() -> String {
    "fork".to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_max_restarts() -> u32 {
    constants::DEFAULT_MAX_RESTARTS
}

const fn default_min_uptime_ms() -> u64 {
    constants::DEFAULT_MIN_UPTIME_MS
}

const fn default_restart_delay_ms() -> u64 {
    constants::DEFAULT_RESTART_DELAY_MS
}

const fn default_kill_timeout_ms() -> u64 {
    constants::DEFAULT_KILL_TIMEOUT_MS
}

/// Validates a process name for use in state keys and log file names.
///
/// Names must:
/// - Be 1-64 characters long
/// - Contain only alphanumeric characters, hyphens, and underscores
/// - Not start with a hyphen or underscore
pub fn validate_process_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Process name cannot be empty".into());
    }
    if name.len() > 64 {
        return Err("Process name must be 64 characters or less".into());
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(
            "Process name can only contain alphanumeric characters, hyphens, and underscores"
                .into(),
        );
    }
    if name.starts_with('-') || name.starts_with('_') {
        return Err("Process name cannot start with a hyphen or underscore".into());
    }
    Ok(())
}

impl Spec {
    /// Load a descriptor from the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read (IO error)
    /// - The file contains invalid TOML syntax
    /// - Required fields are missing or have invalid types
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read descriptor: {}", path.display()))?;

        let spec: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse descriptor: {}", path.display()))?;

        Ok(spec)
    }

    /// Find an app by name.
    ///
    /// # Errors
    ///
    /// Returns an error naming the available apps when no entry matches.
    pub fn app(&self, name: &str) -> Result<&AppSpec> {
        self.apps.iter().find(|a| a.name == name).with_context(|| {
            let available: Vec<&str> = self.apps.iter().map(|a| a.name.as_str()).collect();
            format!(
                "No app named '{}' in descriptor (available: {})",
                name,
                available.join(", ")
            )
        })
    }

    /// Validate the descriptor with comprehensive checks.
    ///
    /// Returns a `ValidationResult` containing any non-fatal warnings.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails with one or more errors:
    /// - No apps declared, empty or duplicate names
    /// - Invalid process names
    /// - `instances` other than 1 or `exec_mode` other than "fork"
    /// - Zero kill timeout
    pub fn validate(&self) -> Result<ValidationResult> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.apps.is_empty() {
            errors.push("Descriptor declares no apps".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for app in &self.apps {
            if let Err(e) = validate_process_name(&app.name) {
                errors.push(format!("app '{}': {}", app.name, e));
            }
            if !seen.insert(app.name.as_str()) {
                errors.push(format!("Duplicate app name: '{}'", app.name));
            }

            if app.script.as_os_str().is_empty() {
                errors.push(format!("app '{}': script cannot be empty", app.name));
            }

            if app.instances != 1 {
                errors.push(format!(
                    "app '{}': instances = {} is not supported; vigil runs a single \
                     instance per app (no built-in load balancing)",
                    app.name, app.instances
                ));
            }

            if app.exec_mode != "fork" {
                errors.push(format!(
                    "app '{}': exec_mode '{}' is not supported (only 'fork')",
                    app.name, app.exec_mode
                ));
            }

            if app.kill_timeout_ms == 0 {
                errors.push(format!(
                    "app '{}': kill_timeout_ms cannot be 0; the child needs a window \
                     for graceful shutdown",
                    app.name
                ));
            }

            if app.min_uptime_ms < 1000 && app.autorestart {
                warnings.push(format!(
                    "app '{}': min_uptime_ms {} is very low; crash loops may not be \
                     detected (recommended: >= 1000)",
                    app.name, app.min_uptime_ms
                ));
            }

            if app.watch && app.ignore_watch.is_empty() {
                warnings.push(format!(
                    "app '{}': watch enabled without ignore_watch; log and data \
                     directories under cwd will trigger restarts",
                    app.name
                ));
            }

            if let Some(fmt) = &app.log_date_format {
                if fmt.is_empty() {
                    warnings.push(format!(
                        "app '{}': empty log_date_format; lines will be prefixed with \
                         a bare space",
                        app.name
                    ));
                }
            }

            if let Some(bootstrap) = &app.bootstrap {
                if bootstrap.env_file.is_some() != bootstrap.env_template.is_some() {
                    errors.push(format!(
                        "app '{}': bootstrap env_file and env_template must be set together",
                        app.name
                    ));
                }
                if bootstrap.database_file.is_some() && bootstrap.init_command.is_empty() {
                    errors.push(format!(
                        "app '{}': bootstrap database_file requires an init_command",
                        app.name
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(ValidationResult { warnings })
        } else {
            anyhow::bail!("Descriptor validation failed:\n  - {}", errors.join("\n  - "))
        }
    }
}

impl AppSpec {
    /// Resolve the effective environment for a profile selection.
    ///
    /// The base `env` is applied first, then the named profile overlays it.
    /// `VIGIL_ENV` is set to the profile name (or "default").
    ///
    /// # Errors
    ///
    /// Returns an error when the named profile doesn't exist.
    pub fn resolved_env(&self, profile: Option<&str>) -> Result<BTreeMap<String, String>> {
        let mut env = self.env.clone();

        if let Some(name) = profile {
            let overlay = self.env_profiles.get(name).with_context(|| {
                let available: Vec<&str> =
                    self.env_profiles.keys().map(String::as_str).collect();
                format!(
                    "app '{}' has no env profile '{}' (available: {})",
                    self.name,
                    name,
                    if available.is_empty() {
                        "none".to_string()
                    } else {
                        available.join(", ")
                    }
                )
            })?;
            env.extend(overlay.clone());
        }

        env.insert(
            "VIGIL_ENV".to_string(),
            profile.unwrap_or("default").to_string(),
        );

        Ok(env)
    }

    /// Absolute path of the stdout log target.
    ///
    /// Explicit relative paths resolve against `cwd`; the default lives
    /// under `~/.vigil/logs/`.
    pub fn out_file(&self) -> Result<PathBuf> {
        match &self.out_file {
            Some(path) => Ok(self.resolve_against_cwd(path)),
            None => Ok(default_log_dir()?.join(format!("{}-out.log", self.name))),
        }
    }

    /// Absolute path of the stderr log target.
    ///
    /// With `merge_logs` this is the same file as [`AppSpec::out_file`].
    pub fn error_file(&self) -> Result<PathBuf> {
        if self.merge_logs {
            return self.out_file();
        }
        match &self.error_file {
            Some(path) => Ok(self.resolve_against_cwd(path)),
            None => Ok(default_log_dir()?.join(format!("{}-error.log", self.name))),
        }
    }

    /// Fixed delay between restart attempts.
    pub const fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    /// Minimum uptime for a run to count as healthy.
    pub const fn min_uptime(&self) -> Duration {
        Duration::from_millis(self.min_uptime_ms)
    }

    /// Graceful-shutdown window before forceful termination.
    pub const fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }

    fn resolve_against_cwd(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }
}

/// Default log directory: `~/.vigil/logs`.
pub fn default_log_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Failed to get home directory")?;
    Ok(home.join(".vigil").join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
[[apps]]
name = "api"
script = "server.sh"
cwd = "/srv/api"
"#
    }

    #[test]
    fn test_parse_minimal_descriptor_uses_defaults() {
        let spec: Spec = toml::from_str(minimal_toml()).unwrap();
        assert_eq!(spec.apps.len(), 1);

        let app = &spec.apps[0];
        assert_eq!(app.name, "api");
        assert_eq!(app.instances, 1);
        assert_eq!(app.exec_mode, "fork");
        assert!(app.autorestart);
        assert_eq!(app.max_restarts, 10);
        assert_eq!(app.min_uptime_ms, 10_000);
        assert_eq!(app.restart_delay_ms, 1_000);
        assert_eq!(app.kill_timeout_ms, 5_000);
        assert!(!app.merge_logs);
        assert!(!app.watch);
        assert!(app.env.is_empty());
    }

    #[test]
    fn test_parse_full_descriptor() {
        let toml = r#"
[[apps]]
name = "api"
script = "scripts/start_server.sh"
interpreter = "bash"
args = ["--workers", "4"]
cwd = "/srv/api"
autorestart = true
max_restarts = 5
min_uptime_ms = 3000
restart_delay_ms = 500
kill_timeout_ms = 2000
out_file = "logs/out.log"
error_file = "logs/error.log"
merge_logs = false
log_date_format = "%Y-%m-%d %H:%M:%S"
watch = true
ignore_watch = ["logs", ".git", "__pycache__"]

[apps.env]
PYTHONUNBUFFERED = "1"
PYTHONPATH = "src"

[apps.env_profiles.production]
PORT = "8000"

[apps.env_profiles.development]
PORT = "8888"

[apps.bootstrap]
env_file = ".env"
env_template = ".env.example"
database_file = "app.db"
init_command = ["python3", "scripts/init_db.py"]
"#;
        let spec: Spec = toml::from_str(toml).unwrap();
        let app = &spec.apps[0];

        assert_eq!(app.interpreter.as_deref(), Some("bash"));
        assert_eq!(app.args, vec!["--workers", "4"]);
        assert_eq!(app.max_restarts, 5);
        assert_eq!(app.env.get("PYTHONUNBUFFERED").unwrap(), "1");
        assert_eq!(app.env_profiles["production"]["PORT"], "8000");
        assert_eq!(app.env_profiles["development"]["PORT"], "8888");
        assert!(app.watch);
        assert_eq!(app.ignore_watch.len(), 3);

        let bootstrap = app.bootstrap.as_ref().unwrap();
        assert_eq!(bootstrap.env_file.as_deref(), Some(Path::new(".env")));
        assert_eq!(bootstrap.init_command.len(), 2);

        spec.validate().unwrap();
    }

    #[test]
    fn test_resolved_env_overlays_profile() {
        let toml = r#"
[[apps]]
name = "api"
script = "server.sh"
cwd = "/srv/api"

[apps.env]
PORT = "3000"
PYTHONUNBUFFERED = "1"

[apps.env_profiles.production]
PORT = "8000"
"#;
        let spec: Spec = toml::from_str(toml).unwrap();
        let app = &spec.apps[0];

        let base = app.resolved_env(None).unwrap();
        assert_eq!(base["PORT"], "3000");
        assert_eq!(base["VIGIL_ENV"], "default");

        let prod = app.resolved_env(Some("production")).unwrap();
        assert_eq!(prod["PORT"], "8000");
        assert_eq!(prod["PYTHONUNBUFFERED"], "1");
        assert_eq!(prod["VIGIL_ENV"], "production");
    }

    #[test]
    fn test_resolved_env_unknown_profile_errors() {
        let spec: Spec = toml::from_str(minimal_toml()).unwrap();
        let err = spec.apps[0].resolved_env(Some("staging")).unwrap_err();
        assert!(err.to_string().contains("staging"));
    }

    #[test]
    fn test_validate_rejects_multiple_instances() {
        let toml = r#"
[[apps]]
name = "api"
script = "server.sh"
cwd = "/srv/api"
instances = 4
"#;
        let spec: Spec = toml::from_str(toml).unwrap();
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("load balancing"));
    }

    #[test]
    fn test_validate_rejects_cluster_mode() {
        let toml = r#"
[[apps]]
name = "api"
script = "server.sh"
cwd = "/srv/api"
exec_mode = "cluster"
"#;
        let spec: Spec = toml::from_str(toml).unwrap();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let toml = r#"
[[apps]]
name = "api"
script = "a.sh"
cwd = "/srv"

[[apps]]
name = "api"
script = "b.sh"
cwd = "/srv"
"#;
        let spec: Spec = toml::from_str(toml).unwrap();
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_validate_rejects_zero_kill_timeout() {
        let toml = r#"
[[apps]]
name = "api"
script = "server.sh"
cwd = "/srv/api"
kill_timeout_ms = 0
"#;
        let spec: Spec = toml::from_str(toml).unwrap();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_mismatched_bootstrap() {
        let toml = r#"
[[apps]]
name = "api"
script = "server.sh"
cwd = "/srv/api"

[apps.bootstrap]
env_file = ".env"
"#;
        let spec: Spec = toml::from_str(toml).unwrap();
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("env_template"));
    }

    #[test]
    fn test_validate_warns_on_watch_without_ignores() {
        let toml = r#"
[[apps]]
name = "api"
script = "server.sh"
cwd = "/srv/api"
watch = true
"#;
        let spec: Spec = toml::from_str(toml).unwrap();
        let result = spec.validate().unwrap();
        assert!(result.has_warnings());
    }

    #[test]
    fn test_merged_logs_share_target() {
        let toml = r#"
[[apps]]
name = "api"
script = "server.sh"
cwd = "/srv/api"
out_file = "logs/combined.log"
merge_logs = true
"#;
        let spec: Spec = toml::from_str(toml).unwrap();
        let app = &spec.apps[0];
        assert_eq!(app.out_file().unwrap(), app.error_file().unwrap());
        // Relative targets resolve against cwd
        assert_eq!(
            app.out_file().unwrap(),
            PathBuf::from("/srv/api/logs/combined.log")
        );
    }

    #[test]
    fn test_validate_process_name() {
        assert!(validate_process_name("api").is_ok());
        assert!(validate_process_name("my-app_2").is_ok());
        assert!(validate_process_name("").is_err());
        assert!(validate_process_name("-leading").is_err());
        assert!(validate_process_name("_leading").is_err());
        assert!(validate_process_name("has space").is_err());
        assert!(validate_process_name("has/slash").is_err());
        assert!(validate_process_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_app_lookup() {
        let spec: Spec = toml::from_str(minimal_toml()).unwrap();
        assert!(spec.app("api").is_ok());
        let err = spec.app("worker").unwrap_err();
        assert!(err.to_string().contains("available: api"));
    }
}
