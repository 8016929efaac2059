//! Foreground launcher with exec semantics.
//!
//! `vigil launch` prepares an app's runtime (first-run bootstrap, working
//! directory, environment) and then replaces the launcher process with the
//! app itself via `exec`. Because the PID doesn't change, a supervisor
//! tracking the launcher is tracking the real server, and signals land on
//! the right process.
//!
//! ## First-run bootstrap
//!
//! Bootstrap steps are idempotent and only act on missing files:
//! - `env_file` absent: copy `env_template` into place
//! - `database_file` absent: run `init_command` once
//!
//! An existing env file is never overwritten, so local edits survive
//! redeployments.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::spec::{AppSpec, Spec};

/// Options for a foreground launch.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Path to the vigil.toml descriptor.
    pub spec_path: PathBuf,
    /// App to launch. May be omitted when the descriptor holds one app.
    pub name: Option<String>,
    /// Environment profile to overlay.
    pub profile: Option<String>,
    /// Skip first-run bootstrap steps.
    pub skip_bootstrap: bool,
}

/// What the bootstrap pass actually did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Env file was created from its template.
    pub env_file_created: bool,
    /// Database init command was run.
    pub database_initialized: bool,
}

/// Runs first-run bootstrap for an app.
///
/// `env` is applied to the init command so it sees the same environment
/// the server will. Safe to call repeatedly; completed steps are skipped.
pub fn run_bootstrap(app: &AppSpec, env: &BTreeMap<String, String>) -> Result<BootstrapReport> {
    let mut report = BootstrapReport::default();

    let Some(bootstrap) = &app.bootstrap else {
        return Ok(report);
    };

    if let (Some(env_file), Some(template)) = (&bootstrap.env_file, &bootstrap.env_template) {
        let env_path = resolve(&app.cwd, env_file);
        if env_path.exists() {
            tracing::debug!(path = %env_path.display(), "Env file present, leaving as-is");
        } else {
            let template_path = resolve(&app.cwd, template);
            fs::copy(&template_path, &env_path).with_context(|| {
                format!(
                    "Failed to copy env template {} to {}",
                    template_path.display(),
                    env_path.display()
                )
            })?;
            tracing::info!(
                path = %env_path.display(),
                template = %template_path.display(),
                "Created env file from template"
            );
            report.env_file_created = true;
        }
    }

    if let Some(database_file) = &bootstrap.database_file {
        let db_path = resolve(&app.cwd, database_file);
        if db_path.exists() {
            tracing::debug!(path = %db_path.display(), "Database present, skipping init");
        } else {
            let Some((program, args)) = bootstrap.init_command.split_first() else {
                bail!(
                    "Database {} is missing and no init_command is configured",
                    db_path.display()
                );
            };

            tracing::info!(
                command = %bootstrap.init_command.join(" "),
                "Initializing database"
            );

            let status = std::process::Command::new(program)
                .args(args)
                .current_dir(&app.cwd)
                .envs(env)
                .status()
                .with_context(|| format!("Failed to run init command '{program}'"))?;

            if !status.success() {
                bail!(
                    "Database init command exited with {}",
                    status.code().map_or("signal".to_string(), |c| c.to_string())
                );
            }
            report.database_initialized = true;
        }
    }

    Ok(report)
}

/// Launches an app in the foreground, replacing the current process.
///
/// On Unix this never returns on success: the launcher image is replaced
/// by the app via `exec`. On other platforms the app runs as a child and
/// the launcher exits with its status.
///
/// # Errors
///
/// Returns an error when the descriptor is invalid, bootstrap fails, or
/// the exec itself fails (e.g. missing interpreter).
pub fn launch(opts: &LaunchOptions) -> Result<()> {
    let spec = Spec::load_from(&opts.spec_path)?;

    let validation = spec.validate()?;
    for warning in &validation.warnings {
        tracing::warn!(descriptor = %opts.spec_path.display(), "{warning}");
    }

    let app = select_app(&spec, opts.name.as_deref())?;
    let env = app.resolved_env(opts.profile.as_deref())?;

    if opts.skip_bootstrap {
        tracing::debug!(process = %app.name, "Bootstrap skipped");
    } else {
        run_bootstrap(app, &env)?;
    }

    let mut cmd = match &app.interpreter {
        Some(interpreter) => {
            let mut cmd = std::process::Command::new(interpreter);
            cmd.arg(&app.script);
            cmd
        },
        None => std::process::Command::new(&app.script),
    };

    cmd.args(&app.args).current_dir(&app.cwd).envs(&env);

    tracing::info!(
        process = %app.name,
        script = %app.script.display(),
        cwd = %app.cwd.display(),
        profile = opts.profile.as_deref().unwrap_or("default"),
        "Launching"
    );

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;

        // Only returns on failure
        let err = cmd.exec();
        Err(err).with_context(|| format!("Failed to exec '{}'", app.script.display()))
    }

    #[cfg(not(unix))]
    {
        let status = cmd
            .status()
            .with_context(|| format!("Failed to run '{}'", app.script.display()))?;
        std::process::exit(status.code().unwrap_or(1));
    }
}

fn select_app<'a>(spec: &'a Spec, name: Option<&str>) -> Result<&'a AppSpec> {
    match name {
        Some(name) => spec.app(name),
        None => {
            if spec.apps.len() == 1 {
                Ok(&spec.apps[0])
            } else {
                let available: Vec<&str> = spec.apps.iter().map(|a| a.name.as_str()).collect();
                bail!(
                    "Descriptor declares several apps; pick one with --name (available: {})",
                    available.join(", ")
                )
            }
        },
    }
}

fn resolve(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn app_with_bootstrap(dir: &Path, bootstrap: &str) -> AppSpec {
        let toml = format!(
            r#"
[[apps]]
name = "api"
script = "server.sh"
cwd = "{}"

[apps.bootstrap]
{bootstrap}
"#,
            dir.display()
        );
        let spec: Spec = toml::from_str(&toml).unwrap();
        spec.apps.into_iter().next().unwrap()
    }

    #[test]
    fn test_bootstrap_copies_env_template_once() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".env.example"), "PORT=8000\n").unwrap();

        let app = app_with_bootstrap(
            tmp.path(),
            r#"env_file = ".env"
env_template = ".env.example""#,
        );

        let report = run_bootstrap(&app, &BTreeMap::new()).unwrap();
        assert!(report.env_file_created);
        assert_eq!(
            fs::read_to_string(tmp.path().join(".env")).unwrap(),
            "PORT=8000\n"
        );

        // Local edits survive subsequent runs
        fs::write(tmp.path().join(".env"), "PORT=9999\n").unwrap();
        let report = run_bootstrap(&app, &BTreeMap::new()).unwrap();
        assert!(!report.env_file_created);
        assert_eq!(
            fs::read_to_string(tmp.path().join(".env")).unwrap(),
            "PORT=9999\n"
        );
    }

    #[test]
    fn test_bootstrap_missing_template_errors() {
        let tmp = TempDir::new().unwrap();
        let app = app_with_bootstrap(
            tmp.path(),
            r#"env_file = ".env"
env_template = ".env.example""#,
        );

        let err = run_bootstrap(&app, &BTreeMap::new()).unwrap_err();
        assert!(err.to_string().contains(".env.example"));
    }

    #[cfg(unix)]
    #[test]
    fn test_bootstrap_runs_init_command_once() {
        let tmp = TempDir::new().unwrap();
        let app = app_with_bootstrap(
            tmp.path(),
            r#"database_file = "app.db"
init_command = ["/bin/sh", "-c", "echo ran >> init.count && touch app.db"]"#,
        );

        let report = run_bootstrap(&app, &BTreeMap::new()).unwrap();
        assert!(report.database_initialized);
        assert!(tmp.path().join("app.db").exists());

        // Database exists now; init must not run again
        let report = run_bootstrap(&app, &BTreeMap::new()).unwrap();
        assert!(!report.database_initialized);

        let count = fs::read_to_string(tmp.path().join("init.count")).unwrap();
        assert_eq!(count.lines().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_bootstrap_failing_init_errors() {
        let tmp = TempDir::new().unwrap();
        let app = app_with_bootstrap(
            tmp.path(),
            r#"database_file = "app.db"
init_command = ["/bin/sh", "-c", "exit 3"]"#,
        );

        let err = run_bootstrap(&app, &BTreeMap::new()).unwrap_err();
        assert!(err.to_string().contains('3'));
        assert!(!tmp.path().join("app.db").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_bootstrap_init_sees_resolved_env() {
        let tmp = TempDir::new().unwrap();
        let app = app_with_bootstrap(
            tmp.path(),
            r#"database_file = "app.db"
init_command = ["/bin/sh", "-c", "echo $DB_NAME > app.db"]"#,
        );

        let mut env = BTreeMap::new();
        env.insert("DB_NAME".to_string(), "embeddings".to_string());

        run_bootstrap(&app, &env).unwrap();
        let contents = fs::read_to_string(tmp.path().join("app.db")).unwrap();
        assert_eq!(contents.trim(), "embeddings");
    }

    #[test]
    fn test_bootstrap_without_section_is_noop() {
        let toml = r#"
[[apps]]
name = "api"
script = "server.sh"
cwd = "/srv/api"
"#;
        let spec: Spec = toml::from_str(toml).unwrap();
        let report = run_bootstrap(&spec.apps[0], &BTreeMap::new()).unwrap();
        assert_eq!(report, BootstrapReport::default());
    }

    #[test]
    fn test_select_app_requires_name_for_multiple() {
        let toml = r#"
[[apps]]
name = "api"
script = "a.sh"
cwd = "/srv"

[[apps]]
name = "worker"
script = "b.sh"
cwd = "/srv"
"#;
        let spec: Spec = toml::from_str(toml).unwrap();

        assert!(select_app(&spec, None).is_err());
        assert_eq!(select_app(&spec, Some("worker")).unwrap().name, "worker");
    }
}
