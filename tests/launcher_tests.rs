//! Integration tests for `vigil launch` exec semantics and bootstrap.
//!
//! These run the real binary via `CARGO_BIN_EXE_vigil` so the Unix exec
//! path is exercised end to end.

#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn vigil() -> Command {
    Command::new(env!("CARGO_BIN_EXE_vigil"))
}

fn write_descriptor(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("vigil.toml");
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn launch_execs_in_place_keeping_the_pid() {
    let dir = TempDir::new().unwrap();

    // The script writes its own PID; after exec it must match the PID of
    // the vigil process we spawned.
    let script = dir.path().join("server.sh");
    fs::write(&script, "#!/bin/sh\necho $$ > pid.txt\n").unwrap();

    let spec = write_descriptor(
        dir.path(),
        &format!(
            r#"
[[apps]]
name = "srv"
script = "{}"
interpreter = "sh"
cwd = "{}"
"#,
            script.display(),
            dir.path().display()
        ),
    );

    let child = vigil()
        .arg("launch")
        .arg(&spec)
        .spawn()
        .expect("failed to spawn vigil launch");
    let launcher_pid = child.id();

    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());

    let recorded: u32 = fs::read_to_string(dir.path().join("pid.txt"))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert_eq!(recorded, launcher_pid, "exec must not change the PID");
}

#[test]
fn launch_applies_profile_environment() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("server.sh");
    fs::write(&script, "#!/bin/sh\necho \"$PORT $VIGIL_ENV\" > env.txt\n").unwrap();

    let spec = write_descriptor(
        dir.path(),
        &format!(
            r#"
[[apps]]
name = "srv"
script = "{}"
interpreter = "sh"
cwd = "{}"

[apps.env]
PORT = "8888"

[apps.env_profiles.production]
PORT = "8000"
"#,
            script.display(),
            dir.path().display()
        ),
    );

    let status = vigil()
        .arg("launch")
        .arg(&spec)
        .args(["--profile", "production"])
        .status()
        .unwrap();
    assert!(status.success());

    let env = fs::read_to_string(dir.path().join("env.txt")).unwrap();
    assert_eq!(env.trim(), "8000 production");
}

#[test]
fn bootstrap_creates_env_file_once_and_preserves_edits() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("server.sh");
    fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
    fs::write(dir.path().join(".env.example"), "SECRET=changeme\n").unwrap();

    let spec = write_descriptor(
        dir.path(),
        &format!(
            r#"
[[apps]]
name = "srv"
script = "{}"
interpreter = "sh"
cwd = "{}"

[apps.bootstrap]
env_file = ".env"
env_template = ".env.example"
"#,
            script.display(),
            dir.path().display()
        ),
    );

    let status = vigil().arg("launch").arg(&spec).status().unwrap();
    assert!(status.success());
    assert_eq!(
        fs::read_to_string(dir.path().join(".env")).unwrap(),
        "SECRET=changeme\n"
    );

    // Local edits must survive the next launch
    fs::write(dir.path().join(".env"), "SECRET=real-value\n").unwrap();
    let status = vigil().arg("launch").arg(&spec).status().unwrap();
    assert!(status.success());
    assert_eq!(
        fs::read_to_string(dir.path().join(".env")).unwrap(),
        "SECRET=real-value\n"
    );
}

#[test]
fn bootstrap_init_runs_before_the_server_and_only_once() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("server.sh");
    fs::write(&script, "#!/bin/sh\necho server >> order.txt\n").unwrap();

    let spec = write_descriptor(
        dir.path(),
        &format!(
            r#"
[[apps]]
name = "srv"
script = "{}"
interpreter = "sh"
cwd = "{}"

[apps.bootstrap]
database_file = "app.db"
init_command = ["/bin/sh", "-c", "echo init >> order.txt && touch app.db"]
"#,
            script.display(),
            dir.path().display()
        ),
    );

    let status = vigil().arg("launch").arg(&spec).status().unwrap();
    assert!(status.success());

    // Database exists now, so the second launch skips init
    let status = vigil().arg("launch").arg(&spec).status().unwrap();
    assert!(status.success());

    let order = fs::read_to_string(dir.path().join("order.txt")).unwrap();
    let lines: Vec<&str> = order.lines().collect();
    assert_eq!(lines, vec!["init", "server", "server"]);
}

#[test]
fn launch_skip_bootstrap_flag_skips_init() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("server.sh");
    fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();

    let spec = write_descriptor(
        dir.path(),
        &format!(
            r#"
[[apps]]
name = "srv"
script = "{}"
interpreter = "sh"
cwd = "{}"

[apps.bootstrap]
database_file = "app.db"
init_command = ["/bin/sh", "-c", "touch app.db"]
"#,
            script.display(),
            dir.path().display()
        ),
    );

    let status = vigil()
        .arg("launch")
        .arg(&spec)
        .arg("--skip-bootstrap")
        .status()
        .unwrap();
    assert!(status.success());
    assert!(!dir.path().join("app.db").exists());
}

#[test]
fn launch_fails_on_invalid_descriptor() {
    let dir = TempDir::new().unwrap();
    let spec = write_descriptor(
        dir.path(),
        r#"
[[apps]]
name = "srv"
script = "server.sh"
cwd = "/tmp"
exec_mode = "cluster"
"#,
    );

    let output = vigil().arg("launch").arg(&spec).output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cluster"));
}

#[test]
fn launch_requires_name_for_multi_app_descriptors() {
    let dir = TempDir::new().unwrap();
    let spec = write_descriptor(
        dir.path(),
        &format!(
            r#"
[[apps]]
name = "api"
script = "/bin/true"
cwd = "{dir}"

[[apps]]
name = "worker"
script = "/bin/true"
cwd = "{dir}"
"#,
            dir = dir.path().display()
        ),
    );

    let output = vigil().arg("launch").arg(&spec).output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--name"));

    let status = vigil()
        .arg("launch")
        .arg(&spec)
        .args(["--name", "worker"])
        .status()
        .unwrap();
    assert!(status.success());
}
