//! Polling file watcher for restart-on-change.
//!
//! Scans the watched directory on a fixed interval and compares
//! modification times against the previous snapshot. Changes are
//! debounced so a burst of writes (an editor save, a git checkout)
//! produces a single restart event.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::constants::{WATCH_DEBOUNCE_MS, WATCH_POLL_INTERVAL_MS};

/// Spawns a watcher task over `root` and returns the change channel.
///
/// Paths whose string form contains any of the `ignore` substrings are
/// skipped, matching the descriptor's `ignore_watch` semantics.
pub fn spawn_watcher(root: PathBuf, ignore: Vec<String>) -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(watch_loop(root, ignore, tx));
    rx
}

async fn watch_loop(root: PathBuf, ignore: Vec<String>, tx: mpsc::Sender<()>) {
    let poll = Duration::from_millis(WATCH_POLL_INTERVAL_MS);
    let debounce = Duration::from_millis(WATCH_DEBOUNCE_MS);

    let mut snapshot = take_snapshot(&root, &ignore);
    let mut interval = tokio::time::interval(poll);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let current = take_snapshot(&root, &ignore);
        if current == snapshot {
            continue;
        }

        tracing::debug!(root = %root.display(), "Change detected, debouncing");

        // Let the burst settle before signalling
        let mut settled = current;
        loop {
            tokio::time::sleep(debounce).await;
            let next = take_snapshot(&root, &ignore);
            if next == settled {
                break;
            }
            settled = next;
        }
        snapshot = settled;

        if tx.send(()).await.is_err() {
            // Supervisor is gone
            return;
        }
    }
}

/// Recursively collects mtimes for every non-ignored file under `root`.
///
/// IO errors on individual entries are ignored; a file that cannot be
/// statted simply drops out of the snapshot (which itself registers as
/// a change if it was present before).
fn take_snapshot(root: &Path, ignore: &[String]) -> HashMap<PathBuf, SystemTime> {
    let mut out = HashMap::new();
    collect(root, ignore, &mut out);
    out
}

fn collect(dir: &Path, ignore: &[String], out: &mut HashMap<PathBuf, SystemTime>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if is_ignored(&path, ignore) {
            continue;
        }

        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            collect(&path, ignore, out);
        } else if file_type.is_file() {
            if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
                out.insert(path, modified);
            }
        }
    }
}

fn is_ignored(path: &Path, ignore: &[String]) -> bool {
    let text = path.to_string_lossy();
    ignore.iter().any(|pattern| text.contains(pattern.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_snapshot_lists_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "x").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.py"), "y").unwrap();

        let snap = take_snapshot(dir.path(), &[]);
        assert_eq!(snap.len(), 2);
    }

    #[test]
    fn test_snapshot_skips_ignored_subtrees() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.py"), "x").unwrap();
        fs::create_dir(dir.path().join("__pycache__")).unwrap();
        fs::write(dir.path().join("__pycache__/app.pyc"), "y").unwrap();
        fs::create_dir(dir.path().join("logs")).unwrap();
        fs::write(dir.path().join("logs/out.log"), "z").unwrap();

        let snap = take_snapshot(
            dir.path(),
            &["__pycache__".to_string(), "logs".to_string()],
        );
        assert_eq!(snap.len(), 1);
        assert!(snap.keys().next().unwrap().ends_with("app.py"));
    }

    #[test]
    fn test_snapshot_detects_modification() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("main.py");
        fs::write(&file, "v1").unwrap();

        let before = take_snapshot(dir.path(), &[]);
        // Force a distinct mtime
        let later = SystemTime::now() + Duration::from_secs(5);
        let file_handle = fs::File::options().write(true).open(&file).unwrap();
        file_handle.set_modified(later).unwrap();

        let after = take_snapshot(dir.path(), &[]);
        assert_ne!(before, after);
    }

    #[test]
    fn test_snapshot_of_missing_dir_is_empty() {
        let snap = take_snapshot(Path::new("/nonexistent/vigil-watch"), &[]);
        assert!(snap.is_empty());
    }

    #[tokio::test]
    async fn test_watcher_emits_on_change() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.py"), "v1").unwrap();

        let mut rx = spawn_watcher(dir.path().to_path_buf(), vec![]);

        // Give the watcher time to take its baseline snapshot
        tokio::time::sleep(Duration::from_millis(700)).await;
        fs::write(dir.path().join("app.py"), "v2 with different length").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv()).await;
        assert!(event.is_ok(), "expected a change event");
    }
}
