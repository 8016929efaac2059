//! Persistent state management for the vigil daemon using redb.
//!
//! Tracks supervised processes across daemon restarts, storing process
//! metadata, status, and restart bookkeeping in a single-file ACID database
//! at `~/.vigil/state.redb`.
//!
//! # Async Usage
//!
//! All database operations are blocking. When using from async contexts,
//! use the async methods (`save_process_async`, `get_process_async`, etc.)
//! which wrap operations in `spawn_blocking` to avoid blocking the runtime.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Table name for process storage - centralized to avoid duplication
const PROCESSES_TABLE: TableDefinition<'static, &'static str, &'static [u8]> =
    TableDefinition::new("processes");

/// Runtime status of a supervised process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Status {
    /// Process is currently running
    Running,
    /// Process was stopped gracefully
    Stopped,
    /// Process exited unexpectedly with exit code
    Crashed { exit_code: i32 },
    /// Restart budget exhausted; left stopped until manual intervention
    Errored,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Running => write!(f, "running"),
            Status::Stopped => write!(f, "stopped"),
            Status::Crashed { exit_code } => write!(f, "crashed (exit: {exit_code})"),
            Status::Errored => write!(f, "errored"),
        }
    }
}

/// Metadata for a process managed by the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRecord {
    /// Unique process name (e.g. "api", "worker")
    pub name: String,
    /// Operating system process ID of the current child
    pub pid: u32,
    /// Current runtime status
    pub status: Status,
    /// Path to the vigil.toml descriptor used
    pub spec_path: PathBuf,
    /// Environment profile selected at start (e.g. "production")
    #[serde(default)]
    pub profile: Option<String>,
    /// Timestamp when the current run started
    pub started_at: DateTime<Utc>,
    /// Consecutive unhealthy restarts (resets after a healthy run)
    #[serde(default)]
    pub restart_count: u32,
    /// Timestamp of last restart
    #[serde(default)]
    pub last_restart_at: Option<DateTime<Utc>>,
    /// Stdout log target
    pub out_file: PathBuf,
    /// Stderr log target (same as out_file when logs are merged)
    pub error_file: PathBuf,
}

/// State storage interface wrapping redb database.
///
/// Provides CRUD operations for process records with ACID guarantees.
/// All operations serialize to JSON for human-readable debugging in redb.
///
/// # Thread Safety
///
/// `StateStore` is `Clone` and can be shared across threads. The underlying
/// database handles concurrent access safely.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Opens or creates the state database at the given path.
    ///
    /// Creates parent directories if needed. Uses redb's ACID guarantees
    /// to prevent corruption on crashes or unclean shutdowns.
    /// Initializes the processes table on first open.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists before opening database
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create state directory: {}", parent.display())
            })?;
        }

        let db = Database::create(path)
            .with_context(|| format!("Failed to open state database: {}", path.display()))?;

        // Initialize tables on first open to ensure they exist for reads
        let write_txn = db
            .begin_write()
            .context("Failed to begin initialization transaction")?;
        {
            let _table = write_txn
                .open_table(PROCESSES_TABLE)
                .context("Failed to initialize processes table")?;
        }
        write_txn
            .commit()
            .context("Failed to commit initialization transaction")?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Persists a process record to the database.
    ///
    /// Overwrites an existing record with the same name. Serializes to JSON
    /// for compatibility with debugging tools and future schema evolution.
    pub fn save_process(&self, record: &ProcessRecord) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;

        {
            let mut table = write_txn
                .open_table(PROCESSES_TABLE)
                .context("Failed to open processes table")?;

            let json =
                serde_json::to_vec(record).context("Failed to serialize process to JSON")?;

            table
                .insert(record.name.as_str(), json.as_slice())
                .with_context(|| format!("Failed to insert process '{}'", record.name))?;
        }

        write_txn
            .commit()
            .context("Failed to commit process save transaction")?;

        Ok(())
    }

    /// Retrieves a process record by name.
    ///
    /// Returns None if the record doesn't exist.
    pub fn get_process(&self, name: &str) -> Result<Option<ProcessRecord>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;

        let table = read_txn
            .open_table(PROCESSES_TABLE)
            .context("Failed to open processes table")?;

        let result = table
            .get(name)
            .with_context(|| format!("Failed to read process '{name}'"))?;

        match result {
            Some(guard) => {
                let json = guard.value();
                let record = serde_json::from_slice(json)
                    .with_context(|| format!("Failed to deserialize process '{name}'"))?;
                Ok(Some(record))
            },
            None => Ok(None),
        }
    }

    /// Lists all process records in the database.
    ///
    /// Returns empty vec if none exist. Skips records that fail
    /// deserialization to prevent corruption from blocking reads.
    pub fn list_processes(&self) -> Result<Vec<ProcessRecord>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;

        let table = read_txn
            .open_table(PROCESSES_TABLE)
            .context("Failed to open processes table")?;

        let mut records = Vec::new();

        for item in table.iter().context("Failed to iterate processes table")? {
            let (_, value) = item.context("Failed to read process entry")?;

            // Skip corrupted entries instead of failing the entire list operation
            if let Ok(record) = serde_json::from_slice::<ProcessRecord>(value.value()) {
                records.push(record);
            }
        }

        Ok(records)
    }

    /// Removes a process record from the database.
    ///
    /// Returns Ok(true) if the record existed and was removed, Ok(false) if
    /// it didn't exist. Idempotent - safe to call multiple times.
    pub fn remove_process(&self, name: &str) -> Result<bool> {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;

        let removed = {
            let mut table = write_txn
                .open_table(PROCESSES_TABLE)
                .context("Failed to open processes table")?;

            let existed = table
                .remove(name)
                .with_context(|| format!("Failed to remove process '{name}'"))?
                .is_some();
            existed
        };

        write_txn
            .commit()
            .context("Failed to commit process removal transaction")?;

        Ok(removed)
    }

    /// Updates just the status of a process record if it exists.
    pub fn set_status(&self, name: &str, status: Status) -> Result<bool> {
        if let Some(mut record) = self.get_process(name)? {
            record.status = status;
            self.save_process(&record)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    // ========================================================================
    // Async Methods
    //
    // These methods wrap the synchronous operations in `spawn_blocking` to
    // avoid blocking the async runtime. Use these when calling from async
    // contexts (HTTP handlers, supervisor tasks).
    // ========================================================================

    /// Persists a process record asynchronously.
    pub async fn save_process_async(&self, record: ProcessRecord) -> Result<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.save_process(&record))
            .await
            .context("Task join error")?
    }

    /// Retrieves a process record by name asynchronously.
    pub async fn get_process_async(&self, name: String) -> Result<Option<ProcessRecord>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.get_process(&name))
            .await
            .context("Task join error")?
    }

    /// Lists all process records asynchronously.
    pub async fn list_processes_async(&self) -> Result<Vec<ProcessRecord>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.list_processes())
            .await
            .context("Task join error")?
    }

    /// Removes a process record asynchronously.
    pub async fn remove_process_async(&self, name: String) -> Result<bool> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.remove_process(&name))
            .await
            .context("Task join error")?
    }

    /// Updates the status of a process record asynchronously.
    pub async fn set_status_async(&self, name: String, status: Status) -> Result<bool> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.set_status(&name, status))
            .await
            .context("Task join error")?
    }
}
