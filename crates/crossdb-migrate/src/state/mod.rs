//! Persisted run state for resume capability.
//!
//! One JSON file per run, written after every committed chunk with an
//! atomic temp-file-then-rename. The file carries an HMAC-SHA256 signature
//! keyed by the mapping-document hash so a tampered or mismatched state
//! file is refused instead of silently skipping rows.

pub mod watermark;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::core::value::KeyValue;
use crate::error::{MigrateError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Persisted state of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique run identifier.
    pub run_id: String,

    /// SHA-256 hash of the mapping document.
    pub config_hash: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// Current run status.
    pub status: RunStatus,

    /// Per-table transfer state, keyed by table identity.
    pub tables: HashMap<String, TransferState>,

    /// When the run finished (if it has).
    pub completed_at: Option<DateTime<Utc>>,

    /// HMAC-SHA256 signature over the serialized state (excluding this
    /// field), keyed by `config_hash`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
}

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Per-table transfer status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Per-table transfer state.
///
/// Updated only after a chunk's destination transaction commits; a crash
/// between commit and update costs at most one chunk of re-extraction, never
/// a skipped row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferState {
    /// Table status.
    pub status: TableStatus,

    /// Rows written (inserted or updated) so far.
    pub rows_transferred: i64,

    /// Rows skipped by the destination's conflict handling.
    #[serde(default)]
    pub rows_skipped: i64,

    /// Chunks committed so far.
    #[serde(default)]
    pub chunks_committed: i64,

    /// Ordering-key value of the last committed chunk.
    pub last_cursor: Option<KeyValue>,

    /// Committed watermark value (incremental tables only). This is the
    /// cross-run resume point.
    #[serde(default)]
    pub watermark: Option<KeyValue>,

    /// Error message if the table failed.
    pub error: Option<String>,

    /// When the table transfer completed.
    pub completed_at: Option<DateTime<Utc>>,
}

impl TransferState {
    fn new() -> Self {
        Self {
            status: TableStatus::Pending,
            rows_transferred: 0,
            rows_skipped: 0,
            chunks_committed: 0,
            last_cursor: None,
            watermark: None,
            error: None,
            completed_at: None,
        }
    }

    /// Reset counters for a fresh pass, keeping the committed watermark.
    pub fn reset_for_new_pass(&mut self) {
        self.status = TableStatus::InProgress;
        self.rows_transferred = 0;
        self.rows_skipped = 0;
        self.chunks_committed = 0;
        self.last_cursor = None;
        self.error = None;
        self.completed_at = None;
    }
}

impl RunState {
    /// Create a new run state.
    pub fn new(run_id: String, config_hash: String) -> Self {
        Self {
            run_id,
            config_hash,
            started_at: Utc::now(),
            status: RunStatus::Running,
            tables: HashMap::new(),
            completed_at: None,
            hmac: None,
        }
    }

    /// Compute the integrity signature over the HMAC-less serialization.
    fn compute_hmac(&self) -> Result<String> {
        let mut state_for_signing = self.clone();
        state_for_signing.hmac = None;

        let content = serde_json::to_string(&state_for_signing)?;

        let mut mac = HmacSha256::new_from_slice(self.config_hash.as_bytes())
            .map_err(|e| MigrateError::State(format!("failed to create HMAC: {}", e)))?;
        mac.update(content.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Load state from a file, validating the signature when present.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let state: Self = serde_json::from_str(&content)?;

        match &state.hmac {
            Some(stored) => {
                let expected = state.compute_hmac()?;
                if stored != &expected {
                    return Err(MigrateError::State(
                        "state file integrity check failed: HMAC mismatch".to_string(),
                    ));
                }
            }
            None => {
                tracing::warn!("state file has no HMAC signature, integrity cannot be verified");
            }
        }

        Ok(state)
    }

    /// Save state to a file (atomic write with HMAC).
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.hmac = Some(self.compute_hmac()?);

        let content = serde_json::to_string_pretty(self)?;
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Refuse to resume when the mapping document has changed.
    pub fn validate_config(&self, config_hash: &str) -> Result<()> {
        if self.config_hash != config_hash {
            return Err(MigrateError::ConfigChanged);
        }
        Ok(())
    }
}

/// Shared, persistence-backed run state.
///
/// Every mutation goes through [`update_table`](StateStore::update_table)
/// (read-modify-write under one lock) and is flushed to disk before the
/// call returns, so the on-disk state never runs ahead of a commit.
pub struct StateStore {
    inner: Mutex<RunState>,
    path: Option<PathBuf>,
}

impl StateStore {
    /// Create an in-memory store (no resume across restarts).
    pub fn in_memory(run_id: String, config_hash: String) -> Self {
        Self {
            inner: Mutex::new(RunState::new(run_id, config_hash)),
            path: None,
        }
    }

    /// Open a file-backed store, resuming an existing state file when the
    /// mapping document hash matches.
    pub fn open(path: PathBuf, run_id: String, config_hash: String) -> Result<Self> {
        let state = if path.exists() {
            let mut state = RunState::load(&path)?;
            state.validate_config(&config_hash)?;
            tracing::info!(path = %path.display(), run_id = %state.run_id, "resuming from state file");
            state.status = RunStatus::Running;
            state.completed_at = None;
            state
        } else {
            RunState::new(run_id, config_hash)
        };

        Ok(Self {
            inner: Mutex::new(state),
            path: Some(path),
        })
    }

    /// The run identifier.
    pub fn run_id(&self) -> String {
        self.lock().run_id.clone()
    }

    /// Snapshot the full state.
    pub fn snapshot(&self) -> RunState {
        self.lock().clone()
    }

    /// Snapshot one table's state, if present.
    pub fn table(&self, table_id: &str) -> Option<TransferState> {
        self.lock().tables.get(table_id).cloned()
    }

    /// Read-modify-write one table's state and persist.
    pub fn update_table<F>(&self, table_id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut TransferState),
    {
        let mut state = self.lock();
        let entry = state
            .tables
            .entry(table_id.to_string())
            .or_insert_with(TransferState::new);
        f(entry);
        self.persist(&mut state)
    }

    /// Update the run-level status and persist.
    pub fn finish_run(&self, status: RunStatus) -> Result<()> {
        let mut state = self.lock();
        state.status = status;
        state.completed_at = Some(Utc::now());
        self.persist(&mut state)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RunState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, state: &mut RunState) -> Result<()> {
        if let Some(path) = &self.path {
            state.save(path)?;
        }
        Ok(())
    }
}
