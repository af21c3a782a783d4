//! Run coordination across tables.
//!
//! Drives the per-table [`TransferEngine`] over every configured table,
//! sequentially by default. Tables are independent (each owns its own
//! destination transaction stream), so bounded parallelism is a
//! configuration knob rather than a structural change.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{FailurePolicy, MappingDocument};
use crate::core::traits::{identity_transform, DestHandle, RowTransform, SourceHandle};
use crate::engine::{ProgressSender, TableReport, TransferEngine};
use crate::error::{MigrateError, Result};
use crate::state::{RunStatus, StateStore, TransferState};

/// One table's terminal failure, with enough detail for a manual retry.
#[derive(Debug, Clone, Serialize)]
pub struct TableFailure {
    /// Table identity.
    pub table: String,
    /// Underlying cause (includes the chunk index for commit failures).
    pub error: String,
}

/// Final summary of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: RunStatus,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run finished.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Tables configured.
    pub tables_total: usize,

    /// Tables that completed.
    pub tables_completed: usize,

    /// Tables that failed.
    pub tables_failed: usize,

    /// Total rows written across tables.
    pub rows_transferred: i64,

    /// Total rows skipped by conflict handling.
    pub rows_skipped: i64,

    /// Average throughput (rows/second).
    pub rows_per_second: i64,

    /// Failed tables with causes.
    pub failed_tables: Vec<TableFailure>,

    /// Persisted per-table state snapshot (empty for dry-runs, which leave
    /// the state store untouched).
    pub per_table: HashMap<String, TransferState>,

    /// Dry-run validation findings, prefixed with the table identity.
    pub validation_issues: Vec<String>,
}

/// Drives a full run across all configured tables.
pub struct RunCoordinator {
    source: Arc<dyn SourceHandle>,
    dest: Arc<dyn DestHandle>,
    document: MappingDocument,
    store: Arc<StateStore>,
    transform: RowTransform,
    progress: Option<ProgressSender>,
    cancel: CancellationToken,
}

impl RunCoordinator {
    /// Create a coordinator with in-memory state (no resume across
    /// restarts). The document is validated up front.
    pub fn new(
        source: Arc<dyn SourceHandle>,
        dest: Arc<dyn DestHandle>,
        document: MappingDocument,
    ) -> Result<Self> {
        document.validate()?;
        let store = Arc::new(StateStore::in_memory(
            uuid::Uuid::new_v4().to_string(),
            document.hash(),
        ));
        Ok(Self {
            source,
            dest,
            document,
            store,
            transform: identity_transform(),
            progress: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Persist state to `path` and resume from it when it already exists
    /// and matches this mapping document.
    pub fn with_state_file(mut self, path: PathBuf) -> Result<Self> {
        let run_id = self.store.run_id();
        self.store = Arc::new(StateStore::open(path, run_id, self.document.hash())?);
        Ok(self)
    }

    /// Install a row-transform hook applied to every table.
    pub fn with_row_transform(mut self, transform: RowTransform) -> Self {
        self.transform = transform;
        self
    }

    /// Install a progress sink.
    pub fn with_progress(mut self, sender: ProgressSender) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Install a cancellation token (operator abort).
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn build_engine(&self) -> TransferEngine {
        let mut engine = TransferEngine::new(
            self.source.clone(),
            self.dest.clone(),
            self.document.options.clone(),
            self.store.clone(),
        )
        .with_row_transform(self.transform.clone())
        .with_cancellation(self.cancel.clone());
        if let Some(sender) = &self.progress {
            engine = engine.with_progress(sender.clone());
        }
        engine
    }

    /// Run every configured table and aggregate the results.
    pub async fn run(self) -> Result<RunSummary> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let run_id = self.store.run_id();
        let dry_run = self.document.options.dry_run;

        info!(
            run_id = %run_id,
            tables = self.document.tables.len(),
            dry_run,
            "starting run"
        );

        let outcomes = if self.document.options.parallel_tables > 1 {
            self.run_parallel().await
        } else {
            self.run_sequential().await
        };

        let cancelled = self.cancel.is_cancelled()
            || outcomes
                .iter()
                .any(|(_, r)| matches!(r, Err(MigrateError::Cancelled)));

        let mut summary = RunSummary {
            run_id,
            status: RunStatus::Completed,
            started_at,
            completed_at: Utc::now(),
            duration_seconds: clock.elapsed().as_secs_f64(),
            tables_total: self.document.tables.len(),
            tables_completed: 0,
            tables_failed: 0,
            rows_transferred: 0,
            rows_skipped: 0,
            rows_per_second: 0,
            failed_tables: Vec::new(),
            per_table: HashMap::new(),
            validation_issues: Vec::new(),
        };

        for (table_id, outcome) in outcomes {
            match outcome {
                Ok(report) => {
                    summary.tables_completed += 1;
                    summary.rows_transferred += report.rows_transferred;
                    summary.rows_skipped += report.rows_skipped;
                    for issue in report.validation_issues {
                        summary
                            .validation_issues
                            .push(format!("{}: {}", report.table_id, issue));
                    }
                }
                Err(MigrateError::Cancelled) => {}
                Err(err) => {
                    error!(table = %table_id, "table failed: {}", err.format_detailed());
                    summary.tables_failed += 1;
                    summary.failed_tables.push(TableFailure {
                        table: table_id,
                        error: err.to_string(),
                    });
                }
            }
        }

        // A failure-triggered stop reports Failed; Cancelled is reserved for
        // an operator abort with no failed tables.
        summary.status = if summary.tables_failed > 0 {
            RunStatus::Failed
        } else if cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };

        if summary.duration_seconds > 0.0 {
            summary.rows_per_second =
                (summary.rows_transferred as f64 / summary.duration_seconds) as i64;
        }

        if !dry_run {
            self.store.finish_run(summary.status)?;
            summary.per_table = self.store.snapshot().tables;
        }

        info!(
            run_id = %summary.run_id,
            status = ?summary.status,
            rows = summary.rows_transferred,
            failed = summary.tables_failed,
            duration = summary.duration_seconds,
            "run finished"
        );

        Ok(summary)
    }

    async fn run_sequential(&self) -> Vec<(String, Result<TableReport>)> {
        let engine = self.build_engine();
        let mut outcomes = Vec::with_capacity(self.document.tables.len());

        for table in &self.document.tables {
            let table_id = table.table_id(self.document.options.dest_schema.as_deref());
            if self.cancel.is_cancelled() {
                outcomes.push((table_id, Err(MigrateError::Cancelled)));
                continue;
            }

            let outcome = engine.run_table(table).await;
            let failed = matches!(outcome, Err(ref e) if !matches!(e, MigrateError::Cancelled));
            outcomes.push((table_id, outcome));

            if failed && self.document.options.failure_policy == FailurePolicy::StopOnFirstFailure
            {
                self.cancel.cancel();
            }
        }
        outcomes
    }

    async fn run_parallel(&self) -> Vec<(String, Result<TableReport>)> {
        let semaphore = Arc::new(Semaphore::new(self.document.options.parallel_tables));
        let engine = Arc::new(self.build_engine());
        let stop_on_failure =
            self.document.options.failure_policy == FailurePolicy::StopOnFirstFailure;

        let handles: Vec<_> = self
            .document
            .tables
            .iter()
            .cloned()
            .map(|table| {
                let semaphore = semaphore.clone();
                let engine = engine.clone();
                let cancel = self.cancel.clone();
                let table_id = table.table_id(self.document.options.dest_schema.as_deref());

                tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .expect("run semaphore is never closed");
                    if cancel.is_cancelled() {
                        return (table_id, Err(MigrateError::Cancelled));
                    }
                    let outcome = engine.run_table(&table).await;
                    if stop_on_failure
                        && matches!(outcome, Err(ref e) if !matches!(e, MigrateError::Cancelled))
                    {
                        cancel.cancel();
                    }
                    (table_id, outcome)
                })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .map(|joined| match joined {
                Ok(outcome) => outcome,
                Err(err) => (
                    "<unknown>".to_string(),
                    Err(MigrateError::Database(format!("table task panicked: {}", err))),
                ),
            })
            .collect()
    }
}
