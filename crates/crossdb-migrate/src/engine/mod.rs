//! Per-table transfer state machine.
//!
//! One table moves through `Planning → (AutoCreating) → Extracting → Loading
//! → Committing` in a loop until its chunks are exhausted, then `Completed`;
//! `Failed` is reachable from every non-terminal state. The ordering inside
//! the loop is the resumability contract: a chunk's destination transaction
//! commits first, then the persisted state (cursor, watermark) advances,
//! then the next chunk is fetched. Extraction and load are strictly
//! sequential per chunk; pipelining them would break the
//! commit-before-advance invariant.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{RunOptions, TableMapping};
use crate::core::schema::TableSchema;
use crate::core::traits::{identity_transform, DestHandle, RowTransform, SourceHandle};
use crate::core::value::Row;
use crate::dialect::typemap::{self, DdlColumn};
use crate::error::{MigrateError, Result};
use crate::extract::ChunkExtractor;
use crate::load::{plan_write, ChunkLoader};
use crate::mapping::{self, ColumnBinding, ConstantValue, MappingPlan};
use crate::retry::RetryPolicy;
use crate::state::watermark::WatermarkTracker;
use crate::state::{StateStore, TableStatus};

/// Where a table currently is in its transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    Planning,
    AutoCreating,
    Extracting,
    Loading,
    Committing,
    Completed,
    Failed,
}

/// One progress tick, emitted after planning and after every committed chunk.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Table identity.
    pub table: String,
    /// Rows transferred so far.
    pub rows_transferred: i64,
    /// Index of the most recent chunk.
    pub chunk_index: usize,
    /// Current phase.
    pub phase: TransferPhase,
}

/// Sink for progress events.
pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;

/// Result of one table's transfer.
#[derive(Debug, Clone, Default)]
pub struct TableReport {
    /// Table identity.
    pub table_id: String,
    /// Rows written (or, in dry-run, rows that would have been written).
    pub rows_transferred: i64,
    /// Rows skipped by conflict handling.
    pub rows_skipped: i64,
    /// Chunks processed.
    pub chunks: usize,
    /// Dry-run validation findings (empty outside dry-run).
    pub validation_issues: Vec<String>,
}

/// Orchestrates one table's migration.
pub struct TransferEngine {
    source: Arc<dyn SourceHandle>,
    dest: Arc<dyn DestHandle>,
    options: RunOptions,
    store: Arc<StateStore>,
    watermarks: WatermarkTracker,
    transform: RowTransform,
    progress: Option<ProgressSender>,
    cancel: CancellationToken,
}

impl TransferEngine {
    /// Create an engine over the shared handles and state store.
    pub fn new(
        source: Arc<dyn SourceHandle>,
        dest: Arc<dyn DestHandle>,
        options: RunOptions,
        store: Arc<StateStore>,
    ) -> Self {
        let watermarks = WatermarkTracker::new(store.clone());
        Self {
            source,
            dest,
            options,
            store,
            watermarks,
            transform: identity_transform(),
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Install a row-transform hook (default: identity).
    pub fn with_row_transform(mut self, transform: RowTransform) -> Self {
        self.transform = transform;
        self
    }

    /// Install a progress sink.
    pub fn with_progress(mut self, sender: ProgressSender) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Install a cancellation token, observed between chunks only so an
    /// in-flight chunk always reaches a clean commit or rollback.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn emit(&self, table: &str, rows: i64, chunk: usize, phase: TransferPhase) {
        if let Some(sender) = &self.progress {
            let _ = sender.send(ProgressEvent {
                table: table.to_string(),
                rows_transferred: rows,
                chunk_index: chunk,
                phase,
            });
        }
    }

    /// Run one table to completion (or failure).
    pub async fn run_table(&self, mapping_spec: &TableMapping) -> Result<TableReport> {
        let table_id = mapping_spec.table_id(self.options.dest_schema.as_deref());

        match self.transfer(mapping_spec, &table_id).await {
            Ok(report) => Ok(report),
            Err(MigrateError::Cancelled) => Err(MigrateError::Cancelled),
            Err(err) => {
                if !self.options.dry_run {
                    self.store.update_table(&table_id, |t| {
                        t.status = TableStatus::Failed;
                        t.error = Some(err.to_string());
                    })?;
                }
                self.emit(&table_id, 0, 0, TransferPhase::Failed);
                Err(err)
            }
        }
    }

    async fn transfer(&self, mapping_spec: &TableMapping, table_id: &str) -> Result<TableReport> {
        // ===== Planning =====
        self.emit(table_id, 0, 0, TransferPhase::Planning);

        // A completed full-copy table is not copied again; a watermarked
        // table always runs and picks up from its committed cursor.
        if mapping_spec.watermark.is_none() {
            if let Some(prior) = self.store.table(table_id) {
                if prior.status == TableStatus::Completed {
                    info!(table = table_id, "already completed in saved state, skipping");
                    return Ok(TableReport {
                        table_id: table_id.to_string(),
                        rows_transferred: prior.rows_transferred,
                        rows_skipped: prior.rows_skipped,
                        chunks: prior.chunks_committed as usize,
                        validation_issues: Vec::new(),
                    });
                }
            }
        }

        let source_schema = self
            .source
            .table_schema(
                mapping_spec.source_schema.as_deref(),
                &mapping_spec.source_table,
            )
            .await?;

        let dest_schema_name = mapping_spec
            .dest_schema
            .as_deref()
            .or(self.options.dest_schema.as_deref());
        let dest_exists = self
            .dest
            .table_exists(dest_schema_name, &mapping_spec.dest_table)
            .await?;
        let dest_schema: Option<TableSchema> = if dest_exists {
            Some(
                self.dest
                    .table_schema(dest_schema_name, &mapping_spec.dest_table)
                    .await?,
            )
        } else {
            None
        };

        let plan = mapping::resolve(
            mapping_spec,
            &self.options,
            &source_schema,
            dest_schema.as_ref(),
        )?;

        let shape = plan_write(
            &plan,
            dest_schema.as_ref(),
            self.options.on_conflict,
            self.dest.dialect(),
        )?;

        let lower_bound = plan
            .watermark
            .as_ref()
            .and_then(|spec| self.watermarks.lower_bound(table_id, spec));

        if !self.options.dry_run {
            self.store.update_table(table_id, |t| t.reset_for_new_pass())?;
        }

        info!(
            table = table_id,
            source = %plan.source_full_name(),
            columns = plan.columns.len(),
            watermark = ?lower_bound,
            dry_run = self.options.dry_run,
            "planned transfer"
        );

        // ===== AutoCreating =====
        if self.options.create_tables {
            if dest_exists {
                debug!(table = table_id, "destination table exists, create is a no-op");
            } else {
                self.emit(table_id, 0, 0, TransferPhase::AutoCreating);
                self.auto_create(table_id, &plan, &source_schema).await?;
            }
        }

        // ===== Extracting / Loading loop =====
        let retry = RetryPolicy::from_options(&self.options);
        let mut extractor = ChunkExtractor::new(
            self.source.as_ref(),
            &plan,
            self.options.chunk_size,
            retry,
            lower_bound,
        );
        let loader = ChunkLoader::new(self.dest.as_ref(), &shape, retry);

        let mut report = TableReport {
            table_id: table_id.to_string(),
            ..TableReport::default()
        };

        loop {
            if self.cancel.is_cancelled() {
                info!(table = table_id, "cancellation requested, stopping between chunks");
                return Err(MigrateError::Cancelled);
            }

            self.emit(
                table_id,
                report.rows_transferred,
                report.chunks,
                TransferPhase::Extracting,
            );
            let Some(chunk) = extractor.next_chunk().await? else {
                break;
            };

            let projected: Vec<Row> = chunk
                .rows
                .iter()
                .map(|row| (self.transform)(plan.project(row)))
                .collect();

            if let Some(bad) = projected.iter().find(|r| r.len() != plan.columns.len()) {
                return Err(MigrateError::Validation(format!(
                    "row transform returned {} values, expected {}",
                    bad.len(),
                    plan.columns.len()
                )));
            }

            if self.options.dry_run {
                self.validate_chunk(&plan, dest_schema.as_ref(), &mut report);
                report.rows_transferred += projected.len() as i64;
                report.chunks += 1;
                self.emit(
                    table_id,
                    report.rows_transferred,
                    chunk.index,
                    TransferPhase::Loading,
                );
                continue;
            }

            self.emit(
                table_id,
                report.rows_transferred,
                chunk.index,
                TransferPhase::Loading,
            );
            let outcome = loader.load_chunk(table_id, chunk.index, &projected).await?;

            // ===== Committing: the transaction is durable, advance state =====
            self.emit(
                table_id,
                report.rows_transferred,
                chunk.index,
                TransferPhase::Committing,
            );
            report.rows_transferred += outcome.rows_written as i64;
            report.rows_skipped += outcome.rows_skipped as i64;
            report.chunks += 1;

            let cursor = chunk.last_key.clone();
            self.store.update_table(table_id, |t| {
                t.rows_transferred += outcome.rows_written as i64;
                t.rows_skipped += outcome.rows_skipped as i64;
                t.chunks_committed += 1;
                t.last_cursor = cursor;
            })?;

            if plan.watermark.is_some() {
                if let Some(value) = chunk.last_key.clone() {
                    self.watermarks.advance(table_id, value)?;
                }
            }
        }

        // ===== Completed =====
        if !self.options.dry_run {
            self.store.update_table(table_id, |t| {
                t.status = TableStatus::Completed;
                t.completed_at = Some(chrono::Utc::now());
            })?;

            if self.options.vacuum_analyze {
                let dialect = self.dest.dialect().dialect();
                let stmt = dialect.maintenance_statement(&shape.qualified_table);
                info!(table = table_id, statement = %stmt, "running post-load maintenance");
                if let Err(err) = self.dest.execute(&stmt).await {
                    warn!(table = table_id, "post-load maintenance failed: {}", err);
                }
            }
        }

        info!(
            table = table_id,
            rows = report.rows_transferred,
            skipped = report.rows_skipped,
            chunks = report.chunks,
            dry_run = self.options.dry_run,
            "table transfer complete"
        );
        self.emit(
            table_id,
            report.rows_transferred,
            report.chunks,
            TransferPhase::Completed,
        );
        Ok(report)
    }

    /// Generate and execute the destination CREATE TABLE.
    ///
    /// The DDL is logged verbatim before execution so operators can audit
    /// it; in dry-run it is generated and logged but never executed.
    async fn auto_create(
        &self,
        table_id: &str,
        plan: &MappingPlan,
        source_schema: &TableSchema,
    ) -> Result<()> {
        let source_kind = self.source.dialect();
        let dest_kind = self.dest.dialect();

        let mut ddl_columns = Vec::with_capacity(plan.columns.len());
        for col in &plan.columns {
            let (ddl_type, nullable) = match &col.binding {
                ColumnBinding::ColumnRef(name) => {
                    let src = source_schema.column(name).ok_or_else(|| {
                        MigrateError::mapping(table_id, &col.dest, "source column disappeared")
                    })?;
                    let mapped = typemap::map_column(source_kind, dest_kind, src);
                    if let Some(warning) = &mapped.warning {
                        warn!(table = table_id, column = %col.dest, "{}", warning);
                    }
                    (mapped.ddl, src.is_nullable)
                }
                // Constant columns have no source type; give them the widest
                // textual type and leave them nullable.
                ColumnBinding::Constant(_) => {
                    (typemap::widest_text_type(dest_kind).to_string(), true)
                }
            };
            ddl_columns.push(DdlColumn {
                name: col.dest.clone(),
                ddl_type,
                nullable,
            });
        }

        let qualified = plan.qualified_dest(dest_kind.dialect())?;
        let ddl = typemap::build_create_table(dest_kind, &qualified, &ddl_columns)?;
        info!(table = table_id, ddl = %ddl, "generated DDL");

        if self.options.dry_run {
            info!(table = table_id, "dry-run: DDL not executed");
            return Ok(());
        }

        match self.dest.execute(&ddl).await {
            Ok(_) => Ok(()),
            Err(err) if err.to_string().to_lowercase().contains("already exists") => {
                info!(table = table_id, "table already exists, create is a no-op");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Dry-run row validation: flag constants that cannot coerce into their
    /// destination column types. Findings are reported, not fatal.
    fn validate_chunk(
        &self,
        plan: &MappingPlan,
        dest_schema: Option<&TableSchema>,
        report: &mut TableReport,
    ) {
        // One pass is enough; constants do not vary per row.
        if report.chunks > 0 {
            return;
        }
        let Some(dest) = dest_schema else {
            return;
        };
        for col in &plan.columns {
            if let ColumnBinding::Constant(value) = &col.binding {
                if let Some(dest_col) = dest.column(&col.dest) {
                    if let Some(issue) = constant_coercion_issue(value, dest_col) {
                        report.validation_issues.push(issue);
                    }
                }
            }
        }
    }
}

/// Check a constant against a destination column type. NULL into a NOT NULL
/// column and text into numeric columns are the mismatches worth flagging.
fn constant_coercion_issue(
    value: &ConstantValue,
    dest_col: &crate::core::schema::ColumnInfo,
) -> Option<String> {
    let ty = dest_col.data_type.as_str();
    let numeric = matches!(
        ty,
        "smallint"
            | "int"
            | "integer"
            | "bigint"
            | "tinyint"
            | "real"
            | "float"
            | "double"
            | "double precision"
            | "decimal"
            | "numeric"
    );
    match value {
        ConstantValue::Null if !dest_col.is_nullable => Some(format!(
            "constant NULL bound to NOT NULL column {}",
            dest_col.name
        )),
        ConstantValue::Text(s) if numeric => Some(format!(
            "text constant '{}' bound to numeric column {} ({})",
            s, dest_col.name, ty
        )),
        _ => None,
    }
}
