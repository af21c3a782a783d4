//! Destination write planning and transactional chunk loading.
//!
//! [`plan_write`] turns the conflict policy plus the resolved mapping into a
//! concrete statement shape, validating the upsert precondition before any
//! row is read. [`ChunkLoader`] executes one chunk per destination
//! transaction; a chunk either commits whole or leaves the destination
//! untouched.

use tracing::debug;

use crate::config::ConflictPolicy;
use crate::core::schema::TableSchema;
use crate::core::traits::DestHandle;
use crate::core::value::Row;
use crate::dialect::{DialectKind, InsertStatement, WriteMode};
use crate::error::{MigrateError, Result};
use crate::mapping::MappingPlan;
use crate::retry::{with_backoff, RetryPolicy};

/// Upper bound on bind parameters per statement, below every supported
/// engine's limit. A chunk larger than this is written as several
/// statements inside the same transaction.
const MAX_BIND_PARAMS: usize = 30_000;

/// Shape of the destination write for one table.
#[derive(Debug, Clone)]
pub struct WriteShape {
    /// Qualified, quoted destination table.
    pub qualified_table: String,
    /// Destination columns in row order.
    pub columns: Vec<String>,
    /// Unique key used as the conflict target, when one applies.
    pub key: Option<Vec<String>>,
    /// Conflict behavior of the generated statement.
    pub mode: WriteMode,
}

/// Resolve the conflict policy into a write shape.
///
/// `dest` is the introspected destination table, or `None` when it will be
/// auto-created (in which case it cannot have the unique key an upsert
/// needs, so `update` fails fast).
pub fn plan_write(
    plan: &MappingPlan,
    dest: Option<&TableSchema>,
    policy: ConflictPolicy,
    dialect_kind: DialectKind,
) -> Result<WriteShape> {
    let dialect = dialect_kind.dialect();
    let qualified_table = plan.qualified_dest(dialect)?;
    let columns = plan.dest_columns();

    let covered = dest
        .map(|d| d.covered_unique_keys(&columns))
        .unwrap_or_default();

    // Prefer the primary key when it is covered by the mapped columns.
    let preferred = dest.and_then(|d| {
        if d.primary_key.is_empty() {
            None
        } else {
            covered
                .iter()
                .find(|k| {
                    k.len() == d.primary_key.len()
                        && k.iter()
                            .zip(&d.primary_key)
                            .all(|(a, b)| a.eq_ignore_ascii_case(b))
                })
                .cloned()
        }
    });
    let key = preferred.or_else(|| covered.first().cloned());

    let mode = match policy {
        ConflictPolicy::Update => {
            if key.is_none() {
                return Err(MigrateError::conflict_policy(
                    &plan.table_id,
                    "on_conflict: update requires a destination unique key covered by the mapped columns",
                ));
            }
            WriteMode::Upsert
        }
        ConflictPolicy::Nothing => {
            // MSSQL expresses the skip as a MERGE, which needs a key to
            // match on; without one there is nothing to conflict with and
            // a plain insert is equivalent.
            if dialect_kind == DialectKind::Mssql && key.is_none() {
                WriteMode::Plain
            } else if key.is_none() && dest.is_none() {
                WriteMode::Plain
            } else {
                WriteMode::SkipConflicts
            }
        }
    };

    Ok(WriteShape {
        qualified_table,
        columns,
        key,
        mode,
    })
}

/// Outcome of loading one chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    /// Rows written (inserted or updated).
    pub rows_written: u64,
    /// Rows silently skipped by conflict handling.
    pub rows_skipped: u64,
}

/// Writes chunks to the destination, one transaction per chunk.
pub struct ChunkLoader<'a> {
    dest: &'a dyn DestHandle,
    shape: &'a WriteShape,
    retry: RetryPolicy,
}

impl<'a> ChunkLoader<'a> {
    /// Create a loader for one table's write shape.
    pub fn new(dest: &'a dyn DestHandle, shape: &'a WriteShape, retry: RetryPolicy) -> Self {
        Self { dest, shape, retry }
    }

    /// Load one chunk inside a single destination transaction, retrying the
    /// whole transaction on transient failure. After the retry budget is
    /// exhausted the error is a [`MigrateError::CommitFailure`]; the caller
    /// must not advance the watermark past this chunk.
    pub async fn load_chunk(
        &self,
        table_id: &str,
        chunk_index: usize,
        rows: &[Row],
    ) -> Result<LoadOutcome> {
        if rows.is_empty() {
            return Ok(LoadOutcome::default());
        }

        let label = format!("load {} chunk {}", table_id, chunk_index);
        let result = with_backoff(&self.retry, &label, || self.try_load(rows)).await;

        match result {
            Ok(outcome) => {
                debug!(
                    table = table_id,
                    chunk = chunk_index,
                    written = outcome.rows_written,
                    skipped = outcome.rows_skipped,
                    "chunk committed"
                );
                Ok(outcome)
            }
            Err(err) if err.is_transient() => Err(MigrateError::CommitFailure {
                table: table_id.to_string(),
                chunk: chunk_index,
                message: err.to_string(),
            }),
            Err(err) => Err(err),
        }
    }

    /// One attempt: begin, write every sub-batch, commit. Rolls back on any
    /// failure so a retry starts from a clean slate.
    async fn try_load(&self, rows: &[Row]) -> Result<LoadOutcome> {
        let dialect = self.dest.dialect().dialect();
        let n_cols = self.shape.columns.len();
        let rows_per_stmt = (MAX_BIND_PARAMS / n_cols.max(1)).max(1);

        let mut tx = self.dest.begin().await?;
        let mut affected = 0u64;

        for batch in rows.chunks(rows_per_stmt) {
            let sql = dialect.build_insert(&InsertStatement {
                table: &self.shape.qualified_table,
                columns: &self.shape.columns,
                key: self.shape.key.as_deref(),
                mode: self.shape.mode,
                row_count: batch.len(),
            })?;

            let mut params = Vec::with_capacity(batch.len() * n_cols);
            for row in batch {
                params.extend(row.iter().cloned());
            }

            match tx.execute(&sql, &params).await {
                Ok(count) => affected += count,
                Err(err) => {
                    let _ = tx.rollback().await;
                    return Err(err);
                }
            }
        }

        tx.commit().await?;

        let total = rows.len() as u64;
        Ok(match self.shape.mode {
            // Conflicting rows vanish from the affected count.
            WriteMode::SkipConflicts => {
                let written = affected.min(total);
                LoadOutcome {
                    rows_written: written,
                    rows_skipped: total - written,
                }
            }
            // Affected-row semantics differ per dialect for upserts; every
            // source row ends up represented either way.
            WriteMode::Plain | WriteMode::Upsert => LoadOutcome {
                rows_written: total,
                rows_skipped: 0,
            },
        })
    }
}
