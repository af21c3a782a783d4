//! Mapping-document type definitions.

use serde::{Deserialize, Serialize};

use crate::core::value::KeyValue;

/// Root of a mapping document: global options plus the ordered list of
/// tables to transfer.
///
/// Connection details are deliberately absent; the caller opens and owns the
/// source/destination handles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingDocument {
    /// Transfer behavior options.
    #[serde(default)]
    pub options: RunOptions,

    /// Tables to transfer, in order.
    pub tables: Vec<TableMapping>,
}

/// Global transfer options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    /// Rows per chunk (one destination transaction each).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Auto-create missing destination tables from mapped source types.
    #[serde(default)]
    pub create_tables: bool,

    /// Default destination schema for tables that don't set their own.
    #[serde(default)]
    pub dest_schema: Option<String>,

    /// Conflict behavior on destination uniqueness violations.
    #[serde(default)]
    pub on_conflict: ConflictPolicy,

    /// Plan, validate and extract without mutating the destination.
    #[serde(default)]
    pub dry_run: bool,

    /// Run a post-load maintenance statement per completed table.
    #[serde(default)]
    pub vacuum_analyze: bool,

    /// Whether a failed table aborts the remaining tables.
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Tables transferred concurrently (each owns its transaction stream).
    #[serde(default = "default_parallel_tables")]
    pub parallel_tables: usize,

    /// Retry budget for transient I/O failures per operation.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Base backoff delay in milliseconds, doubled per attempt.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Per-operation timeout in seconds (chunk fetch, chunk write, commit).
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            create_tables: false,
            dest_schema: None,
            on_conflict: ConflictPolicy::default(),
            dry_run: false,
            vacuum_analyze: false,
            failure_policy: FailurePolicy::default(),
            parallel_tables: default_parallel_tables(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            io_timeout_secs: default_io_timeout_secs(),
        }
    }
}

fn default_chunk_size() -> usize {
    5000
}

fn default_parallel_tables() -> usize {
    1
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_io_timeout_secs() -> u64 {
    300
}

/// Conflict behavior on destination uniqueness violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Conflicting rows are skipped; the skipped count is surfaced.
    #[default]
    Nothing,
    /// Conflicting rows are updated in place (upsert). Requires a unique
    /// key on the destination covered by the mapped columns.
    Update,
}

/// What to do with the remaining tables after one fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep going and report every failure in the run summary.
    #[default]
    ContinueAndReport,
    /// Abort the run on the first table failure.
    StopOnFirstFailure,
}

/// Declarative mapping for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMapping {
    /// Source table name.
    pub source_table: String,

    /// Source schema, if the source dialect has one.
    #[serde(default)]
    pub source_schema: Option<String>,

    /// Destination table name.
    pub dest_table: String,

    /// Destination schema; falls back to the global `dest_schema`.
    #[serde(default)]
    pub dest_schema: Option<String>,

    /// Explicit column bindings (dest column → source column or constant).
    /// When absent, identically named columns are auto-mapped.
    #[serde(default)]
    pub columns: Option<Vec<ColumnSpec>>,

    /// Incremental extraction cursor.
    #[serde(default)]
    pub watermark: Option<WatermarkSpec>,
}

impl TableMapping {
    /// Stable identity used to key persisted state and progress events:
    /// the qualified destination table name.
    pub fn table_id(&self, default_schema: Option<&str>) -> String {
        match self.dest_schema.as_deref().or(default_schema) {
            Some(s) => format!("{}.{}", s, self.dest_table),
            None => self.dest_table.clone(),
        }
    }
}

/// One destination column binding in the mapping document.
///
/// `source` is either a source column name or a constant in the literal
/// grammar (`NULL`, `'text'`, or a bare numeric/boolean token).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Destination column name.
    pub dest: String,

    /// Source column name or constant literal.
    pub source: String,
}

/// Incremental extraction cursor specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatermarkSpec {
    /// Source column holding a monotonically increasing value.
    pub column: String,

    /// Initial lower bound for the first run. A persisted cursor from an
    /// earlier run takes precedence.
    #[serde(default)]
    pub since: Option<KeyValue>,
}
