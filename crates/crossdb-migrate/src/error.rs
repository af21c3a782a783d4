//! Error types for the transfer engine.

use thiserror::Error;

/// Main error type for transfer operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A column mapping could not be resolved against the live schemas.
    /// Fatal for the affected table only.
    #[error("Mapping error for table {table}, column {column}: {message}")]
    Mapping {
        table: String,
        column: String,
        message: String,
    },

    /// The `update` conflict policy requires a unique key covered by the
    /// mapped columns. Raised during planning, before any row is read.
    #[error("Conflict policy error for table {table}: {message}")]
    ConflictPolicy { table: String, message: String },

    /// A source type could not be mapped to a destination DDL type.
    #[error("Type mapping error for column {column}: cannot map {source_type} to {target_dialect}")]
    TypeMapping {
        column: String,
        source_type: String,
        target_dialect: String,
    },

    /// Transient I/O failure (connection drop, deadlock, timeout).
    /// Retried with bounded exponential backoff.
    #[error("Transient I/O error: {0}")]
    Transient(String),

    /// A chunk's destination transaction could not be committed within the
    /// retry budget. The table transitions to Failed; the watermark is not
    /// advanced past the last committed chunk.
    #[error("Commit failure for table {table} (chunk {chunk}): {message}")]
    CommitFailure {
        table: String,
        chunk: usize,
        message: String,
    },

    /// Dry-run discovered a row/column mismatch. Reported, not fatal to the run.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Non-transient database error reported by a connection handle.
    #[error("Database error: {0}")]
    Database(String),

    /// State file error.
    #[error("State file error: {0}")]
    State(String),

    /// Mapping document has changed since the persisted state was written.
    #[error("Mapping document has changed since last run - cannot resume from saved state")]
    ConfigChanged,

    /// Transfer was cancelled between chunks.
    #[error("Transfer cancelled")]
    Cancelled,

    /// IO error (state file operations).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a Mapping error naming the offending destination column.
    pub fn mapping(
        table: impl Into<String>,
        column: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        MigrateError::Mapping {
            table: table.into(),
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a ConflictPolicy error.
    pub fn conflict_policy(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::ConflictPolicy {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        MigrateError::Transient(message.into())
    }

    /// Whether this error is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, MigrateError::Transient(_))
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
