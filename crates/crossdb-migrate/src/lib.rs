//! # crossdb-migrate
//!
//! Chunked, resumable, mapping-driven data transfer between heterogeneous
//! SQL databases (PostgreSQL-like, SQL-Server-like, MySQL-like dialects).
//!
//! The engine takes opened, dialect-tagged connection handles and a
//! declarative table/column mapping, then:
//!
//! - **Resolves mappings** (explicit or auto-map by name), including
//!   constant bindings parsed once at plan time
//! - **Auto-creates** missing destination tables from mapped source types
//! - **Extracts in bounded chunks** via keyset pagination
//! - **Loads transactionally**, one destination transaction per chunk, with
//!   configurable conflict resolution (skip or upsert)
//! - **Advances a high-watermark cursor** only after each commit, so a
//!   restarted run never re-delivers committed rows
//! - **Dry-runs** the whole plan without touching the destination
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use crossdb_migrate::{MappingDocument, RunCoordinator};
//! # async fn example(source: Arc<dyn crossdb_migrate::SourceHandle>,
//! #                  dest: Arc<dyn crossdb_migrate::DestHandle>) -> crossdb_migrate::Result<()> {
//! let document = MappingDocument::load("mapping.yaml")?;
//! let summary = RunCoordinator::new(source, dest, document)?
//!     .with_state_file("state.json".into())?
//!     .run()
//!     .await?;
//! println!("transferred {} rows", summary.rows_transferred);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod dialect;
pub mod engine;
pub mod error;
pub mod extract;
pub mod load;
pub mod mapping;
pub mod retry;
pub mod run;
pub mod state;

// Re-exports for convenient access
pub use crate::config::{
    ColumnSpec, ConflictPolicy, FailurePolicy, MappingDocument, RunOptions, TableMapping,
    WatermarkSpec,
};
pub use crate::core::{
    identity_transform, Chunk, ColumnInfo, DestHandle, DestTransaction, KeyValue, Row,
    RowTransform, SourceHandle, SqlValue, TableSchema,
};
pub use crate::dialect::DialectKind;
pub use crate::engine::{ProgressEvent, ProgressSender, TableReport, TransferEngine, TransferPhase};
pub use crate::error::{MigrateError, Result};
pub use crate::run::{RunCoordinator, RunSummary, TableFailure};
pub use crate::state::{RunState, RunStatus, StateStore, TableStatus, TransferState};
