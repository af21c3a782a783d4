//! Connection capability traits.
//!
//! Connection establishment, credentials and TLS are the caller's concern.
//! The engine receives opened, dialect-tagged handles and only requires the
//! capabilities below: parameterized queries on the source, parameterized
//! statements inside an explicit transaction on the destination, and schema
//! introspection on both sides.
//!
//! Handles are shared across tables via `Arc`; implementations backed by a
//! connection pool should hand each transaction its own connection so
//! concurrently migrating tables own disjoint transaction streams.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::schema::TableSchema;
use crate::core::value::{Row, SqlValue};
use crate::dialect::DialectKind;
use crate::error::Result;

/// Read side of a transfer: schema introspection and parameterized queries.
///
/// `query` is a pure read; the extractor relies on that to retry a failed
/// chunk fetch idempotently.
#[async_trait]
pub trait SourceHandle: Send + Sync {
    /// The dialect this connection speaks, used for quoting and SQL shapes.
    fn dialect(&self) -> DialectKind;

    /// Introspect a table's columns, primary key and unique keys.
    async fn table_schema(&self, schema: Option<&str>, table: &str) -> Result<TableSchema>;

    /// Execute a parameterized query and collect the result rows.
    async fn query(&self, sql: &str, params: &[SqlValue<'static>]) -> Result<Vec<Row>>;
}

/// Write side of a transfer: DDL, transactions and introspection.
#[async_trait]
pub trait DestHandle: Send + Sync {
    /// The dialect this connection speaks.
    fn dialect(&self) -> DialectKind;

    /// Introspect a table's columns, primary key and unique keys.
    async fn table_schema(&self, schema: Option<&str>, table: &str) -> Result<TableSchema>;

    /// Check if a table exists.
    async fn table_exists(&self, schema: Option<&str>, table: &str) -> Result<bool>;

    /// Execute a standalone statement outside a transaction (DDL,
    /// post-load maintenance).
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Begin a destination transaction. Each chunk is loaded inside exactly
    /// one transaction; the caller must either commit or roll back.
    async fn begin(&self) -> Result<Box<dyn DestTransaction>>;
}

/// An open destination transaction.
///
/// Dropping an uncommitted transaction must roll it back.
#[async_trait]
pub trait DestTransaction: Send {
    /// Execute a parameterized statement, returning the affected-row count.
    async fn execute(&mut self, sql: &str, params: &[SqlValue<'static>]) -> Result<u64>;

    /// Commit the transaction.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Roll the transaction back.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Row-transform extensibility hook, applied after mapping and before write.
///
/// The default is identity. The function receives the row in destination
/// column order and must return it in the same shape.
pub type RowTransform = Arc<dyn Fn(Row) -> Row + Send + Sync>;

/// The identity row transform.
pub fn identity_transform() -> RowTransform {
    Arc::new(|row| row)
}
