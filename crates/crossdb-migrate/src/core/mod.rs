//! Core types shared across the transfer pipeline.

pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{ColumnInfo, TableSchema};
pub use traits::{identity_transform, DestHandle, DestTransaction, RowTransform, SourceHandle};
pub use value::{Chunk, KeyValue, Row, SqlValue};
