//! Bounded-memory chunk extraction.
//!
//! Pulls ordered batches of at most `chunk_size` rows from the source.
//! With a usable ordering key (watermark column or single-column sortable
//! primary key) each fetch is keyset-paginated: the previous chunk's maximum
//! key value becomes the next fetch's exclusive lower bound, so concurrent
//! inserts and deletes on the source cannot shift page boundaries the way a
//! numeric offset would. Tables with neither fall back to deterministic
//! offset pagination ordered by every selected column.
//!
//! A chunk fetch is a pure read, so a transient failure retries the same
//! request idempotently.

use tracing::debug;

use crate::core::traits::SourceHandle;
use crate::core::value::{Chunk, KeyValue};
use crate::dialect::SelectOptions;
use crate::error::{MigrateError, Result};
use crate::mapping::{MappingPlan, OrderingKey};
use crate::retry::{with_backoff, RetryPolicy};

/// Lazily yields the chunks of one table, in order, each exactly once.
pub struct ChunkExtractor<'a> {
    source: &'a dyn SourceHandle,
    plan: &'a MappingPlan,
    chunk_size: usize,
    retry: RetryPolicy,
    cursor: Option<KeyValue>,
    offset: u64,
    next_index: usize,
    done: bool,
}

impl<'a> ChunkExtractor<'a> {
    /// Create an extractor starting from `lower_bound` (exclusive), which is
    /// the persisted watermark or configured `since` for incremental tables
    /// and `None` for full copies.
    pub fn new(
        source: &'a dyn SourceHandle,
        plan: &'a MappingPlan,
        chunk_size: usize,
        retry: RetryPolicy,
        lower_bound: Option<KeyValue>,
    ) -> Self {
        Self {
            source,
            plan,
            chunk_size,
            retry,
            cursor: lower_bound,
            offset: 0,
            next_index: 0,
            done: false,
        }
    }

    /// Fetch the next chunk, or `None` when the table is exhausted.
    ///
    /// The sequence ends when a fetch returns fewer rows than `chunk_size`.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        if self.done {
            return Ok(None);
        }

        let order_key = match &self.plan.key {
            OrderingKey::Watermark { column } | OrderingKey::PrimaryKey { column } => {
                Some(column.clone())
            }
            OrderingKey::Offset => None,
        };

        let opts = SelectOptions {
            schema: self.plan.source_schema.clone(),
            table: self.plan.source_table.clone(),
            columns: self.plan.source_columns.clone(),
            has_lower_bound: order_key.is_some() && self.cursor.is_some(),
            order_key,
            limit: self.chunk_size,
            offset: match self.plan.key {
                OrderingKey::Offset => Some(self.offset),
                _ => None,
            },
        };

        let dialect = self.source.dialect().dialect();
        let sql = dialect.build_select(&opts)?;
        let params: Vec<_> = if opts.has_lower_bound {
            vec![self
                .cursor
                .as_ref()
                .expect("has_lower_bound implies a cursor")
                .to_sql_value()]
        } else {
            Vec::new()
        };

        let label = format!("fetch {} chunk {}", self.plan.source_full_name(), self.next_index);
        let rows = with_backoff(&self.retry, &label, || {
            self.source.query(&sql, &params)
        })
        .await?;

        if rows.is_empty() {
            self.done = true;
            return Ok(None);
        }

        let last_key = match self.plan.key_index {
            Some(idx) => {
                let last_row = rows.last().expect("rows is non-empty");
                let value = last_row.get(idx).ok_or_else(|| {
                    MigrateError::Database(format!(
                        "chunk row has {} columns, expected ordering key at index {}",
                        last_row.len(),
                        idx
                    ))
                })?;
                Some(KeyValue::try_from_value(value)?)
            }
            None => None,
        };

        let chunk = Chunk {
            first_key: self.cursor.clone(),
            last_key: last_key.clone(),
            index: self.next_index,
            rows,
        };

        debug!(
            table = %self.plan.source_full_name(),
            chunk = chunk.index,
            rows = chunk.len(),
            "fetched chunk"
        );

        if chunk.len() < self.chunk_size {
            self.done = true;
        }

        self.next_index += 1;
        match self.plan.key {
            OrderingKey::Offset => self.offset += chunk.len() as u64,
            _ => self.cursor = last_key,
        }

        Ok(Some(chunk))
    }
}
