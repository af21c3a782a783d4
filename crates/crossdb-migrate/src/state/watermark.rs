//! Incremental-extraction cursor tracking.

use std::sync::Arc;

use tracing::debug;

use crate::config::WatermarkSpec;
use crate::core::value::KeyValue;
use crate::error::Result;
use crate::state::StateStore;

/// Holds the per-table incremental lower bound and persists advances.
///
/// The one correctness rule of the whole engine lives here: `advance` may be
/// called only after the owning chunk's destination transaction has
/// committed. Advancing earlier would lose rows on a crash; advancing after
/// a failed commit is equally forbidden, so the loader never calls it on the
/// error path.
pub struct WatermarkTracker {
    store: Arc<StateStore>,
}

impl WatermarkTracker {
    /// Create a tracker over the run's state store.
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Compute the extraction lower bound for a table.
    ///
    /// A persisted watermark from an earlier committed chunk takes
    /// precedence over the configured `since`; resume must win or re-running
    /// after a partial transfer would re-deliver committed rows.
    pub fn lower_bound(&self, table_id: &str, spec: &WatermarkSpec) -> Option<KeyValue> {
        let persisted = self.store.table(table_id).and_then(|t| t.watermark);
        match persisted {
            Some(value) => {
                debug!(table = table_id, ?value, "watermark lower bound from saved state");
                Some(value)
            }
            None => spec.since.clone(),
        }
    }

    /// Record a committed watermark value.
    pub fn advance(&self, table_id: &str, value: KeyValue) -> Result<()> {
        self.store.update_table(table_id, |t| {
            t.watermark = Some(value);
        })
    }
}
