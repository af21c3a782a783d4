//! Mapping-document validation.
//!
//! Catches configuration nonsense before any connection is touched. Schema-
//! dependent checks (column existence, conflict-key coverage) happen later,
//! during per-table planning.

use std::collections::HashSet;

use crate::config::MappingDocument;
use crate::error::{MigrateError, Result};
use crate::mapping::ColumnBinding;

/// Validate a mapping document.
pub fn validate(doc: &MappingDocument) -> Result<()> {
    if doc.options.chunk_size == 0 {
        return Err(MigrateError::Config(
            "chunk_size must be greater than zero".to_string(),
        ));
    }
    if doc.options.parallel_tables == 0 {
        return Err(MigrateError::Config(
            "parallel_tables must be at least 1".to_string(),
        ));
    }
    if doc.tables.is_empty() {
        return Err(MigrateError::Config(
            "mapping document lists no tables".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for table in &doc.tables {
        if table.source_table.trim().is_empty() {
            return Err(MigrateError::Config(
                "table entry has an empty source_table".to_string(),
            ));
        }
        if table.dest_table.trim().is_empty() {
            return Err(MigrateError::Config(format!(
                "table {} has an empty dest_table",
                table.source_table
            )));
        }

        let id = table.table_id(doc.options.dest_schema.as_deref());
        if !seen.insert(id.to_lowercase()) {
            return Err(MigrateError::Config(format!(
                "destination table {} is mapped more than once",
                id
            )));
        }

        if let Some(wm) = &table.watermark {
            if wm.column.trim().is_empty() {
                return Err(MigrateError::Config(format!(
                    "table {} has a watermark with an empty column",
                    id
                )));
            }
        }

        if let Some(columns) = &table.columns {
            if columns.is_empty() {
                return Err(MigrateError::Config(format!(
                    "table {} has an empty explicit column list",
                    id
                )));
            }
            if !columns
                .iter()
                .any(|c| ColumnBinding::parse(&c.source).is_column_ref())
            {
                return Err(MigrateError::Config(format!(
                    "table {} maps only constants; at least one source column is required",
                    id
                )));
            }
        }
    }

    Ok(())
}
