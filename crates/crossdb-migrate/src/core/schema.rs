//! Schema metadata types shared by source introspection and DDL generation.

use serde::{Deserialize, Serialize};

/// Column metadata as introspected from a live database.
///
/// This doubles as the type descriptor fed to the type mapper when
/// auto-creating destination tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,

    /// Native type name in the owning dialect (e.g., "int", "nvarchar",
    /// "timestamptz"), lowercased by the introspecting handle.
    pub data_type: String,

    /// Maximum length for string/binary types (-1 for max/unbounded).
    pub max_length: i32,

    /// Numeric precision.
    pub precision: i32,

    /// Numeric scale.
    pub scale: i32,

    /// Whether the column allows NULL.
    pub is_nullable: bool,
}

impl ColumnInfo {
    /// Shorthand used by tests and fakes.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into().to_lowercase(),
            max_length: 0,
            precision: 0,
            scale: 0,
            is_nullable: true,
        }
    }
}

/// Table metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    /// Schema/namespace name, if the dialect has one.
    pub schema: Option<String>,

    /// Table name.
    pub name: String,

    /// Column definitions in ordinal order.
    pub columns: Vec<ColumnInfo>,

    /// Primary key column names.
    pub primary_key: Vec<String>,

    /// Unique key column sets (the primary key included, if any).
    pub unique_keys: Vec<Vec<String>>,
}

impl TableSchema {
    /// Get the fully qualified (unquoted) table name for log messages.
    pub fn full_name(&self) -> String {
        match &self.schema {
            Some(s) => format!("{}.{}", s, self.name),
            None => self.name.clone(),
        }
    }

    /// Look up a column by name, case-insensitively (identifier case rules
    /// differ per dialect).
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Check if the table has a column with the given name.
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// The single primary-key column, if the PK is single-column and of a
    /// type the extractor can paginate on.
    pub fn keyset_column(&self) -> Option<&ColumnInfo> {
        if self.primary_key.len() != 1 {
            return None;
        }
        let col = self.column(&self.primary_key[0])?;
        if is_keyset_type(&col.data_type) {
            Some(col)
        } else {
            None
        }
    }

    /// Unique keys whose columns are all contained in `available` (matched
    /// case-insensitively). Used to validate the upsert precondition.
    pub fn covered_unique_keys(&self, available: &[String]) -> Vec<Vec<String>> {
        self.unique_keys
            .iter()
            .filter(|key| {
                !key.is_empty()
                    && key
                        .iter()
                        .all(|k| available.iter().any(|a| a.eq_ignore_ascii_case(k)))
            })
            .cloned()
            .collect()
    }
}

/// Types the extractor will use for keyset pagination.
///
/// Integer, string, uuid and date/time keys order stably; floating point
/// keys do not survive an exclusive-bound comparison reliably.
pub fn is_keyset_type(data_type: &str) -> bool {
    matches!(
        data_type,
        "int"
            | "integer"
            | "bigint"
            | "smallint"
            | "tinyint"
            | "serial"
            | "bigserial"
            | "varchar"
            | "nvarchar"
            | "char"
            | "nchar"
            | "text"
            | "uuid"
            | "uniqueidentifier"
            | "date"
            | "datetime"
            | "datetime2"
            | "smalldatetime"
            | "datetimeoffset"
            | "timestamp"
            | "timestamptz"
            | "timestamp with time zone"
            | "timestamp without time zone"
    )
}

/// Check if a data type is a date/time type suitable for watermark filtering.
pub fn is_watermark_type(data_type: &str) -> bool {
    is_keyset_type(data_type) && !matches!(data_type, "uuid" | "uniqueidentifier")
}
