//! Column-mapping resolution.
//!
//! A [`TableMapping`] is declarative: destination columns bound to source
//! columns or constant literals, or nothing at all (auto-map by name).
//! Resolution validates the mapping against the live source and destination
//! schemas and produces a [`MappingPlan`] the rest of the pipeline executes
//! without further interpretation - in particular, constant literals are
//! parsed here exactly once and never re-read per row.

use crate::config::{RunOptions, TableMapping, WatermarkSpec};
use crate::core::schema::{is_watermark_type, TableSchema};
use crate::core::value::{Row, SqlValue};
use crate::dialect::Dialect;
use crate::error::{MigrateError, Result};

/// A constant literal, parsed from the mapping grammar.
///
/// Grammar: `NULL` → SQL null; `'text'` (with `''` escaping) → string;
/// bare boolean/numeric tokens → typed passthrough. Anything else is a
/// column reference, not a constant.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    /// SQL NULL.
    Null,
    /// Quoted string literal, unescaped.
    Text(String),
    /// Bare integer token.
    Int(i64),
    /// Bare float token.
    Float(f64),
    /// Bare boolean token.
    Bool(bool),
}

impl ConstantValue {
    /// Render as a bindable value. Cheap: the literal was typed at parse time.
    pub fn to_sql_value(&self) -> SqlValue<'static> {
        match self {
            ConstantValue::Null => SqlValue::Null,
            ConstantValue::Text(s) => SqlValue::text_owned(s.clone()),
            ConstantValue::Int(v) => SqlValue::I64(*v),
            ConstantValue::Float(v) => SqlValue::F64(*v),
            ConstantValue::Bool(v) => SqlValue::Bool(*v),
        }
    }
}

/// One resolved destination column binding.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnBinding {
    /// Bound to a source column by name.
    ColumnRef(String),
    /// Bound to a constant literal.
    Constant(ConstantValue),
}

impl ColumnBinding {
    /// Parse a mapping expression. Total: every input is either a constant
    /// in the literal grammar or a column reference.
    pub fn parse(expr: &str) -> Self {
        let t = expr.trim();
        if t.eq_ignore_ascii_case("null") {
            return ColumnBinding::Constant(ConstantValue::Null);
        }
        if t.len() >= 2 && t.starts_with('\'') && t.ends_with('\'') {
            let inner = &t[1..t.len() - 1];
            return ColumnBinding::Constant(ConstantValue::Text(inner.replace("''", "'")));
        }
        if t.eq_ignore_ascii_case("true") {
            return ColumnBinding::Constant(ConstantValue::Bool(true));
        }
        if t.eq_ignore_ascii_case("false") {
            return ColumnBinding::Constant(ConstantValue::Bool(false));
        }
        if let Ok(v) = t.parse::<i64>() {
            return ColumnBinding::Constant(ConstantValue::Int(v));
        }
        if let Ok(v) = t.parse::<f64>() {
            return ColumnBinding::Constant(ConstantValue::Float(v));
        }
        ColumnBinding::ColumnRef(t.to_string())
    }

    /// Whether this binding reads from the source.
    pub fn is_column_ref(&self) -> bool {
        matches!(self, ColumnBinding::ColumnRef(_))
    }
}

/// A destination column with its resolved binding.
#[derive(Debug, Clone)]
pub struct BoundColumn {
    /// Destination column name.
    pub dest: String,
    /// Where its values come from.
    pub binding: ColumnBinding,
}

/// How one destination-row position is filled from a fetched source row.
#[derive(Debug, Clone)]
pub enum Slot {
    /// Copy the value at this index of the fetched row.
    Source(usize),
    /// Emit this constant.
    Const(SqlValue<'static>),
}

/// Ordering key the extractor paginates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderingKey {
    /// The watermark column; enables incremental extraction and resume.
    Watermark { column: String },
    /// A single-column sortable primary key; keyset pagination without
    /// cross-run resume.
    PrimaryKey { column: String },
    /// Neither available: deterministic offset pagination, whole-table
    /// retry on restart.
    Offset,
}

/// A validated, executable mapping for one table.
#[derive(Debug, Clone)]
pub struct MappingPlan {
    /// Stable table identity (qualified destination name).
    pub table_id: String,
    /// Source schema name, if any.
    pub source_schema: Option<String>,
    /// Source table name.
    pub source_table: String,
    /// Destination schema name, if any.
    pub dest_schema: Option<String>,
    /// Destination table name.
    pub dest_table: String,
    /// Destination columns with bindings, in write order.
    pub columns: Vec<BoundColumn>,
    /// Source columns to fetch, in select order (ordering key appended when
    /// it is not itself mapped).
    pub source_columns: Vec<String>,
    /// Per destination column: where the value comes from.
    pub slots: Vec<Slot>,
    /// Pagination strategy.
    pub key: OrderingKey,
    /// Index of the ordering key within a fetched row.
    pub key_index: Option<usize>,
    /// Watermark specification, when incremental.
    pub watermark: Option<WatermarkSpec>,
}

impl MappingPlan {
    /// Destination column names in write order.
    pub fn dest_columns(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.dest.clone()).collect()
    }

    /// Unquoted source table name for log messages.
    pub fn source_full_name(&self) -> String {
        match &self.source_schema {
            Some(s) => format!("{}.{}", s, self.source_table),
            None => self.source_table.clone(),
        }
    }

    /// Quoted, qualified destination table for SQL.
    pub fn qualified_dest(&self, dialect: &dyn Dialect) -> Result<String> {
        dialect.qualify(self.dest_schema.as_deref(), &self.dest_table)
    }

    /// Build a destination row from a fetched source row, substituting
    /// constants and reordering to destination column order.
    pub fn project(&self, fetched: &[SqlValue<'static>]) -> Row {
        self.slots
            .iter()
            .map(|slot| match slot {
                Slot::Source(idx) => fetched[*idx].clone(),
                Slot::Const(value) => value.clone(),
            })
            .collect()
    }
}

/// Resolve a table mapping against the live schemas.
///
/// `dest` is `None` when the destination table does not exist yet; that is
/// only legal with `create_tables` enabled.
pub fn resolve(
    mapping: &TableMapping,
    options: &RunOptions,
    source: &TableSchema,
    dest: Option<&TableSchema>,
) -> Result<MappingPlan> {
    let table_id = mapping.table_id(options.dest_schema.as_deref());

    let columns = match &mapping.columns {
        Some(specs) => resolve_explicit(&table_id, specs, source, dest, options.create_tables)?,
        None => resolve_auto(&table_id, source, dest, options.create_tables)?,
    };

    if !columns.iter().any(|c| c.binding.is_column_ref()) {
        let first = columns
            .first()
            .map(|c| c.dest.clone())
            .unwrap_or_else(|| "*".to_string());
        return Err(MigrateError::mapping(
            &table_id,
            first,
            "mapping binds no source columns (pure-constant mappings are invalid)",
        ));
    }

    // Distinct source columns in first-use order.
    let mut source_columns: Vec<String> = Vec::new();
    for col in &columns {
        if let ColumnBinding::ColumnRef(name) = &col.binding {
            if !source_columns.iter().any(|c| c.eq_ignore_ascii_case(name)) {
                source_columns.push(name.clone());
            }
        }
    }

    let key = select_ordering_key(&table_id, mapping, source)?;

    let key_index = match &key {
        OrderingKey::Watermark { column } | OrderingKey::PrimaryKey { column } => {
            let existing = source_columns
                .iter()
                .position(|c| c.eq_ignore_ascii_case(column));
            Some(match existing {
                Some(idx) => idx,
                None => {
                    source_columns.push(column.clone());
                    source_columns.len() - 1
                }
            })
        }
        OrderingKey::Offset => None,
    };

    let slots = columns
        .iter()
        .map(|col| match &col.binding {
            ColumnBinding::ColumnRef(name) => {
                let idx = source_columns
                    .iter()
                    .position(|c| c.eq_ignore_ascii_case(name))
                    .expect("ref columns were just collected");
                Slot::Source(idx)
            }
            ColumnBinding::Constant(value) => Slot::Const(value.to_sql_value()),
        })
        .collect();

    Ok(MappingPlan {
        table_id,
        source_schema: mapping.source_schema.clone(),
        source_table: mapping.source_table.clone(),
        dest_schema: mapping
            .dest_schema
            .clone()
            .or_else(|| options.dest_schema.clone()),
        dest_table: mapping.dest_table.clone(),
        columns,
        source_columns,
        slots,
        key,
        key_index,
        watermark: mapping.watermark.clone(),
    })
}

fn resolve_explicit(
    table_id: &str,
    specs: &[crate::config::ColumnSpec],
    source: &TableSchema,
    dest: Option<&TableSchema>,
    create_tables: bool,
) -> Result<Vec<BoundColumn>> {
    if dest.is_none() && !create_tables {
        let first = specs.first().map(|s| s.dest.as_str()).unwrap_or("*");
        return Err(MigrateError::mapping(
            table_id,
            first,
            "destination table does not exist and create_tables is disabled",
        ));
    }

    let mut columns: Vec<BoundColumn> = Vec::with_capacity(specs.len());
    for spec in specs {
        if columns
            .iter()
            .any(|c| c.dest.eq_ignore_ascii_case(&spec.dest))
        {
            return Err(MigrateError::mapping(
                table_id,
                &spec.dest,
                "duplicate destination column in mapping",
            ));
        }

        if let Some(dest_schema) = dest {
            if !dest_schema.has_column(&spec.dest) {
                return Err(MigrateError::mapping(
                    table_id,
                    &spec.dest,
                    "destination column does not exist in the destination table",
                ));
            }
        }

        let binding = match ColumnBinding::parse(&spec.source) {
            ColumnBinding::ColumnRef(name) => {
                let col = source.column(&name).ok_or_else(|| {
                    MigrateError::mapping(
                        table_id,
                        &spec.dest,
                        format!("source column '{}' not found in {}", name, source.full_name()),
                    )
                })?;
                ColumnBinding::ColumnRef(col.name.clone())
            }
            constant => constant,
        };

        columns.push(BoundColumn {
            dest: spec.dest.clone(),
            binding,
        });
    }
    Ok(columns)
}

fn resolve_auto(
    table_id: &str,
    source: &TableSchema,
    dest: Option<&TableSchema>,
    create_tables: bool,
) -> Result<Vec<BoundColumn>> {
    let columns = match dest {
        // Bind every identically named pair; unmatched destination columns
        // are left unbound (excluded from the write), unmatched source
        // columns are ignored.
        Some(dest_schema) => dest_schema
            .columns
            .iter()
            .filter_map(|dest_col| {
                source.column(&dest_col.name).map(|src_col| BoundColumn {
                    dest: dest_col.name.clone(),
                    binding: ColumnBinding::ColumnRef(src_col.name.clone()),
                })
            })
            .collect::<Vec<_>>(),
        // No destination table yet: mirror the source.
        None => {
            if !create_tables {
                return Err(MigrateError::mapping(
                    table_id,
                    "*",
                    "destination table does not exist and create_tables is disabled",
                ));
            }
            source
                .columns
                .iter()
                .map(|col| BoundColumn {
                    dest: col.name.clone(),
                    binding: ColumnBinding::ColumnRef(col.name.clone()),
                })
                .collect()
        }
    };

    if columns.is_empty() {
        return Err(MigrateError::mapping(
            table_id,
            "*",
            "auto-map found no identically named columns",
        ));
    }
    Ok(columns)
}

fn select_ordering_key(
    table_id: &str,
    mapping: &TableMapping,
    source: &TableSchema,
) -> Result<OrderingKey> {
    if let Some(wm) = &mapping.watermark {
        let col = source.column(&wm.column).ok_or_else(|| {
            MigrateError::mapping(
                table_id,
                &wm.column,
                format!(
                    "watermark column not found in {}",
                    source.full_name()
                ),
            )
        })?;
        if !is_watermark_type(&col.data_type) {
            return Err(MigrateError::mapping(
                table_id,
                &wm.column,
                format!(
                    "watermark column has type '{}', which does not order stably",
                    col.data_type
                ),
            ));
        }
        return Ok(OrderingKey::Watermark {
            column: col.name.clone(),
        });
    }

    if let Some(pk) = source.keyset_column() {
        return Ok(OrderingKey::PrimaryKey {
            column: pk.name.clone(),
        });
    }

    Ok(OrderingKey::Offset)
}
