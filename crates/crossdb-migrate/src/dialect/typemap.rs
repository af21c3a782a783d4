//! Cross-dialect type mapping for destination DDL generation.
//!
//! Mapping goes through a canonical intermediate type: native type →
//! [`CanonicalType`] → destination DDL string. With three dialect families
//! this needs two small tables per dialect instead of a mapper per ordered
//! pair.
//!
//! Unknown source types fall back to the destination's widest textual type
//! (`text`, `nvarchar(max)`, `longtext`). The fallback never narrows data,
//! and every fallback or lossy rendering carries a warning that the engine
//! logs alongside the generated DDL. Only used when `create_tables` is
//! enabled.

use crate::core::schema::ColumnInfo;
use crate::dialect::{Dialect, DialectKind};
use crate::error::Result;

/// Canonical type representation for cross-dialect mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalType {
    /// Boolean/bit type.
    Boolean,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 32-bit floating point.
    Float32,
    /// 64-bit floating point.
    Float64,
    /// Exact decimal; precision is total digits, scale digits after the point.
    Decimal { precision: u32, scale: u32 },
    /// Fixed-length character string.
    Char(u32),
    /// Variable-length character string; 0 means unlimited/max.
    Varchar(u32),
    /// Unlimited text.
    Text,
    /// Fixed-length binary data.
    Binary(u32),
    /// Variable-length binary data; 0 means unlimited/max.
    Varbinary(u32),
    /// Unlimited binary data.
    Blob,
    /// Date only.
    Date,
    /// Time only.
    Time,
    /// Date and time without timezone.
    DateTime,
    /// Date and time with timezone.
    DateTimeTz,
    /// UUID/GUID.
    Uuid,
    /// JSON data.
    Json,
    /// XML data.
    Xml,
    /// Unmapped type; carries the native name for the warning message.
    Unknown(String),
}

/// A destination DDL type plus any lossiness warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedType {
    /// Destination-dialect DDL type string (e.g. "nvarchar(255)").
    pub ddl: String,
    /// Present when the rendering is a fallback or loses fidelity.
    pub warning: Option<String>,
}

impl MappedType {
    fn exact(ddl: impl Into<String>) -> Self {
        Self {
            ddl: ddl.into(),
            warning: None,
        }
    }

    fn lossy(ddl: impl Into<String>, warning: impl Into<String>) -> Self {
        Self {
            ddl: ddl.into(),
            warning: Some(warning.into()),
        }
    }
}

/// Map a source column type descriptor to a destination DDL type.
pub fn map_column(source: DialectKind, dest: DialectKind, col: &ColumnInfo) -> MappedType {
    from_canonical(dest, &to_canonical(source, col))
}

/// The destination dialect's widest-compatible textual type, used as the
/// fallback for unknown source types and for constant-only columns.
pub fn widest_text_type(dest: DialectKind) -> &'static str {
    match dest {
        DialectKind::Postgres => "text",
        DialectKind::Mssql => "nvarchar(max)",
        DialectKind::Mysql => "longtext",
    }
}

/// Convert a native type descriptor to its canonical form.
pub fn to_canonical(source: DialectKind, col: &ColumnInfo) -> CanonicalType {
    let ty = col.data_type.as_str();
    let len = col.max_length;
    match source {
        DialectKind::Postgres => match ty {
            "boolean" | "bool" => CanonicalType::Boolean,
            "smallint" | "int2" => CanonicalType::Int16,
            "integer" | "int" | "int4" | "serial" => CanonicalType::Int32,
            "bigint" | "int8" | "bigserial" => CanonicalType::Int64,
            "real" | "float4" => CanonicalType::Float32,
            "double precision" | "float8" => CanonicalType::Float64,
            "numeric" | "decimal" => decimal(col),
            "char" | "bpchar" | "character" => CanonicalType::Char(unsigned(len)),
            "varchar" | "character varying" => CanonicalType::Varchar(unsigned(len)),
            "text" => CanonicalType::Text,
            "bytea" => CanonicalType::Blob,
            "date" => CanonicalType::Date,
            "time" | "time without time zone" => CanonicalType::Time,
            "timestamp" | "timestamp without time zone" => CanonicalType::DateTime,
            "timestamptz" | "timestamp with time zone" => CanonicalType::DateTimeTz,
            "uuid" => CanonicalType::Uuid,
            "json" | "jsonb" => CanonicalType::Json,
            "xml" => CanonicalType::Xml,
            other => CanonicalType::Unknown(other.to_string()),
        },
        DialectKind::Mssql => match ty {
            "bit" => CanonicalType::Boolean,
            "tinyint" | "smallint" => CanonicalType::Int16,
            "int" => CanonicalType::Int32,
            "bigint" => CanonicalType::Int64,
            "real" => CanonicalType::Float32,
            "float" => CanonicalType::Float64,
            "decimal" | "numeric" => decimal(col),
            "money" => CanonicalType::Decimal {
                precision: 19,
                scale: 4,
            },
            "smallmoney" => CanonicalType::Decimal {
                precision: 10,
                scale: 4,
            },
            "char" | "nchar" => CanonicalType::Char(unsigned(len)),
            "varchar" | "nvarchar" => {
                if len < 0 {
                    CanonicalType::Text
                } else {
                    CanonicalType::Varchar(unsigned(len))
                }
            }
            "text" | "ntext" => CanonicalType::Text,
            "binary" => CanonicalType::Binary(unsigned(len)),
            "varbinary" => {
                if len < 0 {
                    CanonicalType::Blob
                } else {
                    CanonicalType::Varbinary(unsigned(len))
                }
            }
            "image" => CanonicalType::Blob,
            "date" => CanonicalType::Date,
            "time" => CanonicalType::Time,
            "datetime" | "datetime2" | "smalldatetime" => CanonicalType::DateTime,
            "datetimeoffset" => CanonicalType::DateTimeTz,
            "uniqueidentifier" => CanonicalType::Uuid,
            "xml" => CanonicalType::Xml,
            other => CanonicalType::Unknown(other.to_string()),
        },
        DialectKind::Mysql => match ty {
            "boolean" | "bool" => CanonicalType::Boolean,
            "tinyint" => {
                // tinyint(1) is MySQL's boolean idiom.
                if col.precision == 1 {
                    CanonicalType::Boolean
                } else {
                    CanonicalType::Int16
                }
            }
            "smallint" | "year" => CanonicalType::Int16,
            "int" | "integer" | "mediumint" => CanonicalType::Int32,
            "bigint" => CanonicalType::Int64,
            "float" => CanonicalType::Float32,
            "double" | "real" => CanonicalType::Float64,
            "decimal" | "numeric" => decimal(col),
            "char" => CanonicalType::Char(unsigned(len)),
            "varchar" => CanonicalType::Varchar(unsigned(len)),
            "text" | "tinytext" | "mediumtext" | "longtext" | "enum" | "set" => CanonicalType::Text,
            "binary" => CanonicalType::Binary(unsigned(len)),
            "varbinary" => CanonicalType::Varbinary(unsigned(len)),
            "blob" | "tinyblob" | "mediumblob" | "longblob" => CanonicalType::Blob,
            "date" => CanonicalType::Date,
            "time" => CanonicalType::Time,
            "datetime" | "timestamp" => CanonicalType::DateTime,
            "json" => CanonicalType::Json,
            other => CanonicalType::Unknown(other.to_string()),
        },
    }
}

fn decimal(col: &ColumnInfo) -> CanonicalType {
    CanonicalType::Decimal {
        precision: col.precision.max(0) as u32,
        scale: col.scale.max(0) as u32,
    }
}

fn unsigned(len: i32) -> u32 {
    len.max(0) as u32
}

/// Render a canonical type as destination DDL.
pub fn from_canonical(dest: DialectKind, ty: &CanonicalType) -> MappedType {
    match dest {
        DialectKind::Postgres => postgres_ddl(ty),
        DialectKind::Mssql => mssql_ddl(ty),
        DialectKind::Mysql => mysql_ddl(ty),
    }
}

fn postgres_ddl(ty: &CanonicalType) -> MappedType {
    match ty {
        CanonicalType::Boolean => MappedType::exact("boolean"),
        CanonicalType::Int16 => MappedType::exact("smallint"),
        CanonicalType::Int32 => MappedType::exact("integer"),
        CanonicalType::Int64 => MappedType::exact("bigint"),
        CanonicalType::Float32 => MappedType::exact("real"),
        CanonicalType::Float64 => MappedType::exact("double precision"),
        CanonicalType::Decimal { precision, scale } => {
            if *precision == 0 {
                MappedType::exact("numeric")
            } else {
                MappedType::exact(format!("numeric({},{})", precision, scale))
            }
        }
        CanonicalType::Char(n) if *n > 0 => MappedType::exact(format!("char({})", n)),
        CanonicalType::Char(_) => MappedType::exact("text"),
        CanonicalType::Varchar(n) if *n > 0 => MappedType::exact(format!("varchar({})", n)),
        CanonicalType::Varchar(_) | CanonicalType::Text => MappedType::exact("text"),
        CanonicalType::Binary(_) | CanonicalType::Varbinary(_) | CanonicalType::Blob => {
            MappedType::exact("bytea")
        }
        CanonicalType::Date => MappedType::exact("date"),
        CanonicalType::Time => MappedType::exact("time"),
        CanonicalType::DateTime => MappedType::exact("timestamp"),
        CanonicalType::DateTimeTz => MappedType::exact("timestamptz"),
        CanonicalType::Uuid => MappedType::exact("uuid"),
        CanonicalType::Json => MappedType::exact("jsonb"),
        CanonicalType::Xml => MappedType::exact("xml"),
        CanonicalType::Unknown(name) => MappedType::lossy(
            "text",
            format!("unknown source type '{}' stored as text", name),
        ),
    }
}

fn mssql_ddl(ty: &CanonicalType) -> MappedType {
    match ty {
        CanonicalType::Boolean => MappedType::exact("bit"),
        CanonicalType::Int16 => MappedType::exact("smallint"),
        CanonicalType::Int32 => MappedType::exact("int"),
        CanonicalType::Int64 => MappedType::exact("bigint"),
        CanonicalType::Float32 => MappedType::exact("real"),
        CanonicalType::Float64 => MappedType::exact("float"),
        CanonicalType::Decimal { precision, scale } => {
            if *precision == 0 {
                MappedType::exact("decimal(18,0)")
            } else if *precision > 38 {
                MappedType::lossy(
                    "decimal(38,6)",
                    format!("precision {} exceeds the 38-digit maximum", precision),
                )
            } else {
                MappedType::exact(format!("decimal({},{})", precision, scale))
            }
        }
        CanonicalType::Char(n) if *n > 0 && *n <= 4000 => {
            MappedType::exact(format!("nchar({})", n))
        }
        CanonicalType::Char(_) => MappedType::exact("nvarchar(max)"),
        CanonicalType::Varchar(n) if *n > 0 && *n <= 4000 => {
            MappedType::exact(format!("nvarchar({})", n))
        }
        CanonicalType::Varchar(_) | CanonicalType::Text => MappedType::exact("nvarchar(max)"),
        CanonicalType::Binary(n) if *n > 0 => MappedType::exact(format!("binary({})", n)),
        CanonicalType::Binary(_) => MappedType::exact("varbinary(max)"),
        CanonicalType::Varbinary(n) if *n > 0 && *n <= 8000 => {
            MappedType::exact(format!("varbinary({})", n))
        }
        CanonicalType::Varbinary(_) | CanonicalType::Blob => MappedType::exact("varbinary(max)"),
        CanonicalType::Date => MappedType::exact("date"),
        CanonicalType::Time => MappedType::exact("time"),
        CanonicalType::DateTime => MappedType::exact("datetime2"),
        CanonicalType::DateTimeTz => MappedType::exact("datetimeoffset"),
        CanonicalType::Uuid => MappedType::exact("uniqueidentifier"),
        CanonicalType::Json => {
            MappedType::lossy("nvarchar(max)", "JSON stored as nvarchar(max)")
        }
        CanonicalType::Xml => MappedType::exact("xml"),
        CanonicalType::Unknown(name) => MappedType::lossy(
            "nvarchar(max)",
            format!("unknown source type '{}' stored as nvarchar(max)", name),
        ),
    }
}

fn mysql_ddl(ty: &CanonicalType) -> MappedType {
    match ty {
        CanonicalType::Boolean => MappedType::exact("tinyint(1)"),
        CanonicalType::Int16 => MappedType::exact("smallint"),
        CanonicalType::Int32 => MappedType::exact("int"),
        CanonicalType::Int64 => MappedType::exact("bigint"),
        CanonicalType::Float32 => MappedType::exact("float"),
        CanonicalType::Float64 => MappedType::exact("double"),
        CanonicalType::Decimal { precision, scale } => {
            if *precision == 0 {
                MappedType::exact("decimal(10,0)")
            } else if *precision > 65 {
                MappedType::lossy(
                    "decimal(65,6)",
                    format!("precision {} exceeds the 65-digit maximum", precision),
                )
            } else {
                MappedType::exact(format!("decimal({},{})", precision, scale))
            }
        }
        CanonicalType::Char(n) if *n > 0 && *n <= 255 => MappedType::exact(format!("char({})", n)),
        CanonicalType::Char(_) => MappedType::exact("longtext"),
        CanonicalType::Varchar(n) if *n > 0 && *n <= 16383 => {
            MappedType::exact(format!("varchar({})", n))
        }
        CanonicalType::Varchar(_) | CanonicalType::Text => MappedType::exact("longtext"),
        CanonicalType::Binary(n) if *n > 0 => MappedType::exact(format!("binary({})", n)),
        CanonicalType::Binary(_) => MappedType::exact("longblob"),
        CanonicalType::Varbinary(n) if *n > 0 => MappedType::exact(format!("varbinary({})", n)),
        CanonicalType::Varbinary(_) | CanonicalType::Blob => MappedType::exact("longblob"),
        CanonicalType::Date => MappedType::exact("date"),
        CanonicalType::Time => MappedType::exact("time"),
        CanonicalType::DateTime => MappedType::exact("datetime"),
        CanonicalType::DateTimeTz => MappedType::lossy(
            "datetime",
            "timezone offset not preserved; values normalized to UTC",
        ),
        CanonicalType::Uuid => MappedType::exact("char(36)"),
        CanonicalType::Json => MappedType::exact("json"),
        CanonicalType::Xml => MappedType::lossy("longtext", "XML stored as longtext"),
        CanonicalType::Unknown(name) => MappedType::lossy(
            "longtext",
            format!("unknown source type '{}' stored as longtext", name),
        ),
    }
}

/// One column of a generated CREATE TABLE.
#[derive(Debug, Clone)]
pub struct DdlColumn {
    /// Destination column name.
    pub name: String,
    /// Rendered destination type.
    pub ddl_type: String,
    /// Whether the column allows NULL.
    pub nullable: bool,
}

/// Render a CREATE TABLE statement with destination-dialect quoting.
pub fn build_create_table(
    dest: DialectKind,
    qualified_table: &str,
    columns: &[DdlColumn],
) -> Result<String> {
    let dialect: &dyn Dialect = dest.dialect();
    let cols = columns
        .iter()
        .map(|c| {
            let quoted = dialect.quote_ident(&c.name)?;
            let null = if c.nullable { "NULL" } else { "NOT NULL" };
            Ok(format!("{} {} {}", quoted, c.ddl_type, null))
        })
        .collect::<Result<Vec<_>>>()?
        .join(", ");
    Ok(format!("CREATE TABLE {} ({})", qualified_table, cols))
}
