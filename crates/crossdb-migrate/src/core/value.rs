//! SQL value and cursor types for dialect-agnostic data transfer.

use std::borrow::Cow;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MigrateError, Result};

/// SQL value enum for type-safe row handling.
///
/// Uses `Cow` for string and byte data so handles can hand out borrowed
/// slices during reads; the transfer pipeline works with owned (`'static`)
/// values.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue<'a> {
    /// SQL NULL.
    Null,

    /// Boolean value.
    Bool(bool),

    /// 16-bit signed integer (smallint).
    I16(i16),

    /// 32-bit signed integer (int).
    I32(i32),

    /// 64-bit signed integer (bigint).
    I64(i64),

    /// 32-bit floating point (real/float4).
    F32(f32),

    /// 64-bit floating point (double precision/float8).
    F64(f64),

    /// Text/string data.
    Text(Cow<'a, str>),

    /// Binary data.
    Bytes(Cow<'a, [u8]>),

    /// UUID/GUID value.
    Uuid(Uuid),

    /// Decimal value with arbitrary precision.
    Decimal(Decimal),

    /// Timestamp without timezone.
    DateTime(NaiveDateTime),

    /// Timestamp with timezone offset.
    DateTimeOffset(DateTime<FixedOffset>),

    /// Date without time component.
    Date(NaiveDate),

    /// Time without date component.
    Time(NaiveTime),
}

impl<'a> SqlValue<'a> {
    /// Convert to a fully owned value with `'static` lifetime.
    #[must_use]
    pub fn into_owned(self) -> SqlValue<'static> {
        match self {
            SqlValue::Null => SqlValue::Null,
            SqlValue::Bool(v) => SqlValue::Bool(v),
            SqlValue::I16(v) => SqlValue::I16(v),
            SqlValue::I32(v) => SqlValue::I32(v),
            SqlValue::I64(v) => SqlValue::I64(v),
            SqlValue::F32(v) => SqlValue::F32(v),
            SqlValue::F64(v) => SqlValue::F64(v),
            SqlValue::Text(v) => SqlValue::Text(Cow::Owned(v.into_owned())),
            SqlValue::Bytes(v) => SqlValue::Bytes(Cow::Owned(v.into_owned())),
            SqlValue::Uuid(v) => SqlValue::Uuid(v),
            SqlValue::Decimal(v) => SqlValue::Decimal(v),
            SqlValue::DateTime(v) => SqlValue::DateTime(v),
            SqlValue::DateTimeOffset(v) => SqlValue::DateTimeOffset(v),
            SqlValue::Date(v) => SqlValue::Date(v),
            SqlValue::Time(v) => SqlValue::Time(v),
        }
    }

    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Create a text value from an owned String.
    #[must_use]
    pub fn text_owned(s: String) -> SqlValue<'static> {
        SqlValue::Text(Cow::Owned(s))
    }

    /// Create a text value from a borrowed string slice.
    #[must_use]
    pub fn text_borrowed(s: &'a str) -> Self {
        SqlValue::Text(Cow::Borrowed(s))
    }
}

impl From<bool> for SqlValue<'static> {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i16> for SqlValue<'static> {
    fn from(v: i16) -> Self {
        SqlValue::I16(v)
    }
}

impl From<i32> for SqlValue<'static> {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<i64> for SqlValue<'static> {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<f64> for SqlValue<'static> {
    fn from(v: f64) -> Self {
        SqlValue::F64(v)
    }
}

impl From<String> for SqlValue<'static> {
    fn from(v: String) -> Self {
        SqlValue::Text(Cow::Owned(v))
    }
}

impl<'a> From<&'a str> for SqlValue<'a> {
    fn from(v: &'a str) -> Self {
        SqlValue::Text(Cow::Borrowed(v))
    }
}

impl From<Uuid> for SqlValue<'static> {
    fn from(v: Uuid) -> Self {
        SqlValue::Uuid(v)
    }
}

impl From<Decimal> for SqlValue<'static> {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<NaiveDateTime> for SqlValue<'static> {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

/// One row of values, in the column order of the statement it belongs to.
pub type Row = Vec<SqlValue<'static>>;

/// An ordering-key or watermark cursor value.
///
/// This is the persisted form of a pagination boundary: integers, strings
/// and timestamps cover the key types the extractor accepts. Floats are
/// rejected at planning time (equality on the exclusive bound would be
/// unreliable).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    /// Integer key (covers smallint/int/bigint).
    Int(i64),
    /// Timestamp key (watermark columns are usually these).
    Timestamp(DateTime<Utc>),
    /// String key (varchar/uuid keys).
    Text(String),
}

impl KeyValue {
    /// Convert a fetched value into a cursor, or fail for types that
    /// cannot serve as a stable ordering key.
    pub fn try_from_value(value: &SqlValue<'_>) -> Result<Self> {
        match value {
            SqlValue::I16(v) => Ok(KeyValue::Int(i64::from(*v))),
            SqlValue::I32(v) => Ok(KeyValue::Int(i64::from(*v))),
            SqlValue::I64(v) => Ok(KeyValue::Int(*v)),
            SqlValue::Text(v) => Ok(KeyValue::Text(v.to_string())),
            SqlValue::Uuid(v) => Ok(KeyValue::Text(v.to_string())),
            SqlValue::DateTime(v) => Ok(KeyValue::Timestamp(v.and_utc())),
            SqlValue::DateTimeOffset(v) => Ok(KeyValue::Timestamp(v.with_timezone(&Utc))),
            SqlValue::Date(v) => Ok(KeyValue::Timestamp(
                v.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc(),
            )),
            other => Err(MigrateError::Database(format!(
                "value {:?} cannot be used as an ordering key",
                other
            ))),
        }
    }

    /// Render as a bindable parameter value.
    pub fn to_sql_value(&self) -> SqlValue<'static> {
        match self {
            KeyValue::Int(v) => SqlValue::I64(*v),
            KeyValue::Timestamp(v) => SqlValue::DateTime(v.naive_utc()),
            KeyValue::Text(v) => SqlValue::text_owned(v.clone()),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        KeyValue::Int(v)
    }
}

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        KeyValue::Text(v.to_string())
    }
}

impl From<DateTime<Utc>> for KeyValue {
    fn from(v: DateTime<Utc>) -> Self {
        KeyValue::Timestamp(v)
    }
}

/// One bounded batch of rows moved within a single destination transaction.
///
/// Transient: exists only between extraction and load, never persisted.
#[derive(Debug)]
pub struct Chunk {
    /// Rows in source-column order.
    pub rows: Vec<Row>,

    /// Zero-based chunk index within the table's transfer.
    pub index: usize,

    /// Exclusive lower bound this chunk was fetched with (None for the first
    /// chunk or offset pagination).
    pub first_key: Option<KeyValue>,

    /// Ordering-key value of the last row, used as the next chunk's
    /// exclusive lower bound and as the committed cursor.
    pub last_key: Option<KeyValue>,
}

impl Chunk {
    /// Get the number of rows in this chunk.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the chunk is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
