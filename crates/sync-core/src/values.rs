//! Runtime value representation for emitted rows.
//!
//! `Value` is the type-agnostic form a connector hands to the operation
//! emitter. Every non-null value maps onto exactly one [`ColumnType`] via
//! [`Value::kind`], which is what the schema registry uses for type
//! inference in unspecified-schema connectors.

use crate::types::ColumnType;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A single cell value in an emitted row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null / absent value
    Null,

    /// Boolean value
    Boolean(bool),

    /// 64-bit signed integer
    Integer(i64),

    /// 64-bit floating point
    Float(f64),

    /// Decimal value stored as string with precision info
    Decimal {
        /// String representation of the decimal value
        value: String,
        /// Total number of digits
        precision: u8,
        /// Number of digits after the decimal point
        scale: u8,
    },

    /// String value
    String(String),

    /// Binary data
    Binary(Vec<u8>),

    /// Calendar date
    Date(NaiveDate),

    /// Date/time with timezone
    Timestamp(DateTime<Utc>),

    /// Arbitrary JSON document
    Json(serde_json::Value),
}

impl Value {
    /// Create a new decimal value.
    pub fn decimal(value: impl Into<String>, precision: u8, scale: u8) -> Self {
        Self::Decimal {
            value: value.into(),
            precision,
            scale,
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The column type this value's runtime shape infers to.
    ///
    /// Returns `None` for null, which carries no shape: the registry
    /// defers typing such columns until a non-null value is observed.
    pub fn kind(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(ColumnType::Boolean),
            Value::Integer(_) => Some(ColumnType::Integer),
            Value::Float(_) => Some(ColumnType::Float),
            Value::Decimal {
                precision, scale, ..
            } => Some(ColumnType::Decimal {
                precision: *precision,
                scale: *scale,
            }),
            Value::String(_) => Some(ColumnType::String),
            Value::Binary(_) => Some(ColumnType::Binary),
            Value::Date(_) => Some(ColumnType::Date),
            Value::Timestamp(_) => Some(ColumnType::Timestamp),
            Value::Json(_) => Some(ColumnType::Json),
        }
    }

    /// Whether this value fits a column of the given declared type.
    ///
    /// Null fits everything; non-null values fit when their inferred kind
    /// widens to the declared type (an integer fits a float column).
    pub fn fits(&self, declared: &ColumnType) -> bool {
        match self.kind() {
            None => true,
            Some(kind) => kind.widens_to(declared),
        }
    }

    /// Try to get this value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get this value as an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get this value as an f64 (integers convert).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get this value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    /// Canonical textual form, used for primary-key encoding at the
    /// destination and in log output.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Decimal { value, .. } => f.write_str(value),
            Value::String(s) => f.write_str(s),
            Value::Binary(b) => write!(f, "0x{}", hex(b)),
            Value::Date(d) => write!(f, "{d}"),
            Value::Timestamp(ts) => f.write_str(&ts.to_rfc3339()),
            Value::Json(v) => write!(f, "{v}"),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}
