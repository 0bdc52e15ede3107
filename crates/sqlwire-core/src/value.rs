//! Decoded SQL values.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::row::FromValue;

/// A single decoded column value.
///
/// Integer variants keep the width and signedness the column declared, so
/// an `UNSIGNED BIGINT` never has to squeeze into an `i64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,

    /// Boolean value
    Bool(bool),

    /// TINYINT
    TinyInt(i8),

    /// TINYINT UNSIGNED
    UTinyInt(u8),

    /// SMALLINT
    SmallInt(i16),

    /// SMALLINT UNSIGNED
    USmallInt(u16),

    /// MEDIUMINT (signed or unsigned, both fit)
    Int(i32),

    /// INT / BIGINT
    BigInt(i64),

    /// INT UNSIGNED / BIGINT UNSIGNED
    UBigInt(u64),

    /// FLOAT
    Float(f32),

    /// DOUBLE
    Double(f64),

    /// Character data
    Text(String),

    /// BLOB family
    Bytes(Vec<u8>),

    /// DATE and YEAR
    Date(NaiveDate),

    /// TIME
    Time(NaiveTime),

    /// DATETIME and TIMESTAMP
    DateTime(NaiveDateTime),
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::TinyInt(_) => "TINYINT",
            Value::UTinyInt(_) => "TINYINT UNSIGNED",
            Value::SmallInt(_) => "SMALLINT",
            Value::USmallInt(_) => "SMALLINT UNSIGNED",
            Value::Int(_) => "MEDIUMINT",
            Value::BigInt(_) => "BIGINT",
            Value::UBigInt(_) => "BIGINT UNSIGNED",
            Value::Float(_) => "FLOAT",
            Value::Double(_) => "DOUBLE",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Date(_) => "DATE",
            Value::Time(_) => "TIME",
            Value::DateTime(_) => "DATETIME",
        }
    }

    /// Read the value as a boolean.
    ///
    /// MySQL stores booleans as `TINYINT(1)`; a value is `true` only when it
    /// equals 1. Any other tinyint value reads as `false`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::TinyInt(v) => Some(*v == 1),
            Value::UTinyInt(v) => Some(*v == 1),
            _ => None,
        }
    }

    /// Try to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::TinyInt(v) => Some(i64::from(*v)),
            Value::UTinyInt(v) => Some(i64::from(*v)),
            Value::SmallInt(v) => Some(i64::from(*v)),
            Value::USmallInt(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            Value::UBigInt(v) => i64::try_from(*v).ok(),
            Value::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Try to convert this value to a u64. Negative values do not convert.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UBigInt(v) => Some(*v),
            other => other.as_i64().and_then(|v| u64::try_from(v).ok()),
        }
    }

    /// Try to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            Value::UBigInt(v) => Some(*v as f64),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as raw bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Get the value as `T`, failing with a type error on mismatch.
    ///
    /// ```
    /// use sqlwire_core::Value;
    ///
    /// let v = Value::UTinyInt(1);
    /// assert_eq!(v.get::<bool>().unwrap(), true);
    /// assert!(v.get::<String>().is_err());
    /// ```
    #[allow(clippy::result_large_err)]
    pub fn get<T: FromValue>(&self) -> Result<T> {
        T::from_value(self)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::TinyInt(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::UTinyInt(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::SmallInt(v)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::USmallInt(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UBigInt(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Value::Time(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}
