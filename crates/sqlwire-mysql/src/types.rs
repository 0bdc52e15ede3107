//! Field types and text-protocol value decoding.
//!
//! Every cell of a text-protocol row arrives as a string; the column's
//! field type and UNSIGNED flag decide which [`Value`] it becomes.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlwire_core::Value;

/// MySQL field type codes (`MYSQL_TYPE_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0A,
    Time = 0x0B,
    DateTime = 0x0C,
    Year = 0x0D,
    NewDate = 0x0E,
    VarChar = 0x0F,
    Bit = 0x10,
    Json = 0xF5,
    NewDecimal = 0xF6,
    Enum = 0xF7,
    Set = 0xF8,
    TinyBlob = 0xF9,
    MediumBlob = 0xFA,
    LongBlob = 0xFB,
    Blob = 0xFC,
    VarString = 0xFD,
    String = 0xFE,
    Geometry = 0xFF,
}

impl FieldType {
    /// Parse a field type from its wire code. Unknown codes read as `String`.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => FieldType::Decimal,
            0x01 => FieldType::Tiny,
            0x02 => FieldType::Short,
            0x03 => FieldType::Long,
            0x04 => FieldType::Float,
            0x05 => FieldType::Double,
            0x06 => FieldType::Null,
            0x07 => FieldType::Timestamp,
            0x08 => FieldType::LongLong,
            0x09 => FieldType::Int24,
            0x0A => FieldType::Date,
            0x0B => FieldType::Time,
            0x0C => FieldType::DateTime,
            0x0D => FieldType::Year,
            0x0E => FieldType::NewDate,
            0x0F => FieldType::VarChar,
            0x10 => FieldType::Bit,
            0xF5 => FieldType::Json,
            0xF6 => FieldType::NewDecimal,
            0xF7 => FieldType::Enum,
            0xF8 => FieldType::Set,
            0xF9 => FieldType::TinyBlob,
            0xFA => FieldType::MediumBlob,
            0xFB => FieldType::LongBlob,
            0xFC => FieldType::Blob,
            0xFD => FieldType::VarString,
            0xFF => FieldType::Geometry,
            _ => FieldType::String,
        }
    }

    #[must_use]
    pub const fn is_blob(self) -> bool {
        matches!(
            self,
            FieldType::TinyBlob | FieldType::MediumBlob | FieldType::LongBlob | FieldType::Blob
        )
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            FieldType::Decimal | FieldType::NewDecimal => "DECIMAL",
            FieldType::Tiny => "TINYINT",
            FieldType::Short => "SMALLINT",
            FieldType::Long => "INT",
            FieldType::Float => "FLOAT",
            FieldType::Double => "DOUBLE",
            FieldType::Null => "NULL",
            FieldType::Timestamp => "TIMESTAMP",
            FieldType::LongLong => "BIGINT",
            FieldType::Int24 => "MEDIUMINT",
            FieldType::Date | FieldType::NewDate => "DATE",
            FieldType::Time => "TIME",
            FieldType::DateTime => "DATETIME",
            FieldType::Year => "YEAR",
            FieldType::VarChar | FieldType::VarString => "VARCHAR",
            FieldType::Bit => "BIT",
            FieldType::Json => "JSON",
            FieldType::Enum => "ENUM",
            FieldType::Set => "SET",
            FieldType::TinyBlob => "TINYBLOB",
            FieldType::MediumBlob => "MEDIUMBLOB",
            FieldType::LongBlob => "LONGBLOB",
            FieldType::Blob => "BLOB",
            FieldType::String => "CHAR",
            FieldType::Geometry => "GEOMETRY",
        }
    }
}

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";

fn epoch() -> NaiveDateTime {
    DateTime::<Utc>::UNIX_EPOCH.naive_utc()
}

fn parse_or_text<T: std::str::FromStr>(text: &str, wrap: impl FnOnce(T) -> Value) -> Value {
    text.parse::<T>()
        .map_or_else(|_| Value::Text(text.to_string()), wrap)
}

/// Decode one text-protocol cell.
///
/// `None` is SQL NULL and yields `Value::Null` whatever the type. Numbers
/// that fail to parse come back as `Text`; dates and times that fail to
/// parse come back as the Unix epoch.
pub fn decode_text_value(field_type: FieldType, data: Option<&[u8]>, is_unsigned: bool) -> Value {
    let Some(data) = data else {
        return Value::Null;
    };
    if field_type.is_blob() {
        return Value::Bytes(data.to_vec());
    }

    let text = String::from_utf8_lossy(data);
    let text = text.as_ref();

    match field_type {
        FieldType::Tiny if is_unsigned => parse_or_text(text, Value::UTinyInt),
        FieldType::Tiny => parse_or_text(text, Value::TinyInt),
        FieldType::Short if is_unsigned => parse_or_text(text, Value::USmallInt),
        FieldType::Short => parse_or_text(text, Value::SmallInt),
        FieldType::Int24 => parse_or_text(text, Value::Int),
        FieldType::Long | FieldType::LongLong if is_unsigned => {
            parse_or_text(text, Value::UBigInt)
        }
        FieldType::Long | FieldType::LongLong => parse_or_text(text, Value::BigInt),
        FieldType::Float => parse_or_text(text, Value::Float),
        FieldType::Double => parse_or_text(text, Value::Double),

        FieldType::DateTime | FieldType::Timestamp => Value::DateTime(
            NaiveDateTime::parse_from_str(text, DATETIME_FORMAT).unwrap_or_else(|_| epoch()),
        ),
        FieldType::Date | FieldType::NewDate => Value::Date(
            NaiveDate::parse_from_str(text, DATE_FORMAT).unwrap_or_else(|_| epoch().date()),
        ),
        FieldType::Time => Value::Time(
            NaiveTime::parse_from_str(text, TIME_FORMAT).unwrap_or_else(|_| epoch().time()),
        ),
        FieldType::Year => Value::Date(
            text.parse::<i32>()
                .ok()
                .and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1))
                .unwrap_or_else(|| epoch().date()),
        ),

        _ => Value::Text(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(field_type: FieldType, text: &str, unsigned: bool) -> Value {
        decode_text_value(field_type, Some(text.as_bytes()), unsigned)
    }

    #[test]
    fn field_type_codes() {
        assert_eq!(FieldType::from_u8(0x01), FieldType::Tiny);
        assert_eq!(FieldType::from_u8(0x0F), FieldType::VarChar);
        assert_eq!(FieldType::from_u8(0xFC), FieldType::Blob);
        assert_eq!(FieldType::from_u8(0x42), FieldType::String);
        assert_eq!(FieldType::Long.name(), "INT");
        assert!(FieldType::MediumBlob.is_blob());
        assert!(!FieldType::Geometry.is_blob());
    }

    #[test]
    fn null_regardless_of_type() {
        for ft in [FieldType::Long, FieldType::VarChar, FieldType::Blob, FieldType::Date] {
            assert_eq!(decode_text_value(ft, None, false), Value::Null);
        }
    }

    #[test]
    fn integers_follow_width_and_sign() {
        assert_eq!(decode(FieldType::Tiny, "-5", false), Value::TinyInt(-5));
        assert_eq!(decode(FieldType::Tiny, "200", true), Value::UTinyInt(200));
        assert_eq!(decode(FieldType::Short, "-300", false), Value::SmallInt(-300));
        assert_eq!(decode(FieldType::Short, "65535", true), Value::USmallInt(65535));
        assert_eq!(decode(FieldType::Int24, "8388607", false), Value::Int(8_388_607));
        assert_eq!(decode(FieldType::Int24, "16777215", true), Value::Int(16_777_215));
        assert_eq!(decode(FieldType::Long, "-7", false), Value::BigInt(-7));
        assert_eq!(
            decode(FieldType::Long, "4294967295", true),
            Value::UBigInt(4_294_967_295)
        );
        assert_eq!(
            decode(FieldType::LongLong, "18446744073709551615", true),
            Value::UBigInt(u64::MAX)
        );
    }

    #[test]
    fn numeric_parse_failure_falls_back_to_text() {
        assert_eq!(
            decode(FieldType::Tiny, "300", false),
            Value::Text("300".to_string())
        );
        assert_eq!(
            decode(FieldType::Double, "n/a", false),
            Value::Text("n/a".to_string())
        );
    }

    #[test]
    fn floats() {
        assert_eq!(decode(FieldType::Double, "2.5", false), Value::Double(2.5));
        assert_eq!(decode(FieldType::Float, "0.5", false), Value::Float(0.5));
    }

    #[test]
    fn temporal_values() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(13, 4, 5)
            .unwrap();
        assert_eq!(
            decode(FieldType::DateTime, "2024-03-09 13:04:05", false),
            Value::DateTime(dt)
        );
        assert_eq!(
            decode(FieldType::Timestamp, "2024-03-09 13:04:05", false),
            Value::DateTime(dt)
        );
        assert_eq!(
            decode(FieldType::Date, "2024-03-09", false),
            Value::Date(dt.date())
        );
        assert_eq!(
            decode(FieldType::Time, "13:04:05", false),
            Value::Time(dt.time())
        );
        assert_eq!(
            decode(FieldType::Year, "1999", false),
            Value::Date(NaiveDate::from_ymd_opt(1999, 1, 1).unwrap())
        );
    }

    #[test]
    fn fractional_seconds_are_kept() {
        let Value::DateTime(dt) = decode(FieldType::DateTime, "2024-03-09 13:04:05.250", false)
        else {
            panic!("expected a datetime");
        };
        assert_eq!(dt.and_utc().timestamp_subsec_millis(), 250);
    }

    #[test]
    fn unparsable_temporal_defaults_to_epoch() {
        assert_eq!(
            decode(FieldType::DateTime, "0000-00-00 00:00:00", false),
            Value::DateTime(
                NaiveDate::from_ymd_opt(1970, 1, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
            )
        );
        assert_eq!(
            decode(FieldType::Date, "garbage", false),
            Value::Date(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap())
        );
        assert_eq!(
            decode(FieldType::Time, "838:59:59", false),
            Value::Time(NaiveTime::MIN)
        );
    }

    #[test]
    fn blobs_and_text() {
        assert_eq!(
            decode_text_value(FieldType::Blob, Some(&[0, 159, 146, 150]), false),
            Value::Bytes(vec![0, 159, 146, 150])
        );
        assert_eq!(
            decode(FieldType::VarString, "abc", false),
            Value::Text("abc".to_string())
        );
        assert_eq!(decode(FieldType::VarChar, "", false), Value::Text(String::new()));
        assert_eq!(
            decode(FieldType::NewDecimal, "10.25", false),
            Value::Text("10.25".to_string())
        );
    }
}
