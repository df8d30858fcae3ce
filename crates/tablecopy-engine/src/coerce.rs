//! Coercion of textual source values into typed values
//!
//! Flat-file sources produce text only. Once the mapping has settled each
//! source column's type (usually by adopting the target's), values are
//! converted here so the target receives properly typed parameters.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tablecopy_core::{SqlType, Value};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"];

/// Convert `value` to `sql_type` when it is text.
///
/// Non-text values pass through unchanged. An empty string becomes NULL for
/// every non-text type.
pub fn coerce_text(value: Value, sql_type: SqlType) -> Result<Value, String> {
    let text = match value {
        Value::String(text) => text,
        other => return Ok(other),
    };
    if sql_type.is_text() || sql_type == SqlType::Other {
        return Ok(Value::String(text));
    }

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }

    match sql_type {
        SqlType::Boolean => parse_bool(trimmed)
            .map(Value::Bool)
            .ok_or_else(|| format!("'{}' is not a boolean", trimmed)),
        SqlType::SmallInt | SqlType::Integer | SqlType::BigInt => trimmed
            .parse::<i64>()
            .map(Value::Int64)
            .map_err(|_| format!("'{}' is not an integer", trimmed)),
        SqlType::Real | SqlType::Double => trimmed
            .parse::<f64>()
            .map(Value::Float64)
            .map_err(|_| format!("'{}' is not a number", trimmed)),
        SqlType::Decimal => {
            if trimmed.parse::<f64>().is_ok() {
                Ok(Value::Decimal(trimmed.to_string()))
            } else {
                Err(format!("'{}' is not a decimal", trimmed))
            }
        }
        SqlType::Binary => Ok(Value::Bytes(text.into_bytes())),
        SqlType::Date => NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
            .map(Value::Date)
            .map_err(|_| format!("'{}' is not a date (expected YYYY-MM-DD)", trimmed)),
        SqlType::Time => TIME_FORMATS
            .iter()
            .find_map(|f| NaiveTime::parse_from_str(trimmed, f).ok())
            .map(Value::Time)
            .ok_or_else(|| format!("'{}' is not a time (expected HH:MM[:SS])", trimmed)),
        SqlType::Timestamp => parse_datetime(trimmed)
            .map(Value::DateTime)
            .ok_or_else(|| format!("'{}' is not a timestamp", trimmed)),
        SqlType::TimestampTz => DateTime::parse_from_rfc3339(trimmed)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| parse_datetime(trimmed).map(|naive| naive.and_utc()))
            .map(Value::DateTimeUtc)
            .ok_or_else(|| format!("'{}' is not a timestamp with time zone", trimmed)),
        SqlType::Uuid => uuid::Uuid::parse_str(trimmed)
            .map(Value::Uuid)
            .map_err(|e| format!("'{}' is not a UUID: {}", trimmed, e)),
        SqlType::Json => serde_json::from_str(trimmed)
            .map(Value::Json)
            .map_err(|e| format!("invalid JSON: {}", e)),
        SqlType::Char | SqlType::Varchar | SqlType::Text | SqlType::Other => {
            Ok(Value::String(text))
        }
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn text(s: &str) -> Value {
        Value::String(s.to_string())
    }

    #[rstest]
    #[case(SqlType::Integer, " 42 ", Value::Int64(42))]
    #[case(SqlType::Boolean, "Yes", Value::Bool(true))]
    #[case(SqlType::Double, "2.5", Value::Float64(2.5))]
    #[case(SqlType::Decimal, "10.25", Value::Decimal("10.25".into()))]
    #[case(SqlType::Date, "2024-02-29", Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()))]
    #[case(SqlType::Integer, "", Value::Null)]
    #[case(SqlType::Text, "", Value::String(String::new()))]
    #[case(SqlType::Varchar, " padded ", Value::String(" padded ".into()))]
    fn test_coerce_valid_text(#[case] sql_type: SqlType, #[case] input: &str, #[case] expected: Value) {
        assert_eq!(coerce_text(text(input), sql_type).unwrap(), expected);
    }

    #[rstest]
    #[case(SqlType::Integer, "4x")]
    #[case(SqlType::Boolean, "maybe")]
    #[case(SqlType::Date, "29/02/2024")]
    #[case(SqlType::Uuid, "not-a-uuid")]
    #[case(SqlType::Json, "{broken")]
    fn test_coerce_rejects_bad_text(#[case] sql_type: SqlType, #[case] input: &str) {
        assert!(coerce_text(text(input), sql_type).is_err());
    }

    #[test]
    fn test_timestamps() {
        let naive = coerce_text(text("2024-01-02 03:04:05"), SqlType::Timestamp).unwrap();
        assert_eq!(naive.to_string(), "2024-01-02 03:04:05");

        let date_only = coerce_text(text("2024-01-02"), SqlType::Timestamp).unwrap();
        assert_eq!(date_only.to_string(), "2024-01-02 00:00:00");

        let tz = coerce_text(text("2024-01-02T03:04:05+02:00"), SqlType::TimestampTz).unwrap();
        assert_eq!(tz.to_string(), "2024-01-02 01:04:05 UTC");
    }

    #[test]
    fn test_typed_values_pass_through() {
        assert_eq!(coerce_text(Value::Int64(7), SqlType::Text).unwrap(), Value::Int64(7));
        assert_eq!(coerce_text(Value::Null, SqlType::Integer).unwrap(), Value::Null);
    }
}
