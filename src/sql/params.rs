//! Bound parameter values.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

use crate::schema::DataType;

/// A typed literal bound to a placeholder. Literals never appear in SQL text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Text(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl ParamValue {
    /// Coerce a raw literal to the column's declared type.
    ///
    /// Returns the reason on failure.
    pub fn coerce(raw: &str, data_type: DataType) -> Result<Self, String> {
        let trimmed = raw.trim();
        match data_type {
            DataType::String | DataType::Unknown => Ok(ParamValue::Text(trimmed.to_string())),
            DataType::Integer => {
                let cleaned = strip_number(trimmed);
                cleaned
                    .parse::<i64>()
                    .map(ParamValue::Integer)
                    .map_err(|_| format!("'{}' is not an integer", trimmed))
            }
            DataType::Decimal => {
                let cleaned = strip_number(trimmed);
                match cleaned.parse::<f64>() {
                    Ok(v) if v.is_finite() => Ok(ParamValue::Decimal(v)),
                    _ => Err(format!("'{}' is not a number", trimmed)),
                }
            }
            DataType::Boolean => match trimmed.to_lowercase().as_str() {
                "true" | "yes" | "y" | "1" => Ok(ParamValue::Boolean(true)),
                "false" | "no" | "n" | "0" => Ok(ParamValue::Boolean(false)),
                _ => Err(format!("'{}' is not a boolean", trimmed)),
            },
            DataType::Date => parse_date(trimmed)
                .map(ParamValue::Date)
                .ok_or_else(|| format!("'{}' is not a date", trimmed)),
            DataType::Timestamp => parse_timestamp(trimmed)
                .map(ParamValue::Timestamp)
                .ok_or_else(|| format!("'{}' is not a date or timestamp", trimmed)),
        }
    }

    /// Start of day for a date, typed for the target column.
    pub fn day_start(date: NaiveDate, data_type: DataType) -> Self {
        match data_type {
            DataType::Date => ParamValue::Date(date),
            _ => ParamValue::Timestamp(date.and_time(NaiveTime::MIN)),
        }
    }

    /// Last second of a day, typed for the target column.
    pub fn day_end(date: NaiveDate, data_type: DataType) -> Self {
        match data_type {
            DataType::Date => ParamValue::Date(date),
            _ => ParamValue::Timestamp(
                date.and_hms_opt(23, 59, 59)
                    .unwrap_or_else(|| date.and_time(NaiveTime::MIN)),
            ),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Text(s) => write!(f, "{}", s),
            ParamValue::Integer(v) => write!(f, "{}", v),
            ParamValue::Decimal(v) => write!(f, "{}", v),
            ParamValue::Boolean(v) => write!(f, "{}", v),
            ParamValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            ParamValue::Timestamp(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// A named parameter in emission order (`p1..pn`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundParameter {
    pub name: String,
    pub value: ParamValue,
}

fn strip_number(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, ',' | '_' | '$' | '£' | '€' | ' '))
        .collect()
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d.%m.%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| parse_date(s).map(|d| d.and_time(NaiveTime::MIN)))
}
