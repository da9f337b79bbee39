//! Field value inference for condition comparisons.
//!
//! Record data arrives as loosely-typed JSON. Comparisons are numeric,
//! date or text aware depending on what the value looks like: numeric
//! strings compare as `Decimal`, RFC 3339 / `YYYY-MM-DD` strings compare
//! as instants, everything else as text. No `f64` anywhere.

use std::cmp::Ordering;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

/// A record field value after type inference.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Null, blank string or empty list.
    Empty,
    Bool(bool),
    Number(Decimal),
    Date(OffsetDateTime),
    Text(String),
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Infer the comparison type of a JSON value.
    pub fn infer(value: &Value) -> FieldValue {
        match value {
            Value::Null => FieldValue::Empty,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => parse_decimal(&n.to_string())
                .map(FieldValue::Number)
                .unwrap_or_else(|| FieldValue::Text(n.to_string())),
            Value::String(s) => infer_str(s),
            Value::Array(items) if items.is_empty() => FieldValue::Empty,
            Value::Array(items) => FieldValue::List(items.iter().map(FieldValue::infer).collect()),
            Value::Object(map) if map.is_empty() => FieldValue::Empty,
            Value::Object(_) => FieldValue::Text(value.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, FieldValue::Empty)
    }

    /// Text form used for `contains` and mixed-type equality.
    pub fn as_text(&self) -> String {
        match self {
            FieldValue::Empty => String::new(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Number(d) => d.normalize().to_string(),
            FieldValue::Date(dt) => dt.format(&Rfc3339).unwrap_or_default(),
            FieldValue::Text(s) => s.clone(),
            FieldValue::List(items) => items
                .iter()
                .map(FieldValue::as_text)
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Ordering between two values of the same inferred type.
    ///
    /// Numbers and dates order naturally, text orders lexically. Values of
    /// different types are not ordered.
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        match (self, other) {
            (FieldValue::Number(a), FieldValue::Number(b)) => Some(a.cmp(b)),
            (FieldValue::Date(a), FieldValue::Date(b)) => Some(a.cmp(b)),
            (FieldValue::Text(a), FieldValue::Text(b)) => Some(a.cmp(b)),
            (FieldValue::Bool(a), FieldValue::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Type-aware equality; falls back to case-insensitive text equality
    /// when the inferred types differ.
    pub fn loosely_equals(&self, other: &FieldValue) -> bool {
        match self.compare(other) {
            Some(ordering) => ordering == Ordering::Equal,
            None => self.as_text().eq_ignore_ascii_case(&other.as_text()),
        }
    }
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(s)
        .ok()
        .or_else(|| Decimal::from_scientific(s).ok())
}

fn infer_str(raw: &str) -> FieldValue {
    let s = raw.trim();
    if s.is_empty() {
        return FieldValue::Empty;
    }
    if let Some(d) = parse_decimal(s) {
        return FieldValue::Number(d);
    }
    if let Some(dt) = parse_date(s) {
        return FieldValue::Date(dt);
    }
    FieldValue::Text(raw.to_string())
}

/// RFC 3339 timestamps, or plain dates taken as midnight UTC.
pub fn parse_date(s: &str) -> Option<OffsetDateTime> {
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc3339) {
        return Some(dt);
    }
    let date = Date::parse(s, format_description!("[year]-[month]-[day]")).ok()?;
    Some(PrimitiveDateTime::new(date, Time::MIDNIGHT).assume_utc())
}
