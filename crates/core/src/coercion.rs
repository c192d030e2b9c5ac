use crate::config::{CoercionOptions, NumericMode};
use crate::{FieldType, FieldValue, IngestError};
use serde_json::Value;

/// Parses a number that may carry currency symbols, thousands separators or
/// units. Every character except digits, signs and the decimal point is
/// dropped before parsing.
pub fn parse_maybe_currency(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|ch| ch.is_ascii_digit() || matches!(ch, '.' | '-' | '+'))
        .collect();

    cleaned
        .parse::<f64>()
        .ok()
        .filter(|number| number.is_finite())
}

/// Legacy text cleanup: keeps word characters, whitespace and hyphens.
pub fn sanitize_text(raw: &str) -> String {
    raw.chars()
        .filter(|ch| ch.is_alphanumeric() || *ch == '_' || *ch == '-' || ch.is_whitespace())
        .collect()
}

/// Stringifies a scalar for TEXT and TAG attributes. Arrays are joined with
/// `,`.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.clone(),
        Value::Array(items) => items.iter().map(stringify).collect::<Vec<_>>().join(","),
        Value::Object(_) => value.to_string(),
    }
}

pub fn coerce(
    field: &str,
    field_type: FieldType,
    value: &Value,
    options: &CoercionOptions,
) -> Result<FieldValue, IngestError> {
    match field_type {
        FieldType::Numeric => coerce_numeric(field, value, options.numeric).map(FieldValue::Number),
        FieldType::Text if options.sanitize_text => {
            Ok(FieldValue::Text(sanitize_text(&stringify(value))))
        }
        FieldType::Text | FieldType::Tag | FieldType::Vector => {
            Ok(FieldValue::Text(stringify(value)))
        }
    }
}

fn coerce_numeric(field: &str, value: &Value, mode: NumericMode) -> Result<f64, IngestError> {
    let parsed = match value {
        Value::Number(number) => number.as_f64().filter(|number| number.is_finite()),
        Value::String(text) => parse_maybe_currency(text),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        Value::Array(items) => match items.first() {
            Some(first) => return coerce_numeric(field, first, mode),
            None => None,
        },
        Value::Null | Value::Object(_) => None,
    };

    match (parsed, mode) {
        (Some(number), _) => Ok(number),
        (None, NumericMode::Lenient) => Ok(0.0),
        (None, NumericMode::Strict) => Err(IngestError::InvalidValue {
            field: field.to_string(),
            value: stringify(value),
        }),
    }
}
