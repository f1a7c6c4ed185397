//! Text cleanup applied after normalization
//!
//! Free text is NFKC-normalized and whitespace-collapsed, including strings
//! nested inside reviews, general info and the list fields. Structured
//! fields that arrive still serialized as JSON text are parsed first.

use crate::ingest::normalize::NormalizedRecord;
use serde_json::{Map, Value};
use unicode_normalization::UnicodeNormalization;

/// NFKC-normalizes text and collapses every whitespace run to one space
pub fn clean_text(text: &str) -> String {
    let normalized: String = text.nfkc().collect();
    normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parses JSON arrays/objects that were stored as text
///
/// Anything that is not such a string is returned unchanged.
pub fn parse_if_string(value: &Value) -> Value {
    if let Value::String(text) = value {
        let trimmed = text.trim_start();
        if trimmed.starts_with('[') || trimmed.starts_with('{') {
            if let Ok(parsed) = serde_json::from_str::<Value>(text) {
                return parsed;
            }
        }
    }
    value.clone()
}

/// Cleans every string and object key inside a JSON value
pub fn clean_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(clean_text(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(clean_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (clean_text(&k), clean_value(v)))
                .collect::<Map<_, _>>(),
        ),
        other => other,
    }
}

fn clean_opt(text: Option<String>) -> Option<String> {
    text.map(|t| clean_text(&t))
}

fn structured(value: Option<Value>) -> Option<Value> {
    value.map(|v| clean_value(parse_if_string(&v)))
}

/// Applies text cleanup to a normalized record
pub fn transform(record: NormalizedRecord) -> NormalizedRecord {
    NormalizedRecord {
        name: clean_opt(record.name),
        subtitle: clean_opt(record.subtitle),
        developer: clean_opt(record.developer),
        category: clean_opt(record.category),
        category_rank: clean_opt(record.category_rank),
        price: clean_opt(record.price),
        description: clean_opt(record.description),
        rating_summary: clean_opt(record.rating_summary),
        latest_version: clean_opt(record.latest_version),
        screenshots: record.screenshots.map(|v| parse_if_string(&v)),
        labels: structured(record.labels),
        reviews: structured(record.reviews),
        privacy_data: structured(record.privacy_data),
        general_info: structured(record.general_info),
        ..record
    }
}
