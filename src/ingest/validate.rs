//! Validation: the last check before a record reaches the canonical store
//!
//! A record that passes is converted into a `CanonicalAppRecord`; one that
//! fails yields a `ValidationError` naming the offending field.

use crate::ingest::normalize::NormalizedRecord;
use crate::storage::CanonicalAppRecord;
use serde_json::{Map, Value};
use thiserror::Error;

/// A record that cannot be stored
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Field '{field}' must be {expected}")]
    InvalidType {
        field: &'static str,
        expected: &'static str,
    },
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ValidationError::MissingField(field)),
    }
}

fn rank(value: Option<Value>) -> Result<i64, ValidationError> {
    match value {
        None | Some(Value::Null) => Err(ValidationError::MissingField("rank")),
        Some(v) => v.as_i64().ok_or(ValidationError::InvalidType {
            field: "rank",
            expected: "an integer",
        }),
    }
}

fn estimate(value: Option<f64>, field: &'static str) -> Result<Option<f64>, ValidationError> {
    match value {
        Some(v) if !v.is_finite() => Err(ValidationError::InvalidType {
            field,
            expected: "a number",
        }),
        other => Ok(other),
    }
}

/// Optional list of strings; absent or null becomes `None`
fn string_list(
    value: Option<Value>,
    field: &'static str,
) -> Result<Option<Vec<String>>, ValidationError> {
    let invalid = ValidationError::InvalidType {
        field,
        expected: "a list of strings",
    };
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                _ => Err(invalid.clone()),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(invalid),
    }
}

/// Optional JSON container; must be an object or a list when present
fn container(
    value: Option<Value>,
    field: &'static str,
    default: Value,
) -> Result<Value, ValidationError> {
    match value {
        None | Some(Value::Null) => Ok(default),
        Some(v @ (Value::Array(_) | Value::Object(_))) => Ok(v),
        Some(_) => Err(ValidationError::InvalidType {
            field,
            expected: "a dict or list",
        }),
    }
}

/// Validates a transformed record and converts it for storage
///
/// `active`, `first_seen` and `last_seen` are left for the store to set.
pub fn validate(record: NormalizedRecord) -> Result<CanonicalAppRecord, ValidationError> {
    let external_id = required(record.external_id, "external_id")?;
    let name = required(record.name, "name")?;
    let developer = required(record.developer, "developer")?;
    let source_url = required(record.source_url, "source_url")?;
    let category = required(record.category, "category")?;
    let rank = rank(record.rank)?;

    let monthly_downloads_estimate =
        estimate(record.monthly_downloads_estimate, "monthly_downloads_estimate")?;
    let monthly_revenue_estimate =
        estimate(record.monthly_revenue_estimate, "monthly_revenue_estimate")?;

    let screenshots = string_list(record.screenshots, "screenshots")?.unwrap_or_default();
    let privacy_data = string_list(record.privacy_data, "privacy_data")?.unwrap_or_default();
    let labels = string_list(record.labels, "labels")?;
    let reviews = container(record.reviews, "reviews", Value::Array(Vec::new()))?;
    let general_info = container(
        record.general_info,
        "general_info",
        Value::Object(Map::new()),
    )?;

    Ok(CanonicalAppRecord {
        external_id,
        name,
        subtitle: record.subtitle,
        developer,
        category,
        list_type: record.list_type,
        rank,
        category_rank: record.category_rank,
        price: record.price,
        rating_summary: record.rating_summary,
        icon_url: record.icon_url,
        source_url,
        description: record.description,
        num_screenshots: screenshots.len() as i64,
        screenshots,
        has_in_app_purchases: record.has_in_app_purchases,
        latest_version: record.latest_version,
        latest_version_date: record.latest_version_date,
        reviews,
        privacy_data,
        general_info,
        labels,
        monthly_downloads_estimate,
        monthly_revenue_estimate,
        active: true,
        first_seen: String::new(),
        last_seen: String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_record() -> NormalizedRecord {
        NormalizedRecord {
            external_id: Some("111".to_string()),
            name: Some("Puzzle".to_string()),
            developer: Some("Puzzle Co".to_string()),
            source_url: Some("https://apps.apple.com/us/app/puzzle/id111".to_string()),
            category: Some("Games".to_string()),
            rank: Some(json!(5)),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_record_converts_with_defaults() {
        let record = validate(valid_record()).unwrap();
        assert_eq!(record.rank, 5);
        assert_eq!(record.reviews, json!([]));
        assert_eq!(record.general_info, json!({}));
        assert!(record.screenshots.is_empty());
        assert!(record.labels.is_none());
    }

    #[test]
    fn test_each_required_field_is_enforced() {
        let cases: Vec<(&'static str, Box<dyn Fn(&mut NormalizedRecord)>)> = vec![
            ("external_id", Box::new(|r| r.external_id = None)),
            ("name", Box::new(|r| r.name = Some("  ".to_string()))),
            ("developer", Box::new(|r| r.developer = None)),
            ("source_url", Box::new(|r| r.source_url = None)),
            ("category", Box::new(|r| r.category = None)),
            ("rank", Box::new(|r| r.rank = None)),
        ];

        for (field, clear) in cases {
            let mut record = valid_record();
            clear(&mut record);
            assert_eq!(
                validate(record).unwrap_err(),
                ValidationError::MissingField(field)
            );
        }
    }

    #[test]
    fn test_rank_must_be_integer() {
        let mut record = valid_record();
        record.rank = Some(json!("Unknown Rank"));
        assert!(matches!(
            validate(record),
            Err(ValidationError::InvalidType { field: "rank", .. })
        ));

        let mut record = valid_record();
        record.rank = Some(json!(2.5));
        assert!(validate(record).is_err());
    }

    #[test]
    fn test_list_and_container_types() {
        let mut record = valid_record();
        record.screenshots = Some(json!("not a list"));
        assert!(matches!(
            validate(record),
            Err(ValidationError::InvalidType { field: "screenshots", .. })
        ));

        let mut record = valid_record();
        record.general_info = Some(json!(42));
        assert!(matches!(
            validate(record),
            Err(ValidationError::InvalidType { field: "general_info", .. })
        ));

        let mut record = valid_record();
        record.reviews = Some(json!({ "count": 3 }));
        record.labels = Some(json!(["casual"]));
        let stored = validate(record).unwrap();
        assert_eq!(stored.labels, Some(vec!["casual".to_string()]));
    }

    #[test]
    fn test_non_finite_estimate_is_rejected() {
        let mut record = valid_record();
        record.monthly_revenue_estimate = Some(f64::NAN);
        assert!(validate(record).is_err());
    }
}
