//! Untyped entry boundary of the ingestion pipeline
//!
//! Staged documents are loosely structured JSON objects whose keys differ
//! between producers (`title` vs `Title`, `privacy_categories` vs
//! `Privacy Data`). `RawRecord::from_document` is the only place that looks
//! at those keys; everything downstream works on named fields.

use serde_json::{Map, Value};

/// A merged listing + detail document with every field optional
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    pub source_url: Option<String>,
    pub name: Option<String>,
    pub subtitle: Option<String>,
    pub developer: Option<String>,
    pub category: Option<String>,
    pub list_type: Option<String>,
    pub rank: Option<Value>,
    pub category_rank: Option<String>,
    pub price: Option<String>,
    pub rating_summary: Option<String>,
    pub icon_url: Option<String>,
    pub description: Option<String>,
    pub screenshots: Option<Value>,
    pub latest_version: Option<String>,
    pub latest_version_date: Option<String>,
    pub reviews: Option<Value>,
    pub privacy_data: Option<Value>,
    pub general_info: Option<Value>,
    pub labels: Option<Value>,
    pub monthly_downloads: Option<Value>,
    pub monthly_revenue: Option<Value>,
}

/// First non-null value under any of `keys`
fn pick<'a>(document: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| document.get(*key))
        .find(|value| !value.is_null())
}

fn text(document: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    match pick(document, keys)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn value(document: &Map<String, Value>, keys: &[&str]) -> Option<Value> {
    pick(document, keys).cloned()
}

impl RawRecord {
    /// Reads a staged document
    pub fn from_document(document: &Map<String, Value>) -> Self {
        Self {
            source_url: text(document, &["source_url", "url", "Url"]),
            name: text(document, &["name", "title", "Title"]),
            subtitle: text(document, &["subtitle", "Subtitle"]),
            developer: text(document, &["developer", "Developer"]),
            category: text(document, &["category"]),
            list_type: text(document, &["list_type"]),
            rank: value(document, &["rank"]),
            category_rank: text(document, &["category_rank", "Category Rank"]),
            price: text(document, &["price", "Price"]),
            rating_summary: text(document, &["rating", "Rating"]),
            icon_url: text(document, &["icon_url"]),
            description: text(document, &["description", "Description"]),
            screenshots: value(document, &["screenshots", "Screenshots"]),
            latest_version: text(document, &["latest_version", "Latest Version"]),
            latest_version_date: text(document, &["latest_version_date", "Latest Version Date"]),
            reviews: value(document, &["reviews", "Reviews"]),
            privacy_data: value(document, &["privacy_categories", "privacy_data", "Privacy Data"]),
            general_info: value(document, &["general_info", "General Info"]),
            labels: value(document, &["labels"]),
            monthly_downloads: value(document, &["monthly_downloads", "monthly_downloads_estimate"]),
            monthly_revenue: value(document, &["monthly_revenue", "monthly_revenue_estimate"]),
        }
    }

    /// Merges a listing over its detail document; listing keys win
    pub fn merge_documents(detail: &Value, listing: &Value) -> Map<String, Value> {
        let mut merged = detail.as_object().cloned().unwrap_or_default();
        if let Some(listing) = listing.as_object() {
            for (key, value) in listing {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }
}
