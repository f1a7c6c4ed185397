//! Normalization: raw keys to canonical fields
//!
//! Every function here is total. Missing or malformed optional input turns
//! into a default (`None`, `0.0`), never into an error; deciding whether a
//! record is usable is left to validation.

use crate::config::IngestConfig;
use crate::ingest::raw::RawRecord;
use crate::ingest::transform::parse_if_string;
use chrono::NaiveDate;
use serde_json::Value;

/// Which estimate a value belongs to
///
/// A "below bound" value such as `< $5K` keeps its bound as a revenue
/// estimate but counts as zero downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimateKind {
    Downloads,
    Revenue,
}

/// Typed projection of a raw record, prior to validation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedRecord {
    pub external_id: Option<String>,
    pub name: Option<String>,
    pub subtitle: Option<String>,
    pub developer: Option<String>,
    pub source_url: Option<String>,
    pub icon_url: Option<String>,
    pub category: Option<String>,
    pub list_type: Option<String>,

    /// Integer when the raw rank was integral or an integer string
    pub rank: Option<Value>,
    pub category_rank: Option<String>,
    pub price: Option<String>,
    pub has_in_app_purchases: bool,
    pub monthly_downloads_estimate: Option<f64>,
    pub monthly_revenue_estimate: Option<f64>,
    pub description: Option<String>,
    pub screenshots: Option<Value>,
    pub num_screenshots: i64,
    pub rating_summary: Option<String>,
    pub latest_version: Option<String>,
    pub latest_version_date: Option<NaiveDate>,
    pub labels: Option<Value>,
    pub reviews: Option<Value>,
    pub privacy_data: Option<Value>,
    pub general_info: Option<Value>,
}

/// Derives the external id from a source URL
///
/// The id is whatever follows the last occurrence of `marker`, without any
/// query string or fragment.
pub fn extract_external_id(url: &str, marker: &str) -> Option<String> {
    if marker.is_empty() {
        return None;
    }
    let (_, tail) = url.rsplit_once(marker)?;
    let id = tail
        .split(|c| c == '?' || c == '#' || c == '/')
        .next()
        .unwrap_or_default()
        .trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Parses an estimate such as `"$2M"`, `"20K"` or `"< $5K"`
///
/// # Returns
///
/// The estimate as a float; `0.0` for anything unparsable.
pub fn parse_estimate(value: &Value, kind: EstimateKind) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => parse_estimate_str(s, kind),
        _ => 0.0,
    }
}

pub fn parse_estimate_str(raw: &str, kind: EstimateKind) -> f64 {
    let trimmed = raw.trim();
    let below_bound = trimmed.starts_with('<');

    let mut cleaned: String = trimmed
        .chars()
        .filter(|c| !matches!(c, '<' | '$' | ',' | '~' | '+') && !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();

    let multiplier = match cleaned.chars().last() {
        Some('k') => 1e3,
        Some('m') => 1e6,
        _ => 1.0,
    };
    if multiplier != 1.0 {
        cleaned.pop();
    }

    let Ok(amount) = cleaned.parse::<f64>() else {
        return 0.0;
    };
    if !amount.is_finite() {
        return 0.0;
    }

    if below_bound && kind == EstimateKind::Downloads {
        return 0.0;
    }
    amount * multiplier
}

/// Parses a date in `format`; unparsable dates are `None`
pub fn parse_date(raw: &str, format: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), format).ok()
}

/// Integer-looking ranks become integers; anything else is left for
/// validation to reject
fn normalize_rank(rank: &Value) -> Option<Value> {
    match rank {
        Value::Null => None,
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(n) => Some(Value::from(n)),
            Err(_) if s.trim().is_empty() => None,
            Err(_) => Some(rank.clone()),
        },
        other => Some(other.clone()),
    }
}

/// True when the general info block lists in-app purchases
fn detect_in_app_purchases(general_info: Option<&Value>) -> bool {
    let Some(info) = general_info.map(parse_if_string) else {
        return false;
    };
    match info.get("In-App Purchases") {
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}

/// Maps a raw record onto canonical field names
pub fn normalize(raw: &RawRecord, settings: &IngestConfig) -> NormalizedRecord {
    let num_screenshots = raw
        .screenshots
        .as_ref()
        .and_then(Value::as_array)
        .map(|list| list.len() as i64)
        .unwrap_or(0);

    NormalizedRecord {
        external_id: raw
            .source_url
            .as_deref()
            .and_then(|url| extract_external_id(url, &settings.external_id_marker)),
        name: raw.name.clone(),
        subtitle: raw.subtitle.clone(),
        developer: raw.developer.clone(),
        source_url: raw.source_url.clone(),
        icon_url: raw.icon_url.clone(),
        category: raw.category.clone(),
        list_type: raw.list_type.clone(),
        rank: raw.rank.as_ref().and_then(normalize_rank),
        category_rank: raw.category_rank.clone(),
        price: raw.price.clone(),
        has_in_app_purchases: detect_in_app_purchases(raw.general_info.as_ref()),
        monthly_downloads_estimate: raw
            .monthly_downloads
            .as_ref()
            .map(|v| parse_estimate(v, EstimateKind::Downloads)),
        monthly_revenue_estimate: raw
            .monthly_revenue
            .as_ref()
            .map(|v| parse_estimate(v, EstimateKind::Revenue)),
        description: raw.description.clone(),
        screenshots: raw.screenshots.clone(),
        num_screenshots,
        rating_summary: raw.rating_summary.clone(),
        latest_version: raw.latest_version.clone(),
        latest_version_date: raw
            .latest_version_date
            .as_deref()
            .and_then(|d| parse_date(d, &settings.date_format)),
        labels: raw.labels.clone(),
        reviews: raw.reviews.clone(),
        privacy_data: raw.privacy_data.clone(),
        general_info: raw.general_info.clone(),
    }
}
