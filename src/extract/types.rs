//! Raw crawl records produced by extraction and written to staging

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A catalog section whose listings are crawled independently
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub source_url: String,
}

/// Which ranked list a listing came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListType {
    Free,
    Paid,
}

impl ListType {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Paid => "paid",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "free" => Some(Self::Free),
            "paid" => Some(Self::Paid),
            _ => None,
        }
    }
}

impl fmt::Display for ListType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => write!(f, "Top Free"),
            Self::Paid => write!(f, "Top Paid"),
        }
    }
}

/// Top Free / Top Paid list pages found on a category page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListLinks {
    pub free: Option<String>,
    pub paid: Option<String>,
}

impl ListLinks {
    /// Present list pages, in a stable order
    pub fn present(&self) -> Vec<(ListType, String)> {
        let mut lists = Vec::new();
        if let Some(url) = &self.free {
            lists.push((ListType::Free, url.clone()));
        }
        if let Some(url) = &self.paid {
            lists.push((ListType::Paid, url.clone()));
        }
        lists
    }
}

/// One ranked entry of a category list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawListing {
    pub category: String,
    pub list_type: ListType,
    /// Rank as printed on the page; may be a placeholder
    pub rank: String,
    pub name: String,
    pub developer: String,
    pub source_url: String,
}

/// A customer review
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub rating: Option<String>,
    pub author: Option<String>,
    pub date: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
}

/// Attribute bag scraped from an item's detail page, keyed by `source_url`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDetail {
    pub source_url: String,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub developer: Option<String>,
    pub category_rank: Option<String>,
    pub rating: Option<String>,
    pub price: Option<String>,
    pub icon_url: Option<String>,
    #[serde(default)]
    pub screenshots: Vec<String>,
    pub description: Option<String>,
    pub latest_version: Option<String>,
    pub latest_version_date: Option<String>,
    #[serde(default)]
    pub reviews: Vec<Review>,
    #[serde(default)]
    pub privacy_categories: Vec<String>,
    #[serde(default)]
    pub general_info: BTreeMap<String, String>,
}

/// The two scalar fields read from a metrics page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub downloads: Option<String>,
    pub revenue: Option<String>,
}
