//! Extraction collaborator
//!
//! The orchestrator never looks at markup itself; it hands fetched pages to an
//! `Extractor`. `AppStoreExtractor` is the built-in implementation for the App
//! Store chart and product pages; other sources plug in their own.

mod app_store;
mod types;

pub use app_store::AppStoreExtractor;
pub use types::{
    Category, ListLinks, ListType, MetricsSnapshot, RawDetail, RawListing, Review,
};

use crate::fetch::Page;
use thiserror::Error;

/// Errors raised while extracting records from a page
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    #[error("Missing {element} on {url}")]
    MissingElement { url: String, element: &'static str },

    #[error("Invalid link on {url}: {message}")]
    InvalidLink { url: String, message: String },
}

/// Turns fetched pages into raw records
pub trait Extractor: Send + Sync {
    /// Categories listed on the charts page
    fn categories(&self, page: &Page) -> Result<Vec<Category>, ExtractionError>;

    /// Top Free / Top Paid list pages of a category page
    fn list_links(&self, page: &Page) -> Result<ListLinks, ExtractionError>;

    /// Ranked listings of one list page, in page order
    fn listings(
        &self,
        page: &Page,
        category: &str,
        list_type: ListType,
    ) -> Result<Vec<RawListing>, ExtractionError>;

    /// Attribute bag of a detail page
    fn detail(&self, page: &Page) -> Result<RawDetail, ExtractionError>;

    /// Reviews from an item's reviews page
    fn reviews(&self, page: &Page) -> Result<Vec<Review>, ExtractionError>;

    /// Download and revenue estimates from a metrics page
    fn metrics(&self, page: &Page) -> Result<MetricsSnapshot, ExtractionError>;
}
