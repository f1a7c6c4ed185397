//! HTML extraction for App Store chart, product, review and metrics pages
//!
//! Selector rules mirror the public page markup:
//!
//! | Record | Selector |
//! |--------|----------|
//! | Category | `a.we-genre-filter__item` |
//! | List link | `a.section__headline-link` whose `h2.section__headline` says "Top Free Apps" / "Top Paid Apps" |
//! | Listing | `li.l-column--grid` (rank, title, subtitle, lockup link) |
//! | Detail | `.product-header__*`, `.section__description p`, `.whats-new__latest*`, `.information-list__item` |
//! | Review | `.we-customer-review` |
//! | Metrics | the `span` two siblings after the downloads / revenue KPI headings |

use crate::extract::{
    Category, ExtractionError, Extractor, ListLinks, ListType, MetricsSnapshot, RawDetail,
    RawListing, Review,
};
use crate::fetch::Page;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use url::Url;

const UNKNOWN_RANK: &str = "Unknown Rank";
const UNKNOWN_TITLE: &str = "Unknown Title";
const UNKNOWN_DEVELOPER: &str = "Unknown Developer";

/// Extractor for App Store markup
#[derive(Debug, Clone)]
pub struct AppStoreExtractor {
    downloads_selector: String,
    revenue_selector: String,
}

impl Default for AppStoreExtractor {
    fn default() -> Self {
        Self {
            downloads_selector: "h4#app-overview-unified-kpi-downloads + p + span".to_string(),
            revenue_selector: "h4#app-overview-unified-kpi-revenue + p + span".to_string(),
        }
    }
}

impl AppStoreExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the selectors of the two metrics fields
    pub fn with_metrics_selectors(mut self, downloads: &str, revenue: &str) -> Self {
        self.downloads_selector = downloads.to_string();
        self.revenue_selector = revenue.to_string();
        self
    }
}

fn selector(css: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(css).map_err(|e| ExtractionError::Selector {
        selector: css.to_string(),
        message: e.to_string(),
    })
}

/// Trimmed text of an element with non-breaking spaces flattened
fn text_of(element: ElementRef) -> String {
    element
        .text()
        .collect::<String>()
        .replace('\u{a0}', " ")
        .trim()
        .to_string()
}

fn first_text(scope: ElementRef, css: &str) -> Result<Option<String>, ExtractionError> {
    let sel = selector(css)?;
    Ok(scope
        .select(&sel)
        .next()
        .map(text_of)
        .filter(|s| !s.is_empty()))
}

fn resolve(page: &Page, href: &str) -> Result<String, ExtractionError> {
    let base = Url::parse(&page.final_url).map_err(|e| ExtractionError::InvalidLink {
        url: page.url.clone(),
        message: e.to_string(),
    })?;
    base.join(href)
        .map(|u| u.to_string())
        .map_err(|e| ExtractionError::InvalidLink {
            url: page.url.clone(),
            message: format!("{}: {}", href, e),
        })
}

/// Largest candidate of a `srcset` attribute (the last listed one)
fn best_srcset_candidate(srcset: &str) -> Option<String> {
    srcset
        .split(',')
        .last()
        .and_then(|candidate| candidate.trim().split(' ').next())
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

impl Extractor for AppStoreExtractor {
    fn categories(&self, page: &Page) -> Result<Vec<Category>, ExtractionError> {
        let document = Html::parse_document(&page.body);
        let sel = selector("a.we-genre-filter__item")?;

        let mut categories = Vec::new();
        for element in document.select(&sel) {
            let name = text_of(element);
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            let source_url = resolve(page, href)?;
            if categories.iter().any(|c: &Category| c.name == name) {
                continue;
            }
            categories.push(Category { name, source_url });
        }

        Ok(categories)
    }

    fn list_links(&self, page: &Page) -> Result<ListLinks, ExtractionError> {
        let document = Html::parse_document(&page.body);
        let link_sel = selector("a.section__headline-link")?;
        let headline_sel = selector("h2.section__headline")?;

        let mut links = ListLinks::default();
        for link in document.select(&link_sel) {
            let Some(headline) = link.select(&headline_sel).next() else {
                continue;
            };
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let headline = text_of(headline);
            if headline.contains("Top Free Apps") && links.free.is_none() {
                links.free = Some(resolve(page, href)?);
            } else if headline.contains("Top Paid Apps") && links.paid.is_none() {
                links.paid = Some(resolve(page, href)?);
            }
        }

        Ok(links)
    }

    fn listings(
        &self,
        page: &Page,
        category: &str,
        list_type: ListType,
    ) -> Result<Vec<RawListing>, ExtractionError> {
        let document = Html::parse_document(&page.body);
        let item_sel = selector("li.l-column--grid")?;
        let link_sel = selector("a.we-lockup")?;

        let mut listings = Vec::new();
        for item in document.select(&item_sel) {
            let Some(href) = item
                .select(&link_sel)
                .next()
                .and_then(|link| link.value().attr("href"))
            else {
                tracing::debug!("Listing without a link on {}", page.url);
                continue;
            };

            listings.push(RawListing {
                category: category.to_string(),
                list_type,
                rank: first_text(item, "p.we-lockup__rank")?
                    .unwrap_or_else(|| UNKNOWN_RANK.to_string()),
                name: first_text(item, "div.we-lockup__title")?
                    .unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
                developer: first_text(item, "div.we-lockup__subtitle")?
                    .unwrap_or_else(|| UNKNOWN_DEVELOPER.to_string()),
                source_url: resolve(page, href)?,
            });
        }

        Ok(listings)
    }

    fn detail(&self, page: &Page) -> Result<RawDetail, ExtractionError> {
        let document = Html::parse_document(&page.body);
        let root = document.root_element();

        let title = first_text(root, "h1.product-header__title")?;
        if title.is_none() {
            return Err(ExtractionError::MissingElement {
                url: page.url.clone(),
                element: "product title",
            });
        }

        let mut screenshots = Vec::new();
        let picture_sel = selector("picture.we-artwork")?;
        let source_sel = selector("source")?;
        for picture in root.select(&picture_sel) {
            let best = picture
                .select(&source_sel)
                .filter_map(|source| source.value().attr("srcset"))
                .filter_map(best_srcset_candidate)
                .last();
            if let Some(url) = best {
                screenshots.push(url);
            }
        }

        let privacy_sel = selector(".privacy-type__data-category-heading")?;
        let privacy_categories = root
            .select(&privacy_sel)
            .map(text_of)
            .filter(|s| !s.is_empty())
            .collect();

        let mut general_info = BTreeMap::new();
        let info_sel = selector(".information-list__item")?;
        let dt_sel = selector("dt")?;
        let dd_sel = selector("dd")?;
        for item in root.select(&info_sel) {
            if let (Some(key), Some(value)) =
                (item.select(&dt_sel).next(), item.select(&dd_sel).next())
            {
                general_info.insert(text_of(key), text_of(value));
            }
        }

        let icon_sel = selector(r#"meta[property="og:image"]"#)?;
        let icon_url = root
            .select(&icon_sel)
            .next()
            .and_then(|meta| meta.value().attr("content"))
            .map(str::to_string);

        Ok(RawDetail {
            source_url: page.url.clone(),
            title,
            subtitle: first_text(root, "h2.product-header__subtitle")?,
            developer: first_text(root, "h2.product-header__identity")?,
            category_rank: first_text(root, ".product-header__list__item a")?,
            rating: first_text(root, ".we-rating-count.star-rating__count")?,
            price: first_text(root, ".inline-list__item--bulleted")?,
            icon_url,
            screenshots,
            description: first_text(root, ".section__description p")?,
            latest_version: first_text(root, ".whats-new__latest__version")?,
            latest_version_date: first_text(root, ".whats-new__latest time")?,
            reviews: Vec::new(),
            privacy_categories,
            general_info,
        })
    }

    fn reviews(&self, page: &Page) -> Result<Vec<Review>, ExtractionError> {
        let document = Html::parse_document(&page.body);
        let review_sel = selector(".we-customer-review")?;
        let stars_sel = selector(".we-star-rating")?;

        let mut reviews = Vec::new();
        for review in document.select(&review_sel) {
            reviews.push(Review {
                rating: review
                    .select(&stars_sel)
                    .next()
                    .and_then(|stars| stars.value().attr("aria-label"))
                    .map(str::to_string),
                author: first_text(review, ".we-customer-review__user")?,
                date: first_text(review, ".we-customer-review__date")?,
                title: first_text(review, ".we-customer-review__title")?,
                body: first_text(review, ".we-customer-review__body p")?,
            });
        }

        Ok(reviews)
    }

    fn metrics(&self, page: &Page) -> Result<MetricsSnapshot, ExtractionError> {
        let document = Html::parse_document(&page.body);
        let root = document.root_element();

        let snapshot = MetricsSnapshot {
            downloads: first_text(root, &self.downloads_selector)?,
            revenue: first_text(root, &self.revenue_selector)?,
        };
        // Typically a login wall after the session expired
        if snapshot.downloads.is_none() && snapshot.revenue.is_none() {
            return Err(ExtractionError::MissingElement {
                url: page.url.clone(),
                element: "metrics figures",
            });
        }
        Ok(snapshot)
    }
}
