//! SQLite canonical store
//!
//! The `apps` table is keyed by external id. `active` and `last_seen` are
//! only ever written by ingestion.

use crate::storage::traits::{
    AppFilter, CanonicalAppRecord, CanonicalCounts, CanonicalStore, StorageResult,
};
use crate::storage::{lock, SharedConnection};
use chrono::NaiveDate;
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::collections::HashSet;

const DATE_FORMAT: &str = "%Y-%m-%d";

const SELECT_COLUMNS: &str = "external_id, name, subtitle, developer, category, list_type, rank,
    category_rank, price, rating, icon_url, source_url, description, screenshots,
    num_screenshots, has_in_app_purchases, latest_version, latest_version_date, reviews,
    privacy_data, general_info, labels, monthly_downloads_estimate, monthly_revenue_estimate,
    active, first_seen, last_seen";

/// SQLite canonical backend
#[derive(Clone)]
pub struct SqliteCanonical {
    conn: SharedConnection,
}

impl SqliteCanonical {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<CanonicalAppRecord> {
    let labels: Option<String> = row.get(21)?;
    let labels = match labels {
        Some(text) => Some(
            serde_json::from_str(&text)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(21, Type::Text, Box::new(e)))?,
        ),
        None => None,
    };
    let latest_version_date: Option<String> = row.get(17)?;

    Ok(CanonicalAppRecord {
        external_id: row.get(0)?,
        name: row.get(1)?,
        subtitle: row.get(2)?,
        developer: row.get(3)?,
        category: row.get(4)?,
        list_type: row.get(5)?,
        rank: row.get(6)?,
        category_rank: row.get(7)?,
        price: row.get(8)?,
        rating_summary: row.get(9)?,
        icon_url: row.get(10)?,
        source_url: row.get(11)?,
        description: row.get(12)?,
        screenshots: json_column(row, 13)?,
        num_screenshots: row.get(14)?,
        has_in_app_purchases: row.get(15)?,
        latest_version: row.get(16)?,
        latest_version_date: latest_version_date
            .and_then(|d| NaiveDate::parse_from_str(&d, DATE_FORMAT).ok()),
        reviews: json_column(row, 18)?,
        privacy_data: json_column(row, 19)?,
        general_info: json_column(row, 20)?,
        labels,
        monthly_downloads_estimate: row.get(22)?,
        monthly_revenue_estimate: row.get(23)?,
        active: row.get(24)?,
        first_seen: row.get(25)?,
        last_seen: row.get(26)?,
    })
}

impl CanonicalStore for SqliteCanonical {
    fn upsert(&self, record: &CanonicalAppRecord, seen_at: &str) -> StorageResult<()> {
        let screenshots = serde_json::to_string(&record.screenshots)?;
        let reviews = serde_json::to_string(&record.reviews)?;
        let privacy_data = serde_json::to_string(&record.privacy_data)?;
        let general_info = serde_json::to_string(&record.general_info)?;
        let labels = record
            .labels
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let latest_version_date = record
            .latest_version_date
            .map(|d| d.format(DATE_FORMAT).to_string());

        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO apps (
                external_id, name, subtitle, developer, category, list_type, rank,
                category_rank, price, rating, icon_url, source_url, description, screenshots,
                num_screenshots, has_in_app_purchases, latest_version, latest_version_date,
                reviews, privacy_data, general_info, labels, monthly_downloads_estimate,
                monthly_revenue_estimate, active, first_seen, last_seen
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                ?18, ?19, ?20, ?21, ?22, ?23, ?24, 1, ?25, ?25
            )
            ON CONFLICT(external_id) DO UPDATE SET
                name = excluded.name,
                subtitle = excluded.subtitle,
                developer = excluded.developer,
                category = excluded.category,
                list_type = excluded.list_type,
                rank = excluded.rank,
                category_rank = excluded.category_rank,
                price = excluded.price,
                rating = excluded.rating,
                icon_url = excluded.icon_url,
                source_url = excluded.source_url,
                description = excluded.description,
                screenshots = excluded.screenshots,
                num_screenshots = excluded.num_screenshots,
                has_in_app_purchases = excluded.has_in_app_purchases,
                latest_version = excluded.latest_version,
                latest_version_date = excluded.latest_version_date,
                reviews = excluded.reviews,
                privacy_data = excluded.privacy_data,
                general_info = excluded.general_info,
                labels = COALESCE(excluded.labels, apps.labels),
                monthly_downloads_estimate =
                    COALESCE(excluded.monthly_downloads_estimate, apps.monthly_downloads_estimate),
                monthly_revenue_estimate =
                    COALESCE(excluded.monthly_revenue_estimate, apps.monthly_revenue_estimate),
                active = 1,
                last_seen = MAX(apps.last_seen, excluded.last_seen)",
            params![
                record.external_id,
                record.name,
                record.subtitle,
                record.developer,
                record.category,
                record.list_type,
                record.rank,
                record.category_rank,
                record.price,
                record.rating_summary,
                record.icon_url,
                record.source_url,
                record.description,
                screenshots,
                record.num_screenshots,
                record.has_in_app_purchases,
                record.latest_version,
                latest_version_date,
                reviews,
                privacy_data,
                general_info,
                labels,
                record.monthly_downloads_estimate,
                record.monthly_revenue_estimate,
                seen_at,
            ],
        )?;
        Ok(())
    }

    fn deactivate_stale(&self, seen: &HashSet<String>) -> StorageResult<usize> {
        if seen.is_empty() {
            return Ok(0);
        }

        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        tx.execute_batch(
            "CREATE TEMP TABLE IF NOT EXISTS seen_ids (external_id TEXT PRIMARY KEY);
             DELETE FROM seen_ids;",
        )?;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO seen_ids (external_id) VALUES (?1)")?;
            for id in seen {
                stmt.execute(params![id])?;
            }
        }
        let deactivated = tx.execute(
            "UPDATE apps SET active = 0
             WHERE active = 1 AND external_id NOT IN (SELECT external_id FROM seen_ids)",
            [],
        )?;
        tx.execute("DELETE FROM seen_ids", [])?;
        tx.commit()?;

        Ok(deactivated)
    }

    fn apply_metrics(
        &self,
        external_id: &str,
        downloads: Option<f64>,
        revenue: Option<f64>,
    ) -> StorageResult<bool> {
        let conn = lock(&self.conn)?;
        let updated = conn.execute(
            "UPDATE apps SET
                monthly_downloads_estimate = COALESCE(?1, monthly_downloads_estimate),
                monthly_revenue_estimate = COALESCE(?2, monthly_revenue_estimate)
             WHERE external_id = ?3",
            params![downloads, revenue, external_id],
        )?;
        Ok(updated > 0)
    }

    fn get(&self, external_id: &str) -> StorageResult<Option<CanonicalAppRecord>> {
        let conn = lock(&self.conn)?;
        let record = conn
            .query_row(
                &format!("SELECT {} FROM apps WHERE external_id = ?1", SELECT_COLUMNS),
                params![external_id],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn query(&self, filter: &AppFilter) -> StorageResult<Vec<CanonicalAppRecord>> {
        let mut sql = format!("SELECT {} FROM apps WHERE 1 = 1", SELECT_COLUMNS);
        let mut args: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(category) = &filter.category {
            args.push(Box::new(category.clone()));
            sql.push_str(&format!(" AND category = ?{}", args.len()));
        }
        if filter.active_only {
            sql.push_str(" AND active = 1");
        }
        sql.push_str(" ORDER BY category, rank, external_id");
        if let Some(limit) = filter.limit {
            args.push(Box::new(limit as i64));
            sql.push_str(&format!(" LIMIT ?{}", args.len()));
        }

        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                record_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn counts(&self) -> StorageResult<CanonicalCounts> {
        let conn = lock(&self.conn)?;
        let (active, inactive): (i64, i64) = conn.query_row(
            "SELECT COALESCE(SUM(active = 1), 0), COALESCE(SUM(active = 0), 0) FROM apps",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(CanonicalCounts {
            active: active as u64,
            inactive: inactive as u64,
        })
    }
}
