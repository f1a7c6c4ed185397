//! SQLite staging store
//!
//! Holds the raw output of every crawl stage until ingestion reconciles it.

use crate::extract::{Category, ListType, MetricsSnapshot, RawDetail, RawListing};
use crate::storage::traits::{StagedMetric, StagingCounts, StagingStore, StorageError, StorageResult};
use crate::storage::{lock, now, RunRecord, RunStatus, SharedConnection};
use rusqlite::{params, OptionalExtension, Row};

/// SQLite staging backend
#[derive(Clone)]
pub struct SqliteStaging {
    conn: SharedConnection,
}

impl SqliteStaging {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &SharedConnection {
        &self.conn
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?).unwrap_or(RunStatus::Running),
    })
}

fn count(conn: &rusqlite::Connection, sql: &str) -> StorageResult<u64> {
    let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(n as u64)
}

impl StagingStore for SqliteStaging {
    // ===== Run Management =====

    fn create_run(&self, config_hash: &str) -> StorageResult<i64> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now(), config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let conn = lock(&self.conn)?;
        conn.query_row(
            "SELECT id, started_at, finished_at, config_hash, status FROM runs WHERE id = ?1",
            params![run_id],
            run_from_row,
        )
        .optional()?
        .ok_or_else(|| StorageError::NotFound(format!("run {}", run_id)))
    }

    fn latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let conn = lock(&self.conn)?;
        let run = conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs ORDER BY id DESC LIMIT 1",
                [],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    fn set_run_status(&self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let conn = lock(&self.conn)?;
        let finished_at = match status {
            RunStatus::Running => None,
            RunStatus::Completed | RunStatus::Failed => Some(now()),
        };
        conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), finished_at, run_id],
        )?;
        Ok(())
    }

    // ===== Raw crawl output =====

    fn stage_categories(&self, run_id: i64, categories: &[Category]) -> StorageResult<()> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO categories (run_id, name, source_url, discovered_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(run_id, name) DO UPDATE SET source_url = excluded.source_url",
            )?;
            let staged_at = now();
            for category in categories {
                stmt.execute(params![run_id, category.name, category.source_url, staged_at])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn categories(&self, run_id: i64) -> StorageResult<Vec<Category>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT name, source_url FROM categories WHERE run_id = ?1 ORDER BY rowid",
        )?;
        let categories = stmt
            .query_map(params![run_id], |row| {
                Ok(Category {
                    name: row.get(0)?,
                    source_url: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(categories)
    }

    fn stage_listings(&self, run_id: i64, listings: &[RawListing]) -> StorageResult<usize> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO raw_listings
                 (run_id, category, list_type, rank, name, developer, source_url, staged_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            let staged_at = now();
            for listing in listings {
                inserted += stmt.execute(params![
                    run_id,
                    listing.category,
                    listing.list_type.to_db_string(),
                    listing.rank,
                    listing.name,
                    listing.developer,
                    listing.source_url,
                    staged_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn listings(&self, run_id: i64) -> StorageResult<Vec<RawListing>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT category, list_type, rank, name, developer, source_url
             FROM raw_listings WHERE run_id = ?1 ORDER BY id",
        )?;
        let listings = stmt
            .query_map(params![run_id], |row| {
                let list_type: String = row.get(1)?;
                Ok(RawListing {
                    category: row.get(0)?,
                    list_type: ListType::from_db_string(&list_type).unwrap_or(ListType::Free),
                    rank: row.get(2)?,
                    name: row.get(3)?,
                    developer: row.get(4)?,
                    source_url: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(listings)
    }

    fn listing_urls(&self, run_id: i64) -> StorageResult<Vec<String>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT source_url FROM raw_listings WHERE run_id = ?1
             GROUP BY source_url ORDER BY MIN(id)",
        )?;
        let urls = stmt
            .query_map(params![run_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(urls)
    }

    fn stage_detail(&self, detail: &RawDetail) -> StorageResult<()> {
        let document = serde_json::to_string(detail)?;
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO raw_details (source_url, document, staged_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(source_url) DO UPDATE SET
                document = excluded.document,
                staged_at = excluded.staged_at",
            params![detail.source_url, document, now()],
        )?;
        Ok(())
    }

    fn detail_document(&self, source_url: &str) -> StorageResult<Option<serde_json::Value>> {
        let document: Option<String> = {
            let conn = lock(&self.conn)?;
            conn.query_row(
                "SELECT document FROM raw_details WHERE source_url = ?1",
                params![source_url],
                |row| row.get(0),
            )
            .optional()?
        };
        match document {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    fn stage_metric(&self, external_id: &str, snapshot: &MetricsSnapshot) -> StorageResult<()> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO raw_metrics (external_id, downloads, revenue, processed, staged_at)
             VALUES (?1, ?2, ?3, 0, ?4)
             ON CONFLICT(external_id) DO UPDATE SET
                downloads = excluded.downloads,
                revenue = excluded.revenue,
                processed = 0,
                version = raw_metrics.version + 1,
                staged_at = excluded.staged_at",
            params![external_id, snapshot.downloads, snapshot.revenue, now()],
        )?;
        Ok(())
    }

    fn unprocessed_metrics(&self) -> StorageResult<Vec<StagedMetric>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT external_id, downloads, revenue, processed, version FROM raw_metrics
             WHERE processed = 0 ORDER BY staged_at, external_id",
        )?;
        let metrics = stmt
            .query_map([], |row| {
                Ok(StagedMetric {
                    external_id: row.get(0)?,
                    downloads: row.get(1)?,
                    revenue: row.get(2)?,
                    processed: row.get::<_, i64>(3)? != 0,
                    version: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(metrics)
    }

    fn mark_metric_processed(&self, external_id: &str, version: i64) -> StorageResult<bool> {
        let conn = lock(&self.conn)?;
        let updated = conn.execute(
            "UPDATE raw_metrics SET processed = 1 WHERE external_id = ?1 AND version = ?2",
            params![external_id, version],
        )?;
        Ok(updated > 0)
    }

    // ===== Statistics =====

    fn counts(&self) -> StorageResult<StagingCounts> {
        let conn = lock(&self.conn)?;
        Ok(StagingCounts {
            runs: count(&conn, "SELECT COUNT(*) FROM runs")?,
            listings: count(&conn, "SELECT COUNT(*) FROM raw_listings")?,
            details: count(&conn, "SELECT COUNT(*) FROM raw_details")?,
            metrics: count(&conn, "SELECT COUNT(*) FROM raw_metrics")?,
            unprocessed_metrics: count(&conn, "SELECT COUNT(*) FROM raw_metrics WHERE processed = 0")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::staging_in_memory;

    fn create_staging() -> SqliteStaging {
        SqliteStaging::new(staging_in_memory().unwrap())
    }

    fn listing(category: &str, rank: &str, url: &str) -> RawListing {
        RawListing {
            category: category.to_string(),
            list_type: ListType::Free,
            rank: rank.to_string(),
            name: format!("App {}", rank),
            developer: "Dev".to_string(),
            source_url: url.to_string(),
        }
    }

    #[test]
    fn test_create_and_complete_run() {
        let staging = create_staging();
        let run_id = staging.create_run("abc").unwrap();
        assert!(run_id > 0);

        staging.set_run_status(run_id, RunStatus::Completed).unwrap();
        let run = staging.get_run(run_id).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.finished_at.is_some());
        assert_eq!(staging.latest_run().unwrap().unwrap().id, run_id);
    }

    #[test]
    fn test_missing_run_is_not_found() {
        let staging = create_staging();
        assert!(matches!(staging.get_run(42), Err(StorageError::NotFound(_))));
        assert!(staging.latest_run().unwrap().is_none());
    }

    #[test]
    fn test_stage_categories_upserts_by_name() {
        let staging = create_staging();
        let run_id = staging.create_run("abc").unwrap();
        let games = Category {
            name: "Games".to_string(),
            source_url: "https://example.com/games".to_string(),
        };

        staging.stage_categories(run_id, &[games.clone()]).unwrap();
        staging.stage_categories(run_id, &[games.clone()]).unwrap();

        assert_eq!(staging.categories(run_id).unwrap(), vec![games]);
    }

    #[test]
    fn test_redelivered_listings_are_not_duplicated() {
        let staging = create_staging();
        let run_id = staging.create_run("abc").unwrap();
        let batch = vec![
            listing("Games", "1", "https://example.com/id1"),
            listing("Games", "2", "https://example.com/id2"),
        ];

        assert_eq!(staging.stage_listings(run_id, &batch).unwrap(), 2);
        assert_eq!(staging.stage_listings(run_id, &batch).unwrap(), 0);
        assert_eq!(staging.listings(run_id).unwrap().len(), 2);
        assert_eq!(
            staging.listing_urls(run_id).unwrap(),
            vec!["https://example.com/id1", "https://example.com/id2"]
        );
    }

    #[test]
    fn test_detail_upsert_replaces_document() {
        let staging = create_staging();
        let mut detail = RawDetail {
            source_url: "https://example.com/id1".to_string(),
            title: Some("First".to_string()),
            ..Default::default()
        };
        staging.stage_detail(&detail).unwrap();
        detail.title = Some("Second".to_string());
        staging.stage_detail(&detail).unwrap();

        let document = staging
            .detail_document("https://example.com/id1")
            .unwrap()
            .unwrap();
        assert_eq!(document["title"], "Second");
        assert_eq!(staging.counts().unwrap().details, 1);
        assert!(staging.detail_document("https://example.com/none").unwrap().is_none());
    }

    #[test]
    fn test_restaging_metric_resets_processed() {
        let staging = create_staging();
        let snapshot = MetricsSnapshot {
            downloads: Some("20K".to_string()),
            revenue: Some("$2M".to_string()),
        };

        staging.stage_metric("111", &snapshot).unwrap();
        let staged = staging.unprocessed_metrics().unwrap();
        assert!(staging
            .mark_metric_processed("111", staged[0].version)
            .unwrap());
        assert!(staging.unprocessed_metrics().unwrap().is_empty());

        staging.stage_metric("111", &snapshot).unwrap();
        let pending = staging.unprocessed_metrics().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].revenue.as_deref(), Some("$2M"));
        assert!(!pending[0].processed);
    }

    #[test]
    fn test_restage_during_merge_stays_pending() {
        let staging = create_staging();
        let first = MetricsSnapshot {
            downloads: Some("20K".to_string()),
            revenue: Some("$2M".to_string()),
        };
        staging.stage_metric("111", &first).unwrap();
        let read = staging.unprocessed_metrics().unwrap().remove(0);

        // A newer snapshot lands before the merge of the old one finishes
        let second = MetricsSnapshot {
            downloads: Some("30K".to_string()),
            revenue: Some("$3M".to_string()),
        };
        staging.stage_metric("111", &second).unwrap();

        assert!(!staging.mark_metric_processed("111", read.version).unwrap());
        let pending = staging.unprocessed_metrics().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].downloads.as_deref(), Some("30K"));
        assert!(pending[0].version > read.version);
    }
}
