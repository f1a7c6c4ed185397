//! Per-run category progress
//!
//! Every category of a run is a row in `progress_categories`. A row with no
//! `completed_at` is *remaining*; a row with one is *completed*, so the two
//! sets are disjoint by construction.
//!
//! `mark_done` moves a category and checks for emptiness inside a single
//! `IMMEDIATE` transaction. The write lock is taken before anything is read,
//! so concurrent workers (threads or processes) serialize on it and exactly
//! one caller observes the transition to "nothing remaining".

use crate::storage::{lock, now, SharedConnection, StorageResult};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use std::collections::BTreeSet;
use std::fmt;

/// Per-category crawl stage; stages only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CategoryStage {
    Discovered,
    ListingsFetched,
    DetailsDispatched,
    Done,
}

impl CategoryStage {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::ListingsFetched => "listings_fetched",
            Self::DetailsDispatched => "details_dispatched",
            Self::Done => "done",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "discovered" => Some(Self::Discovered),
            "listings_fetched" => Some(Self::ListingsFetched),
            "details_dispatched" => Some(Self::DetailsDispatched),
            "done" => Some(Self::Done),
            _ => None,
        }
    }

    fn ordinal(&self) -> i64 {
        *self as i64
    }
}

impl fmt::Display for CategoryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

const STAGE_ORDINAL_SQL: &str = "CASE stage
    WHEN 'discovered' THEN 0
    WHEN 'listings_fetched' THEN 1
    WHEN 'details_dispatched' THEN 2
    ELSE 3 END";

/// Point-in-time view of a run's progress
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub run_id: i64,
    pub remaining: BTreeSet<String>,
    pub completed: BTreeSet<String>,
}

impl ProgressSnapshot {
    pub fn is_complete(&self) -> bool {
        self.remaining.is_empty()
    }
}

/// Durable, concurrency-safe record of category completion
#[derive(Clone)]
pub struct ProgressTracker {
    conn: SharedConnection,
}

impl ProgressTracker {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// Starts tracking a run
    ///
    /// Any progress previously recorded for `run_id` is discarded; every
    /// category starts out remaining.
    pub fn init_run(&self, run_id: i64, categories: &[String]) -> StorageResult<()> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM progress_categories WHERE run_id = ?1",
            params![run_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO progress_categories (run_id, category, stage, completed_at)
                 VALUES (?1, ?2, ?3, NULL)",
            )?;
            for category in categories {
                stmt.execute(params![
                    run_id,
                    category,
                    CategoryStage::Discovered.to_db_string()
                ])?;
            }
        }
        tx.commit()?;

        tracing::info!(
            "Tracking {} categories for run {}",
            categories.len(),
            run_id
        );
        Ok(())
    }

    /// Marks a category completed
    ///
    /// # Returns
    ///
    /// `true` only for the call that completed the last remaining category.
    /// Re-marking a completed category, or marking one the run does not
    /// track, changes nothing and returns `false`.
    pub fn mark_done(&self, run_id: i64, category: &str) -> StorageResult<bool> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let moved = tx.execute(
            "UPDATE progress_categories SET completed_at = ?1, stage = ?2
             WHERE run_id = ?3 AND category = ?4 AND completed_at IS NULL",
            params![now(), CategoryStage::Done.to_db_string(), run_id, category],
        )?;

        if moved == 0 {
            tx.commit()?;
            tracing::debug!("Category {} of run {} already done", category, run_id);
            return Ok(false);
        }

        let remaining: i64 = tx.query_row(
            "SELECT COUNT(*) FROM progress_categories WHERE run_id = ?1 AND completed_at IS NULL",
            params![run_id],
            |row| row.get(0),
        )?;
        tx.commit()?;

        tracing::info!(
            "Category {} done for run {} ({} remaining)",
            category,
            run_id,
            remaining
        );
        Ok(remaining == 0)
    }

    /// Moves a category forward to `stage`; earlier stages are ignored
    pub fn advance_stage(
        &self,
        run_id: i64,
        category: &str,
        stage: CategoryStage,
    ) -> StorageResult<()> {
        let conn = lock(&self.conn)?;
        conn.execute(
            &format!(
                "UPDATE progress_categories SET stage = ?1
                 WHERE run_id = ?2 AND category = ?3 AND completed_at IS NULL
                 AND ({}) < ?4",
                STAGE_ORDINAL_SQL
            ),
            params![stage.to_db_string(), run_id, category, stage.ordinal()],
        )?;
        Ok(())
    }

    /// Current stage of a category
    pub fn stage(&self, run_id: i64, category: &str) -> StorageResult<Option<CategoryStage>> {
        let conn = lock(&self.conn)?;
        let stage: Option<String> = conn
            .query_row(
                "SELECT stage FROM progress_categories WHERE run_id = ?1 AND category = ?2",
                params![run_id, category],
                |row| row.get(0),
            )
            .optional()?;
        Ok(stage.and_then(|s| CategoryStage::from_db_string(&s)))
    }

    /// Remaining and completed categories of a run; `None` if untracked
    pub fn snapshot(&self, run_id: i64) -> StorageResult<Option<ProgressSnapshot>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT category, completed_at IS NOT NULL FROM progress_categories WHERE run_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut snapshot = ProgressSnapshot {
            run_id,
            ..Default::default()
        };
        for (category, done) in rows {
            if done {
                snapshot.completed.insert(category);
            } else {
                snapshot.remaining.insert(category);
            }
        }
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{open_staging, staging_in_memory, SqliteStaging, StagingStore};
    use std::sync::{Arc, Barrier};

    fn setup() -> (ProgressTracker, i64) {
        let conn = staging_in_memory().unwrap();
        let run_id = SqliteStaging::new(conn.clone()).create_run("hash").unwrap();
        (ProgressTracker::new(conn), run_id)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_games_then_finance_completes_once() {
        let (tracker, run_id) = setup();
        tracker.init_run(run_id, &names(&["Games", "Finance"])).unwrap();

        let snapshot = tracker.snapshot(run_id).unwrap().unwrap();
        assert_eq!(snapshot.remaining.len(), 2);
        assert!(snapshot.completed.is_empty());

        assert!(!tracker.mark_done(run_id, "Games").unwrap());
        assert!(tracker.mark_done(run_id, "Finance").unwrap());

        let snapshot = tracker.snapshot(run_id).unwrap().unwrap();
        assert!(snapshot.is_complete());
        assert_eq!(snapshot.completed.len(), 2);
    }

    #[test]
    fn test_mark_done_is_idempotent() {
        let (tracker, run_id) = setup();
        tracker.init_run(run_id, &names(&["Games", "Finance"])).unwrap();

        assert!(!tracker.mark_done(run_id, "Games").unwrap());
        assert!(!tracker.mark_done(run_id, "Games").unwrap());
        assert!(tracker.mark_done(run_id, "Finance").unwrap());
        assert!(!tracker.mark_done(run_id, "Finance").unwrap());

        let snapshot = tracker.snapshot(run_id).unwrap().unwrap();
        assert!(snapshot.remaining.is_disjoint(&snapshot.completed));
    }

    #[test]
    fn test_unknown_category_is_a_no_op() {
        let (tracker, run_id) = setup();
        tracker.init_run(run_id, &names(&["Games"])).unwrap();
        assert!(!tracker.mark_done(run_id, "Weather").unwrap());
        assert_eq!(tracker.snapshot(run_id).unwrap().unwrap().remaining.len(), 1);
    }

    #[test]
    fn test_init_run_replaces_previous_progress() {
        let (tracker, run_id) = setup();
        tracker.init_run(run_id, &names(&["Games", "Finance"])).unwrap();
        tracker.mark_done(run_id, "Games").unwrap();

        tracker.init_run(run_id, &names(&["Music"])).unwrap();

        let snapshot = tracker.snapshot(run_id).unwrap().unwrap();
        assert_eq!(snapshot.remaining, ["Music".to_string()].into_iter().collect());
        assert!(snapshot.completed.is_empty());
    }

    #[test]
    fn test_untracked_run_has_no_snapshot() {
        let (tracker, _) = setup();
        assert!(tracker.snapshot(999).unwrap().is_none());
    }

    #[test]
    fn test_stage_never_regresses() {
        let (tracker, run_id) = setup();
        tracker.init_run(run_id, &names(&["Games"])).unwrap();

        tracker
            .advance_stage(run_id, "Games", CategoryStage::DetailsDispatched)
            .unwrap();
        tracker
            .advance_stage(run_id, "Games", CategoryStage::ListingsFetched)
            .unwrap();
        assert_eq!(
            tracker.stage(run_id, "Games").unwrap(),
            Some(CategoryStage::DetailsDispatched)
        );

        tracker.mark_done(run_id, "Games").unwrap();
        tracker
            .advance_stage(run_id, "Games", CategoryStage::ListingsFetched)
            .unwrap();
        assert_eq!(tracker.stage(run_id, "Games").unwrap(), Some(CategoryStage::Done));
    }

    #[test]
    fn test_concurrent_workers_observe_completion_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("staging.db");
        let conn = open_staging(&path).unwrap();
        let run_id = SqliteStaging::new(conn.clone()).create_run("hash").unwrap();

        let categories: Vec<String> = (0..16).map(|i| format!("Category {}", i)).collect();
        ProgressTracker::new(conn).init_run(run_id, &categories).unwrap();

        let barrier = Arc::new(Barrier::new(categories.len()));
        let handles: Vec<_> = categories
            .iter()
            .cloned()
            .map(|category| {
                let path = path.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    // Each worker has its own connection, like a separate process
                    let tracker = ProgressTracker::new(open_staging(&path).unwrap());
                    barrier.wait();
                    let first = tracker.mark_done(run_id, &category).unwrap();
                    let again = tracker.mark_done(run_id, &category).unwrap();
                    (first, again)
                })
            })
            .collect();

        let results: Vec<(bool, bool)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|(first, _)| *first).count(), 1);
        assert!(results.iter().all(|(_, again)| !again));
    }
}
