//! Integration tests for ingestion against on-disk databases

use chart_ripple::config::IngestConfig;
use chart_ripple::extract::{ListType, MetricsSnapshot, RawDetail, RawListing};
use chart_ripple::storage::{
    open_canonical, open_staging, AppFilter, CanonicalStore, SqliteCanonical, SqliteStaging,
    StagingStore,
};
use chart_ripple::Ingestor;
use std::path::PathBuf;
use tempfile::TempDir;

struct Databases {
    _dir: TempDir,
    staging: PathBuf,
    canonical: PathBuf,
}

fn databases() -> Databases {
    let dir = TempDir::new().unwrap();
    Databases {
        staging: dir.path().join("staging.db"),
        canonical: dir.path().join("canonical.db"),
        _dir: dir,
    }
}

/// Opens fresh connections, as a separate process would
fn open(dbs: &Databases) -> (SqliteStaging, SqliteCanonical, Ingestor) {
    let staging = SqliteStaging::new(open_staging(&dbs.staging).unwrap());
    let canonical = SqliteCanonical::new(open_canonical(&dbs.canonical).unwrap());
    let ingestor = Ingestor::new(staging.clone(), canonical.clone(), IngestConfig::default());
    (staging, canonical, ingestor)
}

fn source_url(id: u32) -> String {
    format!("https://apps.apple.com/us/app/app-{}/id{}", id, id)
}

fn stage(staging: &SqliteStaging, run_id: i64, category: &str, apps: &[(u32, &str)]) {
    let listings: Vec<RawListing> = apps
        .iter()
        .map(|(id, rank)| RawListing {
            category: category.to_string(),
            list_type: ListType::Free,
            rank: rank.to_string(),
            name: format!("App {}", id),
            developer: "Studio".to_string(),
            source_url: source_url(*id),
        })
        .collect();
    staging.stage_listings(run_id, &listings).unwrap();

    for (id, _) in apps {
        staging
            .stage_detail(&RawDetail {
                source_url: source_url(*id),
                title: Some(format!("App {}", id)),
                latest_version_date: Some("Jan 2, 2024".to_string()),
                screenshots: vec!["https://cdn.example.com/a.jpg".to_string()],
                ..Default::default()
            })
            .unwrap();
    }
}

#[test]
fn test_ingestion_persists_across_connections() {
    let dbs = databases();
    let run_id = {
        let (staging, _, ingestor) = open(&dbs);
        let run_id = staging.create_run("hash").unwrap();
        stage(&staging, run_id, "Games", &[(1, "1"), (2, "2")]);
        let report = ingestor.run(run_id, false).unwrap();
        assert_eq!(report.processed, 2);
        run_id
    };

    let (_, canonical, ingestor) = open(&dbs);
    let app = canonical.get("1").unwrap().unwrap();
    assert_eq!(app.rank, 1);
    assert_eq!(app.num_screenshots, 1);
    assert_eq!(
        app.latest_version_date.map(|d| d.to_string()).as_deref(),
        Some("2024-01-02")
    );

    // Re-running the same run changes nothing but last_seen
    let first_seen = app.first_seen.clone();
    let report = ingestor.run(run_id, false).unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.deactivated, 0);
    let again = canonical.get("1").unwrap().unwrap();
    assert_eq!(again.first_seen, first_seen);
    assert!(again.last_seen >= app.last_seen);
    assert_eq!(canonical.counts().unwrap().active, 2);
}

#[test]
fn test_metrics_staged_before_ingestion_merge_later() {
    let dbs = databases();
    let (staging, canonical, ingestor) = open(&dbs);
    let run_id = staging.create_run("hash").unwrap();
    stage(&staging, run_id, "Finance", &[(7, "1")]);

    staging
        .stage_metric(
            "7",
            &MetricsSnapshot {
                downloads: Some("10K".to_string()),
                revenue: Some("$1.5M".to_string()),
            },
        )
        .unwrap();

    // Nothing canonical yet: the metric stays pending
    let early = ingestor.run(run_id, true).unwrap();
    assert_eq!(early.metrics_unmatched, 1);
    assert_eq!(staging.counts().unwrap().unprocessed_metrics, 1);

    let full = ingestor.run(run_id, false).unwrap();
    assert_eq!(full.processed, 1);
    assert_eq!(full.metrics_merged, 1);

    let app = canonical.get("7").unwrap().unwrap();
    assert_eq!(app.monthly_downloads_estimate, Some(10_000.0));
    assert_eq!(app.monthly_revenue_estimate, Some(1_500_000.0));
    assert_eq!(staging.counts().unwrap().unprocessed_metrics, 0);

    // A later run without fresh metrics keeps the stored estimates
    let next = staging.create_run("hash").unwrap();
    stage(&staging, next, "Finance", &[(7, "2")]);
    ingestor.run(next, false).unwrap();
    let app = canonical.get("7").unwrap().unwrap();
    assert_eq!(app.rank, 2);
    assert_eq!(app.monthly_revenue_estimate, Some(1_500_000.0));
}

#[test]
fn test_staleness_is_scoped_to_the_latest_run() {
    let dbs = databases();
    let (staging, canonical, ingestor) = open(&dbs);

    let first = staging.create_run("hash").unwrap();
    stage(&staging, first, "Games", &[(1, "1"), (2, "2"), (3, "3")]);
    ingestor.run(first, false).unwrap();

    let second = staging.create_run("hash").unwrap();
    stage(&staging, second, "Games", &[(2, "1")]);
    let report = ingestor.run(second, false).unwrap();
    assert_eq!(report.deactivated, 2);

    let active = canonical
        .query(&AppFilter {
            active_only: true,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].external_id, "2");

    // Seen again: reactivated
    let third = staging.create_run("hash").unwrap();
    stage(&staging, third, "Games", &[(1, "1"), (2, "2")]);
    let report = ingestor.run(third, false).unwrap();
    assert_eq!(report.deactivated, 0);
    assert!(canonical.get("1").unwrap().unwrap().active);
    assert!(!canonical.get("3").unwrap().unwrap().active);
}

#[test]
fn test_run_without_details_deactivates_nothing() {
    let dbs = databases();
    let (staging, canonical, ingestor) = open(&dbs);

    let first = staging.create_run("hash").unwrap();
    stage(&staging, first, "Games", &[(1, "1")]);
    ingestor.run(first, false).unwrap();

    // Listings only, no details: nothing is ingested
    let second = staging.create_run("hash").unwrap();
    staging
        .stage_listings(
            second,
            &[RawListing {
                category: "Games".to_string(),
                list_type: ListType::Paid,
                rank: "1".to_string(),
                name: "New".to_string(),
                developer: "Studio".to_string(),
                source_url: source_url(99),
            }],
        )
        .unwrap();
    let report = ingestor.run(second, false).unwrap();

    assert_eq!(report.processed, 0);
    assert_eq!(report.skipped_missing_detail, 1);
    assert_eq!(report.deactivated, 0);
    assert!(canonical.get("1").unwrap().unwrap().active);
}
