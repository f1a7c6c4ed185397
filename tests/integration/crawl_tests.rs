//! Integration tests for the crawl pipeline
//!
//! These tests use wiremock to stand in for the catalog and metrics sites
//! and drive a full run through the task queue and worker pool.

use chart_ripple::config::{
    Config, CrawlConfig, FetchConfig, IngestConfig, MetricsConfig, StorageConfig,
};
use chart_ripple::queue::{SqliteTaskQueue, TaskQueue};
use chart_ripple::storage::{
    open_canonical, open_staging, AppFilter, CanonicalStore, RunStatus, SharedConnection,
    SqliteCanonical, StagingStore,
};
use chart_ripple::{Orchestrator, WorkerPool};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a fast test configuration pointed at the mock server
fn create_test_config(base_url: &str, dir: &TempDir, metrics: bool) -> Config {
    Config {
        fetch: FetchConfig {
            max_threads: 4,
            max_retries: 3,
            request_delay_range: [0.0, 0.0],
            backoff_base_ms: 1,
            request_timeout_secs: 5,
            user_agents: vec!["TestAgent/1.0".to_string()],
        },
        crawl: CrawlConfig {
            categories_url: format!("{}/charts", base_url),
            listing_cap: 100,
            detail_batches_per_hour: 3600,
            fetch_reviews: false,
            workers: 2,
            max_deliveries: 3,
            lease_secs: 60,
            poll_interval_ms: 10,
        },
        ingest: IngestConfig::default(),
        metrics: MetricsConfig {
            enabled: metrics,
            url_template: format!("{}/overview/{{id}}", base_url),
            max_attempts: 2,
            backoff_secs: 0,
            session_cookie: Some("session=abc".to_string()),
        },
        storage: StorageConfig {
            staging_path: dir.path().join("staging.db").display().to_string(),
            canonical_path: dir.path().join("canonical.db").display().to_string(),
        },
    }
}

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(body)
        .insert_header("content-type", "text/html")
}

async fn mount_html(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(html(body))
        .mount(server)
        .await;
}

fn charts_page(categories: &[(&str, &str)]) -> String {
    let links: String = categories
        .iter()
        .map(|(name, href)| {
            format!(
                r#"<a class="we-genre-filter__item" href="{}">{}</a>"#,
                href, name
            )
        })
        .collect();
    format!("<html><body><nav>{}</nav></body></html>", links)
}

fn category_page(free: &str, paid: Option<&str>) -> String {
    let mut body = format!(
        r#"<a class="section__headline-link" href="{}"><h2 class="section__headline">Top Free Apps</h2></a>"#,
        free
    );
    if let Some(paid) = paid {
        body.push_str(&format!(
            r#"<a class="section__headline-link" href="{}"><h2 class="section__headline">Top Paid Apps</h2></a>"#,
            paid
        ));
    }
    format!("<html><body>{}</body></html>", body)
}

fn list_page(apps: &[(u32, &str)]) -> String {
    let items: String = apps
        .iter()
        .enumerate()
        .map(|(index, (id, name))| {
            format!(
                r#"<li class="l-column--grid"><a class="we-lockup" href="/us/app/{name}/id{id}">
                    <p class="we-lockup__rank">{rank}</p>
                    <div class="we-lockup__title">{name}</div>
                    <div class="we-lockup__subtitle">{name} Inc</div></a></li>"#,
                name = name,
                id = id,
                rank = index + 1
            )
        })
        .collect();
    format!("<html><body><ol>{}</ol></body></html>", items)
}

fn detail_page(name: &str) -> String {
    format!(
        r#"<html><head><meta property="og:image" content="https://cdn.example.com/{name}.png"></head><body>
            <h1 class="product-header__title">{name}</h1>
            <h2 class="product-header__identity">{name} Inc</h2>
            <div class="section__description"><p>All about   {name}</p></div>
            <div class="whats-new__latest"><time>Mar 5, 2024</time></div>
            <dl><div class="information-list__item"><dt>In-App Purchases</dt><dd>Coins $0.99</dd></div></dl>
        </body></html>"#,
        name = name
    )
}

fn metrics_page(downloads: &str, revenue: &str) -> String {
    format!(
        r#"<html><body>
            <h4 id="app-overview-unified-kpi-downloads">Downloads</h4><p>last month</p><span>{}</span>
            <h4 id="app-overview-unified-kpi-revenue">Revenue</h4><p>last month</p><span>{}</span>
        </body></html>"#,
        downloads, revenue
    )
}

/// Mounts a two-category catalog: Games (free + paid) and Finance (free only)
async fn mount_catalog(server: &MockServer) {
    mount_html(
        server,
        "/charts",
        charts_page(&[("Games", "/charts/games"), ("Finance", "/charts/finance")]),
    )
    .await;

    mount_html(
        server,
        "/charts/games",
        category_page("/charts/games/free", Some("/charts/games/paid")),
    )
    .await;
    mount_html(
        server,
        "/charts/games/free",
        list_page(&[(101, "puzzle"), (102, "racer")]),
    )
    .await;
    mount_html(server, "/charts/games/paid", list_page(&[(103, "chess")])).await;

    mount_html(server, "/charts/finance", category_page("/charts/finance/free", None)).await;
    mount_html(server, "/charts/finance/free", list_page(&[(201, "budget")])).await;

    for (id, name) in [(101, "puzzle"), (102, "racer"), (103, "chess"), (201, "budget")] {
        mount_html(server, &format!("/us/app/{}/id{}", name, id), detail_page(name)).await;
    }
}

struct Harness {
    staging: SharedConnection,
    canonical: SqliteCanonical,
    queue: Arc<dyn TaskQueue>,
    orchestrator: Arc<Orchestrator>,
}

fn harness(config: Config) -> Harness {
    let staging = open_staging(std::path::Path::new(&config.storage.staging_path)).unwrap();
    let canonical = open_canonical(std::path::Path::new(&config.storage.canonical_path)).unwrap();
    let queue: Arc<dyn TaskQueue> = Arc::new(SqliteTaskQueue::new(
        staging.clone(),
        Duration::from_secs(config.crawl.lease_secs),
        config.crawl.max_deliveries,
    ));
    let orchestrator =
        Arc::new(Orchestrator::new(config, staging.clone(), canonical.clone()).unwrap());
    Harness {
        staging,
        canonical: SqliteCanonical::new(canonical),
        queue,
        orchestrator,
    }
}

impl Harness {
    async fn crawl(&self) -> i64 {
        let (run_id, task) = self.orchestrator.start_run("test-hash").unwrap();
        self.queue.enqueue(&task).unwrap();
        WorkerPool::new(Arc::clone(&self.orchestrator), Arc::clone(&self.queue))
            .run_until_idle()
            .await
            .unwrap();
        run_id
    }

    fn tasks_of_kind(&self, kind: &str, payload_like: &str) -> i64 {
        let conn = self.staging.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE kind = ?1 AND payload LIKE ?2",
            rusqlite::params![kind, payload_like],
            |row| row.get(0),
        )
        .unwrap()
    }
}

#[tokio::test]
async fn test_full_crawl_reaches_canonical_store() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_catalog(&server).await;

    let h = harness(create_test_config(&server.uri(), &dir, false));
    let run_id = h.crawl().await;

    let run = h.orchestrator.staging().get_run(run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.finished_at.is_some());

    let snapshot = h.orchestrator.progress().snapshot(run_id).unwrap().unwrap();
    assert!(snapshot.is_complete());
    assert_eq!(snapshot.completed.len(), 2);

    // Completion fired exactly once
    assert_eq!(
        h.tasks_of_kind("run_ingestion", "%\"metrics_only\":false%"),
        1
    );
    assert_eq!(h.tasks_of_kind("scrape_metrics", "%"), 0);

    let counts = h.queue.counts().unwrap();
    assert!(counts.is_idle());
    assert_eq!(counts.dead, 0);

    let apps = h.canonical.query(&AppFilter::default()).unwrap();
    assert_eq!(apps.len(), 4);

    let puzzle = h.canonical.get("101").unwrap().unwrap();
    assert_eq!(puzzle.name, "puzzle");
    assert_eq!(puzzle.category, "Games");
    assert_eq!(puzzle.rank, 1);
    assert_eq!(puzzle.description.as_deref(), Some("All about puzzle"));
    assert!(puzzle.has_in_app_purchases);
    assert!(puzzle.active);

    let chess = h.canonical.get("103").unwrap().unwrap();
    assert_eq!(chess.list_type.as_deref(), Some("paid"));
}

#[tokio::test]
async fn test_crawl_with_metrics_enrichment() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_catalog(&server).await;

    mount_html(&server, "/overview/101", metrics_page("50K", "$2M")).await;
    mount_html(&server, "/overview/102", metrics_page("< 5K", "< $5K")).await;
    mount_html(&server, "/overview/103", metrics_page("1,200", "$300")).await;
    Mock::given(method("GET"))
        .and(path("/overview/201"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let h = harness(create_test_config(&server.uri(), &dir, true));
    let run_id = h.crawl().await;

    assert_eq!(h.tasks_of_kind("scrape_metrics", "%"), 1);
    assert_eq!(
        h.tasks_of_kind("run_ingestion", "%\"metrics_only\":true%"),
        1
    );

    let puzzle = h.canonical.get("101").unwrap().unwrap();
    assert_eq!(puzzle.monthly_downloads_estimate, Some(50_000.0));
    assert_eq!(puzzle.monthly_revenue_estimate, Some(2_000_000.0));

    let racer = h.canonical.get("102").unwrap().unwrap();
    assert_eq!(racer.monthly_downloads_estimate, Some(0.0));
    assert_eq!(racer.monthly_revenue_estimate, Some(5_000.0));

    let budget = h.canonical.get("201").unwrap().unwrap();
    assert_eq!(budget.monthly_downloads_estimate, None);

    let counts = h.orchestrator.staging().counts().unwrap();
    assert_eq!(counts.metrics, 3);
    assert_eq!(counts.unprocessed_metrics, 0);
    assert_eq!(
        h.orchestrator.staging().get_run(run_id).unwrap().status,
        RunStatus::Completed
    );
}

#[tokio::test]
async fn test_category_without_listings_still_completes_run() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_html(
        &server,
        "/charts",
        charts_page(&[("Games", "/charts/games"), ("Empty", "/charts/empty")]),
    )
    .await;
    mount_html(&server, "/charts/games", category_page("/charts/games/free", None)).await;
    mount_html(&server, "/charts/games/free", list_page(&[(101, "puzzle")])).await;
    mount_html(&server, "/us/app/puzzle/id101", detail_page("puzzle")).await;
    // The empty category page has no list links at all
    mount_html(&server, "/charts/empty", "<html><body></body></html>".to_string()).await;

    let h = harness(create_test_config(&server.uri(), &dir, false));
    let run_id = h.crawl().await;

    let run = h.orchestrator.staging().get_run(run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(
        h.tasks_of_kind("run_ingestion", "%\"metrics_only\":false%"),
        1
    );
    assert_eq!(h.canonical.counts().unwrap().active, 1);
}

#[tokio::test]
async fn test_no_categories_fails_the_run() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_html(&server, "/charts", "<html><body>nothing here</body></html>".to_string()).await;

    let h = harness(create_test_config(&server.uri(), &dir, false));
    let run_id = h.crawl().await;

    let run = h.orchestrator.staging().get_run(run_id).unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(h.tasks_of_kind("run_ingestion", "%"), 0);
    assert!(h.orchestrator.progress().snapshot(run_id).unwrap().is_none());
}

#[tokio::test]
async fn test_rate_limited_detail_is_retried() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_html(&server, "/charts", charts_page(&[("Games", "/charts/games")])).await;
    mount_html(&server, "/charts/games", category_page("/charts/games/free", None)).await;
    mount_html(&server, "/charts/games/free", list_page(&[(101, "puzzle")])).await;

    // Two 429s, then the page
    Mock::given(method("GET"))
        .and(path("/us/app/puzzle/id101"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_html(&server, "/us/app/puzzle/id101", detail_page("puzzle")).await;

    let h = harness(create_test_config(&server.uri(), &dir, false));
    h.crawl().await;

    let puzzle = h.canonical.get("101").unwrap().unwrap();
    assert_eq!(puzzle.name, "puzzle");
}

#[tokio::test]
async fn test_missing_detail_is_skipped_not_fatal() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_html(&server, "/charts", charts_page(&[("Games", "/charts/games")])).await;
    mount_html(&server, "/charts/games", category_page("/charts/games/free", None)).await;
    mount_html(
        &server,
        "/charts/games/free",
        list_page(&[(101, "puzzle"), (102, "gone")]),
    )
    .await;
    mount_html(&server, "/us/app/puzzle/id101", detail_page("puzzle")).await;
    Mock::given(method("GET"))
        .and(path("/us/app/gone/id102"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let h = harness(create_test_config(&server.uri(), &dir, false));
    let run_id = h.crawl().await;

    assert_eq!(
        h.orchestrator.staging().get_run(run_id).unwrap().status,
        RunStatus::Completed
    );
    assert!(h.canonical.get("101").unwrap().is_some());
    assert!(h.canonical.get("102").unwrap().is_none());
    assert_eq!(h.queue.counts().unwrap().dead, 0);
}

#[tokio::test]
async fn test_second_run_deactivates_dropped_apps() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_catalog(&server).await;

    let h = harness(create_test_config(&server.uri(), &dir, false));
    h.crawl().await;
    assert_eq!(h.canonical.counts().unwrap().active, 4);

    // Finance drops its only app from the chart
    server.reset().await;
    mount_html(
        &server,
        "/charts",
        charts_page(&[("Games", "/charts/games")]),
    )
    .await;
    mount_html(
        &server,
        "/charts/games",
        category_page("/charts/games/free", Some("/charts/games/paid")),
    )
    .await;
    mount_html(
        &server,
        "/charts/games/free",
        list_page(&[(101, "puzzle"), (102, "racer")]),
    )
    .await;
    mount_html(&server, "/charts/games/paid", list_page(&[(103, "chess")])).await;
    for (id, name) in [(101, "puzzle"), (102, "racer"), (103, "chess")] {
        mount_html(&server, &format!("/us/app/{}/id{}", name, id), detail_page(name)).await;
    }

    h.crawl().await;

    let counts = h.canonical.counts().unwrap();
    assert_eq!(counts.active, 3);
    assert_eq!(counts.inactive, 1);
    let budget = h.canonical.get("201").unwrap().unwrap();
    assert!(!budget.active);
}
