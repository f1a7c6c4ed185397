//! Database schema definitions
//!
//! Two databases are used:
//! - staging: runs, categories, progress, raw crawl output, task queue
//! - canonical: the reconciled `apps` table

/// SQL schema for the staging database
pub const STAGING_SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Categories discovered per run
CREATE TABLE IF NOT EXISTS categories (
    run_id INTEGER NOT NULL REFERENCES runs(id),
    name TEXT NOT NULL,
    source_url TEXT NOT NULL,
    discovered_at TEXT NOT NULL,
    PRIMARY KEY (run_id, name)
);

-- Per-run category progress; `completed_at IS NULL` means remaining
CREATE TABLE IF NOT EXISTS progress_categories (
    run_id INTEGER NOT NULL REFERENCES runs(id),
    category TEXT NOT NULL,
    stage TEXT NOT NULL,
    completed_at TEXT,
    PRIMARY KEY (run_id, category)
);

-- Ranked listings, append-only
CREATE TABLE IF NOT EXISTS raw_listings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES runs(id),
    category TEXT NOT NULL,
    list_type TEXT NOT NULL,
    rank TEXT NOT NULL,
    name TEXT NOT NULL,
    developer TEXT NOT NULL,
    source_url TEXT NOT NULL,
    staged_at TEXT NOT NULL,
    UNIQUE(run_id, category, list_type, source_url)
);

CREATE INDEX IF NOT EXISTS idx_raw_listings_run ON raw_listings(run_id);
CREATE INDEX IF NOT EXISTS idx_raw_listings_url ON raw_listings(source_url);

-- Detail attribute bags keyed by source URL
CREATE TABLE IF NOT EXISTS raw_details (
    source_url TEXT PRIMARY KEY,
    document TEXT NOT NULL,
    staged_at TEXT NOT NULL
);

-- Secondary metrics keyed by external id
CREATE TABLE IF NOT EXISTS raw_metrics (
    external_id TEXT PRIMARY KEY,
    downloads TEXT,
    revenue TEXT,
    processed INTEGER NOT NULL DEFAULT 0,
    -- Bumped on every restage so a merge only flags the values it read
    version INTEGER NOT NULL DEFAULT 1,
    staged_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_raw_metrics_processed ON raw_metrics(processed);

-- Durable task queue
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    state TEXT NOT NULL,
    deliveries INTEGER NOT NULL DEFAULT 0,
    available_at TEXT NOT NULL,
    lease_until TEXT,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_state ON tasks(state, available_at);
"#;

/// SQL schema for the canonical database
pub const CANONICAL_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS apps (
    external_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    subtitle TEXT,
    developer TEXT NOT NULL,
    category TEXT NOT NULL,
    list_type TEXT,
    rank INTEGER NOT NULL,
    category_rank TEXT,
    price TEXT,
    rating TEXT,
    icon_url TEXT,
    source_url TEXT NOT NULL,
    description TEXT,
    screenshots TEXT NOT NULL DEFAULT '[]',
    num_screenshots INTEGER NOT NULL DEFAULT 0,
    has_in_app_purchases INTEGER NOT NULL DEFAULT 0,
    latest_version TEXT,
    latest_version_date TEXT,
    reviews TEXT NOT NULL DEFAULT '[]',
    privacy_data TEXT NOT NULL DEFAULT '[]',
    general_info TEXT NOT NULL DEFAULT '{}',
    labels TEXT,
    monthly_downloads_estimate REAL,
    monthly_revenue_estimate REAL,
    active INTEGER NOT NULL DEFAULT 1,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_apps_category ON apps(category);
CREATE INDEX IF NOT EXISTS idx_apps_active ON apps(active);
"#;

/// Initializes the staging schema
///
/// # Arguments
///
/// * `conn` - The database connection
pub fn initialize_staging(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(STAGING_SCHEMA_SQL)
}

/// Initializes the canonical schema
pub fn initialize_canonical(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(CANONICAL_SCHEMA_SQL)
}
