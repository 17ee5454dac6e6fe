//! SQL schema for the conference catalog.
//!
//! Shared tables are versioned migrations applied in order on open. Per-category
//! tables are created on demand from fixed templates, with the table identifier
//! taken from a validated [`TableName`].

use confmap_shared::TableName;

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: categories, geocode cache, crawl runs",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Category lookup, seeded from configuration
CREATE TABLE IF NOT EXISTS conference_categories (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    category TEXT UNIQUE NOT NULL
);

-- Location name -> coordinates, shared by all categories
CREATE TABLE IF NOT EXISTS geolocation_mapping (
    location TEXT PRIMARY KEY,
    lat      REAL NOT NULL,
    lon      REAL NOT NULL
);

-- One row per category crawl; raw rows reference the run id
CREATE TABLE IF NOT EXISTS crawl_runs (
    id          TEXT PRIMARY KEY,
    category    TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'running',
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT
);

CREATE INDEX IF NOT EXISTS idx_crawl_runs_category ON crawl_runs(category, status);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}

/// Raw row table for one category: append-only, grouped by crawl run.
pub(crate) fn raw_table_sql(table: &TableName) -> String {
    let quoted = table.quoted();
    let index = format!("\"{}_run_idx\"", table.as_str());
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {quoted} (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id   TEXT NOT NULL,
    position INTEGER NOT NULL,
    data     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS {index} ON {quoted}(run_id, position);
"#
    )
}

/// Cleaned conference table for one category.
///
/// Uniqueness of `name` lives in a separate index so that tables created
/// before the constraint existed pick it up too.
pub(crate) fn cleaned_table_sql(table: &TableName) -> String {
    let quoted = table.quoted();
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {quoted} (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    abbreviation         TEXT,
    name                 TEXT NOT NULL,
    dates                TEXT,
    start_date           TEXT,
    end_date             TEXT,
    location             TEXT,
    cfp                  TEXT,
    past_submission_date INTEGER NOT NULL DEFAULT 0,
    lat                  REAL,
    lon                  REAL
);
"#
    )
}

/// Unique index enforcing one row per conference name.
pub(crate) fn cleaned_name_index_sql(table: &TableName) -> String {
    format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS \"{}_name_key\" ON {}(name);",
        table.as_str(),
        table.quoted()
    )
}
