//! libSQL storage layer for the conference catalog.
//!
//! The [`Storage`] struct wraps a libSQL database holding the category list,
//! per-category raw and cleaned tables, crawl runs, and the shared geocode
//! cache. Local files are opened with [`Storage::open`]; [`Storage::connect`]
//! accepts a local or remote target and waits for it to become reachable.

mod migrations;

use std::path::Path;

use chrono::{NaiveDateTime, Utc};
use confmap_shared::{
    AcceptedConference, CLEANED_TABLE_PREFIX, Category, CleanedConference, ConfMapError,
    Coordinates, DatabaseConfig, DatabaseTarget, RawRow, Result, TableName,
};
use libsql::{Connection, Database, Value, params, params_from_iter};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Storage format for start/end timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Rows per multi-row INSERT, keeping bound parameters under SQLite's limit.
const RAW_ROWS_PER_STATEMENT: usize = 300;
const CONFERENCES_PER_STATEMENT: usize = 90;

fn storage_err(e: impl std::fmt::Display) -> ConfMapError {
    ConfMapError::Storage(e.to_string())
}

/// `(?1, ?2), (?3, ?4), ...` for `rows` tuples of `cols` parameters.
fn placeholders(rows: usize, cols: usize) -> String {
    (0..rows)
        .map(|r| {
            let params: Vec<String> = (1..=cols).map(|c| format!("?{}", r * cols + c)).collect();
            format!("({})", params.join(", "))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Outcome of writing a batch of accepted conferences.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteStats {
    /// Rows newly inserted.
    pub inserted: u64,
    /// Rows skipped because the name was already present.
    pub skipped: u64,
}

/// Final state of a crawl run, recorded when the run ends.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlRunStats {
    pub pages_fetched: u32,
    pub rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a local database at `path` and apply migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        let storage = Self::open_target(&DatabaseTarget::Local(path.to_path_buf())).await?;
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Connect to the configured target, retrying while it is unreachable.
    ///
    /// Each failed attempt is logged and followed by `retry_delay`. Once
    /// `connect_attempts` are used up the error is
    /// [`ConfMapError::StorageUnavailable`], which callers treat as fatal.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let attempts = config.connect_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match Self::open_target(&config.target).await {
                Ok(storage) => {
                    if attempt > 1 {
                        info!(attempt, "storage became reachable");
                    }
                    storage.run_migrations().await?;
                    return Ok(storage);
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "storage not reachable");
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(config.retry_delay).await;
                    }
                }
            }
        }

        Err(ConfMapError::StorageUnavailable {
            attempts,
            message: last_error,
        })
    }

    /// Build a database handle and prove it answers a trivial query.
    async fn open_target(target: &DatabaseTarget) -> Result<Self> {
        let db = match target {
            DatabaseTarget::Local(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| ConfMapError::io(parent, e))?;
                }
                libsql::Builder::new_local(path)
                    .build()
                    .await
                    .map_err(storage_err)?
            }
            DatabaseTarget::Remote { url, auth_token } => {
                libsql::Builder::new_remote(url.clone(), auth_token.clone())
                    .build()
                    .await
                    .map_err(storage_err)?
            }
        };

        let conn = db.connect().map_err(storage_err)?;
        let mut rows = conn.query("SELECT 1", params![]).await.map_err(storage_err)?;
        rows.next().await.map_err(storage_err)?;

        Ok(Self { db, conn })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    ConfMapError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    async fn table_exists(&self, table: &TableName) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(rows.next().await.map_err(storage_err)?.is_some())
    }

    // -----------------------------------------------------------------------
    // Categories
    // -----------------------------------------------------------------------

    /// Insert categories that are not yet present. Returns how many were new.
    pub async fn seed_categories(&self, categories: &[Category]) -> Result<u64> {
        let mut added = 0;
        for category in categories {
            added += self
                .conn
                .execute(
                    "INSERT INTO conference_categories (category) VALUES (?1)
                     ON CONFLICT(category) DO NOTHING",
                    params![category.label()],
                )
                .await
                .map_err(storage_err)?;
        }
        debug!(added, "seeded categories");
        Ok(added)
    }

    /// All known categories in insertion order.
    pub async fn list_categories(&self) -> Result<Vec<Category>> {
        let mut rows = self
            .conn
            .query(
                "SELECT category FROM conference_categories ORDER BY id",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut categories = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let label = row.get::<String>(0).map_err(storage_err)?;
            categories.push(Category::new(label)?);
        }
        Ok(categories)
    }

    /// Create the raw and cleaned tables for a category if missing.
    ///
    /// Fails if an existing cleaned table holds duplicate names, since the
    /// unique index cannot be built until they are removed with
    /// [`Storage::drop_duplicate_names`].
    pub async fn ensure_category_tables(&self, category: &Category) -> Result<()> {
        let raw = category.raw_table();
        let cleaned = category.cleaned_table();

        self.conn
            .execute_batch(&migrations::raw_table_sql(&raw))
            .await
            .map_err(|e| ConfMapError::Storage(format!("creating {raw}: {e}")))?;
        self.conn
            .execute_batch(&migrations::cleaned_table_sql(&cleaned))
            .await
            .map_err(|e| ConfMapError::Storage(format!("creating {cleaned}: {e}")))?;
        self.conn
            .execute_batch(&migrations::cleaned_name_index_sql(&cleaned))
            .await
            .map_err(|e| {
                ConfMapError::Storage(format!(
                    "{cleaned} has duplicate conference names, run `confmap dedupe`: {e}"
                ))
            })?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Crawl runs and raw rows
    // -----------------------------------------------------------------------

    /// Record the start of a crawl run. Returns the run id.
    pub async fn begin_crawl_run(&self, category: &Category) -> Result<String> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO crawl_runs (id, category, started_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), category.label(), now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(id)
    }

    /// Mark a crawl run finished. Only completed runs are read back by
    /// [`Storage::latest_raw_rows`].
    pub async fn finish_crawl_run(&self, run_id: &str, stats: &CrawlRunStats) -> Result<()> {
        let status = if stats.error.is_some() {
            "failed"
        } else {
            "completed"
        };
        let stats_json = serde_json::to_string(stats).map_err(storage_err)?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE crawl_runs SET status = ?1, finished_at = ?2, stats_json = ?3
                 WHERE id = ?4",
                params![status, now.as_str(), stats_json.as_str(), run_id],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Append raw rows for a run. Existing rows are never modified.
    ///
    /// Rows only become visible to cleaning once the run is finished.
    pub async fn append_raw_rows(
        &self,
        category: &Category,
        run_id: &str,
        rows: &[RawRow],
    ) -> Result<u64> {
        let table = category.raw_table().quoted();
        let mut written = 0;
        for chunk in rows.chunks(RAW_ROWS_PER_STATEMENT) {
            let sql = format!(
                "INSERT INTO {table} (run_id, position, data) VALUES {}",
                placeholders(chunk.len(), 3)
            );
            let values: Vec<Value> = chunk
                .iter()
                .flat_map(|row| {
                    [
                        Value::Text(run_id.to_string()),
                        Value::Integer(row.position as i64),
                        Value::Text(row.data.clone()),
                    ]
                })
                .collect();
            written += self
                .conn
                .execute(&sql, params_from_iter(values))
                .await
                .map_err(storage_err)?;
        }
        Ok(written)
    }

    /// Raw rows of the most recent completed run, in document order.
    pub async fn latest_raw_rows(&self, category: &Category) -> Result<Vec<RawRow>> {
        let mut runs = self
            .conn
            .query(
                "SELECT id FROM crawl_runs
                 WHERE category = ?1 AND status = 'completed'
                 ORDER BY started_at DESC, id DESC LIMIT 1",
                params![category.label()],
            )
            .await
            .map_err(storage_err)?;

        let Some(run) = runs.next().await.map_err(storage_err)? else {
            return Ok(Vec::new());
        };
        let run_id = run.get::<String>(0).map_err(storage_err)?;

        let sql = format!(
            "SELECT position, data FROM {} WHERE run_id = ?1 ORDER BY position",
            category.raw_table().quoted()
        );
        let mut rows = self
            .conn
            .query(&sql, params![run_id.as_str()])
            .await
            .map_err(storage_err)?;

        let mut raw = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let position = row.get::<i64>(0).map_err(storage_err)?;
            let data = row.get::<String>(1).map_err(storage_err)?;
            raw.push(RawRow::new(position as usize, data));
        }
        Ok(raw)
    }

    // -----------------------------------------------------------------------
    // Cleaned conferences
    // -----------------------------------------------------------------------

    /// Insert accepted conferences, skipping names already present.
    ///
    /// Existing rows are left as they are. Names must be unique within
    /// `conferences`; see `retain_first_by_name` in the core crate.
    pub async fn insert_conferences(
        &self,
        category: &Category,
        conferences: &[AcceptedConference],
    ) -> Result<WriteStats> {
        let table = category.cleaned_table().quoted();
        let mut stats = WriteStats::default();

        for chunk in conferences.chunks(CONFERENCES_PER_STATEMENT) {
            let sql = format!(
                "INSERT INTO {table} (abbreviation, name, dates, start_date, end_date, location,
                                      cfp, past_submission_date, lat, lon)
                 VALUES {}
                 ON CONFLICT(name) DO NOTHING",
                placeholders(chunk.len(), 10)
            );
            let values: Vec<Value> = chunk
                .iter()
                .flat_map(|conf| {
                    [
                        Value::Text(conf.abbreviation.clone()),
                        Value::Text(conf.name.clone()),
                        Value::Text(conf.dates.clone()),
                        Value::Text(conf.start_date.format(TIMESTAMP_FORMAT).to_string()),
                        Value::Text(conf.end_date.format(TIMESTAMP_FORMAT).to_string()),
                        Value::Text(conf.location.clone()),
                        Value::Text(conf.cfp.clone()),
                        Value::Integer(i64::from(conf.past_submission_deadline)),
                        Value::Real(conf.coordinates.lat),
                        Value::Real(conf.coordinates.lon),
                    ]
                })
                .collect();
            let inserted = self
                .conn
                .execute(&sql, params_from_iter(values))
                .await
                .map_err(storage_err)?;
            stats.inserted += inserted;
            stats.skipped += chunk.len() as u64 - inserted;
        }

        if stats.skipped > 0 {
            debug!(table = %table, skipped = stats.skipped, "names already stored");
        }
        Ok(stats)
    }

    /// All cleaned conferences for a category, ordered by id.
    pub async fn list_conferences(&self, category: &Category) -> Result<Vec<CleanedConference>> {
        let table = category.cleaned_table();
        if !self.table_exists(&table).await? {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id, abbreviation, name, dates, start_date, end_date, location, cfp,
                    past_submission_date, lat, lon
             FROM {} ORDER BY id",
            table.quoted()
        );
        let mut rows = self.conn.query(&sql, params![]).await.map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_conference(&row)?);
        }
        Ok(results)
    }

    /// Remove rows whose name repeats an earlier row, keeping the first.
    ///
    /// Returns the number of rows deleted, or 0 when the table does not exist.
    pub async fn drop_duplicate_names(&self, category: &Category) -> Result<u64> {
        let table = category.cleaned_table();
        if !self.table_exists(&table).await? {
            return Ok(0);
        }

        let quoted = table.quoted();
        let sql = format!(
            "DELETE FROM {quoted}
             WHERE rowid NOT IN (SELECT MIN(rowid) FROM {quoted} GROUP BY name)"
        );
        let removed = self.conn.execute(&sql, params![]).await.map_err(storage_err)?;
        if removed > 0 {
            info!(table = %table, removed, "removed duplicate conference names");
        }
        Ok(removed)
    }

    /// Slugs of every category that has a cleaned table, sorted.
    pub async fn list_cleaned_categories(&self) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let prefix = format!("{CLEANED_TABLE_PREFIX}_");
        let mut slugs = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let name = row.get::<String>(0).map_err(storage_err)?;
            if let Some(slug) = name.strip_prefix(&prefix) {
                slugs.push(slug.to_string());
            }
        }
        Ok(slugs)
    }

    // -----------------------------------------------------------------------
    // Geocode cache
    // -----------------------------------------------------------------------

    /// Cached coordinates for a normalized location key.
    pub async fn get_geocode(&self, location: &str) -> Result<Option<Coordinates>> {
        let mut rows = self
            .conn
            .query(
                "SELECT lat, lon FROM geolocation_mapping WHERE location = ?1",
                params![location],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => {
                let lat = row.get::<f64>(0).map_err(storage_err)?;
                let lon = row.get::<f64>(1).map_err(storage_err)?;
                Ok(Some(Coordinates::new(lat, lon)))
            }
            None => Ok(None),
        }
    }

    /// Store coordinates for a location key. The last writer wins.
    pub async fn put_geocode(&self, location: &str, coords: Coordinates) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO geolocation_mapping (location, lat, lon) VALUES (?1, ?2, ?3)
                 ON CONFLICT(location) DO UPDATE SET lat = excluded.lat, lon = excluded.lon",
                params![location, coords.lat, coords.lon],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

/// Convert a cleaned-table row into a [`CleanedConference`].
fn row_to_conference(row: &libsql::Row) -> Result<CleanedConference> {
    let parse_ts = |idx: i32| -> Option<NaiveDateTime> {
        row.get::<String>(idx)
            .ok()
            .and_then(|s| NaiveDateTime::parse_from_str(&s, TIMESTAMP_FORMAT).ok())
    };

    Ok(CleanedConference {
        id: row.get::<i64>(0).map_err(storage_err)?,
        abbreviation: row.get::<String>(1).unwrap_or_default(),
        name: row.get::<String>(2).map_err(storage_err)?,
        dates: row.get::<String>(3).unwrap_or_default(),
        start_date: parse_ts(4),
        end_date: parse_ts(5),
        location: row.get::<String>(6).unwrap_or_default(),
        cfp: row.get::<String>(7).unwrap_or_default(),
        past_submission_deadline: row.get::<i64>(8).unwrap_or(0) != 0,
        lat: row.get::<f64>(9).ok(),
        lon: row.get::<f64>(10).ok(),
    })
}
