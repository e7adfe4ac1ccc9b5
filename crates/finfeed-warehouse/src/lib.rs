//! # Finfeed Warehouse
//!
//! DuckDB-based persistence for normalized market data.
//!
//! ## Overview
//!
//! The warehouse is both a read tier and the durable sink of every
//! successful fetch. Writes are idempotent upserts keyed on the natural key of
//! each table, so refetching the same day replaces the row in place.
//!
//! ### Features
//!
//! - **Idempotent upserts**: `INSERT OR REPLACE` on the primary key
//! - **Parameterized SQL**: user-provided values are never interpolated
//! - **Connection pooling**: cloned handles over one database instance
//! - **Audit log**: every write batch is recorded in `ingest_log`
//! - **Backups**: timestamped file copies with a frequency check
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use finfeed_warehouse::{MarketDataQuery, Warehouse};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open_default()?;
//!
//!     let rows = warehouse.query_market_data(&MarketDataQuery {
//!         symbol: "PETR4".to_string(),
//!         market: Some("BR".to_string()),
//!         data_type: "stock".to_string(),
//!         start: Some("2024-01-01".to_string()),
//!         end: None,
//!     })?;
//!
//!     println!("Found {} rows", rows.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Tables
//!
//! | Table | Key | Description |
//! |-------|-----|-------------|
//! | `market_data` | `(symbol, date, data_type)` | Daily OHLCV records |
//! | `economic_indicators` | `(country, indicator_name, date)` | Scalar indicators |
//! | `ingest_log` | append-only | Write audit trail |
//! | `schema_migrations` | `version` | Applied migrations |

pub mod duckdb;
mod error;
pub mod migrations;
mod models;

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use ::duckdb::{params_from_iter, Connection, ToSql};
use time::macros::format_description;
use time::OffsetDateTime;

pub use duckdb::{DuckDbConnectionManager, PooledConnection};
pub use error::WarehouseError;
pub use models::{IndicatorRow, IngestLogEntry, MarketDataQuery, MarketDataRow};

const MARKET_DATA_COLUMNS: &str = "symbol, market, strftime(date, '%Y-%m-%d') AS day, \
     open, high, low, close, volume, data_type, last_updated";

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for finfeed data.
    pub finfeed_home: PathBuf,
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle connections kept in the pool.
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        let finfeed_home = resolve_finfeed_home();
        let db_path = finfeed_home.join("finfeed.duckdb");
        Self {
            finfeed_home,
            db_path,
            max_pool_size: 4,
        }
    }
}

/// The main warehouse interface for market data storage.
#[derive(Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    /// Open a warehouse with default configuration.
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open a warehouse with the specified configuration.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::open(config.db_path.clone(), config.max_pool_size)?;
        let warehouse = Self { config, manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Apply pending schema migrations.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let _writer = self.manager.write_guard();
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    /// Get the path to the database file.
    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    /// Root directory this warehouse was configured with.
    pub fn home(&self) -> &Path {
        self.config.finfeed_home.as_path()
    }

    /// Upsert daily records and append one audit entry for the batch.
    ///
    /// Rows sharing a key within one batch collapse to the last occurrence.
    /// Returns the number of distinct rows written.
    pub fn upsert_market_data(
        &self,
        source: &str,
        request_id: &str,
        rows: &[MarketDataRow],
        latency_ms: u64,
    ) -> Result<usize, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut distinct: BTreeMap<(&str, &str, &str), &MarketDataRow> = BTreeMap::new();
        for row in rows {
            validate_date(&row.date)?;
            distinct.insert(
                (row.symbol.as_str(), row.date.as_str(), row.data_type.as_str()),
                row,
            );
        }
        let written = distinct.len();

        let _writer = self.manager.write_guard();
        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<(), WarehouseError> {
            for row in distinct.values() {
                let params: [&dyn ToSql; 10] = [
                    &row.symbol,
                    &row.market,
                    &row.date,
                    &row.open,
                    &row.high,
                    &row.low,
                    &row.close,
                    &row.volume,
                    &row.data_type,
                    &row.last_updated,
                ];
                connection.execute(
                    "INSERT OR REPLACE INTO market_data \
                     (symbol, market, date, open, high, low, close, volume, data_type, last_updated) \
                     VALUES (?, ?, CAST(? AS DATE), ?, ?, ?, ?, ?, ?, ?)",
                    params.as_slice(),
                )?;
            }

            append_ingest_log(&connection, request_id, source, "market_data", written, latency_ms)
        })();

        finalize_transaction(&connection, result)?;
        Ok(written)
    }

    /// Read `market_data` rows matching the query, ordered by date ascending.
    pub fn query_market_data(
        &self,
        query: &MarketDataQuery,
    ) -> Result<Vec<MarketDataRow>, WarehouseError> {
        let mut sql = format!(
            "SELECT {MARKET_DATA_COLUMNS} FROM market_data WHERE symbol = ? AND data_type = ?"
        );
        let mut values: Vec<&str> = vec![query.symbol.as_str(), query.data_type.as_str()];

        if let Some(market) = &query.market {
            sql.push_str(" AND market = ?");
            values.push(market.as_str());
        }
        if let Some(start) = &query.start {
            validate_date(start)?;
            sql.push_str(" AND date >= CAST(? AS DATE)");
            values.push(start.as_str());
        }
        if let Some(end) = &query.end {
            validate_date(end)?;
            sql.push_str(" AND date <= CAST(? AS DATE)");
            values.push(end.as_str());
        }
        sql.push_str(" ORDER BY date ASC");

        let connection = self.manager.acquire()?;
        let mut statement = connection.prepare(sql.as_str())?;
        let rows = statement.query_map(params_from_iter(values.iter()), read_market_data_row)?;
        let rows = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Total number of rows in `market_data`.
    pub fn market_data_row_count(&self) -> Result<u64, WarehouseError> {
        let connection = self.manager.acquire()?;
        let count: i64 = connection.query_row("SELECT COUNT(*) FROM market_data", [], |row| {
            row.get(0)
        })?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Upsert economic indicator observations.
    pub fn upsert_indicators(
        &self,
        source: &str,
        request_id: &str,
        rows: &[IndicatorRow],
    ) -> Result<usize, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut distinct: BTreeMap<(&str, &str, &str), &IndicatorRow> = BTreeMap::new();
        for row in rows {
            validate_date(&row.date)?;
            distinct.insert(
                (row.country.as_str(), row.indicator_name.as_str(), row.date.as_str()),
                row,
            );
        }
        let written = distinct.len();

        let _writer = self.manager.write_guard();
        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<(), WarehouseError> {
            for row in distinct.values() {
                let params: [&dyn ToSql; 5] = [
                    &row.country,
                    &row.indicator_name,
                    &row.date,
                    &row.value,
                    &row.last_updated,
                ];
                connection.execute(
                    "INSERT OR REPLACE INTO economic_indicators \
                     (country, indicator_name, date, value, last_updated) \
                     VALUES (?, ?, CAST(? AS DATE), ?, ?)",
                    params.as_slice(),
                )?;
            }

            append_ingest_log(&connection, request_id, source, "economic_indicators", written, 0)
        })();

        finalize_transaction(&connection, result)?;
        Ok(written)
    }

    /// Newest observation of every indicator recorded for `country`.
    pub fn latest_indicators(&self, country: &str) -> Result<Vec<IndicatorRow>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let mut statement = connection.prepare(
            "SELECT country, indicator_name, strftime(date, '%Y-%m-%d') AS day, value, last_updated \
             FROM economic_indicators e \
             WHERE country = ? AND date = ( \
                 SELECT MAX(date) FROM economic_indicators i \
                 WHERE i.country = e.country AND i.indicator_name = e.indicator_name) \
             ORDER BY indicator_name",
        )?;
        let rows = statement.query_map([country], |row| {
            Ok(IndicatorRow {
                country: row.get(0)?,
                indicator_name: row.get(1)?,
                date: row.get(2)?,
                value: row.get(3)?,
                last_updated: row.get(4)?,
            })
        })?;
        let rows = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Audit entries, oldest first.
    pub fn ingest_log(&self) -> Result<Vec<IngestLogEntry>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let mut statement = connection.prepare(
            "SELECT request_id, source, dataset, status, row_count FROM ingest_log ORDER BY timestamp, request_id",
        )?;
        let rows = statement.query_map([], |row| {
            let row_count: i64 = row.get(4)?;
            Ok(IngestLogEntry {
                request_id: row.get(0)?,
                source: row.get(1)?,
                dataset: row.get(2)?,
                status: row.get(3)?,
                row_count: u64::try_from(row_count).unwrap_or(0),
            })
        })?;
        let rows = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Checkpoint the database and copy it into `backup_dir`.
    ///
    /// The copy is named `<stem>_backup_<YYYYmmdd_HHMMSS>.duckdb`.
    pub fn backup(&self, backup_dir: &Path) -> Result<PathBuf, WarehouseError> {
        fs::create_dir_all(backup_dir)?;

        let stamp = OffsetDateTime::now_utc()
            .format(format_description!("[year][month][day]_[hour][minute][second]"))
            .map_err(|error| WarehouseError::Backup(error.to_string()))?;
        let target = backup_dir.join(format!("{}_backup_{stamp}.duckdb", self.db_stem()));

        let _writer = self.manager.write_guard();
        let connection = self.manager.acquire()?;
        connection.execute_batch("CHECKPOINT")?;
        fs::copy(self.db_path(), &target)?;

        tracing::info!(path = %target.display(), "database backup written");
        Ok(target)
    }

    /// Run [`Warehouse::backup`] only when the newest backup in `backup_dir`
    /// is older than `frequency` (or none exists).
    pub fn backup_if_due(
        &self,
        backup_dir: &Path,
        frequency: Duration,
    ) -> Result<Option<PathBuf>, WarehouseError> {
        if let Some(modified) = self.latest_backup_time(backup_dir)? {
            let age = SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO);
            if age < frequency {
                tracing::debug!(age_secs = age.as_secs(), "backup not due yet");
                return Ok(None);
            }
        }

        self.backup(backup_dir).map(Some)
    }

    fn latest_backup_time(&self, backup_dir: &Path) -> Result<Option<SystemTime>, WarehouseError> {
        if !backup_dir.exists() {
            return Ok(None);
        }

        let prefix = format!("{}_backup_", self.db_stem());
        let mut newest = None;
        for entry in fs::read_dir(backup_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(prefix.as_str()) || !name.ends_with(".duckdb") {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            if newest.map_or(true, |current| modified > current) {
                newest = Some(modified);
            }
        }
        Ok(newest)
    }

    fn db_stem(&self) -> String {
        self.db_path()
            .file_stem()
            .map_or_else(|| "finfeed".to_string(), |stem| stem.to_string_lossy().into_owned())
    }
}

fn append_ingest_log(
    connection: &Connection,
    request_id: &str,
    source: &str,
    dataset: &str,
    row_count: usize,
    latency_ms: u64,
) -> Result<(), WarehouseError> {
    let row_count = i64::try_from(row_count).unwrap_or(i64::MAX);
    let params: [&dyn ToSql; 5] = [&request_id, &source, &dataset, &row_count, &latency_ms];
    connection.execute(
        "INSERT INTO ingest_log \
         (request_id, source, dataset, status, row_count, latency_ms, timestamp) \
         VALUES (?, ?, ?, 'ok', ?, ?, CURRENT_TIMESTAMP)",
        params.as_slice(),
    )?;
    Ok(())
}

fn read_market_data_row(row: &::duckdb::Row<'_>) -> Result<MarketDataRow, ::duckdb::Error> {
    let volume: i64 = row.get(7)?;
    Ok(MarketDataRow {
        symbol: row.get(0)?,
        market: row.get(1)?,
        date: row.get(2)?,
        open: row.get(3)?,
        high: row.get(4)?,
        low: row.get(5)?,
        close: row.get(6)?,
        volume: u64::try_from(volume).unwrap_or(0),
        data_type: row.get(8)?,
        last_updated: row.get(9)?,
    })
}

/// Finalize a transaction, committing on success or rolling back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

fn validate_date(value: &str) -> Result<(), WarehouseError> {
    time::Date::parse(value, format_description!("[year]-[month]-[day]"))
        .map(|_| ())
        .map_err(|_| WarehouseError::InvalidRow(format!("date '{value}' is not YYYY-MM-DD")))
}

/// Resolve the finfeed home directory from environment or default.
fn resolve_finfeed_home() -> PathBuf {
    if let Some(path) = env::var_os("FINFEED_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".finfeed");
    }

    PathBuf::from(".finfeed")
}
