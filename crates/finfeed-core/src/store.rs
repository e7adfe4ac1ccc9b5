//! Async adapter over the DuckDB warehouse.
//!
//! The warehouse API is blocking, so every call runs on tokio's blocking
//! pool. Rows cross the boundary as strings and are re-validated into
//! domain types on the way back.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use finfeed_warehouse::{
    IndicatorRow, MarketDataQuery, MarketDataRow, Warehouse, WarehouseConfig, WarehouseError,
};
use thiserror::Error;

use crate::{
    format_iso_date, parse_iso_date, CanonicalRecord, DataType, DateWindow, EconomicIndicator,
    Market, ProviderId, Symbol, UtcDateTime,
};

/// Trailing history returned by [`PersistentStore::recent`] by default.
pub const DEFAULT_HISTORY_DAYS: u32 = 365;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("blocking store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("stored row cannot be converted: {0}")]
    Conversion(String),
}

/// Durable record store. Cheap to clone; clones share one database.
#[derive(Clone)]
pub struct PersistentStore {
    warehouse: Warehouse,
}

impl PersistentStore {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }

    /// Open (and migrate) the database described by `config`.
    pub fn open(config: WarehouseConfig) -> Result<Self, StoreError> {
        Ok(Self::new(Warehouse::open(config)?))
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    /// Idempotently upsert records and log the batch under `provider`.
    pub async fn upsert(
        &self,
        provider: ProviderId,
        records: &[CanonicalRecord],
        latency: Duration,
    ) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let rows: Vec<MarketDataRow> = records.iter().map(to_row).collect();
        let request_id = uuid::Uuid::new_v4().to_string();
        let latency_ms = latency.as_millis() as u64;

        let written = self
            .blocking(move |warehouse| {
                warehouse.upsert_market_data(provider.as_str(), &request_id, &rows, latency_ms)
            })
            .await?;

        tracing::debug!(%provider, rows = written, "records upserted");
        Ok(written)
    }

    /// Stored records for one series, oldest first.
    pub async fn query(
        &self,
        symbol: &Symbol,
        market: Option<Market>,
        data_type: DataType,
        window: Option<DateWindow>,
    ) -> Result<Vec<CanonicalRecord>, StoreError> {
        let query = MarketDataQuery {
            symbol: symbol.as_str().to_owned(),
            market: market.map(|market| market.as_str().to_owned()),
            data_type: data_type.as_str().to_owned(),
            start: window.and_then(|window| window.start()).map(format_iso_date),
            end: window.and_then(|window| window.end()).map(format_iso_date),
        };

        let started = Instant::now();
        let rows = self
            .blocking(move |warehouse| warehouse.query_market_data(&query))
            .await?;
        tracing::debug!(
            symbol = %symbol,
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "store query"
        );

        rows.into_iter().map(from_row).collect()
    }

    /// The last `days` calendar days of a series, ending today (UTC).
    pub async fn recent(
        &self,
        symbol: &Symbol,
        market: Market,
        data_type: DataType,
        days: u32,
    ) -> Result<Vec<CanonicalRecord>, StoreError> {
        let window = DateWindow::trailing_days(UtcDateTime::now().date(), days);
        self.query(symbol, Some(market), data_type, Some(window)).await
    }

    pub async fn upsert_indicators(
        &self,
        source: &str,
        indicators: &[EconomicIndicator],
    ) -> Result<usize, StoreError> {
        let rows: Vec<IndicatorRow> = indicators
            .iter()
            .map(|indicator| IndicatorRow {
                country: indicator.country.clone(),
                indicator_name: indicator.indicator_name.clone(),
                date: format_iso_date(indicator.date),
                value: indicator.value,
                last_updated: indicator.last_updated.format_rfc3339(),
            })
            .collect();
        let source = source.to_owned();
        let request_id = uuid::Uuid::new_v4().to_string();

        self.blocking(move |warehouse| warehouse.upsert_indicators(&source, &request_id, &rows))
            .await
    }

    /// Newest value of each indicator recorded for `country`.
    pub async fn latest_indicators(
        &self,
        country: &str,
    ) -> Result<Vec<EconomicIndicator>, StoreError> {
        let country = country.trim().to_ascii_uppercase();
        let rows = self
            .blocking(move |warehouse| warehouse.latest_indicators(&country))
            .await?;

        rows.into_iter()
            .map(|row| {
                let date = parse_iso_date(&row.date).map_err(conversion)?;
                let last_updated = UtcDateTime::parse_lenient(&row.last_updated).map_err(conversion)?;
                EconomicIndicator::new(row.country, row.indicator_name, date, row.value, last_updated)
                    .map_err(conversion)
            })
            .collect()
    }

    pub async fn backup(&self, dir: &Path) -> Result<PathBuf, StoreError> {
        let dir = dir.to_path_buf();
        self.blocking(move |warehouse| warehouse.backup(&dir)).await
    }

    pub async fn backup_if_due(
        &self,
        dir: &Path,
        frequency: Duration,
    ) -> Result<Option<PathBuf>, StoreError> {
        let dir = dir.to_path_buf();
        self.blocking(move |warehouse| warehouse.backup_if_due(&dir, frequency))
            .await
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Warehouse) -> Result<T, WarehouseError> + Send + 'static,
    {
        let warehouse = self.warehouse.clone();
        let value = tokio::task::spawn_blocking(move || work(&warehouse)).await??;
        Ok(value)
    }
}

fn to_row(record: &CanonicalRecord) -> MarketDataRow {
    MarketDataRow {
        symbol: record.symbol.as_str().to_owned(),
        market: record.market.as_str().to_owned(),
        date: format_iso_date(record.date),
        open: record.open,
        high: record.high,
        low: record.low,
        close: record.close,
        volume: record.volume,
        data_type: record.data_type.as_str().to_owned(),
        last_updated: record.last_updated.format_rfc3339(),
    }
}

fn from_row(row: MarketDataRow) -> Result<CanonicalRecord, StoreError> {
    let symbol = Symbol::parse(&row.symbol).map_err(conversion)?;
    let market = row.market.parse::<Market>().map_err(conversion)?;
    let data_type = row.data_type.parse::<DataType>().map_err(conversion)?;
    let date = parse_iso_date(&row.date).map_err(conversion)?;
    let last_updated = UtcDateTime::parse_lenient(&row.last_updated).map_err(conversion)?;

    CanonicalRecord::new(
        symbol,
        market,
        date,
        row.open,
        row.high,
        row.low,
        row.close,
        row.volume,
        data_type,
        last_updated,
    )
    .map_err(conversion)
}

fn conversion(error: impl std::fmt::Display) -> StoreError {
    StoreError::Conversion(error.to_string())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use time::macros::date;

    use super::*;

    fn open_store() -> (TempDir, PersistentStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PersistentStore::open(WarehouseConfig {
            finfeed_home: dir.path().to_path_buf(),
            db_path: dir.path().join("finfeed.duckdb"),
            max_pool_size: 2,
        })
        .expect("store");
        (dir, store)
    }

    fn record(day: time::Date, close: f64) -> CanonicalRecord {
        CanonicalRecord::new(
            Symbol::parse("PETR4").expect("symbol"),
            Market::Br,
            day,
            close,
            close,
            close,
            close,
            1_000,
            DataType::Stock,
            UtcDateTime::parse("2024-03-05T10:00:00Z").expect("ts"),
        )
        .expect("record")
    }

    #[tokio::test]
    async fn upsert_then_query_round_trips_domain_records() {
        let (_dir, store) = open_store();
        let records = vec![record(date!(2024 - 03 - 01), 36.8), record(date!(2024 - 03 - 04), 37.0)];

        let written = store
            .upsert(ProviderId::B3, &records, Duration::from_millis(12))
            .await
            .expect("upsert");
        assert_eq!(written, 2);

        let stored = store
            .query(&records[0].symbol, Some(Market::Br), DataType::Stock, None)
            .await
            .expect("query");
        assert_eq!(stored, records);
    }

    #[tokio::test]
    async fn refetching_a_day_replaces_it() {
        let (_dir, store) = open_store();
        let day = date!(2024 - 03 - 01);

        store
            .upsert(ProviderId::B3, &[record(day, 36.8)], Duration::ZERO)
            .await
            .expect("first");
        store
            .upsert(ProviderId::B3, &[record(day, 37.5)], Duration::ZERO)
            .await
            .expect("second");

        let stored = store
            .query(&record(day, 0.0).symbol, None, DataType::Stock, None)
            .await
            .expect("query");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].close, 37.5);
    }

    #[tokio::test]
    async fn window_limits_query() {
        let (_dir, store) = open_store();
        let records = vec![
            record(date!(2024 - 02 - 28), 35.0),
            record(date!(2024 - 03 - 01), 36.0),
            record(date!(2024 - 03 - 04), 37.0),
        ];
        store
            .upsert(ProviderId::B3, &records, Duration::ZERO)
            .await
            .expect("upsert");

        let window = DateWindow::new(Some(date!(2024 - 03 - 01)), None).expect("window");
        let stored = store
            .query(&records[0].symbol, Some(Market::Br), DataType::Stock, Some(window))
            .await
            .expect("query");
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].date, date!(2024 - 03 - 01));
    }

    #[tokio::test]
    async fn recent_covers_trailing_days_only() {
        let (_dir, store) = open_store();
        let today = UtcDateTime::now().date();
        let old = today - time::Duration::days(400);
        store
            .upsert(
                ProviderId::B3,
                &[record(old, 30.0), record(today, 38.0)],
                Duration::ZERO,
            )
            .await
            .expect("upsert");

        let recent = store
            .recent(
                &Symbol::parse("PETR4").expect("symbol"),
                Market::Br,
                DataType::Stock,
                DEFAULT_HISTORY_DAYS,
            )
            .await
            .expect("recent");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].date, today);
    }

    #[tokio::test]
    async fn latest_indicator_per_name() {
        let (_dir, store) = open_store();
        let stamp = UtcDateTime::now();
        let indicators = vec![
            EconomicIndicator::new("br", "selic", date!(2024 - 01 - 31), 11.25, stamp).expect("i"),
            EconomicIndicator::new("br", "selic", date!(2024 - 03 - 20), 10.75, stamp).expect("i"),
            EconomicIndicator::new("br", "ipca", date!(2024 - 02 - 29), 4.5, stamp).expect("i"),
        ];
        store
            .upsert_indicators("bcb", &indicators)
            .await
            .expect("upsert");

        let latest = store.latest_indicators("br").await.expect("latest");
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].indicator_name, "ipca");
        assert_eq!(latest[1].value, 10.75);
    }
}
