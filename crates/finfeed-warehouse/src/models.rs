use serde::{Deserialize, Serialize};

/// One daily OHLCV row in `market_data`, keyed by `(symbol, date, data_type)`.
///
/// Dates travel as `YYYY-MM-DD` strings and `last_updated` as RFC 3339, so the
/// warehouse stays independent of the domain crate's typed values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDataRow {
    pub symbol: String,
    pub market: String,
    pub date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub data_type: String,
    pub last_updated: String,
}

/// One scalar observation in `economic_indicators`, keyed by
/// `(country, indicator_name, date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRow {
    pub country: String,
    pub indicator_name: String,
    pub date: String,
    pub value: f64,
    pub last_updated: String,
}

/// Filter for reading `market_data`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarketDataQuery {
    pub symbol: String,
    pub market: Option<String>,
    pub data_type: String,
    /// Inclusive lower bound, `YYYY-MM-DD`.
    pub start: Option<String>,
    /// Inclusive upper bound, `YYYY-MM-DD`.
    pub end: Option<String>,
}

/// An `ingest_log` audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestLogEntry {
    pub request_id: String,
    pub source: String,
    pub dataset: String,
    pub status: String,
    pub row_count: u64,
}
