use thiserror::Error;

/// Validation errors raised while constructing domain values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol must start with an ASCII letter: '{ch}'")]
    SymbolInvalidStart { ch: char },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("invalid market '{value}', expected one of US, BR, FOREX")]
    InvalidMarket { value: String },
    #[error("invalid data type '{value}', expected one of stock, bond, fii, forex")]
    InvalidDataType { value: String },
    #[error("invalid interval '{value}', expected one of daily, weekly, monthly")]
    InvalidInterval { value: String },
    #[error("invalid output size '{value}', expected compact or full")]
    InvalidOutputSize { value: String },
    #[error("invalid treasury maturity '{value}', expected one of 3month, 2year, 5year, 7year, 10year, 30year")]
    InvalidMaturity { value: String },
    #[error("invalid source '{value}', expected alphavantage or b3")]
    InvalidSource { value: String },
    #[error("data type '{data_type}' is not available for market '{market}'")]
    UnsupportedCombination { market: String, data_type: String },
    #[error("forex pair must be two 3-letter currency codes, got '{from}'/'{to}'")]
    InvalidForexPair { from: String, to: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
    #[error("date must be YYYY-MM-DD: '{value}'")]
    InvalidDate { value: String },
    #[error("date window start {start} is after end {end}")]
    InvalidWindow { start: String, end: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },
    #[error("bar high must be >= low")]
    InvalidBarRange,
    #[error("bar open/close must be within high/low range")]
    InvalidBarBounds,

    #[error("cache key component '{component}' cannot be empty")]
    EmptyKeyComponent { component: &'static str },
    #[error("indicator field '{field}' cannot be empty")]
    EmptyIndicatorField { field: &'static str },
    #[error("no indicator source covers country '{country}', expected US")]
    UnsupportedIndicatorCountry { country: String },
}

/// Top-level error type for assembling and running the pipeline.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Cache(#[from] crate::cache::CacheError),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error(transparent)]
    Exhausted(#[from] crate::resolver::ExhaustionError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
