//! Provider contract and request/payload types.
//!
//! This module defines the contract (`MarketDataProvider`) every upstream
//! integration follows, the immutable [`FetchRequest`] that drives tier
//! selection, and the transport-level [`SourceError`] taxonomy.
//!
//! # Example
//!
//! ```rust,ignore
//! use finfeed_core::{DataType, FetchRequest, Market, Symbol};
//!
//! let request = FetchRequest::new(Symbol::parse("PETR4")?, Market::Br, DataType::Stock)?
//!     .use_cache(true)
//!     .with_max_cache_age(std::time::Duration::from_secs(6 * 3600));
//! ```

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{CacheKey, CacheMode};
use crate::normalize::NormalizeError;
use crate::{
    CanonicalRecord, DataType, DateWindow, Interval, Market, Maturity, OutputSize, ProviderId,
    Symbol, UtcDateTime, ValidationError,
};

/// Default tolerated age of a cached payload for fresh reads.
pub const DEFAULT_MAX_CACHE_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Which live path of a provider to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Primary,
    Secondary,
}

impl Transport {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl Display for Transport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw upstream response as received, before normalization.
///
/// Cached verbatim: JSON bodies as JSON, scraped pages as a JSON string.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    Json(Value),
    Html(String),
}

impl RawPayload {
    /// Rebuild a payload from its cached `data` value.
    pub fn from_cached(value: Value) -> Self {
        match value {
            Value::String(body) => Self::Html(body),
            other => Self::Json(other),
        }
    }

    pub fn into_cached(self) -> Value {
        match self {
            Self::Json(value) => value,
            Self::Html(body) => Value::String(body),
        }
    }

    pub const fn format(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::Html(_) => "html",
        }
    }
}

/// One fetch invocation. Immutable once built; drives tier selection.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub symbol: Symbol,
    pub market: Market,
    pub data_type: DataType,
    pub interval: Interval,
    pub output_size: OutputSize,
    pub cache_mode: CacheMode,
    pub max_cache_age: Duration,
    pub window: Option<DateWindow>,
}

impl FetchRequest {
    /// Build a request with daily interval, full history and a 24h cache age.
    pub fn new(symbol: Symbol, market: Market, data_type: DataType) -> Result<Self, ValidationError> {
        let supported = matches!(
            (market, data_type),
            (Market::Us, DataType::Stock | DataType::Bond)
                | (Market::Forex, DataType::Forex)
                | (Market::Br, DataType::Stock | DataType::Fii)
        );
        if !supported {
            return Err(ValidationError::UnsupportedCombination {
                market: market.to_string(),
                data_type: data_type.to_string(),
            });
        }

        Ok(Self {
            symbol,
            market,
            data_type,
            interval: Interval::Daily,
            output_size: OutputSize::Full,
            cache_mode: CacheMode::Use,
            max_cache_age: DEFAULT_MAX_CACHE_AGE,
            window: None,
        })
    }

    /// Request for a currency pair such as `EUR`/`USD`, stored as `EURUSD`.
    pub fn forex(from: &str, to: &str) -> Result<Self, ValidationError> {
        let from = from.trim().to_ascii_uppercase();
        let to = to.trim().to_ascii_uppercase();
        let is_code = |code: &str| code.len() == 3 && code.chars().all(|ch| ch.is_ascii_alphabetic());
        if !is_code(&from) || !is_code(&to) {
            return Err(ValidationError::InvalidForexPair { from, to });
        }

        let symbol = Symbol::parse(&format!("{from}{to}"))?;
        Self::new(symbol, Market::Forex, DataType::Forex)
    }

    /// Request for a US treasury yield series.
    pub fn treasury_yield(maturity: Maturity) -> Result<Self, ValidationError> {
        Self::new(maturity.series_symbol(), Market::Us, DataType::Bond)
    }

    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_output_size(mut self, output_size: OutputSize) -> Self {
        self.output_size = output_size;
        self
    }

    pub fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self {
        self.cache_mode = cache_mode;
        self
    }

    /// `false` bypasses the cache for reads and writes.
    pub fn use_cache(self, use_cache: bool) -> Self {
        self.with_cache_mode(if use_cache {
            CacheMode::Use
        } else {
            CacheMode::Bypass
        })
    }

    pub fn with_max_cache_age(mut self, max_cache_age: Duration) -> Self {
        self.max_cache_age = max_cache_age;
        self
    }

    pub fn with_window(mut self, window: DateWindow) -> Self {
        self.window = Some(window);
        self
    }

    /// Human-readable identity used in logs and reports.
    pub fn label(&self) -> String {
        format!("{}:{}:{}", self.market, self.symbol, self.data_type)
    }

    pub fn in_window(&self, record: &CanonicalRecord) -> bool {
        self.window.map_or(true, |window| window.contains(record.date))
    }
}

/// Transport-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorKind {
    /// The provider cannot serve this request shape.
    Unsupported,
    /// Network failure or timeout.
    Transport,
    /// The upstream answered with a status other than 200.
    UpstreamStatus,
    /// The upstream answered 200 with an error-flagged body.
    UpstreamError,
    /// The upstream reported that its own quota is exhausted.
    RateLimited,
    /// The body is not in the expected shape.
    Schema,
    InvalidRequest,
}

/// Structured source error consumed by the fallback resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
}

impl SourceError {
    fn new(kind: SourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Unsupported, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Transport, message)
    }

    pub fn upstream_status(status: u16) -> Self {
        Self::new(
            SourceErrorKind::UpstreamStatus,
            format!("upstream returned status {status}"),
        )
    }

    pub fn upstream_error(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::UpstreamError, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::RateLimited, message)
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Schema, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::InvalidRequest, message)
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Unsupported => "source.unsupported",
            SourceErrorKind::Transport => "source.transport",
            SourceErrorKind::UpstreamStatus => "source.upstream_status",
            SourceErrorKind::UpstreamError => "source.upstream_error",
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::Schema => "source.schema",
            SourceErrorKind::InvalidRequest => "source.invalid_request",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

impl From<crate::http_client::HttpError> for SourceError {
    fn from(error: crate::http_client::HttpError) -> Self {
        Self::transport(error.message())
    }
}

/// Boxed future returned by live provider calls.
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<RawPayload, SourceError>> + Send + 'a>>;

/// Upstream integration contract.
///
/// A provider owns its transport, its rate limiter and its payload
/// normalizer. The resolver only sequences tiers and never inspects
/// provider-specific shapes.
///
/// # Required Methods
///
/// | Method | Description |
/// |--------|-------------|
/// | [`id`](MarketDataProvider::id) | Unique provider identifier |
/// | [`supports`](MarketDataProvider::supports) | Whether this provider serves a request |
/// | [`cache_key`](MarketDataProvider::cache_key) | Deterministic cache key for a request |
/// | [`fetch`](MarketDataProvider::fetch) | Rate-limited live call on one transport |
/// | [`normalize`](MarketDataProvider::normalize) | Raw payload to canonical records |
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// concurrent caller so that all of them funnel through its limiter.
pub trait MarketDataProvider: Send + Sync {
    /// Returns the unique provider identifier.
    fn id(&self) -> ProviderId;

    /// Whether this provider serves the request's market and data type.
    fn supports(&self, req: &FetchRequest) -> bool;

    /// Whether previously persisted records are a read tier for this provider.
    fn reads_persistent_tier(&self) -> bool {
        false
    }

    /// Whether a secondary live transport exists.
    fn has_secondary(&self) -> bool {
        false
    }

    /// Derives the cache key for a request.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the request cannot be mapped to an upstream call.
    fn cache_key(&self, req: &FetchRequest) -> Result<CacheKey, SourceError>;

    /// Acquires a rate-limit slot and performs one live call.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] on network failure, non-200 status, or an
    /// error-flagged or malformed body.
    fn fetch<'a>(&'a self, transport: Transport, req: &'a FetchRequest) -> FetchFuture<'a>;

    /// Translates a raw payload into canonical records stamped with `fetched_at`.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizeError`] when the expected shape is missing.
    fn normalize(
        &self,
        req: &FetchRequest,
        payload: &RawPayload,
        fetched_at: UtcDateTime,
    ) -> Result<Vec<CanonicalRecord>, NormalizeError>;
}
