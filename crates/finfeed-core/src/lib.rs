//! # Finfeed Core
//!
//! Market-data acquisition pipeline for equities, FX pairs and treasury
//! yields.
//!
//! ## Overview
//!
//! This crate turns heterogeneous upstreams into one stream of canonical
//! daily records:
//!
//! - **Per-provider rate limiting** over a rolling one-minute window
//! - **File-backed response cache** with age-based freshness
//! - **Normalizers** isolating each upstream payload shape
//! - **Tiered fallback resolution** from cache, store and live transports
//! - **Persistent store** with idempotent upserts (via `finfeed-warehouse`)
//! - **Batch ingestion** with bounded concurrency
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Alpha Vantage and B3 clients |
//! | [`cache`] | Snapshot cache of raw payloads |
//! | [`config`] | TOML + environment configuration |
//! | [`data_source`] | Provider contract and request/payload types |
//! | [`domain`] | Domain models (CanonicalRecord, Symbol, Market, ...) |
//! | [`error`] | Core error types |
//! | [`http_client`] | HTTP client abstraction |
//! | [`ingest`] | Concurrent batch ingestion |
//! | [`normalize`] | Raw payload to canonical records |
//! | [`pipeline`] | Fully wired pipeline |
//! | [`rate_limiter`] | Rolling-window call budget |
//! | [`resolver`] | Fallback tier chain |
//! | [`source`] | Provider identifiers |
//! | [`store`] | Async persistent store adapter |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use finfeed_core::{DataType, FetchRequest, Market, Pipeline, PipelineConfig, Symbol};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::open(PipelineConfig::load(None)?)?;
//!
//!     let request = FetchRequest::new(Symbol::parse("PETR4")?, Market::Br, DataType::Stock)?;
//!     let resolution = pipeline.fetch(&request).await?;
//!
//!     println!(
//!         "{} rows from {} ({})",
//!         resolution.records.len(),
//!         resolution.tier,
//!         resolution.provider
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  CLI / Ingestor │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ FallbackResolver│────▶│ CacheStore       │
//! │                 │────▶│ PersistentStore  │
//! └────────┬────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Provider client │────▶│ RateLimiter      │
//! │ (+ Normalizer)  │────▶│ HTTP Client      │
//! └─────────────────┘     └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Live failures are classified by [`SourceErrorKind`] and never abort
//! resolution; they are recorded as tier attempts:
//!
//! ```rust
//! use finfeed_core::{SourceError, SourceErrorKind};
//!
//! fn describe(error: &SourceError) -> &'static str {
//!     match error.kind() {
//!         SourceErrorKind::RateLimited => "upstream quota exhausted",
//!         SourceErrorKind::Schema => "unexpected payload shape",
//!         _ => "upstream unavailable",
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! - API keys come from the config file or environment and are never logged
//! - Logged request URLs have credential parameters masked

pub mod adapters;
pub mod cache;
pub mod config;
pub mod data_source;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod ingest;
pub mod normalize;
pub mod pipeline;
pub mod rate_limiter;
pub mod resolver;
pub mod source;
pub mod store;

// Adapter implementations
pub use adapters::{AlphaVantageClient, B3Client};

// Caching
pub use cache::{CacheError, CacheHit, CacheKey, CacheMode, CacheStore};

// Configuration
pub use config::{ApiKey, ConfigError, PipelineConfig, WatchlistEntry};

// Provider contract and types
pub use data_source::{
    FetchFuture, FetchRequest, MarketDataProvider, RawPayload, SourceError, SourceErrorKind,
    Transport, DEFAULT_MAX_CACHE_AGE,
};

// Domain models
pub use domain::{
    format_iso_date, parse_iso_date, CanonicalRecord, DataType, DateWindow, EconomicIndicator,
    Interval, Market, Maturity, OutputSize, Symbol, UtcDateTime,
};

// Error types
pub use error::{CoreError, ValidationError};

// HTTP client types
pub use http_client::{HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient};

// Batch ingestion
pub use ingest::{IngestEntry, IngestOutcome, IngestReport, Ingestor};

// Normalizers
pub use normalize::{EconomicSeries, NormalizeContext, NormalizeError, PayloadNormalizer};

// Pipeline
pub use pipeline::{IndicatorRefresh, Pipeline, WatchlistUpdate};

// Rate limiting
pub use rate_limiter::{RateLimiter, RateLimiterState};

// Resolution
pub use resolver::{
    ExhaustionError, FallbackResolver, Freshness, Resolution, Tier, TierAttempt, TierOutcome,
};

// Source identifiers
pub use source::ProviderId;

// Persistent store
pub use store::{PersistentStore, StoreError, DEFAULT_HISTORY_DAYS};

// Warehouse (re-exported from finfeed-warehouse)
pub use finfeed_warehouse::{Warehouse, WarehouseConfig, WarehouseError};
