//! Pipeline configuration.
//!
//! Values come from an optional TOML file and are then overridden from the
//! environment:
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `FINFEED_HOME` | data root (cache, database, backups) |
//! | `FINFEED_ALPHAVANTAGE_API_KEY` | Alpha Vantage key |
//! | `ALPHA_VANTAGE_API_KEY` | fallback for the key above |
//!
//! ```toml
//! default_max_cache_age_hours = 12
//! ingest_concurrency = 2
//!
//! [alphavantage]
//! max_calls_per_minute = 5
//!
//! [[watchlist]]
//! symbol = "PETR4"
//! market = "BR"
//! data_type = "stock"
//! ```

use std::fmt::{Debug, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CacheMode, DataType, FetchRequest, Interval, Market, Symbol, ValidationError};

pub const CONFIG_FILE_NAME: &str = "finfeed.toml";

const ALPHAVANTAGE_URL: &str = "https://www.alphavantage.co/query";
const B3_API_URL: &str = "https://cotacao.b3.com.br/mds/api/v1/DailyFluctuationHistory";
const B3_SCRAPE_URL: &str =
    "https://www.b3.com.br/pt_br/market-data-e-indices/servicos-de-dados/market-data/cotacoes/cotacoes-de-ativos/";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("invalid watchlist entry: {0}")]
    Watchlist(#[from] ValidationError),
}

/// Provider credential. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Debug for ApiKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlphaVantageConfig {
    pub base_url: String,
    pub api_key: Option<ApiKey>,
    pub max_calls_per_minute: u32,
    pub timeout_ms: u64,
}

impl Default for AlphaVantageConfig {
    fn default() -> Self {
        Self {
            base_url: ALPHAVANTAGE_URL.to_string(),
            api_key: None,
            max_calls_per_minute: 5,
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct B3Config {
    /// JSON daily-fluctuation endpoint.
    pub base_url: String,
    /// Quotation page scraped when the JSON endpoint fails.
    pub scrape_url: String,
    pub max_calls_per_minute: u32,
    pub timeout_ms: u64,
}

impl Default for B3Config {
    fn default() -> Self {
        Self {
            base_url: B3_API_URL.to_string(),
            scrape_url: B3_SCRAPE_URL.to_string(),
            max_calls_per_minute: 10,
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub frequency_hours: u64,
    /// Defaults to `<home>/backups`.
    pub dir: Option<PathBuf>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            frequency_hours: 168,
            dir: None,
        }
    }
}

/// One symbol refreshed by batch ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub symbol: String,
    pub market: Market,
    pub data_type: DataType,
    #[serde(default)]
    pub interval: Interval,
}

impl WatchlistEntry {
    pub fn to_request(&self) -> Result<FetchRequest, ValidationError> {
        let symbol = Symbol::parse(&self.symbol)?;
        Ok(FetchRequest::new(symbol, self.market, self.data_type)?.with_interval(self.interval))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub home: Option<PathBuf>,
    pub default_max_cache_age_hours: u64,
    pub ingest_concurrency: usize,
    pub max_pool_size: usize,
    pub logging: LoggingConfig,
    pub backup: BackupConfig,
    pub alphavantage: AlphaVantageConfig,
    pub b3: B3Config,
    pub watchlist: Vec<WatchlistEntry>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            home: None,
            default_max_cache_age_hours: 24,
            ingest_concurrency: 4,
            max_pool_size: 4,
            logging: LoggingConfig::default(),
            backup: BackupConfig::default(),
            alphavantage: AlphaVantageConfig::default(),
            b3: B3Config::default(),
            watchlist: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Load from `path`, or from `<home>/finfeed.toml` when present, then
    /// apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    /// Same as [`PipelineConfig::load`] with an explicit variable lookup.
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = resolve_home(&lookup).join(CONFIG_FILE_NAME);
                if default_path.is_file() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };

        let config = config.with_env_overrides(&lookup);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })
    }

    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(home) = non_empty(lookup("FINFEED_HOME")) {
            self.home = Some(PathBuf::from(home));
        }
        if self.home.is_none() {
            self.home = Some(resolve_home(&lookup));
        }

        let key = non_empty(lookup("FINFEED_ALPHAVANTAGE_API_KEY"))
            .or_else(|| non_empty(lookup("ALPHA_VANTAGE_API_KEY")));
        if let Some(key) = key {
            self.alphavantage.api_key = Some(ApiKey::new(key));
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ingest_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "ingest_concurrency must be at least 1".to_string(),
            ));
        }
        if self.alphavantage.max_calls_per_minute == 0 || self.b3.max_calls_per_minute == 0 {
            return Err(ConfigError::Invalid(
                "max_calls_per_minute must be at least 1".to_string(),
            ));
        }
        for entry in &self.watchlist {
            entry.to_request()?;
        }
        Ok(())
    }

    pub fn home(&self) -> PathBuf {
        self.home
            .clone()
            .unwrap_or_else(|| resolve_home(|name: &str| std::env::var(name).ok()))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.home().join("cache")
    }

    pub fn db_path(&self) -> PathBuf {
        self.home().join("finfeed.duckdb")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.backup
            .dir
            .clone()
            .unwrap_or_else(|| self.home().join("backups"))
    }

    pub fn backup_frequency(&self) -> Duration {
        Duration::from_secs(self.backup.frequency_hours.saturating_mul(3600))
    }

    pub fn max_cache_age(&self) -> Duration {
        Duration::from_secs(self.default_max_cache_age_hours.saturating_mul(3600))
    }

    /// Watchlist entries as live-first requests carrying the configured
    /// cache age.
    pub fn watchlist_requests(&self) -> Result<Vec<FetchRequest>, ValidationError> {
        self.watchlist
            .iter()
            .map(|entry| {
                entry.to_request().map(|request| {
                    request
                        .with_max_cache_age(self.max_cache_age())
                        .with_cache_mode(CacheMode::Refresh)
                })
            })
            .collect()
    }
}

fn resolve_home<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = non_empty(lookup("FINFEED_HOME")) {
        return PathBuf::from(path);
    }
    if let Some(home) = non_empty(lookup("HOME")) {
        return PathBuf::from(home).join(".finfeed");
    }
    PathBuf::from(".finfeed")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}
