//! Assembled acquisition pipeline: providers, cache, store and resolver
//! wired from one [`PipelineConfig`].

use std::path::PathBuf;
use std::sync::Arc;

use finfeed_warehouse::WarehouseConfig;
use serde::Serialize;

use crate::adapters::{AlphaVantageClient, B3Client};
use crate::cache::CacheStore;
use crate::config::PipelineConfig;
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::ingest::{IngestReport, Ingestor};
use crate::normalize::EconomicSeries;
use crate::resolver::{FallbackResolver, Resolution};
use crate::store::PersistentStore;
use crate::{
    CanonicalRecord, CoreError, DataType, FetchRequest, Market, ProviderId, Symbol, ValidationError,
};

/// Outcome of refreshing the stored economic indicators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndicatorRefresh {
    /// Series written to the store.
    pub refreshed: Vec<String>,
    /// Observations upserted across all series.
    pub rows: usize,
    /// One entry per series that could not be refreshed.
    pub warnings: Vec<String>,
}

/// A watchlist refresh followed by the scheduled backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchlistUpdate {
    #[serde(flatten)]
    pub report: IngestReport,
    /// Backup written because one was due.
    pub backup: Option<PathBuf>,
    /// Why a due backup could not be written.
    pub backup_error: Option<String>,
}

pub struct Pipeline {
    config: PipelineConfig,
    resolver: Arc<FallbackResolver>,
    alphavantage: Arc<AlphaVantageClient>,
    store: PersistentStore,
}

impl Pipeline {
    /// Open the pipeline against the network.
    pub fn open(config: PipelineConfig) -> Result<Self, CoreError> {
        Self::open_with_client(config, Arc::new(ReqwestHttpClient::new()))
    }

    /// Open the pipeline with a caller-supplied transport.
    pub fn open_with_client(
        config: PipelineConfig,
        http_client: Arc<dyn HttpClient>,
    ) -> Result<Self, CoreError> {
        config.validate()?;

        let store = PersistentStore::open(WarehouseConfig {
            finfeed_home: config.home(),
            db_path: config.db_path(),
            max_pool_size: config.max_pool_size,
        })?;
        let cache = CacheStore::new(config.cache_dir());
        let alphavantage = Arc::new(AlphaVantageClient::new(
            config.alphavantage.clone(),
            Arc::clone(&http_client),
        ));

        let resolver = FallbackResolver::new(cache)
            .with_store(store.clone())
            .with_provider(alphavantage.clone())
            .with_provider(Arc::new(B3Client::new(config.b3.clone(), http_client)));

        tracing::debug!(
            home = %config.home().display(),
            db = %config.db_path().display(),
            "pipeline opened"
        );

        Ok(Self {
            config,
            resolver: Arc::new(resolver),
            alphavantage,
            store,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn resolver(&self) -> &FallbackResolver {
        &self.resolver
    }

    pub fn store(&self) -> &PersistentStore {
        &self.store
    }

    pub async fn fetch(&self, request: &FetchRequest) -> Result<Resolution, CoreError> {
        Ok(self.resolver.resolve(request).await?)
    }

    pub async fn ingest(&self, requests: Vec<FetchRequest>) -> IngestReport {
        Ingestor::new(Arc::clone(&self.resolver), self.config.ingest_concurrency)
            .run(requests)
            .await
    }

    /// Refresh every configured watchlist entry.
    pub async fn ingest_watchlist(&self) -> Result<IngestReport, CoreError> {
        let requests = self.config.watchlist_requests()?;
        Ok(self.ingest(requests).await)
    }

    /// Refresh the watchlist, then back the database up if the configured
    /// frequency has elapsed. A failed backup does not fail the update.
    pub async fn update_watchlist(&self) -> Result<WatchlistUpdate, CoreError> {
        let report = self.ingest_watchlist().await?;

        let (backup, backup_error) = match self.backup(false).await {
            Ok(path) => (path, None),
            Err(error) => {
                tracing::warn!(%error, "scheduled backup failed");
                (None, Some(error.to_string()))
            }
        };
        if let Some(path) = &backup {
            tracing::info!(path = %path.display(), "scheduled backup written");
        }

        Ok(WatchlistUpdate {
            report,
            backup,
            backup_error,
        })
    }

    /// Fetch every macro series published for `country` and upsert it.
    ///
    /// A series that fails is reported as a warning; the others are still
    /// stored. Countries without an upstream fail with a validation error.
    pub async fn refresh_indicators(&self, country: &str) -> Result<IndicatorRefresh, CoreError> {
        let country = country.trim().to_ascii_uppercase();
        if country != EconomicSeries::COUNTRY {
            return Err(CoreError::Validation(ValidationError::UnsupportedIndicatorCountry {
                country,
            }));
        }

        let mut refresh = IndicatorRefresh::default();
        for series in EconomicSeries::ALL {
            let name = series.indicator_name();
            let indicators = match self.alphavantage.fetch_indicators(series).await {
                Ok(indicators) => indicators,
                Err(error) => {
                    tracing::warn!(series = name, %error, "indicator refresh failed");
                    refresh.warnings.push(format!("{name}: {error}"));
                    continue;
                }
            };
            match self
                .store
                .upsert_indicators(ProviderId::Alphavantage.as_str(), &indicators)
                .await
            {
                Ok(rows) => {
                    refresh.rows += rows;
                    refresh.refreshed.push(name.to_owned());
                }
                Err(error) => {
                    tracing::warn!(series = name, %error, "indicator store write failed");
                    refresh.warnings.push(format!("{name}: {error}"));
                }
            }
        }

        tracing::info!(
            %country,
            series = refresh.refreshed.len(),
            rows = refresh.rows,
            "indicators refreshed"
        );
        Ok(refresh)
    }

    /// Stored history for one series over the trailing `days`.
    pub async fn history(
        &self,
        symbol: &Symbol,
        market: Market,
        data_type: DataType,
        days: u32,
    ) -> Result<Vec<CanonicalRecord>, CoreError> {
        Ok(self.store.recent(symbol, market, data_type, days).await?)
    }

    /// Back the database up, unconditionally when `force`, otherwise only
    /// when the configured frequency has elapsed.
    pub async fn backup(&self, force: bool) -> Result<Option<PathBuf>, CoreError> {
        let dir = self.config.backup_dir();
        if force {
            return Ok(Some(self.store.backup(&dir).await?));
        }
        Ok(self
            .store
            .backup_if_due(&dir, self.config.backup_frequency())
            .await?)
    }
}
