//! Tiered fallback resolution.
//!
//! For each request the resolver walks a fixed chain and stops at the first
//! tier that yields records:
//!
//! | Tier | Source | Write-through |
//! |------|--------|---------------|
//! | [`Tier::FreshCache`] | cache entry no older than `max_cache_age` | no |
//! | [`Tier::PersistentStore`] | stored records (providers that keep them) | no |
//! | [`Tier::LivePrimary`] | provider's primary transport | cache + store |
//! | [`Tier::LiveSecondary`] | provider's fallback transport | cache + store |
//! | [`Tier::StaleCache`] | cache entry of any age, flagged stale | no |
//!
//! No tier is retried. The chain restarts from the top on every call; the
//! only state carried between calls is the cache, the store and each
//! provider's rate limiter. When every tier comes up empty the caller gets an
//! [`ExhaustionError`], never an empty record set.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::cache::{CacheHit, CacheKey, CacheStore};
use crate::data_source::{FetchRequest, MarketDataProvider, RawPayload, Transport};
use crate::store::PersistentStore;
use crate::{CanonicalRecord, DataType, Market, ProviderId, Symbol, UtcDateTime};

/// One candidate source in the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    FreshCache,
    PersistentStore,
    LivePrimary,
    LiveSecondary,
    StaleCache,
}

impl Tier {
    /// Priority order, highest first.
    pub const CHAIN: [Self; 5] = [
        Self::FreshCache,
        Self::PersistentStore,
        Self::LivePrimary,
        Self::LiveSecondary,
        Self::StaleCache,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FreshCache => "fresh_cache",
            Self::PersistentStore => "persistent_store",
            Self::LivePrimary => "live_primary",
            Self::LiveSecondary => "live_secondary",
            Self::StaleCache => "stale_cache",
        }
    }

    const fn transport(self) -> Option<Transport> {
        match self {
            Self::LivePrimary => Some(Transport::Primary),
            Self::LiveSecondary => Some(Transport::Secondary),
            _ => None,
        }
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum TierOutcome {
    /// Not applicable to this request or provider.
    Skipped,
    /// Consulted, nothing usable found.
    Miss,
    Failed(String),
}

/// What happened at one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierAttempt {
    pub tier: Tier,
    #[serde(flatten)]
    pub outcome: TierOutcome,
}

impl Display for TierAttempt {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.outcome {
            TierOutcome::Skipped => write!(f, "{}: skipped", self.tier),
            TierOutcome::Miss => write!(f, "{}: miss", self.tier),
            TierOutcome::Failed(message) => write!(f, "{}: failed ({message})", self.tier),
        }
    }
}

/// How current the served records are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Freshness {
    /// Fetched by this call.
    Live,
    /// Cache entry within the caller's maximum age.
    Cached { captured_at: UtcDateTime },
    /// Previously persisted records.
    Stored,
    /// Cache entry older than the caller's maximum age.
    Stale {
        captured_at: UtcDateTime,
        #[serde(rename = "age_secs", serialize_with = "duration_secs")]
        age: Duration,
    },
}

fn duration_secs<S: Serializer>(age: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(age.as_secs())
}

/// Records served for one request, with provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub records: Vec<CanonicalRecord>,
    pub tier: Tier,
    pub provider: ProviderId,
    pub freshness: Freshness,
    pub attempts: Vec<TierAttempt>,
    pub warnings: Vec<String>,
    pub latency_ms: u64,
}

impl Resolution {
    pub const fn is_stale(&self) -> bool {
        matches!(self.freshness, Freshness::Stale { .. })
    }
}

/// Every tier failed or came up empty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no data for {symbol} ({market}/{data_type}): {}", summarize(.attempts, .provider))]
pub struct ExhaustionError {
    pub symbol: Symbol,
    pub market: Market,
    pub data_type: DataType,
    pub provider: Option<ProviderId>,
    pub attempts: Vec<TierAttempt>,
}

fn summarize(attempts: &[TierAttempt], provider: &Option<ProviderId>) -> String {
    if provider.is_none() {
        return "no provider serves this request".to_string();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

enum Step {
    Served {
        records: Vec<CanonicalRecord>,
        freshness: Freshness,
    },
    Passed(TierOutcome),
}

/// Sequences cache, store and live tiers for every request.
pub struct FallbackResolver {
    cache: CacheStore,
    store: Option<PersistentStore>,
    providers: Vec<Arc<dyn MarketDataProvider>>,
}

impl FallbackResolver {
    pub fn new(cache: CacheStore) -> Self {
        Self {
            cache,
            store: None,
            providers: Vec::new(),
        }
    }

    pub fn with_store(mut self, store: PersistentStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Register a provider. The first registered provider that supports a
    /// request serves it.
    pub fn with_provider(mut self, provider: Arc<dyn MarketDataProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn store(&self) -> Option<&PersistentStore> {
        self.store.as_ref()
    }

    pub fn provider_for(&self, req: &FetchRequest) -> Option<&Arc<dyn MarketDataProvider>> {
        self.providers.iter().find(|provider| provider.supports(req))
    }

    /// Walk the tier chain for `req`.
    ///
    /// # Errors
    ///
    /// Returns [`ExhaustionError`] listing every attempt when no tier produced
    /// records inside the request window.
    pub async fn resolve(&self, req: &FetchRequest) -> Result<Resolution, ExhaustionError> {
        let started = Instant::now();
        let label = req.label();

        let Some(provider) = self.provider_for(req) else {
            tracing::error!(request = %label, "no provider serves this request");
            return Err(self.exhausted(req, None, Vec::new()));
        };
        let provider = provider.as_ref();

        let key = match provider.cache_key(req) {
            Ok(key) => Ok(key),
            Err(error) => Err(error.to_string()),
        };

        let mut attempts = Vec::with_capacity(Tier::CHAIN.len());
        let mut warnings = Vec::new();

        for tier in Tier::CHAIN {
            let step = match tier {
                Tier::FreshCache => self.fresh_cache(provider, req, &key).await,
                Tier::PersistentStore => self.persistent_store(provider, req).await,
                Tier::LivePrimary | Tier::LiveSecondary => {
                    self.live(provider, tier, req, &key, &mut warnings).await
                }
                Tier::StaleCache => self.stale_cache(provider, req, &key, &mut warnings).await,
            };

            match step {
                Step::Served { records, freshness } => {
                    let failed = attempts
                        .iter()
                        .filter(|attempt: &&TierAttempt| matches!(attempt.outcome, TierOutcome::Failed(_)))
                        .count();
                    if failed > 0 {
                        warnings.push(format!(
                            "served from '{tier}' after {failed} failed tier(s)"
                        ));
                    }

                    let latency_ms = elapsed_ms(started);
                    tracing::info!(
                        request = %label,
                        provider = %provider.id(),
                        %tier,
                        rows = records.len(),
                        latency_ms,
                        "request resolved"
                    );

                    return Ok(Resolution {
                        records,
                        tier,
                        provider: provider.id(),
                        freshness,
                        attempts,
                        warnings,
                        latency_ms,
                    });
                }
                Step::Passed(outcome) => {
                    tracing::debug!(request = %label, %tier, outcome = ?outcome, "tier passed");
                    attempts.push(TierAttempt { tier, outcome });
                }
            }
        }

        let error = self.exhausted(req, Some(provider.id()), attempts);
        tracing::error!(request = %label, provider = %provider.id(), error = %error, "all tiers exhausted");
        Err(error)
    }

    async fn fresh_cache(
        &self,
        provider: &dyn MarketDataProvider,
        req: &FetchRequest,
        key: &Result<CacheKey, String>,
    ) -> Step {
        if !req.cache_mode.reads_fresh() {
            return Step::Passed(TierOutcome::Skipped);
        }
        let key = match key {
            Ok(key) => key,
            Err(message) => return Step::Passed(TierOutcome::Failed(message.clone())),
        };

        match self.cache.load(key, req.max_cache_age).await {
            Some(hit) => {
                let captured_at = hit.captured_at;
                served_from_cache(provider, req, hit, Freshness::Cached { captured_at })
            }
            None => Step::Passed(TierOutcome::Miss),
        }
    }

    async fn persistent_store(&self, provider: &dyn MarketDataProvider, req: &FetchRequest) -> Step {
        if !req.cache_mode.reads_store() {
            return Step::Passed(TierOutcome::Skipped);
        }
        let Some(store) = self.store.as_ref().filter(|_| provider.reads_persistent_tier()) else {
            return Step::Passed(TierOutcome::Skipped);
        };

        match store
            .query(&req.symbol, Some(req.market), req.data_type, req.window)
            .await
        {
            Ok(records) if records.is_empty() => Step::Passed(TierOutcome::Miss),
            Ok(records) => Step::Served {
                records,
                freshness: Freshness::Stored,
            },
            Err(error) => {
                tracing::warn!(request = %req.label(), %error, "persistent store read failed");
                Step::Passed(TierOutcome::Failed(error.to_string()))
            }
        }
    }

    async fn live(
        &self,
        provider: &dyn MarketDataProvider,
        tier: Tier,
        req: &FetchRequest,
        key: &Result<CacheKey, String>,
        warnings: &mut Vec<String>,
    ) -> Step {
        let Some(transport) = tier.transport() else {
            return Step::Passed(TierOutcome::Skipped);
        };
        if transport == Transport::Secondary && !provider.has_secondary() {
            return Step::Passed(TierOutcome::Skipped);
        }

        let started = Instant::now();
        let fetched_at = UtcDateTime::now();
        let payload = match provider.fetch(transport, req).await {
            Ok(payload) => payload,
            Err(error) => {
                tracing::debug!(request = %req.label(), %tier, code = error.code(), "live fetch failed");
                return Step::Passed(TierOutcome::Failed(error.to_string()));
            }
        };

        let records = match provider.normalize(req, &payload, fetched_at) {
            Ok(records) => records,
            Err(error) => {
                tracing::warn!(request = %req.label(), %tier, %error, "normalization failed");
                return Step::Passed(TierOutcome::Failed(error.to_string()));
            }
        };

        self.write_through(provider, req, key, &payload, &records, started.elapsed(), warnings)
            .await;

        let records = in_window(req, records);
        if records.is_empty() {
            return Step::Passed(TierOutcome::Miss);
        }
        Step::Served {
            records,
            freshness: Freshness::Live,
        }
    }

    async fn stale_cache(
        &self,
        provider: &dyn MarketDataProvider,
        req: &FetchRequest,
        key: &Result<CacheKey, String>,
        warnings: &mut Vec<String>,
    ) -> Step {
        if !req.cache_mode.reads_stale() {
            return Step::Passed(TierOutcome::Skipped);
        }
        let key = match key {
            Ok(key) => key,
            Err(message) => return Step::Passed(TierOutcome::Failed(message.clone())),
        };

        let Some(hit) = self.cache.load_ignoring_age(key).await else {
            return Step::Passed(TierOutcome::Miss);
        };

        let captured_at = hit.captured_at;
        let age = hit.age;
        let step = served_from_cache(provider, req, hit, Freshness::Stale { captured_at, age });
        if matches!(step, Step::Served { .. }) {
            tracing::warn!(
                request = %req.label(),
                captured_at = %captured_at,
                age_secs = age.as_secs(),
                "serving stale cache entry"
            );
            warnings.push(format!(
                "serving stale data captured at {captured_at} ({}h old)",
                age.as_secs() / 3600
            ));
        }
        step
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_through(
        &self,
        provider: &dyn MarketDataProvider,
        req: &FetchRequest,
        key: &Result<CacheKey, String>,
        payload: &RawPayload,
        records: &[CanonicalRecord],
        latency: Duration,
        warnings: &mut Vec<String>,
    ) {
        if req.cache_mode.writes() {
            if let Ok(key) = key {
                if let Err(error) = self.cache.save(key, payload).await {
                    tracing::warn!(key = %key, %error, "cache write-through failed");
                    warnings.push(format!("cache write failed: {error}"));
                }
            }
        }

        if let Some(store) = &self.store {
            if let Err(error) = store.upsert(provider.id(), records, latency).await {
                tracing::warn!(request = %req.label(), %error, "store write-through failed");
                warnings.push(format!("store write failed: {error}"));
            }
        }
    }

    fn exhausted(
        &self,
        req: &FetchRequest,
        provider: Option<ProviderId>,
        attempts: Vec<TierAttempt>,
    ) -> ExhaustionError {
        ExhaustionError {
            symbol: req.symbol.clone(),
            market: req.market,
            data_type: req.data_type,
            provider,
            attempts,
        }
    }
}

fn served_from_cache(
    provider: &dyn MarketDataProvider,
    req: &FetchRequest,
    hit: CacheHit,
    freshness: Freshness,
) -> Step {
    match provider.normalize(req, &hit.payload, hit.captured_at) {
        Ok(records) => {
            let records = in_window(req, records);
            if records.is_empty() {
                Step::Passed(TierOutcome::Miss)
            } else {
                Step::Served { records, freshness }
            }
        }
        Err(error) => {
            tracing::warn!(request = %req.label(), %error, "cached payload failed normalization");
            Step::Passed(TierOutcome::Failed(error.to_string()))
        }
    }
}

fn in_window(req: &FetchRequest, records: Vec<CanonicalRecord>) -> Vec<CanonicalRecord> {
    if req.window.is_none() {
        return records;
    }
    records.into_iter().filter(|record| req.in_window(record)).collect()
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_order_is_fixed() {
        let names: Vec<_> = Tier::CHAIN.iter().map(|tier| tier.as_str()).collect();
        assert_eq!(
            names,
            [
                "fresh_cache",
                "persistent_store",
                "live_primary",
                "live_secondary",
                "stale_cache"
            ]
        );
    }

    #[test]
    fn exhaustion_message_lists_attempts() {
        let error = ExhaustionError {
            symbol: Symbol::parse("XYZ").expect("symbol"),
            market: Market::Us,
            data_type: DataType::Stock,
            provider: Some(ProviderId::Alphavantage),
            attempts: vec![
                TierAttempt {
                    tier: Tier::FreshCache,
                    outcome: TierOutcome::Miss,
                },
                TierAttempt {
                    tier: Tier::LivePrimary,
                    outcome: TierOutcome::Failed("upstream returned status 503".into()),
                },
            ],
        };

        let message = error.to_string();
        assert!(message.starts_with("no data for XYZ (US/stock)"));
        assert!(message.contains("fresh_cache: miss"));
        assert!(message.contains("live_primary: failed (upstream returned status 503)"));
    }

    #[test]
    fn stale_freshness_serializes_age_in_seconds() {
        let freshness = Freshness::Stale {
            captured_at: UtcDateTime::parse("2024-03-04T00:00:00Z").expect("ts"),
            age: Duration::from_secs(25 * 3600),
        };
        let json = serde_json::to_value(freshness).expect("serialize");
        assert_eq!(json["kind"], "stale");
        assert_eq!(json["age_secs"], 90_000);
    }
}
