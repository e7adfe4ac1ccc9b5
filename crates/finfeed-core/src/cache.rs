//! Durable snapshot cache for raw provider responses.
//!
//! One JSON file per key, shaped `{"timestamp": <ISO-8601>, "data": <payload>}`.
//! Entries are never deleted; they age out logically when a read compares
//! their capture time against the caller's maximum age.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::data_source::RawPayload;
use crate::{UtcDateTime, ValidationError};

/// How a single fetch interacts with the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Read a fresh entry if present, fall back to a stale one, and write
    /// live results through. (Default)
    #[default]
    Use,
    /// Skip the fresh cache and stored rows but still write through and
    /// allow stale fallback.
    Refresh,
    /// Never read from or write to the cache, and never serve stored rows.
    Bypass,
}

impl CacheMode {
    pub const fn reads_fresh(self) -> bool {
        matches!(self, Self::Use)
    }

    /// Whether previously persisted rows may serve the request.
    pub const fn reads_store(self) -> bool {
        matches!(self, Self::Use)
    }

    pub const fn reads_stale(self) -> bool {
        !matches!(self, Self::Bypass)
    }

    pub const fn writes(self) -> bool {
        !matches!(self, Self::Bypass)
    }
}

/// Deterministic identity of a cached upstream call.
///
/// Rendered as `FUNCTION+SYMBOL+INTERVAL+OUTPUTSIZE` with each component
/// percent-encoded. `+` is always encoded inside a component, so distinct
/// parameter tuples can never render to the same file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    function: String,
    symbol: String,
    interval: Option<String>,
    output_size: Option<String>,
}

impl CacheKey {
    pub fn new(function: impl Into<String>, symbol: impl Into<String>) -> Result<Self, ValidationError> {
        Ok(Self {
            function: non_empty("function", function.into())?,
            symbol: non_empty("symbol", symbol.into())?,
            interval: None,
            output_size: None,
        })
    }

    pub fn with_interval(mut self, interval: impl Into<String>) -> Result<Self, ValidationError> {
        self.interval = Some(non_empty("interval", interval.into())?);
        Ok(self)
    }

    pub fn with_output_size(mut self, output_size: impl Into<String>) -> Result<Self, ValidationError> {
        self.output_size = Some(non_empty("output_size", output_size.into())?);
        Ok(self)
    }

    pub fn file_name(&self) -> String {
        let parts = [
            Some(self.function.as_str()),
            Some(self.symbol.as_str()),
            self.interval.as_deref(),
            self.output_size.as_deref(),
        ];
        let stem = parts
            .iter()
            .map(|part| part.map(|value| urlencoding::encode(value).into_owned()).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("+");
        format!("{stem}.json")
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_name().trim_end_matches(".json"))
    }
}

fn non_empty(component: &'static str, value: String) -> Result<String, ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyKeyComponent { component });
    }
    Ok(value)
}

/// Errors raised while writing cache entries.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    timestamp: UtcDateTime,
    data: Value,
}

/// A payload read back from the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub payload: RawPayload,
    pub captured_at: UtcDateTime,
    pub age: Duration,
}

/// File-backed cache shared by all fetches.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: Arc<PathBuf>,
}

impl CacheStore {
    /// Cache rooted at `root`; the directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    /// Store `payload` under `key`, captured now. Replaces any prior entry.
    pub async fn save(&self, key: &CacheKey, payload: &RawPayload) -> Result<(), CacheError> {
        self.save_at(key, payload, UtcDateTime::now()).await
    }

    /// Store `payload` under `key` with an explicit capture time.
    ///
    /// The entry is written to a temporary sibling and renamed into place, so
    /// readers see either the previous entry or the new one, never a torn file.
    pub async fn save_at(
        &self,
        key: &CacheKey,
        payload: &RawPayload,
        captured_at: UtcDateTime,
    ) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(self.root.as_path()).await?;

        let file = CacheFile {
            timestamp: captured_at,
            data: payload.clone().into_cached(),
        };
        let bytes = serde_json::to_vec(&file)?;

        let target = self.path_for(key);
        let staging = self
            .root
            .join(format!(".{}.{}.tmp", key.file_name(), uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&staging, bytes).await?;
        if let Err(error) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(error.into());
        }

        tracing::debug!(key = %key, "cache entry written");
        Ok(())
    }

    /// Entry for `key` if its age is at most `max_age` (inclusive).
    pub async fn load(&self, key: &CacheKey, max_age: Duration) -> Option<CacheHit> {
        self.load_at(key, max_age, UtcDateTime::now()).await
    }

    /// Same as [`CacheStore::load`] with ages measured against `now`.
    pub async fn load_at(
        &self,
        key: &CacheKey,
        max_age: Duration,
        now: UtcDateTime,
    ) -> Option<CacheHit> {
        let hit = self.read_entry(key, now).await?;
        if hit.age <= max_age {
            Some(hit)
        } else {
            tracing::debug!(key = %key, age_secs = hit.age.as_secs(), "cache entry expired");
            None
        }
    }

    /// Entry for `key` regardless of age. Only for degraded stale reads.
    pub async fn load_ignoring_age(&self, key: &CacheKey) -> Option<CacheHit> {
        self.read_entry(key, UtcDateTime::now()).await
    }

    async fn read_entry(&self, key: &CacheKey, now: UtcDateTime) -> Option<CacheHit> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => return None,
            Err(error) => {
                tracing::warn!(key = %key, %error, "cache entry unreadable");
                return None;
            }
        };

        let file: CacheFile = match serde_json::from_slice(&bytes) {
            Ok(file) => file,
            Err(error) => {
                tracing::warn!(key = %key, %error, "cache entry corrupt, treating as absent");
                return None;
            }
        };

        Some(CacheHit {
            payload: RawPayload::from_cached(file.data),
            captured_at: file.timestamp,
            age: file.timestamp.age_at(now),
        })
    }
}
