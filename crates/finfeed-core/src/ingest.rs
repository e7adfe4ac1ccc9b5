//! Batch ingestion of many requests through one resolver.
//!
//! Requests run concurrently up to a fixed bound. Each one walks the full
//! fallback chain independently; providers still meter their own calls, so
//! the bound only caps local work in flight.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::resolver::{FallbackResolver, Tier};
use crate::{DataType, FetchRequest, Market, ProviderId, Symbol};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Served {
        tier: Tier,
        provider: ProviderId,
        rows: usize,
        stale: bool,
    },
    Failed {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestEntry {
    pub symbol: Symbol,
    pub market: Market,
    pub data_type: DataType,
    #[serde(flatten)]
    pub outcome: IngestOutcome,
}

/// One entry per request, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub entries: Vec<IngestEntry>,
    pub elapsed_ms: u64,
}

impl IngestReport {
    pub fn succeeded(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry.outcome, IngestOutcome::Served { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.entries.len() - self.succeeded()
    }

    pub fn stale(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry.outcome, IngestOutcome::Served { stale: true, .. }))
            .count()
    }
}

pub struct Ingestor {
    resolver: Arc<FallbackResolver>,
    concurrency: usize,
}

impl Ingestor {
    pub fn new(resolver: Arc<FallbackResolver>, concurrency: usize) -> Self {
        Self {
            resolver,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run(&self, requests: Vec<FetchRequest>) -> IngestReport {
        let started = Instant::now();
        let total = requests.len();
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        tracing::info!(requests = total, concurrency = self.concurrency, "ingest started");

        for (index, request) in requests.iter().cloned().enumerate() {
            let resolver = Arc::clone(&self.resolver);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => resolve_one(&resolver, &request).await,
                    Err(_) => IngestOutcome::Failed {
                        message: "ingest cancelled".to_string(),
                    },
                };
                (index, outcome)
            });
        }

        let mut outcomes: Vec<Option<IngestOutcome>> = vec![None; total];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(error) => tracing::error!(%error, "ingest task aborted"),
            }
        }

        let entries: Vec<IngestEntry> = requests
            .into_iter()
            .zip(outcomes)
            .map(|(request, outcome)| IngestEntry {
                symbol: request.symbol,
                market: request.market,
                data_type: request.data_type,
                outcome: outcome.unwrap_or_else(|| IngestOutcome::Failed {
                    message: "ingest task aborted".to_string(),
                }),
            })
            .collect();

        let report = IngestReport {
            entries,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            stale = report.stale(),
            elapsed_ms = report.elapsed_ms,
            "ingest finished"
        );
        report
    }
}

async fn resolve_one(resolver: &FallbackResolver, request: &FetchRequest) -> IngestOutcome {
    match resolver.resolve(request).await {
        Ok(resolution) => IngestOutcome::Served {
            tier: resolution.tier,
            provider: resolution.provider,
            rows: resolution.records.len(),
            stale: resolution.is_stale(),
        },
        Err(error) => IngestOutcome::Failed {
            message: error.to_string(),
        },
    }
}
