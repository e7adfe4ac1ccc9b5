//! Upstream clients implementing [`MarketDataProvider`](crate::MarketDataProvider).
//!
//! | Client | Primary | Secondary | Store tier | Budget |
//! |--------|---------|-----------|------------|--------|
//! | [`AlphaVantageClient`] | JSON query API | none | no | 5/min |
//! | [`B3Client`] | JSON daily fluctuation API | HTML quotation page | yes | 10/min |

mod alphavantage;
mod b3;

use std::time::Instant;

use crate::data_source::{FetchRequest, SourceError};
use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::normalize::NormalizeContext;
use crate::{ProviderId, UtcDateTime};

pub use alphavantage::AlphaVantageClient;
pub use b3::B3Client;

/// Run one request and reject anything but `200 OK`.
///
/// Only the redacted URL is ever logged.
async fn execute(
    provider: ProviderId,
    http_client: &dyn HttpClient,
    request: HttpRequest,
) -> Result<HttpResponse, SourceError> {
    let url = request.redacted_url();
    let started = Instant::now();
    tracing::debug!(%provider, %url, "upstream request");

    let response = http_client.execute(request).await.map_err(|error| {
        tracing::debug!(%provider, %url, error = error.message(), timed_out = error.timed_out(), "upstream transport failure");
        SourceError::transport(format!("{provider} transport error: {}", error.message()))
    })?;

    tracing::debug!(
        %provider,
        status = response.status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "upstream response"
    );

    if !response.is_ok() {
        return Err(SourceError::upstream_status(response.status));
    }
    Ok(response)
}

fn context<'a>(req: &'a FetchRequest, fetched_at: UtcDateTime) -> NormalizeContext<'a> {
    NormalizeContext {
        symbol: &req.symbol,
        market: req.market,
        data_type: req.data_type,
        fetched_at,
    }
}

fn parse_json(provider: ProviderId, body: &str) -> Result<serde_json::Value, SourceError> {
    serde_json::from_str(body)
        .map_err(|error| SourceError::schema(format!("{provider} returned a non-JSON body: {error}")))
}
