use std::sync::Arc;

use super::{context, execute, parse_json};
use crate::cache::CacheKey;
use crate::config::B3Config;
use crate::data_source::{FetchFuture, MarketDataProvider, RawPayload, SourceError, Transport};
use crate::http_client::{HttpClient, HttpRequest};
use crate::normalize::{B3Normalizer, NormalizeError, PayloadNormalizer};
use crate::rate_limiter::RateLimiter;
use crate::{CanonicalRecord, DataType, FetchRequest, Market, ProviderId, UtcDateTime};

const CACHE_FUNCTION: &str = "B3_DAILY_FLUCTUATION";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

/// Brazilian exchange client.
///
/// The JSON API rejects requests without browser-like headers. When it fails,
/// the public quotation page is scraped instead. Both transports share one
/// limiter. FIIs are fetched like stocks and labelled `fii`.
pub struct B3Client {
    config: B3Config,
    http_client: Arc<dyn HttpClient>,
    limiter: RateLimiter,
    normalizer: B3Normalizer,
}

impl B3Client {
    pub fn new(config: B3Config, http_client: Arc<dyn HttpClient>) -> Self {
        let limiter = RateLimiter::new(ProviderId::B3, config.max_calls_per_minute);
        Self {
            config,
            http_client,
            limiter,
            normalizer: B3Normalizer::default(),
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn api_request(&self, req: &FetchRequest) -> HttpRequest {
        HttpRequest::get(self.config.base_url.as_str())
            .with_query("language", "pt-br")
            .with_query("symbol", req.symbol.as_str())
            .with_header("User-Agent", USER_AGENT)
            .with_header("Accept", "application/json, text/plain, */*")
            .with_header("Accept-Language", "en-US,en;q=0.9,pt-BR;q=0.8,pt;q=0.7")
            .with_header("Origin", "https://www.b3.com.br")
            .with_header("Referer", "https://www.b3.com.br/")
            .with_timeout_ms(self.config.timeout_ms)
    }

    pub fn page_request(&self, req: &FetchRequest) -> HttpRequest {
        HttpRequest::get(self.config.scrape_url.as_str())
            .with_query("symbol", req.symbol.as_str())
            .with_header("User-Agent", USER_AGENT)
            .with_header("Accept", "text/html,application/xhtml+xml")
            .with_header("Accept-Language", "pt-BR,pt;q=0.9,en;q=0.8")
            .with_timeout_ms(self.config.timeout_ms)
    }

    async fn fetch_api(&self, req: &FetchRequest) -> Result<RawPayload, SourceError> {
        let request = self.api_request(req);
        self.limiter.acquire().await;
        let response = execute(ProviderId::B3, self.http_client.as_ref(), request).await?;

        let body = parse_json(ProviderId::B3, &response.body)?;
        if body.get("TradgFlr").is_none() {
            return Err(SourceError::schema("b3 body is missing 'TradgFlr'"));
        }
        Ok(RawPayload::Json(body))
    }

    async fn fetch_page(&self, req: &FetchRequest) -> Result<RawPayload, SourceError> {
        let request = self.page_request(req);
        self.limiter.acquire().await;
        let response = execute(ProviderId::B3, self.http_client.as_ref(), request).await?;

        if response.body.trim().is_empty() {
            return Err(SourceError::schema("b3 quotation page is empty"));
        }
        Ok(RawPayload::Html(response.body))
    }
}

impl MarketDataProvider for B3Client {
    fn id(&self) -> ProviderId {
        ProviderId::B3
    }

    fn supports(&self, req: &FetchRequest) -> bool {
        req.market == Market::Br && matches!(req.data_type, DataType::Stock | DataType::Fii)
    }

    fn reads_persistent_tier(&self) -> bool {
        true
    }

    fn has_secondary(&self) -> bool {
        true
    }

    fn cache_key(&self, req: &FetchRequest) -> Result<CacheKey, SourceError> {
        CacheKey::new(CACHE_FUNCTION, req.symbol.as_str())
            .and_then(|key| key.with_interval(req.data_type.as_str()))
            .map_err(|error| SourceError::invalid_request(error.to_string()))
    }

    fn fetch<'a>(&'a self, transport: Transport, req: &'a FetchRequest) -> FetchFuture<'a> {
        Box::pin(async move {
            match transport {
                Transport::Primary => self.fetch_api(req).await,
                Transport::Secondary => self.fetch_page(req).await,
            }
        })
    }

    fn normalize(
        &self,
        req: &FetchRequest,
        payload: &RawPayload,
        fetched_at: UtcDateTime,
    ) -> Result<Vec<CanonicalRecord>, NormalizeError> {
        self.normalizer.normalize(payload, &context(req, fetched_at))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::data_source::SourceErrorKind;
    use crate::http_client::{HttpError, HttpResponse};
    use crate::Symbol;

    struct RecordingHttpClient {
        responses: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl RecordingHttpClient {
        fn new(responses: Vec<Result<HttpResponse, HttpError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().expect("lock").clone()
        }
    }

    impl HttpClient for RecordingHttpClient {
        fn execute<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            self.requests.lock().expect("lock").push(request);
            let response = self
                .responses
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_else(|| Err(HttpError::new("no scripted response")));
            Box::pin(async move { response })
        }
    }

    fn request(symbol: &str, data_type: DataType) -> FetchRequest {
        FetchRequest::new(Symbol::parse(symbol).expect("symbol"), Market::Br, data_type)
            .expect("request")
    }

    #[tokio::test]
    async fn api_request_sends_browser_headers() {
        let body = json!({"TradgFlr": {"scty": {"SctyQtn": []}}}).to_string();
        let http = RecordingHttpClient::new(vec![Ok(HttpResponse::ok(body))]);
        let client = B3Client::new(B3Config::default(), http.clone());

        client
            .fetch(Transport::Primary, &request("PETR4", DataType::Stock))
            .await
            .expect("payload");

        let sent = &http.requests()[0];
        assert_eq!(sent.query_param("language"), Some("pt-br"));
        assert_eq!(sent.query_param("symbol"), Some("PETR4"));
        assert_eq!(sent.headers.get("origin").map(String::as_str), Some("https://www.b3.com.br"));
        assert_eq!(sent.headers.get("referer").map(String::as_str), Some("https://www.b3.com.br/"));
        assert!(sent.headers.get("user-agent").is_some_and(|ua| ua.contains("Chrome")));
    }

    #[tokio::test]
    async fn api_body_without_trading_floor_is_schema_error() {
        let http = RecordingHttpClient::new(vec![Ok(HttpResponse::ok(r#"{"BizSts":{"cd":"NOK"}}"#))]);
        let client = B3Client::new(B3Config::default(), http);

        let err = client
            .fetch(Transport::Primary, &request("PETR4", DataType::Stock))
            .await
            .expect_err("must fail");
        assert_eq!(err.kind(), SourceErrorKind::Schema);
    }

    #[tokio::test]
    async fn page_transport_returns_html_and_normalizes() {
        let page = r#"<table class="table-responsive">
            <tr><td>01/03/2024</td><td>98,10</td><td>99,00</td><td>97,90</td><td>98,80</td></tr>
        </table>"#;
        let http = RecordingHttpClient::new(vec![Ok(HttpResponse::ok(page))]);
        let client = B3Client::new(B3Config::default(), http.clone());
        let req = request("HGLG11", DataType::Fii);

        let payload = client.fetch(Transport::Secondary, &req).await.expect("payload");
        assert!(matches!(payload, RawPayload::Html(_)));
        assert!(http.requests()[0].url.contains("cotacoes-de-ativos"));

        let records = client
            .normalize(&req, &payload, UtcDateTime::now())
            .expect("records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data_type, DataType::Fii);
        assert_eq!(records[0].close, 98.80);
    }

    #[tokio::test(start_paused = true)]
    async fn both_transports_draw_from_one_budget() {
        let config = B3Config {
            max_calls_per_minute: 2,
            ..B3Config::default()
        };
        let http = RecordingHttpClient::new(vec![
            Ok(HttpResponse::with_status(500, "")),
            Ok(HttpResponse::ok("<html></html>")),
        ]);
        let client = B3Client::new(config, http);
        let req = request("PETR4", DataType::Stock);

        let _ = client.fetch(Transport::Primary, &req).await;
        let _ = client.fetch(Transport::Secondary, &req).await;

        assert_eq!(client.limiter().state().await.call_count, 2);
    }

    #[test]
    fn cache_key_separates_stock_and_fii() {
        let client = B3Client::new(B3Config::default(), RecordingHttpClient::new(Vec::new()));

        let stock = client.cache_key(&request("PETR4", DataType::Stock)).expect("key");
        let fii = client.cache_key(&request("PETR4", DataType::Fii)).expect("key");
        assert_eq!(stock.file_name(), "B3_DAILY_FLUCTUATION+PETR4+stock+.json");
        assert_ne!(stock, fii);
    }

    #[test]
    fn serves_only_brazilian_equities_and_funds() {
        let client = B3Client::new(B3Config::default(), RecordingHttpClient::new(Vec::new()));
        assert!(client.supports(&request("PETR4", DataType::Stock)));
        assert!(!client.supports(&FetchRequest::forex("USD", "BRL").expect("fx")));
        assert!(client.reads_persistent_tier());
        assert!(client.has_secondary());
    }
}
