use std::sync::Arc;

use serde_json::Value;

use super::{context, execute, parse_json};
use crate::cache::CacheKey;
use crate::config::AlphaVantageConfig;
use crate::data_source::{FetchFuture, MarketDataProvider, RawPayload, SourceError, Transport};
use crate::http_client::{HttpClient, HttpRequest};
use crate::normalize::{
    normalize_indicators, AlphaVantageFunction, AlphaVantageNormalizer, EconomicSeries,
    NormalizeError, PayloadNormalizer,
};
use crate::rate_limiter::RateLimiter;
use crate::{
    CanonicalRecord, DataType, EconomicIndicator, FetchRequest, Market, Maturity, ProviderId,
    UtcDateTime,
};

/// Alpha Vantage REST client: equities, FX pairs, treasury yields and US
/// macro indicators.
pub struct AlphaVantageClient {
    config: AlphaVantageConfig,
    http_client: Arc<dyn HttpClient>,
    limiter: RateLimiter,
}

impl AlphaVantageClient {
    pub fn new(config: AlphaVantageConfig, http_client: Arc<dyn HttpClient>) -> Self {
        let limiter = RateLimiter::new(ProviderId::Alphavantage, config.max_calls_per_minute);
        Self {
            config,
            http_client,
            limiter,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    fn function(req: &FetchRequest) -> Result<AlphaVantageFunction, SourceError> {
        AlphaVantageFunction::for_request(req).ok_or_else(|| {
            SourceError::unsupported(format!("alphavantage does not serve {}", req.data_type))
        })
    }

    fn maturity(req: &FetchRequest) -> Result<Maturity, SourceError> {
        Maturity::from_series_symbol(&req.symbol).ok_or_else(|| {
            SourceError::invalid_request(format!(
                "'{}' is not a treasury series symbol",
                req.symbol
            ))
        })
    }

    /// Split a six-letter pair symbol such as `EURUSD`.
    fn currency_pair(req: &FetchRequest) -> Result<(&str, &str), SourceError> {
        let symbol = req.symbol.as_str();
        if symbol.len() != 6 || !symbol.is_char_boundary(3) {
            return Err(SourceError::invalid_request(format!(
                "'{symbol}' is not a currency pair"
            )));
        }
        Ok(symbol.split_at(3))
    }

    /// The upstream request for `req`, including the API key.
    pub fn build_request(&self, req: &FetchRequest) -> Result<HttpRequest, SourceError> {
        let api_key = self.config.api_key.as_ref().ok_or_else(|| {
            SourceError::invalid_request("alphavantage api key is not configured")
        })?;
        let function = Self::function(req)?;

        let mut request = HttpRequest::get(self.config.base_url.as_str())
            .with_query("function", function.as_str())
            .with_timeout_ms(self.config.timeout_ms);

        request = match function {
            AlphaVantageFunction::TreasuryYield => request
                .with_query("interval", req.interval.as_str())
                .with_query("maturity", Self::maturity(req)?.as_str()),
            AlphaVantageFunction::FxDaily
            | AlphaVantageFunction::FxWeekly
            | AlphaVantageFunction::FxMonthly => {
                let (from, to) = Self::currency_pair(req)?;
                request
                    .with_query("from_symbol", from)
                    .with_query("to_symbol", to)
                    .with_query("outputsize", req.output_size.as_str())
            }
            _ => request
                .with_query("symbol", req.symbol.as_str())
                .with_query("outputsize", req.output_size.as_str()),
        };

        Ok(request.with_query("apikey", api_key.expose()))
    }

    async fn fetch_primary(&self, req: &FetchRequest) -> Result<RawPayload, SourceError> {
        let function = Self::function(req)?;
        let request = self.build_request(req)?;

        self.limiter.acquire().await;
        let response = execute(ProviderId::Alphavantage, self.http_client.as_ref(), request).await?;

        let body = parse_json(ProviderId::Alphavantage, &response.body)?;
        check_body(function.as_str(), function.schema().key, &body)?;
        Ok(RawPayload::Json(body))
    }

    /// The upstream request for one macro series, including the API key.
    pub fn build_indicator_request(&self, series: EconomicSeries) -> Result<HttpRequest, SourceError> {
        let api_key = self.config.api_key.as_ref().ok_or_else(|| {
            SourceError::invalid_request("alphavantage api key is not configured")
        })?;

        Ok(HttpRequest::get(self.config.base_url.as_str())
            .with_query("function", series.function())
            .with_timeout_ms(self.config.timeout_ms)
            .with_query("apikey", api_key.expose()))
    }

    /// Every published observation of one US macro series. Shares the
    /// client's call budget with price requests.
    pub async fn fetch_indicators(
        &self,
        series: EconomicSeries,
    ) -> Result<Vec<EconomicIndicator>, SourceError> {
        let request = self.build_indicator_request(series)?;

        self.limiter.acquire().await;
        let fetched_at = UtcDateTime::now();
        let response = execute(ProviderId::Alphavantage, self.http_client.as_ref(), request).await?;

        let body = parse_json(ProviderId::Alphavantage, &response.body)?;
        check_body(series.function(), EconomicSeries::KEY, &body)?;
        normalize_indicators(series, &body, fetched_at)
            .map_err(|error| SourceError::schema(format!("{}: {error}", series.function())))
    }
}

/// Alpha Vantage reports most failures with `200 OK` and a flag key.
fn check_body(function: &str, key: &str, body: &Value) -> Result<(), SourceError> {
    let Some(object) = body.as_object() else {
        return Err(SourceError::schema("alphavantage body is not a JSON object"));
    };

    if let Some(message) = object.get("Error Message") {
        return Err(SourceError::upstream_error(format!(
            "alphavantage error: {}",
            text(message)
        )));
    }
    for notice in ["Note", "Information"] {
        if let Some(message) = object.get(notice) {
            return Err(SourceError::rate_limited(format!(
                "alphavantage throttled: {}",
                text(message)
            )));
        }
    }

    if !object.contains_key(key) {
        return Err(SourceError::schema(format!(
            "alphavantage body for {function} is missing '{key}'"
        )));
    }
    Ok(())
}

fn text(value: &Value) -> String {
    value
        .as_str()
        .map_or_else(|| value.to_string(), str::to_owned)
}

impl MarketDataProvider for AlphaVantageClient {
    fn id(&self) -> ProviderId {
        ProviderId::Alphavantage
    }

    fn supports(&self, req: &FetchRequest) -> bool {
        matches!(
            (req.market, req.data_type),
            (Market::Us, DataType::Stock | DataType::Bond) | (Market::Forex, DataType::Forex)
        )
    }

    fn cache_key(&self, req: &FetchRequest) -> Result<CacheKey, SourceError> {
        let function = Self::function(req)?;
        let key = match function {
            AlphaVantageFunction::TreasuryYield => {
                CacheKey::new(function.as_str(), Self::maturity(req)?.as_str())
                    .and_then(|key| key.with_interval(req.interval.as_str()))
            }
            _ => CacheKey::new(function.as_str(), req.symbol.as_str())
                .and_then(|key| key.with_interval(req.interval.as_str()))
                .and_then(|key| key.with_output_size(req.output_size.as_str())),
        };
        key.map_err(|error| SourceError::invalid_request(error.to_string()))
    }

    fn fetch<'a>(&'a self, transport: Transport, req: &'a FetchRequest) -> FetchFuture<'a> {
        Box::pin(async move {
            match transport {
                Transport::Primary => self.fetch_primary(req).await,
                Transport::Secondary => Err(SourceError::unsupported(
                    "alphavantage has no secondary transport",
                )),
            }
        })
    }

    fn normalize(
        &self,
        req: &FetchRequest,
        payload: &RawPayload,
        fetched_at: UtcDateTime,
    ) -> Result<Vec<CanonicalRecord>, NormalizeError> {
        let function = AlphaVantageFunction::for_request(req).ok_or(NormalizeError::UnsupportedFormat {
            format: "alphavantage",
        })?;
        AlphaVantageNormalizer::new(function).normalize(payload, &context(req, fetched_at))
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::config::ApiKey;
    use crate::data_source::SourceErrorKind;
    use crate::http_client::{HttpError, HttpResponse};
    use crate::{Interval, Symbol};

    struct RecordingHttpClient {
        response: Result<HttpResponse, HttpError>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl RecordingHttpClient {
        fn new(response: Result<HttpResponse, HttpError>) -> Arc<Self> {
            Arc::new(Self {
                response,
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
            let response = self.response.clone();
            Box::pin(async move { response })
        }
    }

    fn client(http: Arc<RecordingHttpClient>) -> AlphaVantageClient {
        let config = AlphaVantageConfig {
            api_key: Some(ApiKey::new("test-key")),
            ..AlphaVantageConfig::default()
        };
        AlphaVantageClient::new(config, http)
    }

    fn stock(symbol: &str) -> FetchRequest {
        FetchRequest::new(Symbol::parse(symbol).expect("symbol"), Market::Us, DataType::Stock)
            .expect("request")
    }

    fn daily_body() -> String {
        json!({
            "Time Series (Daily)": {
                "2024-03-01": {"1. open": "185.0", "2. high": "188.0", "3. low": "184.5", "4. close": "187.9", "5. volume": "3900000"}
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn equity_request_carries_function_symbol_and_key() {
        let http = RecordingHttpClient::new(Ok(HttpResponse::ok(daily_body())));
        let client = client(http.clone());

        let payload = client
            .fetch(Transport::Primary, &stock("IBM"))
            .await
            .expect("payload");
        assert!(matches!(payload, RawPayload::Json(_)));

        let requests = http.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].query_param("function"), Some("TIME_SERIES_DAILY"));
        assert_eq!(requests[0].query_param("symbol"), Some("IBM"));
        assert_eq!(requests[0].query_param("outputsize"), Some("full"));
        assert_eq!(requests[0].query_param("apikey"), Some("test-key"));
        assert_eq!(requests[0].timeout_ms, 10_000);
    }

    #[test]
    fn forex_and_treasury_use_their_own_parameters() {
        let client = client(RecordingHttpClient::new(Ok(HttpResponse::ok("{}"))));

        let fx = client
            .build_request(&FetchRequest::forex("EUR", "USD").expect("fx"))
            .expect("request");
        assert_eq!(fx.query_param("function"), Some("FX_DAILY"));
        assert_eq!(fx.query_param("from_symbol"), Some("EUR"));
        assert_eq!(fx.query_param("to_symbol"), Some("USD"));
        assert_eq!(fx.query_param("symbol"), None);

        let treasury = client
            .build_request(
                &FetchRequest::treasury_yield(Maturity::TenYear)
                    .expect("treasury")
                    .with_interval(Interval::Monthly),
            )
            .expect("request");
        assert_eq!(treasury.query_param("function"), Some("TREASURY_YIELD"));
        assert_eq!(treasury.query_param("maturity"), Some("10year"));
        assert_eq!(treasury.query_param("interval"), Some("monthly"));
        assert_eq!(treasury.query_param("outputsize"), None);
    }

    #[tokio::test]
    async fn error_message_body_is_upstream_error() {
        let body = json!({"Error Message": "Invalid API call."}).to_string();
        let client = client(RecordingHttpClient::new(Ok(HttpResponse::ok(body))));

        let err = client
            .fetch(Transport::Primary, &stock("NOPE"))
            .await
            .expect_err("must fail");
        assert_eq!(err.kind(), SourceErrorKind::UpstreamError);
    }

    #[tokio::test]
    async fn throttle_notice_is_rate_limited() {
        let body = json!({"Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute."}).to_string();
        let client = client(RecordingHttpClient::new(Ok(HttpResponse::ok(body))));

        let err = client
            .fetch(Transport::Primary, &stock("IBM"))
            .await
            .expect_err("must fail");
        assert_eq!(err.kind(), SourceErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn non_200_and_non_json_are_failures() {
        let client_503 = client(RecordingHttpClient::new(Ok(HttpResponse::with_status(503, "down"))));
        let err = client_503
            .fetch(Transport::Primary, &stock("IBM"))
            .await
            .expect_err("must fail");
        assert_eq!(err.kind(), SourceErrorKind::UpstreamStatus);

        let client_html = client(RecordingHttpClient::new(Ok(HttpResponse::ok("<html>"))));
        let err = client_html
            .fetch(Transport::Primary, &stock("IBM"))
            .await
            .expect_err("must fail");
        assert_eq!(err.kind(), SourceErrorKind::Schema);
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_call() {
        let http = RecordingHttpClient::new(Ok(HttpResponse::ok(daily_body())));
        let client = AlphaVantageClient::new(AlphaVantageConfig::default(), http.clone());

        let err = client
            .fetch(Transport::Primary, &stock("IBM"))
            .await
            .expect_err("must fail");
        assert_eq!(err.kind(), SourceErrorKind::InvalidRequest);
        assert!(http.requests().is_empty());
    }

    #[test]
    fn cache_keys_follow_request_parameters() {
        let client = client(RecordingHttpClient::new(Ok(HttpResponse::ok("{}"))));

        let key = client.cache_key(&stock("IBM")).expect("key");
        assert_eq!(key.file_name(), "TIME_SERIES_DAILY+IBM+daily+full.json");

        let key = client
            .cache_key(&FetchRequest::treasury_yield(Maturity::ThirtyYear).expect("treasury"))
            .expect("key");
        assert_eq!(key.file_name(), "TREASURY_YIELD+30year+daily+.json");
    }

    #[tokio::test]
    async fn normalizes_fetched_payload() {
        let client = client(RecordingHttpClient::new(Ok(HttpResponse::ok(daily_body()))));
        let request = stock("IBM");

        let payload = client.fetch(Transport::Primary, &request).await.expect("payload");
        let records = client
            .normalize(&request, &payload, UtcDateTime::now())
            .expect("records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].volume, 3_900_000);
    }

    #[test]
    fn does_not_serve_brazilian_market() {
        let client = client(RecordingHttpClient::new(Ok(HttpResponse::ok("{}"))));
        let request = FetchRequest::new(Symbol::parse("PETR4").expect("symbol"), Market::Br, DataType::Stock)
            .expect("request");
        assert!(!client.supports(&request));
    }

    #[tokio::test]
    async fn macro_series_request_carries_function_and_key_only() {
        let body = json!({
            "name": "Unemployment Rate",
            "data": [{"date": "2024-02-01", "value": "3.9"}]
        })
        .to_string();
        let http = RecordingHttpClient::new(Ok(HttpResponse::ok(body)));
        let client = client(http.clone());

        let indicators = client
            .fetch_indicators(EconomicSeries::Unemployment)
            .await
            .expect("indicators");
        assert_eq!(indicators.len(), 1);
        assert_eq!(indicators[0].indicator_name, "unemployment");

        let requests = http.requests();
        assert_eq!(requests[0].query_param("function"), Some("UNEMPLOYMENT"));
        assert_eq!(requests[0].query_param("symbol"), None);
        assert_eq!(requests[0].query_param("apikey"), Some("test-key"));
        assert_eq!(client.limiter().state().await.call_count, 1);
    }

    #[tokio::test]
    async fn throttled_macro_series_is_rate_limited() {
        let body = json!({"Information": "daily limit reached"}).to_string();
        let client = client(RecordingHttpClient::new(Ok(HttpResponse::ok(body))));

        let err = client
            .fetch_indicators(EconomicSeries::RealGdp)
            .await
            .expect_err("must fail");
        assert_eq!(err.kind(), SourceErrorKind::RateLimited);
    }
}
