//! HTTP snapshot provider: ordered endpoints, bounded retries with
//! exponential backoff, a TTL cache, and bounded stale serving when a
//! refresh fails.
//!
//! Request building is split from transport so the retry/failover/cache
//! logic is exercised against scripted responses; the production transport
//! is a single global `reqwest` client built once.

use crate::artifact::{decode_document, SnapshotAdapter};
use crate::clock::{Clock, Sleeper, SystemClock, TokioSleeper};
use crate::error::{service, CpError};
use crate::SnapshotSource;
use async_trait::async_trait;
use http::header::{ACCEPT, AUTHORIZATION};
use http::{Request, Response, StatusCode};
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use url::Url;

/// Client-identity header attached when configured.
pub const CLIENT_ID_HEADER: &str = "X-RSPP-Client-ID";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_STALENESS: Duration = Duration::from_secs(10);

/// Configuration for [`HttpSnapshotProvider`].  All knobs are bounded and
/// overridable; zeroed durations and counts fall back to the defaults.
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub urls: Vec<Url>,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub cache_ttl: Duration,
    pub max_staleness: Duration,
    pub bearer_token: Option<String>,
    pub client_id: Option<String>,
}

impl HttpProviderConfig {
    pub fn new(urls: Vec<Url>) -> Self {
        Self {
            urls,
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            cache_ttl: DEFAULT_CACHE_TTL,
            max_staleness: DEFAULT_MAX_STALENESS,
            bearer_token: None,
            client_id: None,
        }
    }

    /// Normalize and validate: reject an empty or non-http(s) endpoint list,
    /// de-duplicate URLs in order, and replace zeroed knobs with defaults.
    pub fn validated(mut self) -> Result<Self, CpError> {
        if self.urls.is_empty() {
            return Err(CpError::invalid_config("urls", "endpoint list is empty"));
        }
        let mut seen = std::collections::BTreeSet::new();
        let mut deduped = Vec::with_capacity(self.urls.len());
        for url in self.urls {
            match url.scheme() {
                "http" | "https" => {}
                other => {
                    return Err(CpError::invalid_config(
                        url.as_str(),
                        format!("unsupported scheme {other:?}"),
                    ));
                }
            }
            if seen.insert(url.as_str().to_string()) {
                deduped.push(url);
            }
        }
        self.urls = deduped;
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
        if self.max_attempts == 0 {
            self.max_attempts = DEFAULT_MAX_ATTEMPTS;
        }
        if self.base_backoff.is_zero() {
            self.base_backoff = DEFAULT_BASE_BACKOFF;
        }
        if self.max_backoff.is_zero() {
            self.max_backoff = DEFAULT_MAX_BACKOFF;
        }
        if self.cache_ttl.is_zero() {
            self.cache_ttl = DEFAULT_CACHE_TTL;
        }
        if self.max_staleness.is_zero() {
            self.max_staleness = DEFAULT_MAX_STALENESS;
        }
        Ok(self)
    }

    fn joined_path(&self) -> String {
        self.urls
            .iter()
            .map(Url::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Transport seam.  Returns the full response (any status) on a completed
/// exchange; `Err` means no HTTP status was obtained at all.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(
        &self,
        request: Request<Vec<u8>>,
        timeout: Duration,
    ) -> Result<Response<Vec<u8>>, String>;
}

/// A single global client, built once.
static CLIENT: Lazy<reqwest::Client> = Lazy::new(reqwest::Client::new);

/// Production transport over the shared `reqwest` client.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReqwestTransport;

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(
        &self,
        request: Request<Vec<u8>>,
        timeout: Duration,
    ) -> Result<Response<Vec<u8>>, String> {
        let client = &*CLIENT;
        let method = request
            .method()
            .as_str()
            .parse::<reqwest::Method>()
            .map_err(|e| e.to_string())?;
        let mut builder = client
            .request(method, request.uri().to_string())
            .timeout(timeout);
        for (name, value) in request.headers() {
            let value = value.to_str().map_err(|e| e.to_string())?;
            builder = builder.header(name.as_str(), value);
        }
        let response = builder
            .body(request.into_body())
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| e.to_string())?;
        Response::builder()
            .status(status.as_u16())
            .body(bytes.to_vec())
            .map_err(|e| e.to_string())
    }
}

struct CacheEntry {
    adapter: Arc<SnapshotAdapter>,
    #[allow(dead_code)]
    fetched_at: OffsetDateTime,
    expires_at: OffsetDateTime,
}

/// Snapshot provider with a process-lifetime cache.  Fetch and cache
/// mutation are serialized under one mutex; concurrent `current()` callers
/// observe a coherent snapshot.
pub struct HttpSnapshotProvider {
    config: HttpProviderConfig,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    transport: Arc<dyn HttpTransport>,
    cache: Mutex<Option<CacheEntry>>,
}

impl std::fmt::Debug for HttpSnapshotProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSnapshotProvider")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HttpSnapshotProvider {
    /// Connect with production wiring.  Runs one fetch so configuration
    /// errors fail fast.
    pub async fn connect(config: HttpProviderConfig) -> Result<Self, CpError> {
        Self::connect_with(
            config,
            Arc::new(SystemClock),
            Arc::new(TokioSleeper),
            Arc::new(ReqwestTransport),
        )
        .await
    }

    /// Connect with injected clock, sleeper, and transport.
    pub async fn connect_with(
        config: HttpProviderConfig,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, CpError> {
        let provider = Self {
            config: config.validated()?,
            clock,
            sleeper,
            transport,
            cache: Mutex::new(None),
        };
        provider.current().await?;
        Ok(provider)
    }

    pub fn config(&self) -> &HttpProviderConfig {
        &self.config
    }

    /// The current snapshot: cached while fresh, refetched past the TTL,
    /// served stale within the bounded window when a refresh fails.
    #[tracing::instrument(name = "cp.snapshot.current", skip(self))]
    pub async fn current(&self) -> Result<Arc<SnapshotAdapter>, CpError> {
        let mut cache = self.cache.lock().await;

        let now = self.clock.now_utc();
        if let Some(entry) = cache.as_ref() {
            if now < entry.expires_at {
                return Ok(entry.adapter.clone());
            }
        }

        match self.fetch().await {
            Ok(adapter) => {
                let now = self.clock.now_utc();
                *cache = Some(CacheEntry {
                    adapter: adapter.clone(),
                    fetched_at: now,
                    expires_at: now + self.config.cache_ttl,
                });
                Ok(adapter)
            }
            Err(err) => {
                if let Some(entry) = cache.as_ref() {
                    let now = self.clock.now_utc();
                    let over = now - entry.expires_at;
                    let window = time::Duration::try_from(self.config.max_staleness)
                        .unwrap_or(time::Duration::MAX);
                    if over <= window {
                        log::warn!(
                            "snapshot refresh failed, serving cached artifact ({}s past ttl): {err}",
                            over.whole_seconds()
                        );
                        return Ok(entry.adapter.clone());
                    }
                }
                Err(err)
            }
        }
    }

    /// One fetch pass across the ordered endpoint list.
    async fn fetch(&self) -> Result<Arc<SnapshotAdapter>, CpError> {
        let mut first_error: Option<CpError> = None;
        let mut stale_paths: Vec<&str> = Vec::new();
        let mut all_stale = true;

        for url in &self.config.urls {
            match self.fetch_endpoint(url).await {
                Ok(adapter) => return Ok(adapter),
                Err(err) => {
                    log::debug!("endpoint {url} failed: {err}");
                    if err.is_stale() {
                        stale_paths.push(url.as_str());
                    } else {
                        all_stale = false;
                        if first_error.is_none() {
                            first_error = Some(err);
                        }
                    }
                }
            }
        }

        if all_stale && !stale_paths.is_empty() {
            return Err(CpError::stale(
                service::DISTRIBUTION,
                stale_paths.join(","),
            ));
        }
        Err(first_error.unwrap_or_else(|| {
            CpError::invalid_config(self.config.joined_path(), "endpoint list is empty")
        }))
    }

    /// Bounded attempts against a single endpoint, sleeping
    /// `min(base * 2^(attempt-1), max_backoff)` between attempts.
    async fn fetch_endpoint(&self, url: &Url) -> Result<Arc<SnapshotAdapter>, CpError> {
        let mut last_error = None;
        for attempt in 1..=self.config.max_attempts {
            match self.attempt(url).await {
                Ok(adapter) => return Ok(adapter),
                Err(err) => {
                    let retryable = err.is_retryable();
                    last_error = Some(err);
                    if !retryable {
                        break;
                    }
                    if attempt < self.config.max_attempts {
                        let backoff = backoff_for(
                            attempt,
                            self.config.base_backoff,
                            self.config.max_backoff,
                        );
                        self.sleeper.sleep(backoff).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            CpError::invalid_config(url.as_str(), "retry budget is zero")
        }))
    }

    /// A single attempt: GET, expect `200 OK` with exactly one JSON object,
    /// validate the schema, and reject explicitly stale documents.
    async fn attempt(&self, url: &Url) -> Result<Arc<SnapshotAdapter>, CpError> {
        let request = self.build_request(url)?;
        let response = self
            .transport
            .execute(request, self.config.timeout)
            .await
            .map_err(|message| {
                CpError::read_failed(service::DISTRIBUTION, url.as_str(), message)
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(CpError::read_failed(
                service::DISTRIBUTION,
                url.as_str(),
                format!("unexpected status {status}"),
            )
            .with_status(status.as_u16()));
        }

        let document = decode_document(response.body(), url.as_str())?;
        if document.any_stale() {
            return Err(CpError::stale(service::DISTRIBUTION, url.as_str()));
        }
        Ok(Arc::new(SnapshotAdapter::new(url.as_str(), document)))
    }

    fn build_request(&self, url: &Url) -> Result<Request<Vec<u8>>, CpError> {
        let mut builder = Request::builder()
            .method(http::Method::GET)
            .uri(url.as_str())
            .header(ACCEPT, "application/json");
        if let Some(token) = &self.config.bearer_token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(client_id) = &self.config.client_id {
            builder = builder.header(CLIENT_ID_HEADER, client_id.as_str());
        }
        builder
            .body(Vec::new())
            .map_err(|e| CpError::invalid_config(url.as_str(), e.to_string()))
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotProvider {
    async fn current(&self) -> Result<Arc<SnapshotAdapter>, CpError> {
        HttpSnapshotProvider::current(self).await
    }
}

fn backoff_for(failed_attempt: u32, base: Duration, max: Duration) -> Duration {
    let exp = failed_attempt.saturating_sub(1).min(20);
    let raw = base.saturating_mul(1u32 << exp);
    raw.min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::SCHEMA_VERSION;
    use crate::error::ErrorCode;
    use std::sync::Mutex as StdMutex;

    fn artifact_body() -> Vec<u8> {
        format!(r#"{{"schema_version": "{SCHEMA_VERSION}"}}"#).into_bytes()
    }

    fn stale_body() -> Vec<u8> {
        format!(r#"{{"schema_version": "{SCHEMA_VERSION}", "stale": true}}"#).into_bytes()
    }

    /// One scripted exchange: either a `(status, body)` pair or a network
    /// failure with no status at all.
    enum Scripted {
        Status(u16, Vec<u8>),
        Network(&'static str),
    }

    /// Transport that replays a per-URL script and records the request
    /// order.  Exhausted scripts answer with a network error.
    #[derive(Default)]
    struct ScriptedTransport {
        scripts: StdMutex<std::collections::BTreeMap<String, Vec<Scripted>>>,
        requests: StdMutex<Vec<Request<Vec<u8>>>>,
    }

    impl ScriptedTransport {
        fn script(&self, url: &str, responses: Vec<Scripted>) {
            self.scripts
                .lock()
                .unwrap()
                .insert(url.to_string(), responses);
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn execute(
            &self,
            request: Request<Vec<u8>>,
            _timeout: Duration,
        ) -> Result<Response<Vec<u8>>, String> {
            let uri = request.uri().to_string();
            self.requests.lock().unwrap().push(request);
            let mut scripts = self.scripts.lock().unwrap();
            let queue = scripts.get_mut(&uri);
            match queue.and_then(|q| if q.is_empty() { None } else { Some(q.remove(0)) }) {
                Some(Scripted::Status(status, body)) => Ok(Response::builder()
                    .status(status)
                    .body(body)
                    .expect("scripted response")),
                Some(Scripted::Network(message)) => Err(message.to_string()),
                None => Err("script exhausted".to_string()),
            }
        }
    }

    /// Manually advanced clock.
    struct TestClock(StdMutex<OffsetDateTime>);

    impl TestClock {
        fn at_epoch() -> Arc<Self> {
            Arc::new(Self(StdMutex::new(OffsetDateTime::UNIX_EPOCH)))
        }

        fn advance(&self, duration: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += duration;
        }
    }

    impl Clock for TestClock {
        fn now_utc(&self) -> OffsetDateTime {
            *self.0.lock().unwrap()
        }
    }

    /// Sleeper that records requested delays without waiting.
    #[derive(Default)]
    struct RecordingSleeper(StdMutex<Vec<Duration>>);

    impl RecordingSleeper {
        fn slept(&self) -> Vec<Duration> {
            self.0.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.0.lock().unwrap().push(duration);
        }
    }

    fn urls(raw: &[&str]) -> Vec<Url> {
        raw.iter().map(|u| Url::parse(u).unwrap()).collect()
    }

    async fn provider_with(
        config: HttpProviderConfig,
        clock: Arc<TestClock>,
        sleeper: Arc<RecordingSleeper>,
        transport: Arc<ScriptedTransport>,
    ) -> Result<HttpSnapshotProvider, CpError> {
        HttpSnapshotProvider::connect_with(config, clock, sleeper, transport).await
    }

    #[test]
    fn empty_url_list_is_invalid_config() {
        let err = HttpProviderConfig::new(vec![]).validated().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidConfig);
    }

    #[test]
    fn non_http_scheme_is_invalid_config() {
        let err = HttpProviderConfig::new(urls(&["ftp://cp.example/v1"]))
            .validated()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidConfig);
    }

    #[test]
    fn duplicate_urls_dedupe_in_order() {
        let config = HttpProviderConfig::new(urls(&[
            "http://a.example/cp",
            "http://b.example/cp",
            "http://a.example/cp",
        ]))
        .validated()
        .unwrap();
        assert_eq!(
            config.urls.iter().map(Url::as_str).collect::<Vec<_>>(),
            vec!["http://a.example/cp", "http://b.example/cp"]
        );
    }

    #[test]
    fn zeroed_knobs_fall_back_to_defaults() {
        let mut config = HttpProviderConfig::new(urls(&["http://a.example/cp"]));
        config.timeout = Duration::ZERO;
        config.max_attempts = 0;
        config.cache_ttl = Duration::ZERO;
        let config = config.validated().unwrap();
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.cache_ttl, DEFAULT_CACHE_TTL);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(1);
        assert_eq!(backoff_for(1, base, max), Duration::from_millis(100));
        assert_eq!(backoff_for(2, base, max), Duration::from_millis(200));
        assert_eq!(backoff_for(3, base, max), Duration::from_millis(400));
        assert_eq!(backoff_for(10, base, max), max);
    }

    #[tokio::test]
    async fn failover_after_retry_with_one_backoff_sleep() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(
            "http://a.example/cp",
            vec![
                Scripted::Status(503, b"overloaded".to_vec()),
                Scripted::Status(503, b"overloaded".to_vec()),
            ],
        );
        transport.script(
            "http://b.example/cp",
            vec![Scripted::Status(200, artifact_body())],
        );
        let sleeper = Arc::new(RecordingSleeper::default());
        let provider = provider_with(
            HttpProviderConfig::new(urls(&["http://a.example/cp", "http://b.example/cp"])),
            TestClock::at_epoch(),
            sleeper.clone(),
            transport.clone(),
        )
        .await
        .unwrap();

        assert_eq!(sleeper.slept(), vec![DEFAULT_BASE_BACKOFF]);
        // two attempts against A, one against B
        assert_eq!(transport.request_count(), 3);
        let adapter = provider.current().await.unwrap();
        assert_eq!(adapter.origin(), "http://b.example/cp");
    }

    #[tokio::test]
    async fn non_retryable_status_fails_without_retry() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(
            "http://a.example/cp",
            vec![Scripted::Status(404, b"missing".to_vec())],
        );
        let sleeper = Arc::new(RecordingSleeper::default());
        let err = provider_with(
            HttpProviderConfig::new(urls(&["http://a.example/cp"])),
            TestClock::at_epoch(),
            sleeper.clone(),
            transport.clone(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.code(), ErrorCode::ArtifactReadFailed);
        assert_eq!(err.status(), Some(404));
        assert!(sleeper.slept().is_empty());
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn network_error_is_retryable() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(
            "http://a.example/cp",
            vec![
                Scripted::Network("connection refused"),
                Scripted::Status(200, artifact_body()),
            ],
        );
        let provider = provider_with(
            HttpProviderConfig::new(urls(&["http://a.example/cp"])),
            TestClock::at_epoch(),
            Arc::new(RecordingSleeper::default()),
            transport.clone(),
        )
        .await
        .unwrap();
        assert_eq!(transport.request_count(), 2);
        drop(provider);
    }

    #[tokio::test]
    async fn trailing_content_is_decode_failure() {
        let transport = Arc::new(ScriptedTransport::default());
        let mut body = artifact_body();
        body.extend_from_slice(b" {}");
        transport.script("http://a.example/cp", vec![Scripted::Status(200, body)]);
        let err = provider_with(
            HttpProviderConfig::new(urls(&["http://a.example/cp"])),
            TestClock::at_epoch(),
            Arc::new(RecordingSleeper::default()),
            transport,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ArtifactDecodeFailed);
    }

    #[tokio::test]
    async fn all_stale_endpoints_surface_stale_with_joined_path() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(
            "http://a.example/cp",
            vec![Scripted::Status(200, stale_body())],
        );
        transport.script(
            "http://b.example/cp",
            vec![Scripted::Status(200, stale_body())],
        );
        let err = provider_with(
            HttpProviderConfig::new(urls(&["http://a.example/cp", "http://b.example/cp"])),
            TestClock::at_epoch(),
            Arc::new(RecordingSleeper::default()),
            transport,
        )
        .await
        .unwrap_err();
        assert!(err.is_stale());
        assert_eq!(err.path(), "http://a.example/cp,http://b.example/cp");
    }

    #[tokio::test]
    async fn mixed_failures_surface_first_non_stale_error() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(
            "http://a.example/cp",
            vec![Scripted::Status(200, stale_body())],
        );
        transport.script(
            "http://b.example/cp",
            vec![Scripted::Status(404, b"missing".to_vec())],
        );
        let err = provider_with(
            HttpProviderConfig::new(urls(&["http://a.example/cp", "http://b.example/cp"])),
            TestClock::at_epoch(),
            Arc::new(RecordingSleeper::default()),
            transport,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ArtifactReadFailed);
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn cache_serves_within_ttl_without_fetching() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(
            "http://a.example/cp",
            vec![Scripted::Status(200, artifact_body())],
        );
        let clock = TestClock::at_epoch();
        let provider = provider_with(
            HttpProviderConfig::new(urls(&["http://a.example/cp"])),
            clock.clone(),
            Arc::new(RecordingSleeper::default()),
            transport.clone(),
        )
        .await
        .unwrap();

        clock.advance(Duration::from_millis(500));
        provider.current().await.unwrap();
        provider.current().await.unwrap();
        // only the connect-time fetch went out
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn bounded_stale_serve_inside_window_then_error_outside() {
        let mut config = HttpProviderConfig::new(urls(&["http://a.example/cp"]));
        config.cache_ttl = Duration::from_secs(1);
        config.max_staleness = Duration::from_secs(5);
        config.max_attempts = 1;

        let transport = Arc::new(ScriptedTransport::default());
        transport.script(
            "http://a.example/cp",
            vec![
                Scripted::Status(200, artifact_body()),
                Scripted::Status(503, b"overloaded".to_vec()),
                Scripted::Status(503, b"overloaded".to_vec()),
            ],
        );
        let clock = TestClock::at_epoch();
        let provider = provider_with(
            config,
            clock.clone(),
            Arc::new(RecordingSleeper::default()),
            transport.clone(),
        )
        .await
        .unwrap();

        // 2s in: past the 1s TTL, refresh fails, but only 1s past expiry.
        clock.advance(Duration::from_secs(2));
        let adapter = provider.current().await.unwrap();
        assert_eq!(adapter.origin(), "http://a.example/cp");

        // 10s in: 9s past expiry, outside the 5s staleness window, so the
        // refresh error propagates.
        clock.advance(Duration::from_secs(8));
        let err = provider.current().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ArtifactReadFailed);
        assert_eq!(err.status(), Some(503));
    }

    #[tokio::test]
    async fn connect_fails_fast_on_unreachable_endpoints() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(
            "http://a.example/cp",
            vec![Scripted::Status(500, vec![]), Scripted::Status(500, vec![])],
        );
        let err = provider_with(
            HttpProviderConfig::new(urls(&["http://a.example/cp"])),
            TestClock::at_epoch(),
            Arc::new(RecordingSleeper::default()),
            transport,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ArtifactReadFailed);
    }

    #[tokio::test]
    async fn request_carries_auth_and_identity_headers() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(
            "http://a.example/cp",
            vec![Scripted::Status(200, artifact_body())],
        );
        let mut config = HttpProviderConfig::new(urls(&["http://a.example/cp"]));
        config.bearer_token = Some("cp-token".to_string());
        config.client_id = Some("runtime-7".to_string());
        provider_with(
            config,
            TestClock::at_epoch(),
            Arc::new(RecordingSleeper::default()),
            transport.clone(),
        )
        .await
        .unwrap();

        let requests = transport.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(
            request.headers().get(AUTHORIZATION).unwrap(),
            "Bearer cp-token"
        );
        assert_eq!(request.headers().get(CLIENT_ID_HEADER).unwrap(), "runtime-7");
        assert_eq!(request.headers().get(ACCEPT).unwrap(), "application/json");
    }
}
