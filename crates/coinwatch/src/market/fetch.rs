//! Market-data API client with response caching, pacing, and retries.

use crate::market::cache::ResponseCache;
use crate::market::key::{CacheKey, QueryParams};
use crate::market::retry::{retry_with_backoff, RetryPolicy};
use crate::market::transport::{HttpTransport, Transport, TransportError};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";
const API_KEY_PARAM: &str = "x_cg_demo_api_key";
const CACHE_TTL_SECS: u64 = 300;
const RATE_LIMIT_RETRIES: u32 = 3;
const RATE_LIMIT_DELAY_MS: u64 = 2000;
const MIN_INTERVAL_MS: u64 = 200;
const TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug)]
pub struct FetchConfig {
    pub base_url: String,
    /// Sent as a query parameter on every request; never part of the cache key.
    pub api_key: Option<String>,
    pub cache_ttl_secs: u64,
    /// `None` keeps every response until it is overwritten.
    pub max_cache_entries: Option<usize>,
    /// Retries after a 429 before giving up.
    pub rate_limit_retries: u32,
    /// Fixed wait between 429 retries.
    pub rate_limit_delay_ms: u64,
    /// Minimum spacing between consecutive upstream requests.
    pub min_interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            cache_ttl_secs: CACHE_TTL_SECS,
            max_cache_entries: None,
            rate_limit_retries: RATE_LIMIT_RETRIES,
            rate_limit_delay_ms: RATE_LIMIT_DELAY_MS,
            min_interval_ms: MIN_INTERVAL_MS,
            timeout_secs: TIMEOUT_SECS,
        }
    }
}

impl FetchConfig {
    /// A fresh cache sized and timed per this config.
    pub fn new_cache(&self) -> ResponseCache {
        let ttl = Duration::from_secs(self.cache_ttl_secs);
        match self.max_cache_entries {
            Some(max) => ResponseCache::bounded(ttl, max),
            None => ResponseCache::new(ttl),
        }
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("network: {0}")]
    Network(#[from] TransportError),
    #[error("http client: {0}")]
    Client(TransportError),
    #[error("rate limited: status 429")]
    RateLimited,
    #[error("api error: status {0} body {1}")]
    Upstream(u16, String),
    #[error("invalid response: {0}")]
    InvalidResponse(#[from] serde_json::Error),
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl FetchError {
    /// Whether a later attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::RateLimited | FetchError::Network(_))
    }
}

/// Fetcher with a shared response cache, request pacing, and retry on 429.
pub struct Fetcher<T = HttpTransport> {
    config: FetchConfig,
    transport: T,
    cache: Arc<ResponseCache>,
    last_request: Mutex<Option<Instant>>,
    request_count: AtomicU64,
}

impl Fetcher<HttpTransport> {
    pub fn new(config: FetchConfig, cache: Arc<ResponseCache>) -> Result<Self, FetchError> {
        let transport = HttpTransport::new(Duration::from_secs(config.timeout_secs))
            .map_err(FetchError::Client)?;
        Ok(Self::with_transport(config, transport, cache))
    }
}

impl<T: Transport> Fetcher<T> {
    pub fn with_transport(config: FetchConfig, transport: T, cache: Arc<ResponseCache>) -> Self {
        Self {
            config,
            transport,
            cache,
            last_request: Mutex::new(None),
            request_count: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Upstream requests issued so far, failed attempts included.
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Claims the next send slot under the lock, then waits for it, so
    /// concurrent callers queue up `min_interval_ms` apart.
    async fn pace(&self) {
        let min = Duration::from_millis(self.config.min_interval_ms);
        let slot = {
            let mut last = self
                .last_request
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            let slot = match *last {
                Some(prev) => (prev + min).max(now),
                None => now,
            };
            *last = Some(slot);
            slot
        };
        if slot > Instant::now() {
            tokio::time::sleep_until(slot).await;
        }
    }

    fn url_for(&self, endpoint: &str, params: &QueryParams) -> Result<Url, FetchError> {
        let base = self.config.base_url.trim_end_matches('/');
        let mut url = if endpoint.starts_with('/') {
            Url::parse(&format!("{}{}", base, endpoint))?
        } else {
            Url::parse(&format!("{}/{}", base, endpoint))?
        };
        if !params.is_empty() || self.config.api_key.is_some() {
            let mut query = url.query_pairs_mut();
            for (name, value) in params.to_query_pairs() {
                query.append_pair(&name, &value);
            }
            if let Some(key) = &self.config.api_key {
                query.append_pair(API_KEY_PARAM, key);
            }
        }
        Ok(url)
    }

    /// One upstream GET, no cache and no retry.
    async fn get_json(
        &self,
        endpoint: &str,
        params: &QueryParams,
    ) -> Result<serde_json::Value, FetchError> {
        let url = self.url_for(endpoint, params)?;
        self.pace().await;
        self.request_count.fetch_add(1, Ordering::Relaxed);
        debug!(endpoint, "upstream request");
        let res = self.transport.get(&url).await?;
        if res.status == 429 {
            return Err(FetchError::RateLimited);
        }
        if !res.is_success() {
            return Err(FetchError::Upstream(res.status, res.body));
        }
        Ok(serde_json::from_str(&res.body)?)
    }

    /// Cached GET with the configured rate-limit retry budget.
    pub async fn fetch_with_cache(
        &self,
        endpoint: &str,
        params: &QueryParams,
    ) -> Result<serde_json::Value, FetchError> {
        self.fetch_with_cache_retries(endpoint, params, self.config.rate_limit_retries)
            .await
    }

    /// Cached GET. A live entry is returned without touching the network. On
    /// 429 waits the fixed rate-limit delay and tries again while
    /// `retries_remaining` lasts; every other failure is returned as is.
    /// Failures are never cached.
    pub async fn fetch_with_cache_retries(
        &self,
        endpoint: &str,
        params: &QueryParams,
        retries_remaining: u32,
    ) -> Result<serde_json::Value, FetchError> {
        self.cached_get(endpoint, params, retries_remaining).await
    }

    /// Cached GET decoded into `R`. A body that does not decode is
    /// `InvalidResponse` and is not cached.
    pub async fn fetch_with_cache_as<R: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &QueryParams,
    ) -> Result<R, FetchError> {
        self.cached_get(endpoint, params, self.config.rate_limit_retries)
            .await
    }

    async fn cached_get<R: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &QueryParams,
        retries_remaining: u32,
    ) -> Result<R, FetchError> {
        let key = CacheKey::new(endpoint, params);
        let delay = Duration::from_millis(self.config.rate_limit_delay_ms);
        let mut retries_remaining = retries_remaining;
        loop {
            if let Some(cached) = self.cache.get(&key) {
                debug!(endpoint, key = %key, "cache hit");
                return Ok(R::deserialize(&cached)?);
            }
            match self.get_json(endpoint, params).await {
                Ok(value) => {
                    let decoded = R::deserialize(&value)?;
                    self.cache.insert(key, value);
                    return Ok(decoded);
                }
                Err(FetchError::RateLimited) if retries_remaining > 0 => {
                    warn!(
                        endpoint,
                        retries_remaining,
                        ms = self.config.rate_limit_delay_ms,
                        "rate limited, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retries_remaining -= 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Uncached GET retried on any failure with exponential backoff.
    pub async fn fetch_uncached(
        &self,
        endpoint: &str,
        params: &QueryParams,
        policy: &RetryPolicy,
    ) -> Result<serde_json::Value, FetchError> {
        retry_with_backoff(policy, || self.get_json(endpoint, params)).await
    }
}
