//! Rate-limited HTTP reader for remote STAC catalogs
//!
//! All harvester traffic towards third-party catalogs goes through
//! [`StacClient`]. Requests share one `governor` limiter so a sync over many
//! catalogs cannot hammer any of them.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{header::ACCEPT, Client, StatusCode};
use serde_json::Value;

use crate::config::HarvesterConfig;
use crate::error::Result;

const USER_AGENT: &str = concat!("stacport/", env!("CARGO_PKG_VERSION"));

/// Status and decoded body of a GET
#[derive(Debug, Clone)]
pub struct JsonResponse {
    pub status: StatusCode,
    /// `None` when the body was not valid JSON
    pub body: Option<Value>,
}

impl JsonResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Length of a top-level array field, `None` if absent or not an array
    pub fn array_len(&self, field: &str) -> Option<usize> {
        self.body
            .as_ref()?
            .get(field)?
            .as_array()
            .map(Vec::len)
    }
}

/// HTTP client for reading remote catalogs
pub struct StacClient {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl StacClient {
    /// Create a client allowing `requests_per_second` across all catalogs
    pub fn new(requests_per_second: u32, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .user_agent(USER_AGENT)
            .build()?;

        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            rate_limiter,
        })
    }

    pub fn from_config(config: &HarvesterConfig) -> Result<Self> {
        Self::new(
            config.requests_per_second,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// GET `url` and decode the body as JSON
    ///
    /// Non-2xx statuses are returned, not raised; only transport failures are errors.
    pub async fn get_json(&self, url: &str) -> Result<JsonResponse> {
        self.rate_limiter.until_ready().await;

        tracing::debug!(url = %url, "GET");
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        let body = serde_json::from_slice(&bytes).ok();

        if !status.is_success() {
            tracing::debug!(url = %url, status = status.as_u16(), "Non-success response");
        }
        Ok(JsonResponse { status, body })
    }
}

/// Remove trailing slashes from a catalog root URL
pub fn normalize_catalog_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// `{root}/collections`
pub fn collections_url(catalog_url: &str) -> String {
    format!("{}/collections", normalize_catalog_url(catalog_url))
}

/// `{root}/search?limit=1`
pub fn sample_search_url(catalog_url: &str) -> String {
    format!("{}/search?limit=1", normalize_catalog_url(catalog_url))
}
