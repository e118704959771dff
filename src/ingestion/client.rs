//! Client for the external ingestion microservice
//!
//! The microservice is either reached at a fixed URL or discovered inside a
//! CIDR range: every usable host of the range becomes a candidate endpoint.
//! The last endpoint that accepted a connection is remembered in an
//! [`EndpointCache`] owned by the caller and tried first next time.
//!
//! Requests carry no overall timeout. Ingestion of a large catalog can run
//! for hours and must not be cut short; only connection establishment is
//! bounded, so an unreachable candidate is skipped quickly.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::IngestionConfig;
use crate::error::{Error, Result};
use crate::ingestion::parameters::SearchParameters;
use crate::models::IngestionCounters;

/// Smallest prefix accepted for CIDR expansion (65 536 addresses)
const MIN_CIDR_PREFIX: u8 = 16;

/// Something that can run one ingestion request to completion
#[async_trait]
pub trait IngestionBackend: Send + Sync {
    /// Run the request and return the reported counters
    async fn ingest(&self, params: &SearchParameters) -> Result<IngestionCounters>;
}

// ============================================================================
// Endpoint resolution
// ============================================================================

/// Expand an IPv4 CIDR range into host addresses
///
/// Network and broadcast addresses are dropped when the range holds more
/// than two addresses.
pub fn expand_cidr(range: &str) -> Result<Vec<Ipv4Addr>> {
    let (addr, prefix) = range
        .trim()
        .split_once('/')
        .ok_or_else(|| Error::config(format!("invalid CIDR range '{range}': missing prefix")))?;
    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|_| Error::config(format!("invalid CIDR range '{range}': bad address")))?;
    let prefix: u8 = prefix
        .parse()
        .ok()
        .filter(|p| *p <= 32)
        .ok_or_else(|| Error::config(format!("invalid CIDR range '{range}': bad prefix")))?;
    if prefix < MIN_CIDR_PREFIX {
        return Err(Error::config(format!(
            "CIDR range '{range}' too large, prefix must be >= {MIN_CIDR_PREFIX}"
        )));
    }

    let mask = u32::MAX << (32 - u32::from(prefix));
    let network = u32::from(addr) & mask;
    let size = 1u64 << (32 - u32::from(prefix));

    let mut hosts: Vec<Ipv4Addr> = (0..size)
        .map(|offset| Ipv4Addr::from(network + offset as u32))
        .collect();
    if hosts.len() > 2 {
        hosts.remove(0);
        hosts.pop();
    }
    Ok(hosts)
}

/// Last endpoint that accepted a connection
///
/// Cloning shares the cached value.
#[derive(Debug, Clone, Default)]
pub struct EndpointCache {
    inner: Arc<Mutex<Option<String>>>,
}

impl EndpointCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<String> {
        self.inner.lock().ok().and_then(|guard| guard.clone())
    }

    pub fn set(&self, endpoint: &str) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = Some(endpoint.to_string());
        }
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = None;
        }
    }
}

/// Ordered list of candidate endpoints plus the shared cache
#[derive(Debug, Clone)]
pub struct EndpointResolver {
    candidates: Vec<String>,
    cache: EndpointCache,
}

impl EndpointResolver {
    /// Resolver over an explicit candidate list
    pub fn with_candidates(candidates: Vec<String>, cache: EndpointCache) -> Self {
        Self { candidates, cache }
    }

    /// Resolver for a single fixed endpoint
    pub fn fixed(endpoint: impl Into<String>) -> Self {
        Self::with_candidates(vec![endpoint.into()], EndpointCache::new())
    }

    /// Build from configuration: the fixed endpoint if set, otherwise the CIDR expansion
    pub fn from_config(config: &IngestionConfig, cache: EndpointCache) -> Result<Self> {
        if let Some(endpoint) = &config.endpoint {
            return Ok(Self::with_candidates(vec![endpoint.clone()], cache));
        }

        let path = if config.path.starts_with('/') {
            config.path.clone()
        } else {
            format!("/{}", config.path)
        };
        let candidates = expand_cidr(&config.cidr_range)?
            .into_iter()
            .map(|ip| format!("{}://{ip}:{}{path}", config.protocol, config.port))
            .collect();
        Ok(Self::with_candidates(candidates, cache))
    }

    /// Candidates in try order, the cached endpoint first
    pub fn ordered_candidates(&self) -> Vec<String> {
        let mut ordered = Vec::with_capacity(self.candidates.len() + 1);
        if let Some(cached) = self.cache.get() {
            ordered.push(cached);
        }
        for candidate in &self.candidates {
            if !ordered.contains(candidate) {
                ordered.push(candidate.clone());
            }
        }
        ordered
    }

    pub fn cache(&self) -> &EndpointCache {
        &self.cache
    }
}

// ============================================================================
// HTTP client
// ============================================================================

/// reqwest-based [`IngestionBackend`]
pub struct HttpIngesterClient {
    client: Client,
    resolver: EndpointResolver,
}

impl HttpIngesterClient {
    pub fn new(resolver: EndpointResolver, connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client, resolver })
    }

    pub fn from_config(config: &IngestionConfig, cache: EndpointCache) -> Result<Self> {
        Self::new(
            EndpointResolver::from_config(config, cache)?,
            Duration::from_secs(config.connect_timeout_secs),
        )
    }

    pub fn resolver(&self) -> &EndpointResolver {
        &self.resolver
    }
}

#[async_trait]
impl IngestionBackend for HttpIngesterClient {
    async fn ingest(&self, params: &SearchParameters) -> Result<IngestionCounters> {
        let mut last_error = String::from("no ingestion endpoint configured");

        for endpoint in self.resolver.ordered_candidates() {
            tracing::debug!(endpoint = %endpoint, callback_id = ?params.callback_id, "Calling ingestion microservice");

            let response = match self.client.post(&endpoint).json(params).send().await {
                Ok(response) => response,
                Err(e) if e.is_connect() => {
                    tracing::debug!(endpoint = %endpoint, error = %e, "Endpoint refused connection");
                    if self.resolver.cache.get().as_deref() == Some(endpoint.as_str()) {
                        self.resolver.cache.clear();
                    }
                    last_error = e.to_string();
                    continue;
                }
                Err(e) => return Err(Error::MicroserviceUnavailable(e.to_string())),
            };

            self.resolver.cache.set(&endpoint);

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| Error::MicroserviceUnavailable(e.to_string()))?;

            if !status.is_success() {
                return Err(Error::IngestionRejected {
                    status: status.as_u16(),
                    body,
                });
            }

            return serde_json::from_str(&body).map_err(|e| {
                Error::with_source(format!("Unexpected ingestion microservice response: {body}"), e)
            });
        }

        Err(Error::MicroserviceUnavailable(last_error))
    }
}
