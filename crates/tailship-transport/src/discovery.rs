//! Endpoint discovery
//!
//! LogBroker hosts are handed out by an adviser service: an HTTP GET that
//! answers with a bare hostname. [`StaticResolver`] skips the lookup.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tailship_core::{RetryPolicy, retry_with_backoff};
use tracing::{info, instrument};

use crate::error::{TransportError, TransportResult};

/// Header carrying the name of the asking host
pub const CLIENT_HOST_HEADER: &str = "ClientHost";
/// Adviser queried when none is configured
pub const DEFAULT_ADVISER_URL: &str = "http://cellar-t.stat.yandex.net/advise";

/// Resolves the LogBroker host to connect to
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    async fn resolve(&self) -> TransportResult<String>;
}

/// Always resolves to the same host
#[derive(Debug, Clone)]
pub struct StaticResolver {
    host: String,
}

impl StaticResolver {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

#[async_trait]
impl EndpointResolver for StaticResolver {
    async fn resolve(&self) -> TransportResult<String> {
        Ok(self.host.clone())
    }
}

/// Configuration for [`AdviserResolver`]
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// URL of the adviser service
    pub adviser_url: String,
    /// Value of the `ClientHost` header
    pub client_host: String,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
    /// Retry policy for failed lookups
    pub retry: RetryPolicy,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            adviser_url: DEFAULT_ADVISER_URL.to_string(),
            client_host: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            timeout_ms: 10_000,
            retry: RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(30))
                .with_max_attempts(5),
        }
    }
}

impl DiscoveryConfig {
    pub fn new(adviser_url: impl Into<String>) -> Self {
        Self {
            adviser_url: adviser_url.into(),
            ..Default::default()
        }
    }

    pub fn with_client_host(mut self, host: impl Into<String>) -> Self {
        self.client_host = host.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Asks the adviser service for a host
#[derive(Debug, Clone)]
pub struct AdviserResolver {
    client: Client,
    config: DiscoveryConfig,
}

impl AdviserResolver {
    pub fn new(config: DiscoveryConfig) -> TransportResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| TransportError::Discovery(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Build the lookup request without sending it
    pub fn build_request(&self) -> reqwest::RequestBuilder {
        self.client
            .get(&self.config.adviser_url)
            .header(CLIENT_HOST_HEADER, &self.config.client_host)
    }

    async fn lookup(&self) -> TransportResult<String> {
        let response = self
            .build_request()
            .send()
            .await
            .map_err(|e| TransportError::Discovery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Discovery(format!(
                "adviser answered {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Discovery(e.to_string()))?;
        let host = body.trim();
        if host.is_empty() {
            return Err(TransportError::Discovery("adviser returned an empty host".into()));
        }
        Ok(host.to_string())
    }
}

#[async_trait]
impl EndpointResolver for AdviserResolver {
    #[instrument(skip(self), fields(url = %self.config.adviser_url))]
    async fn resolve(&self) -> TransportResult<String> {
        info!("Getting adviced LogBroker endpoint");
        let host = retry_with_backoff(&self.config.retry, "resolve_endpoint", || self.lookup()).await?;
        info!(host = %host, "Adviced endpoint");
        Ok(host)
    }
}
