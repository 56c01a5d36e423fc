//! Outbound provider contracts and their HTTP implementations.
//!
//! The orchestrator only depends on the [`SearchProvider`] and
//! [`ExpertProvider`] traits; the reqwest-backed implementations here are
//! the production wiring and are swapped for in-memory fakes in tests.
//! Authentication, serialization, and token accounting live behind these
//! boundaries.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use knowstream_shared::{KnowStreamError, LimitsConfig, ProvidersConfig, Result};

/// User-Agent string for outbound requests.
const USER_AGENT: &str = concat!("KnowStream/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

/// One raw item returned by the search provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSearchItem {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    /// Publish/update timestamp when the provider reports one.
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

/// The search-provider boundary: one call per query segment.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run one search and return its raw result items.
    async fn search(&self, query: &str) -> Result<Vec<RawSearchItem>>;
}

/// The LLM expert boundary: one completion per follow-up.
#[async_trait]
pub trait ExpertProvider: Send + Sync {
    /// Complete a prompt with the named model and return the text.
    async fn complete(&self, prompt: &str, model: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// HTTP search provider
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<RawSearchItem>,
}

/// Search provider over HTTP, honoring the configured connect timeout.
pub struct HttpSearchProvider {
    client: Client,
    endpoint: String,
}

impl HttpSearchProvider {
    /// Build the provider with the configured endpoint and timeouts.
    pub fn new(providers: &ProvidersConfig, limits: &LimitsConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(limits)?,
            endpoint: providers.search_endpoint.clone(),
        })
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search(&self, query: &str) -> Result<Vec<RawSearchItem>> {
        debug!(%query, endpoint = %self.endpoint, "search call");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| KnowStreamError::Network(format!("search {query:?}: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(KnowStreamError::RateLimitExceeded);
        }
        if !status.is_success() {
            return Err(KnowStreamError::Network(format!(
                "search {query:?}: HTTP {status}"
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| KnowStreamError::provider(format!("search response: {e}")))?;

        Ok(parsed.results)
    }
}

// ---------------------------------------------------------------------------
// HTTP expert provider
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct CompleteRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompleteResponse {
    text: String,
}

/// Expert (LLM) provider over HTTP.
pub struct HttpExpertProvider {
    client: Client,
    endpoint: String,
}

impl HttpExpertProvider {
    /// Build the provider with the configured endpoint and timeouts.
    pub fn new(providers: &ProvidersConfig, limits: &LimitsConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(limits)?,
            endpoint: providers.expert_endpoint.clone(),
        })
    }
}

#[async_trait]
impl ExpertProvider for HttpExpertProvider {
    async fn complete(&self, prompt: &str, model: &str) -> Result<String> {
        debug!(%model, endpoint = %self.endpoint, "expert call");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&CompleteRequest { model, prompt })
            .send()
            .await
            .map_err(|e| KnowStreamError::Network(format!("expert call: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(KnowStreamError::RateLimitExceeded);
        }
        if !status.is_success() {
            return Err(KnowStreamError::Network(format!("expert call: HTTP {status}")));
        }

        let parsed: CompleteResponse = response
            .json()
            .await
            .map_err(|e| KnowStreamError::provider(format!("expert response: {e}")))?;

        Ok(parsed.text)
    }
}

/// Shared HTTP client construction: UA, redirects, connect timeout.
fn build_client(limits: &LimitsConfig) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .connect_timeout(limits.connect_timeout())
        .timeout(limits.operation_timeout() + Duration::from_secs(5))
        .build()
        .map_err(|e| KnowStreamError::Network(format!("failed to build HTTP client: {e}")))
}
