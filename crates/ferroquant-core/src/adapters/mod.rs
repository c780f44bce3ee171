//! Provider adapters.
//!
//! Each adapter knows how to address one provider (`build_request`), which payload
//! layout it answers with (`schema_for`) and how to read its failure signals
//! (`classify_response`). Parsing the payload is left to [`crate::normalize`].

mod alphavantage;
mod polygon;
mod yahoo;

use std::sync::Arc;

pub use alphavantage::AlphaVantageAdapter;
pub use polygon::PolygonAdapter;
pub use yahoo::YahooAdapter;

use crate::credentials::Credential;
use crate::http_client::{HttpRequest, HttpResponse};
use crate::normalize::ProviderSchema;
use crate::retry::RetryConfig;
use crate::{FetchError, ProviderId, SeriesRequest};

/// Capability interface implemented once per market data provider.
pub trait MarketDataProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    fn schema_for(&self, request: &SeriesRequest) -> ProviderSchema;

    fn build_request(
        &self,
        request: &SeriesRequest,
        credential: Option<&Credential>,
    ) -> Result<HttpRequest, FetchError>;

    /// Returns the body of a usable response or the classified failure.
    fn classify_response(
        &self,
        response: HttpResponse,
        retry: &RetryConfig,
    ) -> Result<String, FetchError> {
        classify_status(self.id(), response, retry)
    }
}

/// Status-code classification shared by all providers.
pub fn classify_status(
    provider: ProviderId,
    response: HttpResponse,
    retry: &RetryConfig,
) -> Result<String, FetchError> {
    if response.is_success() {
        return Ok(response.body);
    }

    let status = response.status;
    let message = format!("{provider} returned status {status}");
    if status == 429 {
        Err(FetchError::rate_limited(provider, message))
    } else if retry.is_transient_status(status) {
        Err(FetchError::transient(provider, Some(status), message))
    } else {
        Err(FetchError::permanent(provider, Some(status), message))
    }
}

/// Base URLs for every provider; overridable for tests and proxies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub yahoo: String,
    pub polygon: String,
    pub alphavantage: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            yahoo: String::from(yahoo::DEFAULT_BASE_URL),
            polygon: String::from(polygon::DEFAULT_BASE_URL),
            alphavantage: String::from(alphavantage::DEFAULT_BASE_URL),
        }
    }
}

impl ProviderEndpoints {
    /// Every provider served from one base URL, as a local test server would.
    pub fn all(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            yahoo: base_url.clone(),
            polygon: base_url.clone(),
            alphavantage: base_url,
        }
    }

    pub fn adapters(&self) -> Vec<Arc<dyn MarketDataProvider>> {
        vec![
            Arc::new(YahooAdapter::new(self.yahoo.clone())),
            Arc::new(PolygonAdapter::new(self.polygon.clone())),
            Arc::new(AlphaVantageAdapter::new(self.alphavantage.clone())),
        ]
    }
}

fn trim_base(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_owned()
}
