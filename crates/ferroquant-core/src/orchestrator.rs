//! Concurrent fetch fan-out with quotas, retries, timeouts and cancellation.
//!
//! `fetch_many` never fails as a whole: every input request gets exactly one
//! [`FetchOutcome`], in input order, whatever order the fetches complete in.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::adapters::{MarketDataProvider, ProviderEndpoints};
use crate::credentials::CredentialCache;
use crate::http_client::{HttpClient, HttpErrorKind, HttpRequest, ReqwestHttpClient};
use crate::normalize::RawPayload;
use crate::quota::QuotaRegistry;
use crate::retry::RetryConfig;
use crate::{FetchError, ProviderId, SeriesRequest, UtcDateTime};

/// Limits applied to one `fetch_many` call.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    pub max_concurrency: usize,
    pub timeout_per_request: Duration,
    /// Carries the retry budget (`retry.max_retries`).
    pub retry: RetryConfig,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            timeout_per_request: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }
}

impl FetchOptions {
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_timeout(mut self, timeout_per_request: Duration) -> Self {
        self.timeout_per_request = timeout_per_request;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.retry.max_retries
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout_per_request.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Result of one request plus how much work it took.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub result: Result<RawPayload, FetchError>,
    /// HTTP attempts issued; zero when the request never reached the network.
    pub attempts: u32,
    pub latency_ms: u64,
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchEntry {
    pub request: SeriesRequest,
    pub outcome: FetchOutcome,
}

/// One entry per input request, in input order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchReport {
    entries: Vec<FetchEntry>,
    deadline_exceeded: bool,
}

impl FetchReport {
    pub fn entries(&self) -> &[FetchEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<FetchEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Outcome for `request`; the first match when a request was submitted twice.
    pub fn get(&self, request: &SeriesRequest) -> Option<&FetchOutcome> {
        self.entries
            .iter()
            .find(|entry| &entry.request == request)
            .map(|entry| &entry.outcome)
    }

    pub fn success_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.outcome.is_success())
            .count()
    }

    pub fn failure_count(&self) -> usize {
        self.entries.len() - self.success_count()
    }

    pub fn deadline_exceeded(&self) -> bool {
        self.deadline_exceeded
    }
}

/// Fans requests out to provider adapters over a shared HTTP transport.
pub struct FetchOrchestrator {
    providers: HashMap<ProviderId, Arc<dyn MarketDataProvider>>,
    http: Arc<dyn HttpClient>,
    credentials: Arc<CredentialCache>,
    quotas: QuotaRegistry,
}

impl std::fmt::Debug for FetchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut providers = self.providers.keys().collect::<Vec<_>>();
        providers.sort();
        f.debug_struct("FetchOrchestrator")
            .field("providers", &providers)
            .field("quotas", &self.quotas)
            .finish_non_exhaustive()
    }
}

impl FetchOrchestrator {
    pub fn builder() -> FetchOrchestratorBuilder {
        FetchOrchestratorBuilder::default()
    }

    pub fn provider(&self, id: ProviderId) -> Option<&Arc<dyn MarketDataProvider>> {
        self.providers.get(&id)
    }

    pub fn credentials(&self) -> &Arc<CredentialCache> {
        &self.credentials
    }

    /// Fetches every request with at most `options.max_concurrency` in flight.
    ///
    /// Once `cancel` fires, in-flight attempts are dropped and requests that have
    /// not started resolve to [`FetchError::Cancelled`] without touching the network.
    pub async fn fetch_many(
        &self,
        requests: Vec<SeriesRequest>,
        options: &FetchOptions,
        cancel: &CancellationToken,
    ) -> FetchReport {
        let span = tracing::info_span!(
            "fetch_many",
            requests = requests.len(),
            max_concurrency = options.max_concurrency
        );

        async {
            let mut outcomes = stream::iter(requests.iter().enumerate())
                .map(move |(index, request)| async move {
                    (index, self.fetch_one(request, options, cancel).await)
                })
                .buffer_unordered(options.max_concurrency.max(1))
                .collect::<Vec<_>>()
                .await;
            outcomes.sort_by_key(|(index, _)| *index);

            let entries = requests
                .into_iter()
                .zip(outcomes)
                .map(|(request, (_, outcome))| FetchEntry { request, outcome })
                .collect::<Vec<_>>();
            let report = FetchReport {
                entries,
                deadline_exceeded: false,
            };
            tracing::info!(
                succeeded = report.success_count(),
                failed = report.failure_count(),
                "fetch_many finished"
            );
            report
        }
        .instrument(span)
        .await
    }

    /// [`FetchOrchestrator::fetch_many`] bounded by an overall deadline. When the
    /// deadline passes, outstanding work is cancelled and the report says so.
    pub async fn fetch_many_with_deadline(
        &self,
        requests: Vec<SeriesRequest>,
        options: &FetchOptions,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> FetchReport {
        let child = cancel.child_token();
        let fetch = self.fetch_many(requests, options, &child);
        let timer = tokio::time::sleep(deadline);
        tokio::pin!(fetch);
        tokio::pin!(timer);

        let mut deadline_exceeded = false;
        let mut report = loop {
            tokio::select! {
                report = &mut fetch => break report,
                () = &mut timer, if !deadline_exceeded => {
                    deadline_exceeded = true;
                    tracing::warn!(deadline_ms = deadline.as_millis() as u64, "fetch deadline exceeded");
                    child.cancel();
                }
            }
        };
        report.deadline_exceeded = deadline_exceeded;
        report
    }

    async fn fetch_one(
        &self,
        request: &SeriesRequest,
        options: &FetchOptions,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        let started = Instant::now();
        let mut attempts = 0;
        let result = self
            .run_attempts(request, options, cancel, &mut attempts)
            .await;

        if let Err(error) = &result {
            tracing::warn!(request = %request, attempts, code = error.code(), %error, "fetch failed");
        }
        FetchOutcome {
            result,
            attempts,
            latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    async fn run_attempts(
        &self,
        request: &SeriesRequest,
        options: &FetchOptions,
        cancel: &CancellationToken,
        attempts: &mut u32,
    ) -> Result<RawPayload, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let provider = self.providers.get(&request.provider).ok_or_else(|| {
            FetchError::permanent(request.provider, None, "no adapter registered")
        })?;
        request
            .validate()
            .map_err(|error| FetchError::permanent(request.provider, None, error.to_string()))?;

        let credential = self.credentials.get(request.provider).await;
        let http_request = provider
            .build_request(request, credential.as_ref())?
            .with_timeout_ms(options.timeout_ms());

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
                () = self.quotas.acquire(request.provider) => {}
            }

            *attempts += 1;
            let attempt = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
                result = self.attempt(provider.as_ref(), http_request.clone(), options) => result,
            };

            let error = match attempt {
                Ok(body) => {
                    tracing::debug!(request = %request, attempts = *attempts, "fetch succeeded");
                    return Ok(RawPayload {
                        schema: provider.schema_for(request),
                        series_id: request.series_id(),
                        source: request.provider,
                        unit: request.unit,
                        received_at: UtcDateTime::now(),
                        body,
                    });
                }
                Err(error) => error,
            };

            if !options.retry.should_retry(&error, *attempts) {
                return Err(error);
            }
            let delay = options.retry.delay_for_retry(*attempts - 1);
            tracing::debug!(
                request = %request,
                attempt = *attempts,
                delay_ms = delay.as_millis() as u64,
                %error,
                "retrying fetch"
            );
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(
        &self,
        provider: &dyn MarketDataProvider,
        request: HttpRequest,
        options: &FetchOptions,
    ) -> Result<String, FetchError> {
        let id = provider.id();
        let timeout = FetchError::Timeout {
            provider: id,
            timeout_ms: options.timeout_ms(),
        };

        let response =
            match tokio::time::timeout(options.timeout_per_request, self.http.execute(request)).await {
                Err(_) => return Err(timeout),
                Ok(Err(error)) if error.kind() == HttpErrorKind::Timeout => return Err(timeout),
                Ok(Err(error)) if error.retryable() => {
                    return Err(FetchError::transient(id, None, error.message()))
                }
                Ok(Err(error)) => return Err(FetchError::permanent(id, None, error.message())),
                Ok(Ok(response)) => response,
            };

        provider.classify_response(response, &options.retry)
    }
}

/// Assembles a [`FetchOrchestrator`]; unset parts fall back to production defaults.
#[derive(Default)]
pub struct FetchOrchestratorBuilder {
    providers: HashMap<ProviderId, Arc<dyn MarketDataProvider>>,
    http: Option<Arc<dyn HttpClient>>,
    credentials: Option<Arc<CredentialCache>>,
    quotas: Option<QuotaRegistry>,
}

impl FetchOrchestratorBuilder {
    pub fn with_provider(mut self, provider: Arc<dyn MarketDataProvider>) -> Self {
        self.providers.insert(provider.id(), provider);
        self
    }

    pub fn with_endpoints(self, endpoints: &ProviderEndpoints) -> Self {
        endpoints
            .adapters()
            .into_iter()
            .fold(self, |builder, adapter| builder.with_provider(adapter))
    }

    pub fn with_http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<CredentialCache>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_quotas(mut self, quotas: QuotaRegistry) -> Self {
        self.quotas = Some(quotas);
        self
    }

    pub fn build(self) -> FetchOrchestrator {
        let builder = if self.providers.is_empty() {
            self.with_endpoints(&ProviderEndpoints::default())
        } else {
            self
        };

        FetchOrchestrator {
            providers: builder.providers,
            http: builder
                .http
                .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new())),
            credentials: builder.credentials.unwrap_or_default(),
            quotas: builder.quotas.unwrap_or_else(QuotaRegistry::with_defaults),
        }
    }
}
