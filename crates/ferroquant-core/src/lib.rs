//! Market data contracts for ferroquant.
//!
//! This crate contains:
//! - Canonical domain models and validation
//! - Provider identifiers, credentials and per-provider quotas
//! - Provider adapters over a pluggable HTTP transport
//! - The payload normalizer
//! - The concurrent fetch orchestrator with retry and cancellation
//! - Response envelope and structured errors

pub mod adapters;
pub mod credentials;
pub mod domain;
pub mod envelope;
pub mod error;
pub mod http_client;
pub mod normalize;
pub mod orchestrator;
pub mod quota;
pub mod retry;
pub mod source;

pub use adapters::{
    AlphaVantageAdapter, MarketDataProvider, PolygonAdapter, ProviderEndpoints, YahooAdapter,
};
pub use credentials::{
    Credential, CredentialCache, CredentialError, CredentialSource, EnvCredentials,
    StaticCredentials,
};
pub use domain::{
    Granularity, Observation, Series, SeriesField, SeriesId, SeriesRequest, Symbol, UtcDateTime,
    ValueUnit,
};
pub use envelope::{Envelope, EnvelopeError, EnvelopeMeta};
pub use error::{CoreError, FetchError, NormalizeError, ValidationError};
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpErrorKind, HttpMethod, HttpRequest, HttpResponse,
    ReqwestHttpClient, ScriptedHttpClient, ScriptedReply,
};
pub use normalize::{normalize, Normalized, ProviderSchema, RawPayload};
pub use orchestrator::{
    FetchEntry, FetchOptions, FetchOrchestrator, FetchOrchestratorBuilder, FetchOutcome,
    FetchReport,
};
pub use quota::{ProviderPolicy, QuotaRegistry};
pub use retry::{Backoff, RetryConfig};
pub use source::ProviderId;
