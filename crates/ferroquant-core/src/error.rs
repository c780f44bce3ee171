use thiserror::Error;

use crate::normalize::ProviderSchema;
use crate::ProviderId;

/// Validation and contract errors exposed by `ferroquant-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol must start with an ASCII letter or '^': '{ch}'")]
    SymbolInvalidStart { ch: char },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("invalid source '{value}', expected one of yahoo, polygon, alphavantage")]
    InvalidSource { value: String },
    #[error("invalid granularity '{value}', expected one of daily, weekly, monthly")]
    InvalidGranularity { value: String },
    #[error("invalid series field '{value}'")]
    InvalidField { value: String },
    #[error("invalid unit '{value}', expected decimal or percent")]
    InvalidUnit { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("series timestamps must be strictly increasing at index {index}")]
    SeriesNotIncreasing { index: usize },
    #[error("series request range is inverted: {start} > {end}")]
    InvertedRange { start: String, end: String },

    #[error("request_id must be at least 8 characters")]
    InvalidRequestId,
    #[error("trace_id must be 32 hex characters")]
    InvalidTraceId,
    #[error("schema_version must match vMAJOR.MINOR.PATCH: '{value}'")]
    InvalidSchemaVersion { value: String },

    #[error("error code cannot be empty")]
    EmptyErrorCode,
    #[error("error message cannot be empty")]
    EmptyErrorMessage,
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of a single market data fetch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("transient failure from {provider}: {message}")]
    Transient {
        provider: ProviderId,
        status: Option<u16>,
        message: String,
    },
    #[error("permanent failure from {provider}: {message}")]
    Permanent {
        provider: ProviderId,
        status: Option<u16>,
        message: String,
    },
    #[error("request to {provider} timed out after {timeout_ms}ms")]
    Timeout { provider: ProviderId, timeout_ms: u64 },
    #[error("request cancelled before completion")]
    Cancelled,
    #[error("rate limited by {provider}: {message}")]
    RateLimited { provider: ProviderId, message: String },
}

impl FetchError {
    pub fn transient(provider: ProviderId, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Transient {
            provider,
            status,
            message: message.into(),
        }
    }

    pub fn permanent(provider: ProviderId, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Permanent {
            provider,
            status,
            message: message.into(),
        }
    }

    pub fn rate_limited(provider: ProviderId, message: impl Into<String>) -> Self {
        Self::RateLimited {
            provider,
            message: message.into(),
        }
    }

    pub const fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. } | Self::Timeout { .. } | Self::RateLimited { .. }
        )
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "fetch.transient",
            Self::Permanent { .. } => "fetch.permanent",
            Self::Timeout { .. } => "fetch.timeout",
            Self::Cancelled => "fetch.cancelled",
            Self::RateLimited { .. } => "fetch.rate_limited",
        }
    }

    pub const fn provider(&self) -> Option<ProviderId> {
        match self {
            Self::Transient { provider, .. }
            | Self::Permanent { provider, .. }
            | Self::Timeout { provider, .. }
            | Self::RateLimited { provider, .. } => Some(*provider),
            Self::Cancelled => None,
        }
    }
}

/// Provider payload that cannot be turned into a series.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("malformed {schema} payload: {reason}")]
    MalformedPayload {
        schema: ProviderSchema,
        reason: String,
    },
}

impl NormalizeError {
    pub fn malformed(schema: ProviderSchema, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            schema,
            reason: reason.into(),
        }
    }
}
