use ferroquant_core::{CredentialError, EnvelopeError, FetchError, NormalizeError, ProviderId};
use ferroquant_kernel::KernelError;
use thiserror::Error;

use crate::schema::SchemaViolation;

/// Typed failure of one tool call.
///
/// Every variant renders to [`EnvelopeError`]s naming the operation, the input
/// fragment at fault and whether retrying may help.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid input: {}", summarize(violations))]
    Validation { violations: Vec<SchemaViolation> },

    #[error("malformed upstream payload for {input_path}: {error}")]
    MalformedPayload {
        input_path: String,
        #[source]
        error: NormalizeError,
    },

    #[error("fetch failed for {input_path}: {error}")]
    Fetch {
        input_path: String,
        #[source]
        error: FetchError,
    },

    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("invalid curve input at {input_path}: {message}")]
    InvalidCurveInput { input_path: String, message: String },

    #[error("unsupported instrument type '{instrument_type}'")]
    UnsupportedInstrument {
        input_path: String,
        instrument_type: String,
    },

    #[error("deadline of {deadline_ms}ms exceeded")]
    DeadlineExceeded { deadline_ms: u64 },

    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            violations: vec![SchemaViolation::new(path, message)],
        }
    }

    pub fn internal(message: impl ToString) -> Self {
        Self::Internal(message.to_string())
    }

    /// Maps a kernel failure onto the input fragment that caused it.
    pub fn from_kernel(error: KernelError, input_path: impl Into<String>) -> Self {
        let input_path = input_path.into();
        match error {
            KernelError::InvalidCurveInput(message) => Self::InvalidCurveInput {
                input_path,
                message,
            },
            KernelError::UnsupportedInstrument(instrument_type) => Self::UnsupportedInstrument {
                input_path,
                instrument_type,
            },
            other => Self::invalid(input_path, other.to_string()),
        }
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation.invalid_input",
            Self::MalformedPayload { .. } => "upstream.malformed_payload",
            Self::Fetch { error, .. } => error.code(),
            Self::CacheUnavailable(_) => "cache.unavailable",
            Self::InvalidCurveInput { .. } => "kernel.invalid_curve_input",
            Self::UnsupportedInstrument { .. } => "kernel.unsupported_instrument",
            Self::DeadlineExceeded { .. } => "deadline.exceeded",
            Self::UnknownTool(_) => "tool.unknown",
            Self::Credentials(_) => "credentials.unavailable",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether the same call may succeed if retried later.
    pub const fn retryable(&self) -> bool {
        match self {
            Self::Fetch { error, .. } => error.retryable(),
            Self::MalformedPayload { .. }
            | Self::CacheUnavailable(_)
            | Self::DeadlineExceeded { .. }
            | Self::Credentials(_) => true,
            Self::Validation { .. }
            | Self::InvalidCurveInput { .. }
            | Self::UnsupportedInstrument { .. }
            | Self::UnknownTool(_)
            | Self::Internal(_) => false,
        }
    }

    pub fn input_path(&self) -> Option<&str> {
        match self {
            Self::MalformedPayload { input_path, .. }
            | Self::Fetch { input_path, .. }
            | Self::InvalidCurveInput { input_path, .. }
            | Self::UnsupportedInstrument { input_path, .. } => Some(input_path),
            _ => None,
        }
    }

    fn provider(&self) -> Option<ProviderId> {
        match self {
            Self::Fetch { error, .. } => error.provider(),
            _ => None,
        }
    }

    /// Envelope errors for a failure of `operation`; validation failures yield
    /// one error per violation.
    pub fn envelope_errors(&self, operation: &str) -> Vec<EnvelopeError> {
        if let Self::Validation { violations } = self {
            return violations
                .iter()
                .map(|violation| {
                    envelope_error(self.code(), &violation.message, false, operation)
                        .with_input_path(violation.path.clone())
                })
                .collect();
        }

        let mut error = envelope_error(self.code(), &self.to_string(), self.retryable(), operation);
        if let Some(input_path) = self.input_path() {
            error = error.with_input_path(input_path);
        }
        if let Some(provider) = self.provider() {
            error = error.with_source(provider);
        }
        vec![error]
    }
}

fn envelope_error(code: &str, message: &str, retryable: bool, operation: &str) -> EnvelopeError {
    EnvelopeError {
        code: code.to_owned(),
        message: message.to_owned(),
        retryable: Some(retryable),
        operation: Some(operation.to_owned()),
        input_path: None,
        source: None,
    }
}

fn summarize(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
