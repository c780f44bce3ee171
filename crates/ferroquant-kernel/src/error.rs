use thiserror::Error;
use time::Date;

/// Failures raised by curve construction and valuation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum KernelError {
    #[error("invalid curve input: {0}")]
    InvalidCurveInput(String),

    #[error("unsupported instrument type '{0}'")]
    UnsupportedInstrument(String),

    #[error("invalid instrument: {0}")]
    InvalidInstrument(String),

    #[error("end date {end} must be after start date {start}")]
    InvalidDateRange { start: Date, end: Date },

    #[error("bump size must be positive and finite, got {0}")]
    InvalidBumpSize(f64),

    #[error("invalid date '{value}', expected YYYY-MM-DD")]
    InvalidDate { value: String },

    #[error("invalid tenor '{0}', expected e.g. 3M or 10Y")]
    InvalidTenor(String),

    /// `field` is a `/`-separated path into the profile, e.g. `monthly_expenses/rent`.
    #[error("invalid profile field '{field}': {message}")]
    InvalidProfile { field: String, message: String },
}

impl KernelError {
    pub(crate) fn curve(message: impl Into<String>) -> Self {
        Self::InvalidCurveInput(message.into())
    }

    pub(crate) fn instrument(message: impl Into<String>) -> Self {
        Self::InvalidInstrument(message.into())
    }
}
