//! # Envelope Construction
//!
//! Every tool call answers with an [`Envelope`]: the result `data`, metadata
//! (request id, trace id, latency, provenance) and zero or more structured
//! errors. Partial results carry both data and errors.
//!
//! ```rust,ignore
//! let envelope = EnvelopeBuilder::new(SCHEMA_VERSION)
//!     .with_source_chain(vec![ProviderId::Yahoo])
//!     .with_data(json!({ "items": [] }))
//!     .with_latency_ms(142)
//!     .build()?;
//! ```

use ferroquant_core::{Envelope, EnvelopeError, EnvelopeMeta, ProviderId, ValidationError};
use serde_json::Value;

use crate::metadata::{CallProvenance, RequestId};

/// Fluent builder for validated envelopes.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    schema_version: String,
    source_chain: Vec<ProviderId>,
    data: Value,
    latency_ms: u64,
    cache_hit: bool,
    stale: bool,
    warnings: Vec<String>,
    errors: Vec<EnvelopeError>,
    request_id: Option<String>,
    trace_id: Option<String>,
}

impl EnvelopeBuilder {
    /// `schema_version` must follow `vMAJOR.MINOR.PATCH`.
    pub fn new(schema_version: impl Into<String>) -> Self {
        Self {
            schema_version: schema_version.into(),
            source_chain: Vec::new(),
            data: Value::Null,
            latency_ms: 0,
            cache_hit: false,
            stale: false,
            warnings: Vec::new(),
            errors: Vec::new(),
            request_id: None,
            trace_id: None,
        }
    }

    pub fn with_source_chain(mut self, source_chain: Vec<ProviderId>) -> Self {
        self.source_chain = source_chain;
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_cache_hit(mut self, cache_hit: bool) -> Self {
        self.cache_hit = cache_hit;
        self
    }

    pub fn with_stale(mut self, stale: bool) -> Self {
        self.stale = stale;
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    /// Copies sources, cache use, staleness and warnings from `provenance`.
    pub fn with_provenance(self, provenance: CallProvenance) -> Self {
        self.with_source_chain(provenance.source_chain)
            .with_cache_hit(provenance.cache_hit)
            .with_stale(provenance.stale)
            .with_warnings(provenance.warnings)
    }

    pub fn with_error(mut self, error: EnvelopeError) -> Self {
        self.errors.push(error);
        self
    }

    pub fn with_errors(mut self, errors: Vec<EnvelopeError>) -> Self {
        self.errors.extend(errors);
        self
    }

    /// Defaults to a fresh UUID v4 when not set.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn build(self) -> Result<Envelope<Value>, ValidationError> {
        let request_id = self
            .request_id
            .unwrap_or_else(|| RequestId::new_v4().to_string());

        let mut meta = EnvelopeMeta::new(
            request_id,
            self.schema_version,
            self.source_chain,
            self.latency_ms,
            self.cache_hit,
        )?
        .with_stale(self.stale);

        if let Some(trace_id) = self.trace_id {
            meta = meta.with_trace_id(trace_id)?;
        }

        for warning in self.warnings {
            meta.push_warning(warning);
        }

        Envelope::with_errors(meta, self.data, self.errors)
    }
}
