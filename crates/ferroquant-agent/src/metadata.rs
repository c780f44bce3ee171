//! # Request Metadata
//!
//! Identifiers stamped on every tool call and the provenance collected while
//! serving it.
//!
//! - [`RequestId`]: UUID v4 request identifier
//! - [`TraceId`]: W3C-style 32-character hex trace identifier
//! - [`CallProvenance`]: sources, cache use, staleness and warnings of one call

use std::fmt::{self, Display, Formatter};

use ferroquant_core::{ProviderId, ValidationError};
use ferroquant_store::Provenance;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request identifier (UUID v4) for end-to-end request tracking.
///
/// Included in every envelope and recorded on the `tool_call` tracing span, so
/// logs and results can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let uuid = Uuid::parse_str(input).map_err(|_| ValidationError::InvalidRequestId)?;
        Ok(Self(uuid))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new_v4()
    }
}

/// Distributed tracing identifier: 32 lowercase hex characters, not all zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn new_checked(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if !is_valid_trace_id(&value) {
            return Err(ValidationError::InvalidTraceId);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for TraceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

fn is_valid_trace_id(value: &str) -> bool {
    value.len() == 32
        && value.chars().all(|ch| ch.is_ascii_hexdigit())
        && value.chars().any(|ch| ch != '0')
}

/// Provenance accumulated while one tool call runs.
///
/// `cache_hit` is set by the tool itself: it is true only when the returned
/// result was read from the cache rather than computed in this call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallProvenance {
    pub source_chain: Vec<ProviderId>,
    pub cache_hit: bool,
    pub stale: bool,
    pub warnings: Vec<String>,
    /// Set once the store failed during this call; later cache operations are skipped.
    pub cache_degraded: bool,
}

impl CallProvenance {
    /// Records `provider` once, keeping first-seen order.
    pub fn add_source(&mut self, provider: ProviderId) {
        if !self.source_chain.contains(&provider) {
            self.source_chain.push(provider);
        }
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    /// Folds in the provenance stored with a cache entry.
    pub fn absorb(&mut self, provenance: &Provenance) {
        for provider in &provenance.source_chain {
            self.add_source(*provider);
        }
        self.stale |= provenance.stale;
        for warning in &provenance.warnings {
            self.warn(warning.clone());
        }
    }

    /// Provenance to persist alongside a computed artifact.
    pub fn to_stored(&self) -> Provenance {
        Provenance {
            source_chain: self.source_chain.clone(),
            stale: self.stale,
            warnings: self.warnings.clone(),
        }
    }
}
