//! # Ferroquant Agent
//!
//! Tool-call surface of ferroquant: a fixed set of named tools with JSON
//! schemas, each answering with a validated [`Envelope`](ferroquant_core::Envelope).
//!
//! | Tool | Purpose |
//! |------|---------|
//! | `get_series` | normalized market data series, partial results per request |
//! | `build_curve` | discount curve from explicit pillars |
//! | `get_discount_curve` | discount curve from market quotes per tenor |
//! | `discount_factor` | discount factors and zero rates at dates |
//! | `price_instrument` | present value and bump-and-reprice sensitivities |
//! | `invalidate_cache` | cache maintenance |
//!
//! ```rust,ignore
//! let service = AnalyticsService::start(AnalyticsConfig::from_env()?, &EnvCredentials).await?;
//! let envelope = service
//!     .call("discount_factor", json!({ "curve": { "pillars": pillars }, "dates": ["2025-01-01"] }))
//!     .await;
//! ```

pub mod config;
pub mod envelope;
pub mod error;
pub mod metadata;
pub mod requests;
pub mod schema;
pub mod service;
pub mod tools;

pub use config::{AnalyticsConfig, ConfigError};
pub use envelope::EnvelopeBuilder;
pub use error::ServiceError;
pub use metadata::{CallProvenance, RequestId, TraceId};
pub use schema::{validate_against_schema, SchemaViolation};
pub use service::{AnalyticsService, PricedInstrument};
pub use tools::{ToolDescriptor, ToolName, ToolRegistry};

/// Version stamped on every envelope.
pub const SCHEMA_VERSION: &str = "v1.0.0";
