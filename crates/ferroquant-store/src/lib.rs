//! # Ferroquant Store
//!
//! Durable cache for normalized series, curves and valuations, backed by DuckDB
//! with an in-memory index of hot entries.
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `series_cache` | Normalized market data series |
//! | `curve_cache` | Built discount curves |
//! | `valuation_cache` | Instrument valuations and sensitivities |
//! | `schema_migrations` | Applied migration versions |
//!
//! Keys are namespaced fingerprints (`series:…`, `curve:…`, `valuation:…`), see
//! [`fingerprint`].

mod cache;
pub mod duckdb;
mod entry;
mod error;
mod fingerprint;
pub mod migrations;

use std::env;
use std::path::PathBuf;

pub use cache::{CacheStats, DataCache};
pub use entry::{CacheEntry, EntryKind, Lookup, Provenance};
pub use error::StoreError;
pub use fingerprint::fingerprint;

/// Where the cache lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Path to the `DuckDB` database file; `None` keeps everything in memory.
    pub db_path: Option<PathBuf>,
    /// Maximum number of idle connections kept in the pool.
    pub max_pool_size: usize,
    /// Upper bound on entries held in the in-memory index.
    pub max_hot_entries: usize,
}

const DEFAULT_MAX_HOT_ENTRIES: usize = 4_096;

impl Default for StoreConfig {
    fn default() -> Self {
        Self::at(
            resolve_ferroquant_home()
                .join("cache")
                .join("analytics.duckdb"),
        )
    }
}

impl StoreConfig {
    pub fn at(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: Some(db_path.into()),
            max_pool_size: 4,
            max_hot_entries: DEFAULT_MAX_HOT_ENTRIES,
        }
    }

    #[must_use]
    pub fn with_max_hot_entries(mut self, max_hot_entries: usize) -> Self {
        self.max_hot_entries = max_hot_entries.max(1);
        self
    }

    pub fn in_memory() -> Self {
        Self {
            db_path: None,
            max_pool_size: 4,
            max_hot_entries: DEFAULT_MAX_HOT_ENTRIES,
        }
    }
}

/// `$FERROQUANT_HOME`, else `$HOME/.ferroquant`, else `.ferroquant`.
pub fn resolve_ferroquant_home() -> PathBuf {
    if let Some(path) = env::var_os("FERROQUANT_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".ferroquant");
    }

    PathBuf::from(".ferroquant")
}
