use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use ferroquant_core::{ProviderId, UtcDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Entity stored in the cache; each kind has its own table and key namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Series,
    Curve,
    Valuation,
}

impl EntryKind {
    pub const ALL: [Self; 3] = [Self::Series, Self::Curve, Self::Valuation];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Series => "series",
            Self::Curve => "curve",
            Self::Valuation => "valuation",
        }
    }

    pub(crate) const fn table(self) -> &'static str {
        match self {
            Self::Series => "series_cache",
            Self::Curve => "curve_cache",
            Self::Valuation => "valuation_cache",
        }
    }

    /// Key prefix, e.g. `series:`.
    pub fn prefix(self) -> String {
        format!("{}:", self.as_str())
    }

    /// Kind owning `key`, read from its namespace prefix.
    pub fn from_key(key: &str) -> Option<Self> {
        let (namespace, _) = key.split_once(':')?;
        namespace.parse().ok()
    }
}

impl Display for EntryKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "series" => Ok(Self::Series),
            "curve" => Ok(Self::Curve),
            "valuation" => Ok(Self::Valuation),
            other => Err(format!(
                "unknown entry kind '{other}', expected series, curve or valuation"
            )),
        }
    }
}

/// Where a cached payload came from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default)]
    pub source_chain: Vec<ProviderId>,
    #[serde(default)]
    pub stale: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl Provenance {
    pub fn from_sources(source_chain: Vec<ProviderId>) -> Self {
        Self {
            source_chain,
            ..Self::default()
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// One cached payload. Entries are immutable; a new `put` replaces the whole entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub kind: EntryKind,
    pub payload: Value,
    pub created_at: UtcDateTime,
    pub ttl: Duration,
    pub provenance: Provenance,
}

impl CacheEntry {
    pub fn expires_at_millis(&self) -> i64 {
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        self.created_at.unix_millis().saturating_add(ttl_ms)
    }

    pub fn is_expired_at(&self, now: UtcDateTime) -> bool {
        now.unix_millis() >= self.expires_at_millis()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(UtcDateTime::now())
    }

    /// Payload decoded into `T`.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Hit(Arc<CacheEntry>),
    /// Present but past its TTL. Counts as a miss; kept for stale-if-error.
    Expired(Arc<CacheEntry>),
    Miss,
}

impl Lookup {
    pub(crate) fn classify(entry: Arc<CacheEntry>, now: UtcDateTime) -> Self {
        if entry.is_expired_at(now) {
            Self::Expired(entry)
        } else {
            Self::Hit(entry)
        }
    }

    /// The entry if it is still fresh.
    pub fn fresh(&self) -> Option<&Arc<CacheEntry>> {
        match self {
            Self::Hit(entry) => Some(entry),
            Self::Expired(_) | Self::Miss => None,
        }
    }

    /// The entry whether fresh or expired.
    pub fn entry(&self) -> Option<&Arc<CacheEntry>> {
        match self {
            Self::Hit(entry) | Self::Expired(entry) => Some(entry),
            Self::Miss => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ttl: Duration) -> CacheEntry {
        CacheEntry {
            key: String::from("series:abc"),
            kind: EntryKind::Series,
            payload: serde_json::json!({"v": 1}),
            created_at: UtcDateTime::from_unix_millis(1_000_000).unwrap(),
            ttl,
            provenance: Provenance::default(),
        }
    }

    #[test]
    fn kind_is_read_from_key_namespace() {
        assert_eq!(EntryKind::from_key("curve:0123"), Some(EntryKind::Curve));
        assert_eq!(EntryKind::from_key("valuation:x"), Some(EntryKind::Valuation));
        assert_eq!(EntryKind::from_key("bars:x"), None);
        assert_eq!(EntryKind::from_key("no-namespace"), None);
    }

    #[test]
    fn expiry_is_inclusive_of_the_ttl_boundary() {
        let entry = entry(Duration::from_millis(500));
        assert!(!entry.is_expired_at(UtcDateTime::from_unix_millis(1_000_499).unwrap()));
        assert!(entry.is_expired_at(UtcDateTime::from_unix_millis(1_000_500).unwrap()));
    }

    #[test]
    fn lookup_exposes_expired_entry_without_treating_it_as_fresh() {
        let entry = Arc::new(entry(Duration::ZERO));
        let lookup = Lookup::classify(entry.clone(), UtcDateTime::from_unix_millis(1_000_000).unwrap());

        assert!(matches!(lookup, Lookup::Expired(_)));
        assert!(lookup.fresh().is_none());
        assert_eq!(lookup.entry(), Some(&entry));
    }
}
