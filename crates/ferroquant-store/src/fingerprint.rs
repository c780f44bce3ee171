//! Deterministic cache keys.
//!
//! A key is `<kind>:<fnv1a-64 hex of the canonical JSON of its parts>`, so equal
//! requests map to equal keys across processes and prefix invalidation can target
//! one entity kind at a time.

use serde::Serialize;

use crate::EntryKind;

pub fn fingerprint<T: Serialize>(kind: EntryKind, parts: &T) -> Result<String, serde_json::Error> {
    let hash = ferroquant_kernel::hash::content_hash(parts)?;
    Ok(format!("{}{hash}", kind.prefix()))
}
