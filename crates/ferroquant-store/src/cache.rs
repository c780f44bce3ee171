use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ::duckdb::{params, Connection, OptionalExt};
use ferroquant_core::UtcDateTime;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::duckdb::DuckDbConnectionManager;
use crate::{migrations, CacheEntry, EntryKind, Lookup, Provenance, StoreConfig, StoreError};

/// Counters and sizes reported by [`DataCache::stats`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub hot_entries: usize,
    pub durable_entries: BTreeMap<EntryKind, u64>,
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub writes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    writes: AtomicU64,
}

impl Counters {
    fn record(&self, lookup: &Lookup) {
        let counter = match lookup {
            Lookup::Hit(_) => &self.hits,
            Lookup::Expired(_) => &self.expired,
            Lookup::Miss => &self.misses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct CacheInner {
    /// `None` when the durable store could not be opened.
    manager: Option<DuckDbConnectionManager>,
    unavailable_reason: String,
    hot: RwLock<HashMap<String, Arc<CacheEntry>>>,
    max_hot_entries: usize,
    /// Serializes every durable read or write that is followed by a hot index
    /// update, so the index never holds a row a writer already replaced or removed.
    write_gate: Mutex<()>,
    counters: Counters,
}

/// Durable cache with an in-memory index of hot entries.
///
/// The DuckDB store is authoritative: a cold process repopulates the hot index
/// from it on first read. Writes land durably in one transaction before the hot
/// index swaps in the new `Arc`, so readers never see a partial entry.
///
/// The hot index only holds fresh entries and is capped at
/// [`StoreConfig::max_hot_entries`]; expired entries stay durable for
/// stale-if-error reads but are dropped from memory.
#[derive(Clone)]
pub struct DataCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for DataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataCache")
            .field(
                "db_path",
                &self.inner.manager.as_ref().and_then(|manager| manager.db_path()),
            )
            .field("available", &self.is_available())
            .finish_non_exhaustive()
    }
}

impl DataCache {
    /// Opens (and migrates) the store described by `config`.
    pub async fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let manager = tokio::task::spawn_blocking(move || -> Result<_, StoreError> {
            let manager = match &config.db_path {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    DuckDbConnectionManager::open(path.clone(), config.max_pool_size)?
                }
                None => DuckDbConnectionManager::in_memory(config.max_pool_size)?,
            };

            let connection = manager.acquire()?;
            let applied = migrations::apply_migrations(&connection)?;
            if !applied.is_empty() {
                tracing::info!(?applied, "cache migrations applied");
            }
            drop(connection);
            Ok(manager)
        })
        .await??;

        tracing::debug!(db_path = ?manager.db_path(), "cache opened");
        Ok(Self::from_manager(
            Some(manager),
            String::new(),
            config.max_hot_entries,
        ))
    }

    /// A private in-memory store.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::open(StoreConfig::in_memory()).await
    }

    /// A cache whose store could not be opened. Every operation reports
    /// [`StoreError::Unavailable`] with `reason`.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::from_manager(None, reason.into(), StoreConfig::in_memory().max_hot_entries)
    }

    fn from_manager(
        manager: Option<DuckDbConnectionManager>,
        unavailable_reason: String,
        max_hot_entries: usize,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                manager,
                unavailable_reason,
                hot: RwLock::new(HashMap::new()),
                max_hot_entries: max_hot_entries.max(1),
                write_gate: Mutex::new(()),
                counters: Counters::default(),
            }),
        }
    }

    pub fn is_available(&self) -> bool {
        self.inner.manager.is_some()
    }

    /// Runs `work` with a pooled connection on the blocking pool.
    async fn with_connection<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let Some(manager) = self.inner.manager.clone() else {
            return Err(StoreError::unavailable(self.inner.unavailable_reason.clone()));
        };

        tokio::task::spawn_blocking(move || {
            let connection = manager.acquire()?;
            work(&connection)
        })
        .await?
    }

    pub async fn get(&self, key: &str) -> Result<Lookup, StoreError> {
        let now = UtcDateTime::now();
        if let Some(lookup) = self.hot_lookup(key, now).await {
            self.inner.counters.record(&lookup);
            return Ok(lookup);
        }

        let Some(kind) = EntryKind::from_key(key) else {
            self.inner.counters.record(&Lookup::Miss);
            return Ok(Lookup::Miss);
        };

        let _gate = self.inner.write_gate.lock().await;
        // A writer or another reader may have filled the slot while we waited.
        if let Some(lookup) = self.hot_lookup(key, now).await {
            self.inner.counters.record(&lookup);
            return Ok(lookup);
        }

        let owned_key = key.to_owned();
        let durable = self
            .with_connection(move |connection| read_entry(connection, kind, &owned_key))
            .await?;

        let lookup = match durable {
            Some(entry) => {
                let lookup = Lookup::classify(Arc::new(entry), now);
                if let Lookup::Hit(entry) = &lookup {
                    let mut hot = self.inner.hot.write().await;
                    admit(&mut hot, self.inner.max_hot_entries, Arc::clone(entry), now);
                }
                lookup
            }
            None => Lookup::Miss,
        };
        self.inner.counters.record(&lookup);
        Ok(lookup)
    }

    /// Classifies the hot entry for `key`, dropping it from the index once expired.
    async fn hot_lookup(&self, key: &str, now: UtcDateTime) -> Option<Lookup> {
        let entry = self.inner.hot.read().await.get(key).cloned()?;
        let lookup = Lookup::classify(entry, now);
        if let Lookup::Expired(expired) = &lookup {
            let mut hot = self.inner.hot.write().await;
            if hot.get(key).is_some_and(|current| Arc::ptr_eq(current, expired)) {
                hot.remove(key);
            }
        }
        Some(lookup)
    }

    /// Stores `payload` under `key`, replacing any previous entry.
    pub async fn put(
        &self,
        key: &str,
        kind: EntryKind,
        payload: Value,
        ttl: Duration,
        provenance: Provenance,
    ) -> Result<Arc<CacheEntry>, StoreError> {
        if EntryKind::from_key(key) != Some(kind) {
            return Err(StoreError::InvalidKey {
                key: key.to_owned(),
                kind,
            });
        }

        let entry = Arc::new(CacheEntry {
            key: key.to_owned(),
            kind,
            payload,
            created_at: UtcDateTime::now(),
            ttl,
            provenance,
        });

        let _gate = self.inner.write_gate.lock().await;
        let durable = Arc::clone(&entry);
        self.with_connection(move |connection| write_entry(connection, &durable))
            .await?;
        {
            let mut hot = self.inner.hot.write().await;
            admit(&mut hot, self.inner.max_hot_entries, Arc::clone(&entry), UtcDateTime::now());
        }
        self.inner.counters.writes.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(key, %kind, ttl_ms = entry.ttl.as_millis() as u64, "cache entry stored");
        Ok(entry)
    }

    /// Removes `key`. Returns whether the durable store held it.
    pub async fn invalidate(&self, key: &str) -> Result<bool, StoreError> {
        let _gate = self.inner.write_gate.lock().await;
        self.inner.hot.write().await.remove(key);

        let Some(kind) = EntryKind::from_key(key) else {
            return Ok(false);
        };
        let owned_key = key.to_owned();
        let removed = self
            .with_connection(move |connection| {
                let sql = format!("DELETE FROM {} WHERE key = ?", kind.table());
                Ok(connection.execute(&sql, [owned_key.as_str()])?)
            })
            .await?;
        Ok(removed > 0)
    }

    /// Removes every key starting with `prefix`, e.g. `curve:` for all curves.
    /// Returns how many durable entries were removed.
    pub async fn invalidate_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let _gate = self.inner.write_gate.lock().await;
        self.inner
            .hot
            .write()
            .await
            .retain(|key, _| !key.starts_with(prefix));

        let pattern = format!("{}%", escape_like(prefix));
        let removed = self
            .with_connection(move |connection| {
                transaction(connection, |connection| {
                    let mut removed = 0;
                    for kind in EntryKind::ALL {
                        let sql = format!(
                            "DELETE FROM {} WHERE key LIKE ? ESCAPE '\\'",
                            kind.table()
                        );
                        removed += connection.execute(&sql, [pattern.as_str()])?;
                    }
                    Ok(removed)
                })
            })
            .await?;

        tracing::info!(prefix, removed, "cache prefix invalidated");
        Ok(removed)
    }

    /// Deletes expired entries. Returns how many durable entries were removed.
    pub async fn purge_expired(&self) -> Result<usize, StoreError> {
        let _gate = self.inner.write_gate.lock().await;
        let now = UtcDateTime::now();
        self.inner
            .hot
            .write()
            .await
            .retain(|_, entry| !entry.is_expired_at(now));

        let now_ms = now.unix_millis();
        let removed = self
            .with_connection(move |connection| {
                transaction(connection, |connection| {
                    let mut removed = 0;
                    for kind in EntryKind::ALL {
                        let sql = format!(
                            "DELETE FROM {} WHERE created_at + ttl_ms <= ?",
                            kind.table()
                        );
                        removed += connection.execute(&sql, [now_ms])?;
                    }
                    Ok(removed)
                })
            })
            .await?;

        tracing::debug!(removed, "expired cache entries purged");
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<CacheStats, StoreError> {
        let durable_entries = self
            .with_connection(|connection| {
                let mut counts = BTreeMap::new();
                for kind in EntryKind::ALL {
                    let sql = format!("SELECT COUNT(*) FROM {}", kind.table());
                    let count: i64 = connection.query_row(&sql, [], |row| row.get(0))?;
                    counts.insert(kind, u64::try_from(count).unwrap_or_default());
                }
                Ok(counts)
            })
            .await?;

        let counters = &self.inner.counters;
        Ok(CacheStats {
            hot_entries: self.inner.hot.read().await.len(),
            durable_entries,
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            expired: counters.expired.load(Ordering::Relaxed),
            writes: counters.writes.load(Ordering::Relaxed),
        })
    }
}

/// Inserts `entry`, making room when the index is full: expired entries go
/// first, then the oldest one.
fn admit(
    hot: &mut HashMap<String, Arc<CacheEntry>>,
    max_entries: usize,
    entry: Arc<CacheEntry>,
    now: UtcDateTime,
) {
    if !hot.contains_key(&entry.key) && hot.len() >= max_entries {
        hot.retain(|_, cached| !cached.is_expired_at(now));
        if hot.len() >= max_entries {
            let oldest = hot
                .values()
                .min_by_key(|cached| cached.created_at.unix_millis())
                .map(|cached| cached.key.clone());
            if let Some(oldest) = oldest {
                hot.remove(&oldest);
            }
        }
    }
    hot.insert(entry.key.clone(), entry);
}

fn read_entry(
    connection: &Connection,
    kind: EntryKind,
    key: &str,
) -> Result<Option<CacheEntry>, StoreError> {
    let sql = format!(
        "SELECT payload, created_at, ttl_ms, provenance FROM {} WHERE key = ?",
        kind.table()
    );
    let row = connection
        .query_row(&sql, [key], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })
        .optional()?;

    let Some((payload, created_at, ttl_ms, provenance)) = row else {
        return Ok(None);
    };
    let created_at = UtcDateTime::from_unix_millis(created_at).ok_or_else(|| {
        StoreError::unavailable(format!("corrupt created_at for cache key '{key}'"))
    })?;

    Ok(Some(CacheEntry {
        key: key.to_owned(),
        kind,
        payload: serde_json::from_str(&payload)?,
        created_at,
        ttl: Duration::from_millis(u64::try_from(ttl_ms).unwrap_or_default()),
        provenance: serde_json::from_str(&provenance)?,
    }))
}

fn write_entry(connection: &Connection, entry: &CacheEntry) -> Result<(), StoreError> {
    let payload = serde_json::to_string(&entry.payload)?;
    let provenance = serde_json::to_string(&entry.provenance)?;
    let ttl_ms = i64::try_from(entry.ttl.as_millis()).unwrap_or(i64::MAX);
    let sql = format!(
        "INSERT OR REPLACE INTO {} (key, payload, created_at, ttl_ms, provenance) \
         VALUES (?, ?, ?, ?, ?)",
        entry.kind.table()
    );

    transaction(connection, |connection| {
        connection.execute(
            &sql,
            params![
                entry.key,
                payload,
                entry.created_at.unix_millis(),
                ttl_ms,
                provenance
            ],
        )?;
        Ok(())
    })
}

/// Runs `work` inside a transaction, committing on success or rolling back on failure.
fn transaction<T>(
    connection: &Connection,
    work: impl FnOnce(&Connection) -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    connection.execute_batch("BEGIN TRANSACTION")?;
    match work(connection) {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
