use crate::error::ForecastError;
use crate::models::TrainingWindow;
use anyhow::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const CACHE_NAMESPACE: &str = "market_ai";
pub const DEFAULT_CACHE_TTL_SECS: i64 = 86_400;

/// Key-value store with expiring keys. Implementations only need key-level
/// atomicity.
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;
    fn exists(&self, key: &str) -> Result<bool>;
    fn delete(&self, key: &str) -> Result<bool>;
    fn ttl(&self, key: &str) -> Result<Option<Duration>>;
}

#[derive(Clone, Debug)]
struct StoredEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Process-local backend. Expired entries are evicted lazily on access.
#[derive(Clone, Default)]
pub struct MemoryCacheBackend {
    entries: Arc<DashMap<String, StoredEntry>>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn live_entry(&self, key: &str) -> Option<StoredEntry> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) if occupied.get().is_expired(now) => {
                occupied.remove();
                None
            }
            Entry::Occupied(occupied) => Some(occupied.get().clone()),
            Entry::Vacant(_) => None,
        }
    }
}

/// Upper bound on how far ahead an entry can expire. Longer TTLs are capped
/// here instead of overflowing `Instant`.
const MAX_ENTRY_LIFETIME: Duration = Duration::from_secs(100 * 365 * 86_400);

fn expiry_after(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl.min(MAX_ENTRY_LIFETIME))
        .or_else(|| now.checked_add(Duration::from_secs(86_400)))
        .unwrap_or(now)
}

impl CacheBackend for MemoryCacheBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.live_entry(key).map(|entry| entry.value))
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                value,
                expires_at: expiry_after(Instant::now(), ttl),
            },
        );
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live_entry(key).is_some())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        Ok(self
            .live_entry(key)
            .map(|entry| entry.expires_at.saturating_duration_since(now)))
    }
}

/// Namespaced, typed view over a `CacheBackend`.
///
/// Values are bincode encoded, so `f64` payloads (NaN included) come back
/// bit-for-bit. A payload that fails to decode is reported as
/// `CacheCorruption`, never as a miss.
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    namespace: String,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self::with_namespace(backend, CACHE_NAMESPACE)
    }

    pub fn with_namespace(backend: Arc<dyn CacheBackend>, namespace: &str) -> Self {
        Self {
            backend,
            namespace: namespace.trim_end_matches(':').to_string(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheBackend::new()))
    }

    pub fn namespaced_key(&self, key: &str) -> String {
        let prefix = format!("{}:", self.namespace);
        if key.starts_with(&prefix) {
            key.to_string()
        } else {
            format!("{prefix}{key}")
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ForecastError> {
        let key = self.namespaced_key(key);
        let payload = self
            .backend
            .get(&key)
            .map_err(|err| backend_failure(&key, "get", err))?;

        let Some(bytes) = payload else {
            log::debug!("Cache miss for key: {}", key);
            return Ok(None);
        };

        match bincode::deserialize::<T>(&bytes) {
            Ok(value) => {
                log::debug!("Cache hit for key: {}", key);
                Ok(Some(value))
            }
            Err(err) => {
                log::warn!("Corrupted cache entry, failed to deserialize for key {}: {}", key, err);
                Err(ForecastError::CacheCorruption {
                    key,
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Stores `value` for `ttl_secs` seconds. A TTL of zero or less means
    /// "do not cache" and is not an error.
    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: i64,
    ) -> Result<(), ForecastError> {
        let key = self.namespaced_key(key);
        if ttl_secs <= 0 {
            log::debug!("Skipping cache write for {} (ttl={})", key, ttl_secs);
            return Ok(());
        }

        let bytes = bincode::serialize(value).map_err(|err| ForecastError::CacheUnavailable {
            key: key.clone(),
            source: anyhow::anyhow!("failed to encode cache value: {err}"),
        })?;
        self.backend
            .set(&key, bytes, Duration::from_secs(ttl_secs as u64))
            .map_err(|err| backend_failure(&key, "set", err))?;
        log::debug!("Value set in cache for key: {} with TTL: {}", key, ttl_secs);
        Ok(())
    }

    pub fn exists(&self, key: &str) -> Result<bool, ForecastError> {
        let key = self.namespaced_key(key);
        self.backend
            .exists(&key)
            .map_err(|err| backend_failure(&key, "exists", err))
    }

    pub fn delete(&self, key: &str) -> Result<bool, ForecastError> {
        let key = self.namespaced_key(key);
        let removed = self
            .backend
            .delete(&key)
            .map_err(|err| backend_failure(&key, "delete", err))?;
        if removed {
            log::debug!("Key deleted from cache: {}", key);
        }
        Ok(removed)
    }

    /// Remaining time to live, `None` when the key is absent.
    pub fn ttl(&self, key: &str) -> Result<Option<Duration>, ForecastError> {
        let key = self.namespaced_key(key);
        self.backend
            .ttl(&key)
            .map_err(|err| backend_failure(&key, "ttl", err))
    }
}

fn backend_failure(key: &str, operation: &str, err: anyhow::Error) -> ForecastError {
    ForecastError::CacheUnavailable {
        key: key.to_string(),
        source: err.context(format!("cache {operation} failed")),
    }
}

pub fn raw_series_key(instrument: &str) -> String {
    format!("raw_series:{instrument}")
}

pub fn transformed_series_key(instrument: &str) -> String {
    format!("transformed_series:{instrument}")
}

pub fn prediction_key(instrument: &str, window: TrainingWindow, horizon_days: usize) -> String {
    format!("predictions:{instrument}:{}:{horizon_days}", window.as_str())
}
