use bytes::Bytes;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// The catalog is a single document, stored under one key
pub const CATALOG_CACHE_KEY: &str = "models";

pub const CATALOG_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct CacheEntry {
    fetched_at: Instant,
    payload: Bytes,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<&'static str, CacheEntry>,
    generation: u64,
}

/// TTL cache for the serialized model catalog.
///
/// An entry older than the TTL is never served. Invalidation removes the
/// entry and bumps the generation, so the next read is a hard miss and a
/// fetch that started before the invalidation cannot store its result.
#[derive(Debug)]
pub struct ModelListCache {
    state: RwLock<CacheState>,
    ttl: Duration,
}

impl Default for ModelListCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelListCache {
    pub fn new() -> Self {
        Self::with_ttl(CATALOG_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached payload, if one younger than the TTL exists
    pub async fn get(&self) -> Option<Bytes> {
        let state = self.state.read().await;
        let entry = state.entries.get(CATALOG_CACHE_KEY)?;
        if entry.fetched_at.elapsed() < self.ttl {
            Some(entry.payload.clone())
        } else {
            tracing::debug!("Catalog cache entry expired");
            None
        }
    }

    /// Current generation. Take it before fetching and hand it to
    /// [`ModelListCache::put_if_current`].
    pub async fn generation(&self) -> u64 {
        self.state.read().await.generation
    }

    pub async fn put(&self, payload: Bytes) {
        self.state.write().await.entries.insert(
            CATALOG_CACHE_KEY,
            CacheEntry {
                fetched_at: Instant::now(),
                payload,
            },
        );
    }

    /// Store `payload` unless the cache was invalidated since `generation`
    /// was read. Returns whether it was stored.
    pub async fn put_if_current(&self, generation: u64, payload: Bytes) -> bool {
        let mut state = self.state.write().await;
        if state.generation != generation {
            tracing::debug!("Discarding catalog fetched before an invalidation");
            return false;
        }
        state.entries.insert(
            CATALOG_CACHE_KEY,
            CacheEntry {
                fetched_at: Instant::now(),
                payload,
            },
        );
        true
    }

    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        state.generation = state.generation.wrapping_add(1);
        if state.entries.remove(CATALOG_CACHE_KEY).is_some() {
            tracing::debug!("Catalog cache invalidated");
        }
    }
}
