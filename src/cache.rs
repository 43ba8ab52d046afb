use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::crypto::KeyAlgorithm;
use crate::did::AgentDid;
use crate::error::Error;
use crate::resolver::DidResolver;
use crate::types::{AgentMetadata, RegisteredKey};

/// Default time-to-live for cached resolutions (5 minutes).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// A single cache entry holding a value and its expiry time.
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Read-mostly TTL map.
struct TtlMap<K, V> {
    store: RwLock<HashMap<K, CacheEntry<V>>>,
    ttl: Duration,
}

impl<K: Eq + Hash, V: Clone> TtlMap<K, V> {
    fn new(ttl: Duration) -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    async fn get(&self, key: &K) -> Option<V> {
        let store = self.store.read().await;
        match store.get(key) {
            Some(entry) if Instant::now() < entry.expires_at => Some(entry.value.clone()),
            _ => None,
        }
    }

    /// Insert `value`, dropping expired entries first.
    ///
    /// Inserts only happen on a miss, so the sweep runs at most once per
    /// key per TTL.
    async fn set(&self, key: K, value: V) {
        let now = Instant::now();
        let mut store = self.store.write().await;
        store.retain(|_, entry| entry.expires_at > now);
        store.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    async fn retain(&self, mut keep: impl FnMut(&K) -> bool) {
        self.store.write().await.retain(|k, _| keep(k));
    }

    async fn evict_expired(&self) {
        let now = Instant::now();
        self.store
            .write()
            .await
            .retain(|_, entry| entry.expires_at > now);
    }

    async fn len(&self) -> usize {
        self.store.read().await.len()
    }
}

/// Thread-safe, in-memory TTL cache in front of another [`DidResolver`].
///
/// Metadata, key lists, and by-type keys are cached per DID. Lookups for one
/// DID never wait on a resolution of another; the locks are only held while
/// touching the maps, never across the inner resolver call. Errors are not
/// cached.
#[derive(Clone)]
pub struct CachingResolver {
    inner: Arc<dyn DidResolver>,
    metadata: Arc<TtlMap<AgentDid, Option<AgentMetadata>>>,
    all_keys: Arc<TtlMap<AgentDid, Vec<RegisteredKey>>>,
    by_type: Arc<TtlMap<(AgentDid, KeyAlgorithm), Vec<u8>>>,
}

impl CachingResolver {
    /// Create a new cache with the given TTL in seconds.
    pub fn new(inner: Arc<dyn DidResolver>, ttl_secs: u64) -> Self {
        let ttl = Duration::from_secs(ttl_secs);
        Self {
            inner,
            metadata: Arc::new(TtlMap::new(ttl)),
            all_keys: Arc::new(TtlMap::new(ttl)),
            by_type: Arc::new(TtlMap::new(ttl)),
        }
    }

    /// Create a new cache with [`DEFAULT_CACHE_TTL_SECS`].
    pub fn default_ttl(inner: Arc<dyn DidResolver>) -> Self {
        Self::new(inner, DEFAULT_CACHE_TTL_SECS)
    }

    /// Drop everything cached for `did`, e.g. after a key rotation.
    pub async fn invalidate(&self, did: &AgentDid) {
        self.metadata.retain(|k| k != did).await;
        self.all_keys.retain(|k| k != did).await;
        self.by_type.retain(|(k, _)| k != did).await;
    }

    /// Remove expired entries from the cache.
    pub async fn evict_expired(&self) {
        self.metadata.evict_expired().await;
        self.all_keys.evict_expired().await;
        self.by_type.evict_expired().await;
    }

    /// Number of live and not-yet-swept entries across all maps.
    pub async fn len(&self) -> usize {
        self.metadata.len().await + self.all_keys.len().await + self.by_type.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DidResolver for CachingResolver {
    async fn resolve_all_public_keys(&self, did: &AgentDid) -> Result<Vec<RegisteredKey>, Error> {
        if let Some(keys) = self.all_keys.get(did).await {
            tracing::trace!(%did, "key list cache hit");
            return Ok(keys);
        }
        let keys = self.inner.resolve_all_public_keys(did).await?;
        self.all_keys.set(did.clone(), keys.clone()).await;
        Ok(keys)
    }

    async fn resolve_public_key_by_type(
        &self,
        did: &AgentDid,
        algorithm: KeyAlgorithm,
    ) -> Result<Vec<u8>, Error> {
        let cache_key = (did.clone(), algorithm);
        if let Some(key) = self.by_type.get(&cache_key).await {
            tracing::trace!(%did, %algorithm, "key cache hit");
            return Ok(key);
        }
        let key = self.inner.resolve_public_key_by_type(did, algorithm).await?;
        self.by_type.set(cache_key, key.clone()).await;
        Ok(key)
    }

    async fn agent_metadata(&self, did: &AgentDid) -> Result<Option<AgentMetadata>, Error> {
        if let Some(meta) = self.metadata.get(did).await {
            tracing::trace!(%did, "metadata cache hit");
            return Ok(meta);
        }
        let meta = self.inner.agent_metadata(did).await?;
        self.metadata.set(did.clone(), meta.clone()).await;
        Ok(meta)
    }
}
