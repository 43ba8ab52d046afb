//! Nonce tracking for replay protection.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Thread-safe cache of recently seen `(keyid, nonce)` pairs.
///
/// Entries are kept for `window`, which should be at least the verifier's
/// maximum signature age so a nonce cannot be replayed while the signature
/// carrying it is still fresh.
///
/// Expired entries are swept during inserts at most once per window, so the
/// cache stays bounded by the traffic of roughly two windows without any
/// background task.
pub struct NonceCache {
    state: Mutex<NonceState>,
    window: Duration,
}

struct NonceState {
    seen: HashMap<String, Instant>,
    next_sweep: Instant,
}

impl NonceState {
    fn sweep(&mut self, now: Instant, window: Duration) {
        self.seen
            .retain(|_, first_seen| now.duration_since(*first_seen) < window);
        self.next_sweep = now + window;
    }
}

impl NonceCache {
    pub fn new(window: Duration) -> Self {
        Self {
            state: Mutex::new(NonceState {
                seen: HashMap::new(),
                next_sweep: Instant::now() + window,
            }),
            window,
        }
    }

    /// Record the nonce if it is fresh.
    ///
    /// Returns `true` if the nonce had not been seen within the window,
    /// `false` on replay.
    pub async fn check_and_insert(&self, keyid: &str, nonce: &str) -> bool {
        let key = format!("{keyid}\n{nonce}");
        let now = Instant::now();
        let mut state = self.state.lock().await;
        if now >= state.next_sweep {
            state.sweep(now, self.window);
        }
        match state.seen.get(&key) {
            Some(first_seen) if now.duration_since(*first_seen) < self.window => false,
            _ => {
                state.seen.insert(key, now);
                true
            }
        }
    }

    /// Remove entries older than the window right away.
    pub async fn evict_expired(&self) {
        self.state.lock().await.sweep(Instant::now(), self.window);
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.seen.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn detects_replay() {
        let cache = NonceCache::new(Duration::from_secs(60));
        assert!(cache.check_and_insert("did:sage:ethereum:0xAAA", "n1").await);
        assert!(!cache.check_and_insert("did:sage:ethereum:0xAAA", "n1").await);
    }

    #[tokio::test]
    async fn nonces_are_scoped_per_keyid() {
        let cache = NonceCache::new(Duration::from_secs(60));
        assert!(cache.check_and_insert("did:sage:ethereum:0xAAA", "n1").await);
        assert!(cache.check_and_insert("did:sage:ethereum:0xBBB", "n1").await);
    }

    #[tokio::test]
    async fn evicts_after_window() {
        let cache = NonceCache::new(Duration::from_millis(1));
        assert!(cache.check_and_insert("k", "n").await);
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.evict_expired().await;
        assert!(cache.is_empty().await);
        assert!(cache.check_and_insert("k", "n").await);
    }

    #[tokio::test]
    async fn inserts_sweep_expired_entries() {
        let cache = NonceCache::new(Duration::from_millis(1));
        for i in 0..100 {
            assert!(cache.check_and_insert("k", &format!("n{i}")).await);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.check_and_insert("k", "fresh").await);
        assert_eq!(cache.len().await, 1);
    }
}
