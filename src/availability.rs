use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

use crate::frame::ServerFrame;
use crate::metrics;
use crate::registry::Registry;
use crate::storage::{Channel, MessageView, Storage, User};

/// Process-wide availability singleton, mutated only by the monitor
#[derive(Debug, Clone, Copy)]
pub struct AvailabilityState {
    pub is_available: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
}

struct ProbeState {
    is_available: bool,
    last_probe: Option<Instant>,
    last_checked_at: Option<DateTime<Utc>>,
}

/// Monitors storage reachability with a debounced probe and broadcasts
/// `database_status` transitions through the connection registry.
pub struct AvailabilityMonitor {
    storage: Arc<dyn Storage>,
    registry: Registry,
    debounce: Duration,
    state: RwLock<ProbeState>,
    pub cache: FallbackCache,
}

impl AvailabilityMonitor {
    pub fn new(
        storage: Arc<dyn Storage>,
        registry: Registry,
        debounce: Duration,
        cache_capacity: usize,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            storage,
            registry,
            debounce,
            state: RwLock::new(ProbeState {
                is_available: true,
                last_probe: None,
                last_checked_at: None,
            }),
            cache: FallbackCache::new(cache_capacity, cache_ttl),
        }
    }

    pub async fn snapshot(&self) -> AvailabilityState {
        let state = self.state.read().await;
        AvailabilityState {
            is_available: state.is_available,
            last_checked_at: state.last_checked_at,
        }
    }

    /// Current flag without probing
    pub async fn is_available(&self) -> bool {
        self.state.read().await.is_available
    }

    /// Returns the cached flag if the last probe is inside the debounce
    /// window; otherwise issues a round-trip probe and records transitions.
    /// Debounce is global across all callers.
    pub async fn check_availability(&self) -> bool {
        {
            let state = self.state.read().await;
            if let Some(last) = state.last_probe {
                if last.elapsed() < self.debounce {
                    return state.is_available;
                }
            }
        }

        let mut state = self.state.write().await;
        // another caller may have probed while we waited on the lock
        if let Some(last) = state.last_probe {
            if last.elapsed() < self.debounce {
                return state.is_available;
            }
        }

        metrics::AVAILABILITY_PROBES_TOTAL.inc();
        let now_available = match self.storage.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Availability probe failed");
                false
            }
        };

        let was_available = state.is_available;
        state.is_available = now_available;
        state.last_probe = Some(Instant::now());
        state.last_checked_at = Some(Utc::now());
        drop(state);

        if was_available && !now_available {
            tracing::error!("Storage became unavailable, entering degraded mode");
            self.registry
                .broadcast_all(&ServerFrame::DatabaseStatus {
                    connected: false,
                    timestamp: Utc::now(),
                })
                .await;
        } else if !was_available && now_available {
            tracing::info!("Storage became available again");
            let registry = self.registry.clone();
            // deferred one tick so readers observe the flag before the frame
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                registry
                    .broadcast_all(&ServerFrame::DatabaseStatus {
                        connected: true,
                        timestamp: Utc::now(),
                    })
                    .await;
            });
        }

        now_available
    }

    /// Background probe loop so transitions are noticed without traffic
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.debounce);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.check_availability().await;
        }
    }
}

// ============================================================================
// Fallback cache (degraded-mode reads)
// ============================================================================

/// Bounded insertion-order cache with per-entry TTL. Oldest entries are
/// evicted once capacity is reached; expired entries are dropped on read.
pub struct BoundedCache<K, V> {
    inner: Mutex<CacheInner<K, V>>,
    capacity: usize,
    ttl: Duration,
}

struct CacheInner<K, V> {
    entries: HashMap<K, (V, Instant)>,
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V: Clone> BoundedCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity,
            ttl,
        }
    }

    pub fn put(&self, key: K, value: V) {
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.insert(key.clone(), (value, Instant::now())).is_none() {
            inner.order.push_back(key);
        }
        while inner.entries.len() > self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().unwrap();
        match inner.entries.get(key) {
            Some((value, inserted_at)) if inserted_at.elapsed() < self.ttl => {
                Some(value.clone())
            }
            Some(_) => {
                // drop the order slot too, so a later re-put of this key
                // cannot leave a stale front entry that mis-evicts
                inner.entries.remove(key);
                inner.order.retain(|k| k != key);
                None
            }
            None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Recently seen channels, users and message pages, served while storage is
/// unavailable
pub struct FallbackCache {
    pub channels: BoundedCache<Uuid, Channel>,
    pub users: BoundedCache<Uuid, User>,
    pub channel_history: BoundedCache<Uuid, Vec<MessageView>>,
    pub channels_for_user: BoundedCache<Uuid, Vec<Channel>>,
}

impl FallbackCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            channels: BoundedCache::new(capacity, ttl),
            users: BoundedCache::new(capacity, ttl),
            channel_history: BoundedCache::new(capacity, ttl),
            channels_for_user: BoundedCache::new(capacity, ttl),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let cache: BoundedCache<u32, u32> = BoundedCache::new(2, Duration::from_secs(60));
        cache.put(1, 10);
        cache.put(2, 20);
        cache.put(3, 30);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), Some(20));
        assert_eq!(cache.get(&3), Some(30));
    }

    #[test]
    fn overwrite_does_not_grow() {
        let cache: BoundedCache<u32, u32> = BoundedCache::new(2, Duration::from_secs(60));
        cache.put(1, 10);
        cache.put(1, 11);
        cache.put(2, 20);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&1), Some(11));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_by_ttl() {
        let cache: BoundedCache<u32, u32> = BoundedCache::new(8, Duration::from_secs(5));
        cache.put(1, 10);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get(&1), None);
    }

    #[tokio::test(start_paused = true)]
    async fn reinserting_an_expired_key_keeps_eviction_order_correct() {
        let cache: BoundedCache<u32, u32> = BoundedCache::new(2, Duration::from_secs(5));
        cache.put(1, 10);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get(&1), None);

        cache.put(2, 20);
        cache.put(1, 11);
        cache.put(3, 30);

        // the oldest live insertion (2) goes, not the re-put key
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&1), Some(11));
        assert_eq!(cache.get(&3), Some(30));
    }
}
