//! Time-to-live cache with request coalescing.
//!
//! Concurrent lookups of the same key share one underlying fetch. The fetch
//! future is driven by its waiters through [`Shared`]; the table itself keeps
//! only a weak handle, so dropping the last waiter drops (cancels) the fetch
//! while earlier-dropped waiters never affect the others.

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, hash_map::RandomState},
    fmt::Debug,
    future::Future,
    hash::{BuildHasher, Hash},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::time::Instant;

use crate::error::WeatherError;

const SHARD_COUNT: usize = 16;
/// Minimum time between sweeps of one shard for expired and abandoned slots.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

type Outcome<V> = Result<V, WeatherError>;
type FetchFuture<V> = BoxFuture<'static, Outcome<V>>;

enum Slot<V> {
    Ready {
        outcome: Outcome<V>,
        expires_at: Instant,
    },
    Pending {
        generation: u64,
        fetch: WeakShared<FetchFuture<V>>,
    },
}

impl<V> Slot<V> {
    fn is_live(&self, now: Instant) -> bool {
        match self {
            Slot::Ready { expires_at, .. } => *expires_at > now,
            Slot::Pending { fetch, .. } => fetch.upgrade().is_some(),
        }
    }
}

struct Shard<K, V> {
    slots: HashMap<K, Slot<V>>,
    next_sweep: Instant,
}

impl<K, V> Shard<K, V> {
    /// Drop expired entries and fetches nobody waits on, at most once per
    /// [`SWEEP_INTERVAL`].
    fn sweep(&mut self, now: Instant) {
        if now < self.next_sweep {
            return;
        }
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.is_live(now));
        self.next_sweep = now + SWEEP_INTERVAL;
        if self.slots.len() < before {
            tracing::trace!(removed = before - self.slots.len(), "swept cache shard");
        }
    }
}

struct Table<K, V> {
    shards: Vec<Mutex<Shard<K, V>>>,
    hasher: RandomState,
    next_generation: AtomicU64,
}

impl<K: Hash + Eq, V> Table<K, V> {
    fn shard(&self, key: &K) -> &Mutex<Shard<K, V>> {
        let idx = (self.hasher.hash_one(key) as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Record the outcome of fetch `generation`, unless the slot has since
    /// been taken over by a newer fetch.
    fn complete(&self, key: K, generation: u64, outcome: &Outcome<V>, ttl: Option<Duration>)
    where
        V: Clone,
    {
        let mut guard = self.shard(&key).lock();
        let shard = &mut guard.slots;
        let ours = matches!(
            shard.get(&key),
            Some(Slot::Pending { generation: g, .. }) if *g == generation
        );
        if !ours {
            return;
        }

        match ttl {
            Some(ttl) => {
                shard.insert(
                    key,
                    Slot::Ready {
                        outcome: outcome.clone(),
                        expires_at: Instant::now() + ttl,
                    },
                );
            }
            None => {
                shard.remove(&key);
            }
        }
    }
}

/// How long each kind of outcome may be served from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Upper bound on a single provider fetch.
    pub fetch_timeout: Duration,
    /// Lifetime of cached `NotFound` answers.
    pub not_found_ttl: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            not_found_ttl: Duration::from_secs(5 * 60),
        }
    }
}

pub struct CoalescingCache<K, V> {
    table: Arc<Table<K, V>>,
    policy: CachePolicy,
}

impl<K, V> Debug for CoalescingCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoalescingCache")
            .field("shards", &self.table.shards.len())
            .field("policy", &self.policy)
            .finish()
    }
}

impl<K, V> CoalescingCache<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(policy: CachePolicy) -> Self {
        let now = Instant::now();
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(Shard { slots: HashMap::new(), next_sweep: now }))
            .collect();
        Self {
            table: Arc::new(Table {
                shards,
                hasher: RandomState::new(),
                next_generation: AtomicU64::new(0),
            }),
            policy,
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Return the cached outcome for `key`, join an in-flight fetch for it,
    /// or start a new fetch.
    ///
    /// Successful outcomes live for `ttl`, `NotFound` for the policy's
    /// not-found TTL; every other failure is handed to the waiters and then
    /// forgotten.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, ttl: Duration, fetch: F) -> Outcome<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome<V>> + Send + 'static,
    {
        let shared = {
            let mut shard = self.table.shard(&key).lock();
            let now = Instant::now();

            let joined = match shard.slots.get(&key) {
                Some(Slot::Ready { outcome, expires_at }) if *expires_at > now => {
                    tracing::debug!(?key, "cache hit");
                    return outcome.clone();
                }
                Some(Slot::Pending { fetch, .. }) => fetch.upgrade(),
                _ => None,
            };

            match joined {
                Some(shared) => {
                    tracing::debug!(?key, "joining in-flight fetch");
                    shared
                }
                None => {
                    tracing::debug!(?key, "cache miss, fetching");
                    shard.sweep(now);
                    let generation = self.table.next_generation.fetch_add(1, Ordering::Relaxed);
                    let shared = self.start_fetch(key.clone(), generation, ttl, fetch());
                    match shared.downgrade() {
                        Some(weak) => {
                            shard.slots.insert(key, Slot::Pending { generation, fetch: weak });
                        }
                        None => {
                            shard.slots.remove(&key);
                        }
                    }
                    shared
                }
            }
        };

        shared.await
    }

    fn start_fetch<Fut>(
        &self,
        key: K,
        generation: u64,
        ttl: Duration,
        fetch: Fut,
    ) -> Shared<FetchFuture<V>>
    where
        Fut: Future<Output = Outcome<V>> + Send + 'static,
    {
        let table = Arc::clone(&self.table);
        let policy = self.policy;

        async move {
            let outcome = match tokio::time::timeout(policy.fetch_timeout, fetch).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!(?key, timeout = ?policy.fetch_timeout, "provider fetch timed out");
                    Err(WeatherError::ProviderUnavailable(format!(
                        "no response within {:?}",
                        policy.fetch_timeout
                    )))
                }
            };

            let keep_for = match &outcome {
                Ok(_) => Some(ttl),
                Err(WeatherError::NotFound { .. }) => Some(policy.not_found_ttl),
                Err(_) => None,
            };
            table.complete(key, generation, &outcome, keep_for);
            outcome
        }
        .boxed()
        .shared()
    }

    /// Drop every ready entry. In-flight fetches are left alone.
    pub fn clear(&self) {
        for shard in &self.table.shards {
            shard.lock().slots.retain(|_, slot| matches!(slot, Slot::Pending { .. }));
        }
    }

    /// Number of ready, unexpired entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.table
            .shards
            .iter()
            .map(|shard| {
                shard
                    .lock()
                    .slots
                    .values()
                    .filter(|slot| matches!(slot, Slot::Ready { expires_at, .. } if *expires_at > now))
                    .count()
            })
            .sum()
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.table.shards.iter().map(|shard| shard.lock().slots.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QueryKind;
    use std::sync::atomic::AtomicUsize;

    fn cache() -> CoalescingCache<&'static str, u32> {
        CoalescingCache::new(CachePolicy {
            fetch_timeout: Duration::from_secs(5),
            not_found_ttl: Duration::from_secs(60),
        })
    }

    fn counted(
        calls: &Arc<AtomicUsize>,
        outcome: Outcome<u32>,
        delay: Duration,
    ) -> impl FnOnce() -> BoxFuture<'static, Outcome<u32>> + use<> {
        let calls = Arc::clone(calls);
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                outcome
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hit_within_ttl_and_refetch_after_expiry() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(30);

        let first = cache.get_or_fetch("k", ttl, counted(&calls, Ok(1), Duration::ZERO)).await;
        let second = cache.get_or_fetch("k", ttl, counted(&calls, Ok(2), Duration::ZERO)).await;
        assert_eq!(first, Ok(1));
        assert_eq!(second, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(31)).await;

        let third = cache.get_or_fetch("k", ttl, counted(&calls, Ok(3), Duration::ZERO)).await;
        assert_eq!(third, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_share_one_fetch() {
        let cache = Arc::new(cache());
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(30);

        let a = {
            let cache = Arc::clone(&cache);
            let fetch = counted(&calls, Ok(7), Duration::from_millis(100));
            tokio::spawn(async move { cache.get_or_fetch("k", ttl, fetch).await })
        };
        let b = {
            let cache = Arc::clone(&cache);
            let fetch = counted(&calls, Ok(8), Duration::from_millis(100));
            tokio::spawn(async move { cache.get_or_fetch("k", ttl, fetch).await })
        };

        assert_eq!(a.await.unwrap(), Ok(7));
        assert_eq!(b.await.unwrap(), Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_is_cached_but_unavailable_is_not() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(30);
        let missing = WeatherError::NotFound { kind: QueryKind::Historical, detail: "none".into() };

        let _ = cache.get_or_fetch("gone", ttl, counted(&calls, Err(missing.clone()), Duration::ZERO)).await;
        let again = cache.get_or_fetch("gone", ttl, counted(&calls, Ok(1), Duration::ZERO)).await;
        assert_eq!(again, Err(missing));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let down = WeatherError::ProviderUnavailable("503".into());
        let _ = cache.get_or_fetch("flaky", ttl, counted(&calls, Err(down), Duration::ZERO)).await;
        let recovered = cache.get_or_fetch("flaky", ttl, counted(&calls, Ok(2), Duration::ZERO)).await;
        assert_eq!(recovered, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fails_every_waiter() {
        let cache = Arc::new(cache());
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(30);

        let slow = |calls: &Arc<AtomicUsize>| counted(calls, Ok(1), Duration::from_secs(60));
        let a = {
            let cache = Arc::clone(&cache);
            let fetch = slow(&calls);
            tokio::spawn(async move { cache.get_or_fetch("k", ttl, fetch).await })
        };
        let b = {
            let cache = Arc::clone(&cache);
            let fetch = slow(&calls);
            tokio::spawn(async move { cache.get_or_fetch("k", ttl, fetch).await })
        };

        assert!(matches!(a.await.unwrap(), Err(WeatherError::ProviderUnavailable(_))));
        assert!(matches!(b.await.unwrap(), Err(WeatherError::ProviderUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_one_waiter_keeps_the_other() {
        let cache = Arc::new(cache());
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(30);

        let a = {
            let cache = Arc::clone(&cache);
            let fetch = counted(&calls, Ok(5), Duration::from_millis(200));
            tokio::spawn(async move { cache.get_or_fetch("k", ttl, fetch).await })
        };
        let b = {
            let cache = Arc::clone(&cache);
            let fetch = counted(&calls, Ok(6), Duration::from_millis(200));
            tokio::spawn(async move { cache.get_or_fetch("k", ttl, fetch).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        a.abort();

        assert_eq!(b.await.unwrap(), Ok(5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_every_waiter_cancels_the_fetch() {
        let cache = Arc::new(cache());
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(30);

        let a = {
            let cache = Arc::clone(&cache);
            let fetch = counted(&calls, Ok(5), Duration::from_secs(1));
            tokio::spawn(async move { cache.get_or_fetch("k", ttl, fetch).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        a.abort();
        let _ = a.await;

        let fresh = cache.get_or_fetch("k", ttl, counted(&calls, Ok(9), Duration::ZERO)).await;
        assert_eq!(fresh, Ok(9));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_swept_on_later_misses() {
        let cache: CoalescingCache<u32, u32> = CoalescingCache::new(CachePolicy::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(30);

        for key in 0..1000 {
            let _ = cache.get_or_fetch(key, ttl, counted(&calls, Ok(key), Duration::ZERO)).await;
        }
        assert_eq!(cache.len(), 1000);
        assert_eq!(cache.slot_count(), 1000);

        tokio::time::advance(SWEEP_INTERVAL + Duration::from_secs(1)).await;
        assert_eq!(cache.len(), 0);

        for key in 1000..2000 {
            let _ = cache.get_or_fetch(key, ttl, counted(&calls, Ok(key), Duration::ZERO)).await;
        }
        assert_eq!(cache.len(), 1000);
        assert_eq!(cache.slot_count(), 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_fetches_are_swept() {
        let cache: Arc<CoalescingCache<u32, u32>> = Arc::new(CoalescingCache::new(CachePolicy::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(30);

        let waiter = {
            let cache = Arc::clone(&cache);
            let fetch = counted(&calls, Ok(0), Duration::from_secs(1));
            tokio::spawn(async move { cache.get_or_fetch(0, ttl, fetch).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        waiter.abort();
        let _ = waiter.await;
        assert_eq!(cache.slot_count(), 1);

        tokio::time::advance(SWEEP_INTERVAL).await;
        for key in 1..=1000 {
            let _ = cache.get_or_fetch(key, ttl, counted(&calls, Ok(key), Duration::ZERO)).await;
        }
        assert_eq!(cache.slot_count(), 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_drops_ready_entries() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(30);

        let _ = cache.get_or_fetch("k", ttl, counted(&calls, Ok(1), Duration::ZERO)).await;
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());

        let after = cache.get_or_fetch("k", ttl, counted(&calls, Ok(2), Duration::ZERO)).await;
        assert_eq!(after, Ok(2));
    }
}
