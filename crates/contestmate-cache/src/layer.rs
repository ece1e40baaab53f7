use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::key::key_in_namespace;
use crate::{CacheError, CacheKey, Clock, KvStore, Namespace, SystemClock};

type InflightFetch = Shared<BoxFuture<'static, Result<Value, CacheError>>>;
type InflightMap = Arc<Mutex<HashMap<String, InflightFetch>>>;

/// Stored form of a cached value.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheEnvelope {
    value: Value,
    timestamp: DateTime<Utc>,
    ttl_ms: u64,
}

impl CacheEnvelope {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.timestamp);
        age < chrono::Duration::milliseconds(self.ttl_ms.min(i64::MAX as u64) as i64)
    }
}

/// TTL cache over a [`KvStore`] that collapses concurrent fetches of the same
/// key into one call.
pub struct CacheLayer {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    inflight: InflightMap,
}

impl CacheLayer {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Returns the cached value for `key` while it is fresh. Otherwise joins
    /// the fetch already running for `key`, or starts `fetch` and stores its
    /// result under `ttl`.
    ///
    /// A failed fetch is reported to every waiter and nothing is stored.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        fetch: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        if let Some(hit) = self.get(key) {
            debug!(key = %key, "cache hit");
            return Ok(hit);
        }
        self.fetch_shared(key, ttl, fetch).await
    }

    /// Like [`get_or_fetch`](Self::get_or_fetch) but ignores any stored value.
    pub async fn refresh<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        fetch: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        debug!(key = %key, "forced cache refresh");
        self.fetch_shared(key, ttl, fetch).await
    }

    /// Fresh value for `key`, if any. Unreadable or malformed entries are
    /// reported as misses and left untouched.
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let raw = match self.store.get(key.as_str()) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(error) => {
                warn!(key = %key, %error, "cache read failed, treating as miss");
                return None;
            }
        };

        let envelope: CacheEnvelope = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(key = %key, %error, "malformed cache entry, treating as miss");
                return None;
            }
        };

        if !envelope.is_fresh(self.clock.now()) {
            debug!(key = %key, stored_at = %envelope.timestamp, "cache entry expired");
            return None;
        }

        match serde_json::from_value(envelope.value) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(key = %key, %error, "cached value has unexpected shape, treating as miss");
                None
            }
        }
    }

    pub fn put<T: Serialize>(&self, key: &CacheKey, ttl: Duration, value: &T) -> Result<(), CacheError> {
        let json = serde_json::to_value(value).map_err(|e| CacheError::Encode {
            key: key.to_string(),
            reason: Arc::new(e),
        })?;
        write_envelope(&*self.store, &*self.clock, key.as_str(), json, ttl)
    }

    pub fn invalidate(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.store.remove(key.as_str()).map_err(CacheError::store)
    }

    /// Drops every entry of `namespace`, for all users.
    pub fn invalidate_namespace(&self, namespace: Namespace) -> Result<usize, CacheError> {
        self.remove_where(|key| key_in_namespace(namespace, key))
    }

    /// Drops every cache entry. Keys outside the cache namespaces (the stored
    /// user profile, the auth token) are kept.
    pub fn invalidate_all(&self) -> Result<usize, CacheError> {
        self.remove_where(|key| Namespace::ALL.iter().any(|ns| key_in_namespace(*ns, key)))
    }

    /// Removes entries whose lifetime has elapsed and returns how many went.
    pub fn sweep_expired(&self) -> Result<usize, CacheError> {
        let now = self.clock.now();
        let mut removed = 0;
        for key in self.store.keys().map_err(CacheError::store)? {
            if !Namespace::ALL.iter().any(|ns| key_in_namespace(*ns, &key)) {
                continue;
            }
            let Some(raw) = self.store.get(&key).map_err(CacheError::store)? else {
                continue;
            };
            match serde_json::from_str::<CacheEnvelope>(&raw) {
                Ok(envelope) if !envelope.is_fresh(now) => {
                    self.store.remove(&key).map_err(CacheError::store)?;
                    removed += 1;
                }
                Ok(_) => {}
                Err(error) => debug!(key, %error, "sweep skipping malformed entry"),
            }
        }
        if removed > 0 {
            info!(removed, "swept expired cache entries");
        }
        Ok(removed)
    }

    /// Runs [`sweep_expired`](Self::sweep_expired) every `every` until
    /// `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let every = every.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("cache sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(error) = cache.sweep_expired() {
                            warn!(%error, "cache sweep failed");
                        }
                    }
                }
            }
        })
    }

    fn remove_where(&self, matches: impl Fn(&str) -> bool) -> Result<usize, CacheError> {
        let mut removed = 0;
        for key in self.store.keys().map_err(CacheError::store)? {
            if matches(&key) {
                self.store.remove(&key).map_err(CacheError::store)?;
                removed += 1;
            }
        }
        debug!(removed, "invalidated cache entries");
        Ok(removed)
    }

    async fn fetch_shared<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        fetch: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let pending = self.join_or_start(key, ttl, fetch);
        let value = pending.await?;
        serde_json::from_value(value).map_err(|e| CacheError::Decode {
            key: key.to_string(),
            reason: Arc::new(e),
        })
    }

    fn join_or_start<T, F, Fut>(&self, key: &CacheKey, ttl: Duration, fetch: F) -> InflightFetch
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let mut inflight = lock(&self.inflight);
        if let Some(existing) = inflight.get(key.as_str()) {
            debug!(key = %key, "joining in-flight fetch");
            return existing.clone();
        }

        let job = fetch();
        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);
        let registry = Arc::clone(&self.inflight);
        let key_text = key.to_string();

        let task = async move {
            let outcome = run_fetch(job, &*store, &*clock, &key_text, ttl).await;
            lock(&registry).remove(&key_text);
            outcome
        }
        .boxed()
        .shared();

        inflight.insert(key.to_string(), task.clone());
        task
    }
}

fn lock(map: &InflightMap) -> MutexGuard<'_, HashMap<String, InflightFetch>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn run_fetch<T, Fut>(
    job: Fut,
    store: &dyn KvStore,
    clock: &dyn Clock,
    key: &str,
    ttl: Duration,
) -> Result<Value, CacheError>
where
    T: Serialize,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let value = job.await.map_err(|e| {
        warn!(key, error = %e, "cache fetch failed");
        CacheError::Fetch {
            key: key.to_owned(),
            reason: Arc::new(e),
        }
    })?;
    let json = serde_json::to_value(&value).map_err(|e| CacheError::Encode {
        key: key.to_owned(),
        reason: Arc::new(e),
    })?;
    if let Err(error) = write_envelope(store, clock, key, json.clone(), ttl) {
        warn!(key, %error, "fetched value not persisted");
    }
    Ok(json)
}

fn write_envelope(
    store: &dyn KvStore,
    clock: &dyn Clock,
    key: &str,
    value: Value,
    ttl: Duration,
) -> Result<(), CacheError> {
    let envelope = CacheEnvelope {
        value,
        timestamp: clock.now(),
        ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
    };
    let text = serde_json::to_string(&envelope).map_err(|e| CacheError::Encode {
        key: key.to_owned(),
        reason: Arc::new(e),
    })?;
    store.set(key, &text).map_err(CacheError::store)?;
    debug!(key, ttl_ms = envelope.ttl_ms, "cache entry stored");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ManualClock, MemoryKvStore};
    use contestmate_schema::UserId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(60);

    fn setup() -> (Arc<CacheLayer>, Arc<MemoryKvStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryKvStore::new());
        let clock = Arc::new(ManualClock::default());
        let cache = Arc::new(CacheLayer::with_clock(store.clone(), clock.clone()));
        (cache, store, clock)
    }

    fn counting_fetch(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl FnOnce() -> BoxFuture<'static, anyhow::Result<u32>> {
        let calls = Arc::clone(calls);
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, anyhow::Error>(value)
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_entry_is_served_without_fetching() {
        let (cache, _, clock) = setup();
        let key = CacheKey::skill_analysis(UserId(1));
        let calls = Arc::new(AtomicUsize::new(0));

        let first: u32 = cache.get_or_fetch(&key, TTL, counting_fetch(&calls, 7)).await.unwrap();
        clock.advance(chrono::Duration::seconds(59));
        let second: u32 = cache.get_or_fetch(&key, TTL, counting_fetch(&calls, 8)).await.unwrap();

        assert_eq!((first, second), (7, 7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_refetched() {
        let (cache, _, clock) = setup();
        let key = CacheKey::skill_analysis(UserId(1));
        let calls = Arc::new(AtomicUsize::new(0));

        let _: u32 = cache.get_or_fetch(&key, TTL, counting_fetch(&calls, 7)).await.unwrap();
        clock.advance(chrono::Duration::seconds(60));
        let again: u32 = cache.get_or_fetch(&key, TTL, counting_fetch(&calls, 8)).await.unwrap();

        assert_eq!(again, 8);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_fetch() {
        let (cache, _, _) = setup();
        let key = CacheKey::recommendations(UserId(1), "math", "easy");
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            cache.get_or_fetch::<u32, _, _>(&key, TTL, counting_fetch(&calls, 1)),
            cache.get_or_fetch::<u32, _, _>(&key, TTL, counting_fetch(&calls, 2)),
        );

        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(lock(&cache.inflight).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_reaches_every_waiter_and_stores_nothing() {
        let (cache, store, _) = setup();
        let key = CacheKey::skill_analysis(UserId(3));
        let calls = Arc::new(AtomicUsize::new(0));

        let failing = |calls: &Arc<AtomicUsize>| {
            let calls = Arc::clone(calls);
            move || {
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Err::<u32, _>(anyhow::anyhow!("backend down"))
                }
                .boxed()
            }
        };

        let (a, b) = tokio::join!(
            cache.get_or_fetch::<u32, _, _>(&key, TTL, failing(&calls)),
            cache.get_or_fetch::<u32, _, _>(&key, TTL, failing(&calls)),
        );
        assert!(a.unwrap_err().is_fetch());
        assert!(b.unwrap_err().is_fetch());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.get(key.as_str()).unwrap().is_none());

        // the failed attempt is not remembered
        let _ = cache.get_or_fetch::<u32, _, _>(&key, TTL, failing(&calls)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_bypasses_fresh_entry() {
        let (cache, _, _) = setup();
        let key = CacheKey::competition_trends(UserId(1), None, None);
        let calls = Arc::new(AtomicUsize::new(0));

        let _: u32 = cache.get_or_fetch(&key, TTL, counting_fetch(&calls, 1)).await.unwrap();
        let refreshed: u32 = cache.refresh(&key, TTL, counting_fetch(&calls, 2)).await.unwrap();

        assert_eq!(refreshed, 2);
        assert_eq!(cache.get::<u32>(&key), Some(2));
    }

    #[test]
    fn malformed_entry_is_a_miss_and_left_in_place() {
        let (cache, store, _) = setup();
        let key = CacheKey::skill_analysis(UserId(1));
        store.set(key.as_str(), "{not json").unwrap();

        assert_eq!(cache.get::<u32>(&key), None);
        assert_eq!(store.get(key.as_str()).unwrap().as_deref(), Some("{not json"));
        assert_eq!(cache.sweep_expired().unwrap(), 0);
        assert!(store.get(key.as_str()).unwrap().is_some());
    }

    #[test]
    fn invalidation_scopes() {
        let (cache, store, _) = setup();
        store.set("user", r#"{"id":1}"#).unwrap();
        let rec = CacheKey::recommendations(UserId(1), "a", "b");
        let skills = CacheKey::skill_analysis(UserId(1));
        let history = CacheKey::chat_history(UserId(1));
        for key in [&rec, &skills, &history] {
            cache.put(key, TTL, &1u32).unwrap();
        }

        assert_eq!(cache.invalidate_namespace(Namespace::Recommendations).unwrap(), 1);
        assert_eq!(cache.get::<u32>(&rec), None);
        assert_eq!(cache.get::<u32>(&skills), Some(1));

        cache.invalidate(&skills).unwrap();
        assert_eq!(cache.get::<u32>(&skills), None);

        assert_eq!(cache.invalidate_all().unwrap(), 1);
        assert_eq!(store.keys().unwrap(), vec!["user".to_string()]);
    }

    #[test]
    fn sweep_removes_only_expired_entries() {
        let (cache, store, clock) = setup();
        let short = CacheKey::skill_analysis(UserId(1));
        let long = CacheKey::skill_analysis(UserId(2));
        cache.put(&short, Duration::from_secs(10), &1u32).unwrap();
        cache.put(&long, Duration::from_secs(100), &2u32).unwrap();

        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(cache.sweep_expired().unwrap(), 1);
        assert!(store.get(short.as_str()).unwrap().is_none());
        assert_eq!(cache.get::<u32>(&long), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_until_cancelled() {
        let (cache, store, clock) = setup();
        let key = CacheKey::skill_analysis(UserId(1));
        cache.put(&key, Duration::from_secs(10), &1u32).unwrap();
        clock.advance(chrono::Duration::seconds(11));

        let cancel = CancellationToken::new();
        let handle = cache.spawn_sweeper(Duration::from_secs(60), cancel.clone());
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(store.get(key.as_str()).unwrap().is_none());

        cancel.cancel();
        handle.await.unwrap();
    }
}
