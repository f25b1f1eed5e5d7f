//! Cache layer that orchestrates caching logic with network fetching.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::loading::LoadingTracker;
use super::traits::{CacheKey, CacheResult, FetchOptions, Snapshot};
use crate::error::SyncError;

/// A factory that creates futures fetching the value for one key.
pub type Fetcher<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, SyncError>> + Send + Sync>;

/// Box a closure returning a future into a [`Fetcher`].
pub fn fetcher<T, F, Fut>(f: F) -> Fetcher<T>
where
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
{
  Arc::new(move || f().boxed())
}

/// Handle on an outstanding request. Clones share the same result.
pub struct PendingFetch<T> {
  generation: u64,
  result: Shared<BoxFuture<'static, Result<T, SyncError>>>,
}

impl<T: Clone> PendingFetch<T> {
  /// Generation this request was issued under.
  pub fn generation(&self) -> u64 {
    self.generation
  }

  /// Wait for the request to settle.
  pub async fn wait(self) -> Result<T, SyncError> {
    self.result.await
  }
}

impl<T> Clone for PendingFetch<T> {
  fn clone(&self) -> Self {
    Self {
      generation: self.generation,
      result: self.result.clone(),
    }
  }
}

impl<T> std::fmt::Debug for PendingFetch<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PendingFetch")
      .field("generation", &self.generation)
      .finish_non_exhaustive()
  }
}

/// Receives every snapshot published for one key.
///
/// Dropping it stops delivery. It never cancels a request other consumers
/// may be waiting on.
pub struct Subscription<T> {
  rx: watch::Receiver<Snapshot<T>>,
}

impl<T: Clone> Subscription<T> {
  pub fn current(&self) -> Snapshot<T> {
    self.rx.borrow().clone()
  }

  /// Wait for the next published snapshot. `None` once the entry is gone.
  pub async fn changed(&mut self) -> Option<Snapshot<T>> {
    self.rx.changed().await.ok()?;
    Some(self.rx.borrow_and_update().clone())
  }
}

struct Entry<T> {
  data: Option<T>,
  error: Option<SyncError>,
  fetched_at: Option<Instant>,
  /// Newest generation handed out for this key
  issued: u64,
  /// Generation that produced `data`
  committed: u64,
  in_flight: Option<PendingFetch<T>>,
  fetcher: Option<Fetcher<T>>,
  options: FetchOptions,
  tx: watch::Sender<Snapshot<T>>,
}

impl<T: Clone> Entry<T> {
  fn new() -> Self {
    let (tx, _rx) = watch::channel(Snapshot::default());
    Self {
      data: None,
      error: None,
      fetched_at: None,
      issued: 0,
      committed: 0,
      in_flight: None,
      fetcher: None,
      options: FetchOptions::default(),
      tx,
    }
  }

  fn snapshot(&self) -> Snapshot<T> {
    Snapshot {
      data: self.data.clone(),
      error: self.error.clone(),
      is_validating: self.in_flight.is_some(),
      generation: self.committed,
    }
  }

  fn publish(&self) {
    self.tx.send_replace(self.snapshot());
  }

  fn is_stale(&self, deduping_interval: Duration) -> bool {
    self
      .fetched_at
      .map_or(true, |at| at.elapsed() >= deduping_interval)
  }

  fn register(&mut self, fetcher: &Fetcher<T>, options: &FetchOptions) {
    self.fetcher = Some(Arc::clone(fetcher));
    self.options = options.clone();
  }
}

struct CacheState<T> {
  entries: HashMap<CacheKey, Entry<T>>,
  next_generation: u64,
}

/// Stale-while-revalidate cache for one value type.
///
/// - at most one deduplicated request per key is outstanding
/// - every request gets a generation; a response older than the value
///   already held is discarded
/// - settled values are fanned out to every [`Subscription`] of the key
pub struct FetchCache<T> {
  name: &'static str,
  state: Arc<Mutex<CacheState<T>>>,
  loading: LoadingTracker,
}

impl<T> Clone for FetchCache<T> {
  fn clone(&self) -> Self {
    Self {
      name: self.name,
      state: Arc::clone(&self.state),
      loading: self.loading.clone(),
    }
  }
}

impl<T: Clone + Send + Sync + 'static> FetchCache<T> {
  /// Create an empty cache. `name` only labels log lines.
  pub fn new(name: &'static str, loading: LoadingTracker) -> Self {
    Self {
      name,
      state: Arc::new(Mutex::new(CacheState {
        entries: HashMap::new(),
        next_generation: 0,
      })),
      loading,
    }
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  fn lock(&self) -> MutexGuard<'_, CacheState<T>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Read `key` with stale-while-revalidate semantics.
  ///
  /// 1. Cached data is returned immediately, even if stale
  /// 2. Stale data (older than the deduping interval) starts a background refetch
  /// 3. Without data, join the outstanding request or start one and wait
  pub async fn get(
    &self,
    key: &CacheKey,
    fetcher: Fetcher<T>,
    options: &FetchOptions,
  ) -> Result<CacheResult<T>, SyncError> {
    let pending = {
      let mut state = self.lock();
      let entry = state.entries.entry(key.clone()).or_insert_with(Entry::new);
      entry.register(&fetcher, options);

      let cached = entry.data.clone().map(|data| {
        let stale = entry.is_stale(options.deduping_interval);
        (data, entry.fetched_at, stale)
      });
      let in_flight = entry.in_flight.clone();

      match (cached, in_flight) {
        (Some((data, fetched_at, stale)), in_flight) => {
          if stale && in_flight.is_none() {
            debug!(cache = self.name, key = %key, "serving stale data, revalidating");
            self.spawn_fetch(&mut state, key, fetcher, options);
          }
          return Ok(CacheResult::from_cache(data, fetched_at, stale));
        }
        (None, Some(pending)) => pending,
        (None, None) => self.spawn_fetch(&mut state, key, fetcher, options),
      }
    };

    pending.wait().await.map(CacheResult::from_network)
  }

  /// Start a request for `key`, or join the one already outstanding.
  pub fn fetch(&self, key: &CacheKey, fetcher: Fetcher<T>, options: &FetchOptions) -> PendingFetch<T> {
    let mut state = self.lock();
    let entry = state.entries.entry(key.clone()).or_insert_with(Entry::new);
    entry.register(&fetcher, options);
    if let Some(pending) = entry.in_flight.clone() {
      debug!(cache = self.name, key = %key, generation = pending.generation, "joining in-flight fetch");
      return pending;
    }
    self.spawn_fetch(&mut state, key, fetcher, options)
  }

  /// Like [`fetch`](Self::fetch), but leaves fresh data alone.
  ///
  /// Returns `None` when the cached value is younger than the deduping interval.
  pub fn ensure(
    &self,
    key: &CacheKey,
    fetcher: Fetcher<T>,
    options: &FetchOptions,
  ) -> Option<PendingFetch<T>> {
    let mut state = self.lock();
    let entry = state.entries.entry(key.clone()).or_insert_with(Entry::new);
    entry.register(&fetcher, options);
    if let Some(pending) = entry.in_flight.clone() {
      return Some(pending);
    }
    if entry.data.is_some() && !entry.is_stale(options.deduping_interval) {
      return None;
    }
    Some(self.spawn_fetch(&mut state, key, fetcher, options))
  }

  /// Issue a new generation for `key` with its registered fetcher, even if a
  /// request is already outstanding.
  ///
  /// Returns `None` if nothing was ever fetched under `key`.
  pub fn revalidate(&self, key: &CacheKey) -> Option<PendingFetch<T>> {
    let mut state = self.lock();
    let entry = state.entries.get(key)?;
    let fetcher = entry.fetcher.clone()?;
    let options = entry.options.clone();
    Some(self.spawn_fetch(&mut state, key, fetcher, &options))
  }

  /// Refetch `key` with its registered fetcher, joining the outstanding
  /// request if there is one.
  ///
  /// Returns `None` if nothing was ever fetched under `key`.
  pub fn refetch(&self, key: &CacheKey) -> Option<PendingFetch<T>> {
    let mut state = self.lock();
    let entry = state.entries.get(key)?;
    if let Some(pending) = entry.in_flight.clone() {
      debug!(cache = self.name, key = %key, generation = pending.generation, "joining in-flight fetch");
      return Some(pending);
    }
    let fetcher = entry.fetcher.clone()?;
    let options = entry.options.clone();
    Some(self.spawn_fetch(&mut state, key, fetcher, &options))
  }

  /// Replace the value for `key` locally, before the server confirms it.
  ///
  /// The update takes a fresh generation, so requests issued earlier cannot
  /// overwrite it. `updater` runs under the cache lock and must not call
  /// back into this cache.
  pub fn mutate<F>(&self, key: &CacheKey, updater: F, should_revalidate: bool) -> Option<PendingFetch<T>>
  where
    F: FnOnce(Option<&T>) -> T,
  {
    let mut state = self.lock();
    state.next_generation += 1;
    let generation = state.next_generation;

    let entry = state.entries.entry(key.clone()).or_insert_with(Entry::new);
    entry.data = Some(updater(entry.data.as_ref()));
    entry.error = None;
    entry.issued = generation;
    entry.committed = generation;
    entry.in_flight = None;
    entry.publish();
    debug!(cache = self.name, key = %key, generation, "applied local mutation");

    let registered = entry.fetcher.clone().map(|f| (f, entry.options.clone()));
    match (should_revalidate, registered) {
      (true, Some((fetcher, options))) => Some(self.spawn_fetch(&mut state, key, fetcher, &options)),
      _ => None,
    }
  }

  /// Refetch every entry whose key matches `predicate`.
  ///
  /// Entries that were never fetched (no registered fetcher) are dropped
  /// instead. Returns the number of matching keys.
  pub fn invalidate_where<P>(&self, predicate: P) -> usize
  where
    P: Fn(&CacheKey) -> bool,
  {
    let mut state = self.lock();
    let keys: Vec<CacheKey> = state
      .entries
      .keys()
      .filter(|&key| predicate(key))
      .cloned()
      .collect();

    for key in &keys {
      let registered = state.entries.get_mut(key).and_then(|entry| {
        entry.fetched_at = None;
        entry.fetcher.clone().map(|f| (f, entry.options.clone()))
      });
      match registered {
        Some((fetcher, options)) => {
          self.spawn_fetch(&mut state, key, fetcher, &options);
        }
        None => {
          state.entries.remove(key);
        }
      }
    }

    if !keys.is_empty() {
      debug!(cache = self.name, count = keys.len(), "invalidated entries");
    }
    keys.len()
  }

  /// Current snapshot of `key` without triggering a fetch.
  pub fn peek(&self, key: &CacheKey) -> Snapshot<T> {
    self
      .lock()
      .entries
      .get(key)
      .map(Entry::snapshot)
      .unwrap_or_default()
  }

  pub fn subscribe(&self, key: &CacheKey) -> Subscription<T> {
    let mut state = self.lock();
    let entry = state.entries.entry(key.clone()).or_insert_with(Entry::new);
    Subscription {
      rx: entry.tx.subscribe(),
    }
  }

  /// Drop every entry. Subscriptions end and outstanding results are discarded.
  pub fn clear(&self) {
    let mut state = self.lock();
    let count = state.entries.len();
    state.entries.clear();
    debug!(cache = self.name, count, "cleared cache");
  }

  pub fn len(&self) -> usize {
    self.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn spawn_fetch(
    &self,
    state: &mut CacheState<T>,
    key: &CacheKey,
    fetcher: Fetcher<T>,
    options: &FetchOptions,
  ) -> PendingFetch<T> {
    state.next_generation += 1;
    let generation = state.next_generation;

    let (tx, rx) = oneshot::channel();
    let result = async move {
      rx.await
        .unwrap_or_else(|_| Err(SyncError::Network("fetch task ended without a result".to_string())))
    }
    .boxed()
    .shared();
    let pending = PendingFetch { generation, result };

    let entry = state.entries.entry(key.clone()).or_insert_with(Entry::new);
    entry.issued = generation;
    entry.in_flight = Some(pending.clone());
    entry.publish();
    debug!(cache = self.name, key = %key, generation, "fetch started");

    let cache = self.clone();
    let key = key.clone();
    let options = options.clone();
    let guard = self.loading.begin();
    tokio::spawn(async move {
      let outcome = fetch_with_retry(&fetcher, &options, &key).await;
      cache.settle(&key, generation, &outcome, options.keep_previous_data);
      drop(guard);
      // Nobody may be waiting; the cache already holds the result
      let _ = tx.send(outcome);
    });

    pending
  }

  fn settle(
    &self,
    key: &CacheKey,
    generation: u64,
    outcome: &Result<T, SyncError>,
    keep_previous_data: bool,
  ) {
    let mut state = self.lock();
    let Some(entry) = state.entries.get_mut(key) else {
      debug!(cache = self.name, key = %key, generation, "entry evicted before fetch settled");
      return;
    };

    if entry
      .in_flight
      .as_ref()
      .is_some_and(|p| p.generation == generation)
    {
      entry.in_flight = None;
    }

    if generation <= entry.committed {
      debug!(
        cache = self.name,
        key = %key,
        generation,
        committed = entry.committed,
        "discarding superseded response"
      );
      entry.publish();
      return;
    }

    match outcome {
      Ok(data) => {
        entry.data = Some(data.clone());
        entry.error = None;
        entry.fetched_at = Some(Instant::now());
        entry.committed = generation;
        debug!(cache = self.name, key = %key, generation, "fetch settled");
      }
      Err(err) if generation < entry.issued => {
        debug!(cache = self.name, key = %key, generation, error = %err, "ignoring failure of superseded fetch");
      }
      Err(err) => {
        warn!(cache = self.name, key = %key, generation, error = %err, "fetch failed");
        entry.error = Some(err.clone());
        if !keep_previous_data {
          entry.data = None;
        }
        entry.committed = generation;
      }
    }
    entry.publish();
  }
}

async fn fetch_with_retry<T>(
  fetcher: &Fetcher<T>,
  options: &FetchOptions,
  key: &CacheKey,
) -> Result<T, SyncError> {
  let mut attempt = 0;
  loop {
    match fetcher().await {
      Ok(data) => return Ok(data),
      Err(err) if err.is_transient() && attempt < options.error_retry_count => {
        attempt += 1;
        let delay = options.retry_delay(attempt);
        warn!(key = %key, attempt, ?delay, error = %err, "fetch failed, retrying");
        tokio::time::sleep(delay).await;
      }
      Err(err) => return Err(err),
    }
  }
}
