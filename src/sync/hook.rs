//! Page-level read models over the fetch cache.
//!
//! A [`SyncHandle`] is what a page holds: it always has data to show (the
//! bundle's empty shape before the first fetch), reports loading and error
//! state, and accepts optimistic updates.
//!
//! # Example
//!
//! ```ignore
//! let mut weekly = ctx.weekly(Some(WeeklyParams { quarter, week: 20 }));
//!
//! // Wait for the first fetch
//! let state = weekly.load().await;
//! render(&state.data);
//!
//! // Re-render whenever the cached bundle changes
//! while let Some(state) = weekly.changed().await {
//!     render(&state.data);
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::{CacheKey, FetchCache, FetchOptions, Fetcher, PendingFetch, QueryKey, Subscription};
use crate::error::SyncError;
use crate::planner::PlannerAccessor;
use crate::queue::Mutation;

use super::bundle::Bundle;
use super::context::{SubmitOutcome, SyncContext};

/// Per-hook behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookOptions {
  /// When false the hook behaves as if it had no parameters
  pub visible: bool,
  pub revalidate_on_focus: bool,
  pub revalidate_on_reconnect: bool,
  /// Poll the server this often while the hook is alive
  pub refresh_interval: Option<Duration>,
  pub fetch: FetchOptions,
}

impl HookOptions {
  pub fn new(fetch: FetchOptions) -> Self {
    Self {
      visible: true,
      revalidate_on_focus: true,
      revalidate_on_reconnect: true,
      refresh_interval: None,
      fetch,
    }
  }

  pub fn visible(mut self, visible: bool) -> Self {
    self.visible = visible;
    self
  }

  pub fn revalidate_on_focus(mut self, enabled: bool) -> Self {
    self.revalidate_on_focus = enabled;
    self
  }

  pub fn revalidate_on_reconnect(mut self, enabled: bool) -> Self {
    self.revalidate_on_reconnect = enabled;
    self
  }

  pub fn refresh_every(mut self, period: Duration) -> Self {
    self.refresh_interval = Some(period);
    self
  }
}

/// What a page renders.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncState<B> {
  /// Never absent: the bundle's default shape until data arrives
  pub data: B,
  /// No data for the current key yet and a request is outstanding
  pub is_loading: bool,
  /// A request for the current key is outstanding
  pub is_validating: bool,
  pub error: Option<SyncError>,
}

impl<B: Default> SyncState<B> {
  fn idle() -> Self {
    Self {
      data: B::default(),
      is_loading: false,
      is_validating: false,
      error: None,
    }
  }
}

/// A live view of one bundle in a [`SyncContext`].
///
/// Dropping the handle stops its updates and polling. Requests it started
/// keep running for anyone else waiting on them.
pub struct SyncHandle<B: Bundle, A: PlannerAccessor> {
  ctx: SyncContext<A>,
  params: Option<B::Params>,
  options: HookOptions,
  /// `None` when the hook is disabled
  key: Option<CacheKey>,
  subscription: Option<Subscription<B>>,
  /// Last data shown under a previous key
  previous: Option<B>,
  registration: Option<u64>,
}

impl<B: Bundle, A: PlannerAccessor> SyncHandle<B, A> {
  pub(crate) fn new(ctx: SyncContext<A>, params: Option<B::Params>, options: HookOptions) -> Self {
    let mut handle = Self {
      ctx,
      params: None,
      options,
      key: None,
      subscription: None,
      previous: None,
      registration: None,
    };
    handle.attach(params);
    handle
  }

  pub fn key(&self) -> Option<&CacheKey> {
    self.key.as_ref()
  }

  pub fn params(&self) -> Option<&B::Params> {
    self.params.as_ref()
  }

  pub fn options(&self) -> &HookOptions {
    &self.options
  }

  fn cache(&self) -> &FetchCache<B> {
    B::cache(self.ctx.caches())
  }

  fn fetcher(&self) -> Option<Fetcher<B>> {
    let params = self.params.clone()?;
    let accessor = self.ctx.accessor();
    let fetcher: Fetcher<B> = Arc::new(move || B::fetch(Arc::clone(&accessor), params.clone()));
    Some(fetcher)
  }

  /// Point the hook at `params`, subscribe and start the first fetch.
  fn attach(&mut self, params: Option<B::Params>) {
    self.params = params;
    self.key = match &self.params {
      Some(params) if self.options.visible => Some(B::query_key(params).cache_key()),
      _ => None,
    };

    let (Some(key), Some(fetcher)) = (self.key.clone(), self.fetcher()) else {
      return;
    };
    if self.ctx.is_disposed() {
      return;
    }

    let cache = self.cache().clone();
    self.subscription = Some(cache.subscribe(&key));

    let revalidate = {
      let cache = cache.clone();
      let key = key.clone();
      move || {
        cache.refetch(&key);
      }
    };
    self.registration = self.ctx.register(
      key.clone(),
      self.options.revalidate_on_focus,
      self.options.revalidate_on_reconnect,
      self.options.refresh_interval,
      revalidate,
    );

    debug!(key = %key, "hook attached");
    cache.ensure(&key, fetcher, &self.options.fetch);
  }

  fn detach(&mut self) {
    if let Some(id) = self.registration.take() {
      self.ctx.unregister(id);
    }
    self.subscription = None;
  }

  /// Switch to other parameters. `None` disables the hook.
  ///
  /// With `keep_previous_data` the old bundle stays visible until the new
  /// key resolves.
  pub fn set_params(&mut self, params: Option<B::Params>) {
    if params == self.params {
      return;
    }
    self.remember_current();
    self.detach();
    self.attach(params);
  }

  pub fn set_visible(&mut self, visible: bool) {
    if visible == self.options.visible {
      return;
    }
    self.options.visible = visible;
    let params = self.params.take();
    self.detach();
    self.attach(params);
  }

  fn remember_current(&mut self) {
    if !self.options.fetch.keep_previous_data {
      self.previous = None;
      return;
    }
    if let Some(data) = self.subscription.as_ref().and_then(|s| s.current().data) {
      self.previous = Some(data);
    }
  }

  pub fn state(&self) -> SyncState<B> {
    if self.ctx.is_disposed() {
      return SyncState {
        error: Some(SyncError::Disposed),
        ..SyncState::idle()
      };
    }
    let Some(subscription) = &self.subscription else {
      return SyncState::idle();
    };

    let snapshot = subscription.current();
    let is_loading = snapshot.data.is_none() && snapshot.is_validating;
    let data = snapshot
      .data
      .or_else(|| self.previous.clone())
      .unwrap_or_default();

    SyncState {
      data,
      is_loading,
      is_validating: snapshot.is_validating,
      error: snapshot.error,
    }
  }

  /// Wait until the current key has data (or failed), stale-while-revalidate.
  pub async fn load(&self) -> SyncState<B> {
    if self.ctx.is_disposed() {
      return self.state();
    }
    if let (Some(key), Some(fetcher)) = (self.key.as_ref(), self.fetcher()) {
      if let Err(err) = self.cache().get(key, fetcher, &self.options.fetch).await {
        debug!(key = %key, error = %err, "load failed");
      }
    }
    self.state()
  }

  /// Wait for the next change of the cached bundle.
  ///
  /// `None` when the hook is disabled or the context was disposed.
  pub async fn changed(&mut self) -> Option<SyncState<B>> {
    let subscription = self.subscription.as_mut()?;
    subscription.changed().await?;
    Some(self.state())
  }

  /// Refetch now, superseding any request already outstanding.
  pub fn refresh(&self) -> Option<PendingFetch<B>> {
    if self.ctx.is_disposed() {
      return None;
    }
    let key = self.key.as_ref()?;
    match self.cache().revalidate(key) {
      Some(pending) => Some(pending),
      None => Some(self.cache().fetch(key, self.fetcher()?, &self.options.fetch)),
    }
  }

  /// Update the cached bundle locally, optionally refetching afterwards.
  ///
  /// Returns the refetch handle when one was started.
  pub fn mutate<F>(&self, updater: F, revalidate: bool) -> Option<PendingFetch<B>>
  where
    F: FnOnce(&mut B),
  {
    if self.ctx.is_disposed() {
      return None;
    }
    let key = self.key.as_ref()?;
    let fallback = self.previous.clone();
    self.cache().mutate(
      key,
      move |current| {
        let mut data = current.cloned().or(fallback).unwrap_or_default();
        updater(&mut data);
        data
      },
      revalidate,
    )
  }

  /// Apply `optimistic` locally, then send `mutation`.
  ///
  /// A permanent failure refetches the bundle to undo the optimistic change
  /// and is returned. Transient failures end up in the offline queue.
  pub async fn write<F>(&self, mutation: Mutation, optimistic: F) -> Result<SubmitOutcome, SyncError>
  where
    F: FnOnce(&mut B) + Send,
  {
    self.mutate(optimistic, false);
    match self.ctx.submit(mutation).await {
      Ok(outcome) => Ok(outcome),
      Err(err) => {
        self.refresh();
        Err(err)
      }
    }
  }
}

impl<B: Bundle, A: PlannerAccessor> Drop for SyncHandle<B, A> {
  fn drop(&mut self) {
    self.detach();
  }
}
