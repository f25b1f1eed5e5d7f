//! Ties each page bundle to its cache, key and accessor call.

use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;

use crate::cache::{CacheKey, FetchCache, FetchOptions, LoadingTracker};
use crate::error::SyncError;
use crate::planner::{
  ActivityLogs, ActivityParams, DailyBundle, DailyParams, DashboardBundle, DashboardParams,
  PlannerAccessor, PlannerQueryKey, WeeklyBundle, WeeklyParams,
};

use super::hook::HookOptions;

/// One cache per bundle type, all reporting to the same loading tracker.
#[derive(Clone)]
pub struct BundleCaches {
  pub dashboard: FetchCache<DashboardBundle>,
  pub weekly: FetchCache<WeeklyBundle>,
  pub daily: FetchCache<DailyBundle>,
  pub activity: FetchCache<ActivityLogs>,
}

impl BundleCaches {
  pub fn new(loading: &LoadingTracker) -> Self {
    Self {
      dashboard: FetchCache::new("dashboard", loading.clone()),
      weekly: FetchCache::new("weekly", loading.clone()),
      daily: FetchCache::new("daily", loading.clone()),
      activity: FetchCache::new("activity-logs", loading.clone()),
    }
  }

  /// Invalidate matching keys across every cache.
  pub fn invalidate_where<P>(&self, predicate: P) -> usize
  where
    P: Fn(&CacheKey) -> bool,
  {
    self.dashboard.invalidate_where(&predicate)
      + self.weekly.invalidate_where(&predicate)
      + self.daily.invalidate_where(&predicate)
      + self.activity.invalidate_where(&predicate)
  }

  pub fn clear(&self) {
    self.dashboard.clear();
    self.weekly.clear();
    self.daily.clear();
    self.activity.clear();
  }

  pub fn len(&self) -> usize {
    self.dashboard.len() + self.weekly.len() + self.daily.len() + self.activity.len()
  }
}

/// A page read model fetched and cached as one unit.
pub trait Bundle: Clone + Default + Send + Sync + 'static {
  type Params: Clone + PartialEq + Send + Sync + 'static;

  fn query_key(params: &Self::Params) -> PlannerQueryKey;

  /// Hook defaults for this page.
  fn default_options(fetch: &FetchOptions) -> HookOptions;

  fn cache(caches: &BundleCaches) -> &FetchCache<Self>;

  fn fetch<A: PlannerAccessor>(
    accessor: Arc<A>,
    params: Self::Params,
  ) -> BoxFuture<'static, Result<Self, SyncError>>;
}

impl Bundle for DashboardBundle {
  type Params = DashboardParams;

  fn query_key(params: &DashboardParams) -> PlannerQueryKey {
    params.into()
  }

  /// Aggregates are expensive; focus does not refetch them.
  fn default_options(fetch: &FetchOptions) -> HookOptions {
    HookOptions::new(fetch.clone()).revalidate_on_focus(false)
  }

  fn cache(caches: &BundleCaches) -> &FetchCache<Self> {
    &caches.dashboard
  }

  fn fetch<A: PlannerAccessor>(
    accessor: Arc<A>,
    params: DashboardParams,
  ) -> BoxFuture<'static, Result<Self, SyncError>> {
    async move { accessor.fetch_dashboard(params).await }.boxed()
  }
}

impl Bundle for WeeklyBundle {
  type Params = WeeklyParams;

  fn query_key(params: &WeeklyParams) -> PlannerQueryKey {
    params.into()
  }

  fn default_options(fetch: &FetchOptions) -> HookOptions {
    HookOptions::new(fetch.clone()).revalidate_on_focus(false)
  }

  fn cache(caches: &BundleCaches) -> &FetchCache<Self> {
    &caches.weekly
  }

  fn fetch<A: PlannerAccessor>(
    accessor: Arc<A>,
    params: WeeklyParams,
  ) -> BoxFuture<'static, Result<Self, SyncError>> {
    async move { accessor.fetch_weekly(params).await }.boxed()
  }
}

impl Bundle for DailyBundle {
  type Params = DailyParams;

  fn query_key(params: &DailyParams) -> PlannerQueryKey {
    params.into()
  }

  fn default_options(fetch: &FetchOptions) -> HookOptions {
    HookOptions::new(fetch.clone())
  }

  fn cache(caches: &BundleCaches) -> &FetchCache<Self> {
    &caches.daily
  }

  fn fetch<A: PlannerAccessor>(
    accessor: Arc<A>,
    params: DailyParams,
  ) -> BoxFuture<'static, Result<Self, SyncError>> {
    async move { accessor.fetch_daily(params).await }.boxed()
  }
}

impl Bundle for ActivityLogs {
  type Params = ActivityParams;

  fn query_key(params: &ActivityParams) -> PlannerQueryKey {
    params.into()
  }

  fn default_options(fetch: &FetchOptions) -> HookOptions {
    HookOptions::new(fetch.clone())
  }

  fn cache(caches: &BundleCaches) -> &FetchCache<Self> {
    &caches.activity
  }

  fn fetch<A: PlannerAccessor>(
    accessor: Arc<A>,
    params: ActivityParams,
  ) -> BoxFuture<'static, Result<Self, SyncError>> {
    async move { accessor.fetch_activity_logs(params).await }.boxed()
  }
}
