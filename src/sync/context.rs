//! The sync context: caches, offline queue and signals for one session.

use color_eyre::Result;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, FetchOptions, LoadingTracker};
use crate::error::SyncError;
use crate::event::{EventBus, EventStream, SyncEvent};
use crate::planner::{
  ActivityLogs, ActivityParams, DailyBundle, DailyParams, DashboardBundle, DashboardParams,
  PlannerAccessor, Resource, WeeklyBundle, WeeklyParams,
};
use crate::queue::{
  DrainReport, Mutation, OfflineQueue, QueueStorage, QueuedAction, DEFAULT_MAX_ATTEMPTS,
};
use crate::schedule::{Clock, ScheduledTask, SystemClock};

use super::bundle::{Bundle, BundleCaches};
use super::hook::{HookOptions, SyncHandle};
use super::status::{SyncIndicator, SyncStatus};

/// Settings shared by every hook and the queue of a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
  pub fetch: FetchOptions,
  pub max_attempts: u32,
  /// How long a "failed to sync" notice stays up
  pub failure_display: Duration,
  /// First delay before replaying writes that failed while online
  pub replay_interval: Duration,
  /// Cap for the doubling replay delay
  pub max_replay_interval: Duration,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      fetch: FetchOptions::default(),
      max_attempts: DEFAULT_MAX_ATTEMPTS,
      failure_display: Duration::from_secs(5),
      replay_interval: Duration::from_secs(1),
      max_replay_interval: Duration::from_secs(60),
    }
  }
}

/// What happened to a submitted write.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
  /// The server accepted it
  Applied,
  /// Stored for replay once connectivity returns
  Queued(QueuedAction),
}

type Revalidate = Arc<dyn Fn() + Send + Sync>;

struct Registration {
  key: CacheKey,
  focus: bool,
  reconnect: bool,
  revalidate: Revalidate,
  /// Dropped (and stopped) with the registration
  _poller: Option<ScheduledTask>,
}

#[derive(Default)]
struct Registry {
  next_id: u64,
  hooks: HashMap<u64, Registration>,
}

struct ContextInner<A> {
  accessor: Arc<A>,
  caches: BundleCaches,
  queue: OfflineQueue,
  events: EventBus,
  loading: LoadingTracker,
  indicator: SyncIndicator,
  config: SyncConfig,
  registry: Mutex<Registry>,
  disposed: AtomicBool,
  event_task: Mutex<Option<JoinHandle<()>>>,
  replay_task: Mutex<Option<JoinHandle<()>>>,
}

/// Explicitly constructed sync session.
///
/// Clones share the same caches and queue. Create one per application root
/// (or per test) with [`init`](Self::init) and tear it down with
/// [`dispose`](Self::dispose).
pub struct SyncContext<A: PlannerAccessor> {
  inner: Arc<ContextInner<A>>,
}

impl<A: PlannerAccessor> Clone for SyncContext<A> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<A: PlannerAccessor> SyncContext<A> {
  /// Create a context and start listening for focus and connectivity events.
  ///
  /// Must be called from within a tokio runtime.
  pub fn init(config: SyncConfig, accessor: Arc<A>, storage: Arc<dyn QueueStorage>) -> Result<Self> {
    Self::init_with_clock(config, accessor, storage, Arc::new(SystemClock))
  }

  pub fn init_with_clock(
    config: SyncConfig,
    accessor: Arc<A>,
    storage: Arc<dyn QueueStorage>,
    clock: Arc<dyn Clock>,
  ) -> Result<Self> {
    let queue = OfflineQueue::new(storage, clock, config.max_attempts)?;
    let indicator = SyncIndicator::new();
    indicator.set_pending(queue.count()?);

    let loading = LoadingTracker::new();
    let events = EventBus::new(true);
    // Subscribe before spawning so no event is missed
    let stream = events.stream();

    let inner = Arc::new(ContextInner {
      accessor,
      caches: BundleCaches::new(&loading),
      queue,
      events,
      loading,
      indicator,
      config,
      registry: Mutex::new(Registry::default()),
      disposed: AtomicBool::new(false),
      event_task: Mutex::new(None),
      replay_task: Mutex::new(None),
    });

    let task = tokio::spawn(run_events(Arc::downgrade(&inner), stream));
    *lock(&inner.event_task) = Some(task);

    info!(status = %inner.indicator.current(), "sync context initialized");
    let ctx = Self { inner };
    // Writes left over from an earlier session
    if ctx.inner.indicator.current() != SyncStatus::Synced {
      ctx.schedule_replay();
    }
    Ok(ctx)
  }

  /// Stop listening for events, drop every cached bundle and registration.
  ///
  /// Hooks report [`SyncError::Disposed`] afterwards. The offline queue is
  /// persisted and untouched.
  pub fn dispose(&self) {
    if self.inner.disposed.swap(true, Ordering::SeqCst) {
      return;
    }
    if let Some(task) = lock(&self.inner.event_task).take() {
      task.abort();
    }
    if let Some(task) = lock(&self.inner.replay_task).take() {
      task.abort();
    }
    // Pollers stop when their registrations drop, outside the lock
    let hooks = std::mem::take(&mut lock(&self.inner.registry).hooks);
    drop(hooks);
    self.inner.caches.clear();
    info!("sync context disposed");
  }

  pub fn is_disposed(&self) -> bool {
    self.inner.disposed.load(Ordering::SeqCst)
  }

  fn ensure_live(&self) -> Result<(), SyncError> {
    if self.is_disposed() {
      Err(SyncError::Disposed)
    } else {
      Ok(())
    }
  }

  pub fn config(&self) -> &SyncConfig {
    &self.inner.config
  }

  pub fn events(&self) -> &EventBus {
    &self.inner.events
  }

  /// Global count of in-flight fetches.
  pub fn loading(&self) -> &LoadingTracker {
    &self.inner.loading
  }

  pub fn queue(&self) -> &OfflineQueue {
    &self.inner.queue
  }

  pub fn status(&self) -> SyncStatus {
    self.inner.indicator.current()
  }

  pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
    self.inner.indicator.subscribe()
  }

  pub(crate) fn accessor(&self) -> Arc<A> {
    Arc::clone(&self.inner.accessor)
  }

  pub(crate) fn caches(&self) -> &BundleCaches {
    &self.inner.caches
  }

  // ==========================================================================
  // Hooks
  // ==========================================================================

  /// Default hook options for bundle `B` under this context's fetch settings.
  pub fn hook_options<B: Bundle>(&self) -> HookOptions {
    B::default_options(&self.inner.config.fetch)
  }

  pub fn hook<B: Bundle>(&self, params: Option<B::Params>, options: HookOptions) -> SyncHandle<B, A> {
    SyncHandle::new(self.clone(), params, options)
  }

  pub fn dashboard(&self, params: Option<DashboardParams>) -> SyncHandle<DashboardBundle, A> {
    self.hook(params, self.hook_options::<DashboardBundle>())
  }

  pub fn weekly(&self, params: Option<WeeklyParams>) -> SyncHandle<WeeklyBundle, A> {
    self.hook(params, self.hook_options::<WeeklyBundle>())
  }

  pub fn daily(&self, params: Option<DailyParams>) -> SyncHandle<DailyBundle, A> {
    self.hook(params, self.hook_options::<DailyBundle>())
  }

  pub fn activity_logs(&self, params: Option<ActivityParams>) -> SyncHandle<ActivityLogs, A> {
    self.hook(params, self.hook_options::<ActivityLogs>())
  }

  /// Track a live hook for focus/reconnect revalidation and polling.
  ///
  /// `revalidate` must join a request already outstanding for `key`.
  /// Returns `None` after [`dispose`](Self::dispose).
  pub(crate) fn register<F>(
    &self,
    key: CacheKey,
    focus: bool,
    reconnect: bool,
    refresh_interval: Option<Duration>,
    revalidate: F,
  ) -> Option<u64>
  where
    F: Fn() + Send + Sync + 'static,
  {
    if self.is_disposed() {
      return None;
    }
    let revalidate: Revalidate = Arc::new(revalidate);
    let poller = refresh_interval.map(|period| {
      let tick = Arc::clone(&revalidate);
      let mut task = ScheduledTask::new(period, move || tick());
      task.start();
      task
    });

    let mut registry = lock(&self.inner.registry);
    registry.next_id += 1;
    let id = registry.next_id;
    registry.hooks.insert(
      id,
      Registration {
        key,
        focus,
        reconnect,
        revalidate,
        _poller: poller,
      },
    );
    Some(id)
  }

  pub(crate) fn unregister(&self, id: u64) {
    let removed = lock(&self.inner.registry).hooks.remove(&id);
    drop(removed);
  }

  /// Revalidate each key watched by a matching hook once.
  fn revalidate_hooks(&self, wanted: impl Fn(&Registration) -> bool) -> usize {
    let mut seen = HashSet::new();
    let callbacks: Vec<Revalidate> = lock(&self.inner.registry)
      .hooks
      .values()
      .filter(|&r| wanted(r) && seen.insert(r.key.clone()))
      .map(|r| Arc::clone(&r.revalidate))
      .collect();
    for revalidate in &callbacks {
      revalidate();
    }
    callbacks.len()
  }

  // ==========================================================================
  // Writes
  // ==========================================================================

  /// Send a write to the server, or queue it.
  ///
  /// 1. Offline, or an earlier write to the same target is still queued: enqueue
  /// 2. Otherwise apply it; on success invalidate every affected bundle
  /// 3. A transient failure enqueues; any other failure is returned
  pub async fn submit(&self, mutation: Mutation) -> Result<SubmitOutcome, SyncError> {
    self.ensure_live()?;

    if !self.inner.events.is_online() {
      debug!(target = %mutation.target, "offline, queueing write");
      return self.enqueue(mutation);
    }

    let queued_ahead = self
      .inner
      .queue
      .pending()
      .map_err(SyncError::storage)?
      .iter()
      .any(|action| action.target() == &mutation.target);
    if queued_ahead {
      debug!(target = %mutation.target, "earlier write for target still queued");
      let outcome = self.enqueue(mutation);
      self.schedule_replay();
      return outcome;
    }

    match self.inner.accessor.apply(mutation.clone()).await {
      Ok(()) => {
        self.invalidate_resource(&mutation.target.resource);
        Ok(SubmitOutcome::Applied)
      }
      Err(err) if err.is_transient() => {
        warn!(target = %mutation.target, error = %err, "write failed, queueing for retry");
        let outcome = self.enqueue(mutation);
        self.schedule_replay();
        outcome
      }
      Err(err) => {
        warn!(target = %mutation.target, error = %err, "write rejected");
        Err(err)
      }
    }
  }

  fn enqueue(&self, mutation: Mutation) -> Result<SubmitOutcome, SyncError> {
    let action = self.inner.queue.enqueue(mutation).map_err(SyncError::storage)?;
    let pending = self.inner.queue.count().map_err(SyncError::storage)?;
    self.inner.indicator.set_pending(pending);
    Ok(SubmitOutcome::Queued(action))
  }

  /// Replay the offline queue, then refresh bundles touched by it.
  pub async fn sync_pending(&self) -> Result<DrainReport, SyncError> {
    self.ensure_live()?;
    let inner = &self.inner;

    let pending = inner.queue.count().map_err(SyncError::storage)?;
    if pending == 0 {
      inner.indicator.set_pending(0);
      return Ok(DrainReport::default());
    }
    inner.indicator.set_syncing(pending);

    let accessor = Arc::clone(&inner.accessor);
    let drained = inner
      .queue
      .drain(move |mutation| {
        let accessor = Arc::clone(&accessor);
        async move { accessor.apply(mutation).await }
      })
      .await;

    let remaining = inner.queue.count().map_err(SyncError::storage)?;
    let report = match drained {
      Ok(report) => report,
      Err(err) => {
        inner.indicator.set_pending(remaining);
        return Err(SyncError::storage(err));
      }
    };

    // Rejected writes may have been applied optimistically; refetch those too
    let touched: HashSet<&str> = report
      .applied
      .iter()
      .chain(report.permanently_failed.iter().map(|f| f.action.target()))
      .map(|target| target.resource.as_str())
      .collect();
    for resource in touched {
      self.invalidate_resource(resource);
    }

    if report.permanently_failed.is_empty() {
      inner.indicator.set_pending(remaining);
    } else {
      inner
        .indicator
        .flash_failure(report.permanently_failed.len(), inner.config.failure_display, remaining);
    }
    if remaining > 0 {
      self.schedule_replay();
    }
    Ok(report)
  }

  /// Retry the queue in the background while online, backing off between
  /// rounds. At most one retry loop runs per context.
  fn schedule_replay(&self) {
    if self.is_disposed() || !self.inner.events.is_online() {
      return;
    }
    let mut slot = lock(&self.inner.replay_task);
    if slot.as_ref().is_some_and(|task| !task.is_finished()) {
      return;
    }
    let config = &self.inner.config;
    debug!(delay = ?config.replay_interval, "scheduling offline queue replay");
    *slot = Some(tokio::spawn(replay_with_backoff(
      Arc::downgrade(&self.inner),
      config.replay_interval,
      config.max_replay_interval,
    )));
  }

  // ==========================================================================
  // Invalidation
  // ==========================================================================

  /// Refetch every cached bundle whose key matches `predicate`.
  pub fn invalidate_where<P>(&self, predicate: P) -> usize
  where
    P: Fn(&CacheKey) -> bool,
  {
    self.inner.caches.invalidate_where(predicate)
  }

  /// Refetch every bundle family that embeds `resource`.
  pub fn invalidate_resource(&self, resource: &str) -> usize {
    let families = match resource.parse::<Resource>() {
      Ok(resource) => resource.invalidates(),
      Err(err) => {
        warn!(error = %err, "not invalidating unknown resource");
        return 0;
      }
    };
    let count = self.invalidate_where(|key| families.iter().any(|family| *family == key.resource()));
    debug!(resource, count, "invalidated bundles");
    count
  }
}

/// Drain the queue until it is empty, doubling the delay between rounds.
///
/// Stops when the context goes away or connectivity drops; the next `Online`
/// event drains again.
async fn replay_with_backoff<A: PlannerAccessor>(
  context: Weak<ContextInner<A>>,
  first_delay: Duration,
  max_delay: Duration,
) {
  let mut delay = first_delay;
  loop {
    tokio::time::sleep(delay).await;
    let Some(inner) = context.upgrade() else {
      break;
    };
    let ctx = SyncContext { inner };
    if ctx.is_disposed() || !ctx.events().is_online() {
      break;
    }

    match ctx.sync_pending().await {
      Ok(report) => debug!(
        succeeded = report.succeeded,
        failed = report.failed,
        permanently_failed = report.permanently_failed.len(),
        "retried offline queue"
      ),
      Err(err) => warn!(error = %err, "offline queue retry failed"),
    }
    {
      // Checked under the slot so a write queued now either sees this loop
      // running or finds the slot empty and starts a new one
      let mut slot = lock(&ctx.inner.replay_task);
      match ctx.queue().count() {
        Ok(0) => {
          slot.take();
          break;
        }
        Ok(remaining) => debug!(remaining, ?delay, "writes still queued, backing off"),
        Err(err) => {
          warn!(error = %err, "cannot read offline queue, giving up retries");
          slot.take();
          break;
        }
      }
    }
    delay = (delay * 2).min(max_delay);
  }
}

/// React to focus and connectivity until the context goes away.
async fn run_events<A: PlannerAccessor>(context: Weak<ContextInner<A>>, mut stream: EventStream) {
  while let Some(event) = stream.next().await {
    let Some(inner) = context.upgrade() else {
      break;
    };
    let ctx = SyncContext { inner };

    match event {
      SyncEvent::Focus => {
        let count = ctx.revalidate_hooks(|r| r.focus);
        debug!(count, "focus, revalidated hooks");
      }
      SyncEvent::Online => {
        info!("back online, replaying offline queue");
        match ctx.sync_pending().await {
          Ok(report) if !report.is_empty() => info!(
            succeeded = report.succeeded,
            failed = report.failed,
            permanently_failed = report.permanently_failed.len(),
            "offline queue replayed"
          ),
          Ok(_) => {}
          Err(err) => warn!(error = %err, "offline queue replay failed"),
        }
        let count = ctx.revalidate_hooks(|r| r.reconnect);
        debug!(count, "reconnected, revalidated hooks");
      }
      SyncEvent::Offline => info!("offline, writes will be queued"),
    }
  }
  debug!("event loop stopped");
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::calendar::QuarterRef;
  use crate::planner::fake::FakeAccessor;
  use crate::planner::{mutations, JournalEntry, TaskStatus};
  use crate::queue::MemoryQueueStorage;
  use chrono::NaiveDate;

  fn config() -> SyncConfig {
    SyncConfig {
      fetch: FetchOptions {
        deduping_interval: Duration::from_secs(2),
        error_retry_count: 0,
        error_retry_interval: Duration::from_millis(100),
        keep_previous_data: true,
      },
      max_attempts: 3,
      failure_display: Duration::from_secs(5),
      replay_interval: Duration::from_secs(1),
      max_replay_interval: Duration::from_secs(8),
    }
  }

  fn context() -> (SyncContext<FakeAccessor>, Arc<FakeAccessor>) {
    let fake = Arc::new(FakeAccessor::new());
    let ctx = SyncContext::init(config(), Arc::clone(&fake), Arc::new(MemoryQueueStorage::new())).unwrap();
    (ctx, fake)
  }

  fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 5, 14).unwrap()
  }

  fn weekly_params(week: u32) -> WeeklyParams {
    WeeklyParams {
      quarter: QuarterRef::new(2025, 2).unwrap(),
      week,
    }
  }

  /// Let background tasks run; the paused clock only advances once they idle.
  async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
  }

  async fn wait_for_status(ctx: &SyncContext<FakeAccessor>, expected: SyncStatus) {
    let mut rx = ctx.subscribe_status();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == expected))
      .await
      .expect("status never reached")
      .unwrap();
  }

  #[tokio::test(start_paused = true)]
  async fn test_offline_write_syncs_on_reconnect() {
    let (ctx, fake) = context();
    ctx.events().set_online(false);

    let outcome = ctx
      .submit(mutations::update_task_status("5", TaskStatus::Done))
      .await
      .unwrap();
    assert!(matches!(outcome, SubmitOutcome::Queued(_)));
    assert_eq!(ctx.queue().count().unwrap(), 1);
    assert_eq!(ctx.status().to_string(), "1 pending");
    assert!(fake.applied().is_empty());

    ctx.events().set_online(true);
    wait_for_status(&ctx, SyncStatus::Synced).await;

    let applied = fake.applied();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].target.id, "5");
    assert_eq!(applied[0].payload["status"], "DONE");
    assert_eq!(ctx.queue().count().unwrap(), 0);
    assert_eq!(ctx.status().to_string(), "Synced");
  }

  #[tokio::test(start_paused = true)]
  async fn test_conditional_fetch_makes_no_request() {
    let (ctx, fake) = context();

    let daily = ctx.daily(None);
    let state = daily.load().await;
    assert_eq!(state.data, DailyBundle::default());
    assert!(!state.is_loading);
    assert!(state.error.is_none());
    assert!(daily.key().is_none());

    let hidden = ctx.hook::<DailyBundle>(
      Some(DailyParams { date: today() }),
      ctx.hook_options::<DailyBundle>().visible(false),
    );
    let state = hidden.load().await;
    assert!(!state.is_loading);
    assert_eq!(state.data, DailyBundle::default());

    settle().await;
    assert_eq!(fake.calls("daily"), 0);
    assert!(ctx.caches().daily.is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_hooks_on_same_key_share_one_request() {
    let (ctx, fake) = context();
    fake.set_delay(Duration::from_millis(100));
    let params = Some(weekly_params(20));

    let first = ctx.weekly(params);
    let second = ctx.weekly(params);
    let state = first.state();
    assert!(state.is_loading);
    assert_eq!(state.data, WeeklyBundle::default());
    assert!(ctx.loading().is_loading());

    let (a, b) = tokio::join!(first.load(), second.load());
    assert_eq!(fake.calls("weekly"), 1);
    assert_eq!(a.data, b.data);
    assert_eq!(a.data.tasks[0].title, "week 20");
    assert!(!a.is_loading);
    assert!(!ctx.loading().is_loading());
  }

  #[tokio::test(start_paused = true)]
  async fn test_previous_data_shown_while_switching_keys() {
    let (ctx, fake) = context();
    let mut weekly = ctx.weekly(Some(weekly_params(20)));
    weekly.load().await;

    fake.set_delay(Duration::from_millis(100));
    weekly.set_params(Some(weekly_params(21)));
    let state = weekly.state();
    assert!(state.is_loading);
    assert_eq!(state.data.tasks[0].title, "week 20");

    let state = weekly.load().await;
    assert_eq!(state.data.tasks[0].title, "week 21");
    assert_eq!(weekly.key().unwrap().as_str(), "weekly:2025:2:21");
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_refresh_keeps_previous_data() {
    let (ctx, fake) = context();
    let weekly = ctx.weekly(Some(weekly_params(20)));
    weekly.load().await;

    fake.fail_reads(Some(SyncError::Rejected("quarter archived".into())));
    let err = weekly.refresh().unwrap().wait().await.unwrap_err();
    assert_eq!(err, SyncError::Rejected("quarter archived".into()));

    let state = weekly.state();
    assert_eq!(state.error, Some(err));
    assert_eq!(state.data.tasks[0].title, "week 20");
    assert!(!state.is_loading);
  }

  #[tokio::test(start_paused = true)]
  async fn test_journal_write_invalidates_activity_logs() {
    let (ctx, fake) = context();
    let mut logs = ctx.activity_logs(Some(ActivityParams { date: today() }));
    let daily = ctx.daily(Some(DailyParams { date: today() }));
    let weekly = ctx.weekly(Some(weekly_params(20)));
    assert!(logs.load().await.data.entries.is_empty());
    daily.load().await;
    weekly.load().await;

    let outcome = daily
      .write(mutations::save_journal(today(), "shipped"), |bundle| {
        bundle.journal = Some(JournalEntry {
          date: today(),
          content: "shipped".into(),
          mood: None,
        });
      })
      .await
      .unwrap();
    assert_eq!(outcome, SubmitOutcome::Applied);
    // Optimistic value is visible right away
    assert_eq!(daily.state().data.journal.unwrap().content, "shipped");

    let state = tokio::time::timeout(Duration::from_secs(5), async {
      loop {
        let state = logs.changed().await.unwrap();
        if !state.data.entries.is_empty() {
          return state;
        }
      }
    })
    .await
    .unwrap();
    assert_eq!(state.data.entries.len(), 1);
    assert_eq!(fake.calls("activity_logs"), 2);

    settle().await;
    assert_eq!(fake.calls("weekly"), 1);
    assert_eq!(daily.state().data.journal.unwrap().content, "shipped");
  }

  #[tokio::test(start_paused = true)]
  async fn test_focus_revalidates_only_opted_in_hooks() {
    let (ctx, fake) = context();
    let dashboard = ctx.dashboard(Some(DashboardParams {
      quarter: QuarterRef::new(2025, 2).unwrap(),
    }));
    let daily = ctx.daily(Some(DailyParams { date: today() }));
    dashboard.load().await;
    daily.load().await;

    ctx.events().focus();
    settle().await;

    assert_eq!(fake.calls("dashboard"), 1);
    assert_eq!(fake.calls("daily"), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_reconnect_revalidates_hooks() {
    let (ctx, fake) = context();
    let dashboard = ctx.dashboard(Some(DashboardParams {
      quarter: QuarterRef::new(2025, 2).unwrap(),
    }));
    dashboard.load().await;

    ctx.events().set_online(false);
    ctx.events().set_online(true);
    settle().await;

    assert_eq!(fake.calls("dashboard"), 2);
    assert_eq!(dashboard.state().data.metrics.total_goals, 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_focus_refetches_shared_key_once() {
    let (ctx, fake) = context();
    let params = Some(DailyParams { date: today() });
    let hooks = [ctx.daily(params), ctx.daily(params), ctx.daily(params)];
    for hook in &hooks {
      hook.load().await;
    }
    assert_eq!(fake.calls("daily"), 1);

    ctx.events().focus();
    settle().await;
    assert_eq!(fake.calls("daily"), 2);
    assert!(hooks.iter().all(|h| h.state().error.is_none()));
  }

  #[tokio::test(start_paused = true)]
  async fn test_reconnect_joins_refetch_started_by_replay() {
    let (ctx, fake) = context();
    let daily = [
      ctx.daily(Some(DailyParams { date: today() })),
      ctx.daily(Some(DailyParams { date: today() })),
    ];
    let logs = ctx.activity_logs(Some(ActivityParams { date: today() }));
    daily[0].load().await;
    daily[1].load().await;
    logs.load().await;

    ctx.events().set_online(false);
    ctx
      .submit(mutations::save_journal(today(), "offline notes"))
      .await
      .unwrap();
    fake.set_delay(Duration::from_millis(100));
    ctx.events().set_online(true);
    wait_for_status(&ctx, SyncStatus::Synced).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    // Replay invalidates both families; reconnect revalidation joins those requests
    assert_eq!(fake.calls("daily"), 2);
    assert_eq!(fake.calls("activity_logs"), 2);
    assert_eq!(logs.state().data.entries.len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_polling_hooks_on_same_key_share_requests() {
    let (ctx, fake) = context();
    let options = ctx
      .hook_options::<DailyBundle>()
      .refresh_every(Duration::from_secs(10));
    let params = Some(DailyParams { date: today() });
    let first = ctx.hook::<DailyBundle>(params, options.clone());
    let second = ctx.hook::<DailyBundle>(params, options);
    first.load().await;
    second.load().await;
    fake.set_delay(Duration::from_millis(100));

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(fake.calls("daily"), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_refresh_interval_polls_until_dropped() {
    let (ctx, fake) = context();
    let options = ctx
      .hook_options::<DailyBundle>()
      .refresh_every(Duration::from_secs(10));
    let daily = ctx.hook::<DailyBundle>(Some(DailyParams { date: today() }), options);
    daily.load().await;

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(fake.calls("daily"), 3);

    drop(daily);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(fake.calls("daily"), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_transient_write_failure_is_queued() {
    let (ctx, fake) = context();
    fake.fail_writes(Some(SyncError::Network("connection reset".into())));

    let outcome = ctx
      .submit(mutations::update_task_status("5", TaskStatus::Done))
      .await
      .unwrap();
    assert!(matches!(outcome, SubmitOutcome::Queued(ref action) if action.target().id == "5"));
    assert_eq!(ctx.status(), SyncStatus::Pending(1));

    // Later writes to the same task wait behind it
    fake.fail_writes(None);
    let outcome = ctx
      .submit(mutations::update_task_status("5", TaskStatus::Todo))
      .await
      .unwrap();
    assert!(matches!(outcome, SubmitOutcome::Queued(_)));
    assert!(fake.applied().is_empty());

    let report = ctx.sync_pending().await.unwrap();
    assert_eq!(report.succeeded, 2);
    let statuses: Vec<_> = fake.applied().iter().map(|m| m.payload["status"].clone()).collect();
    assert_eq!(statuses, vec!["DONE", "TODO"]);
    assert_eq!(ctx.status(), SyncStatus::Synced);
  }

  #[tokio::test(start_paused = true)]
  async fn test_write_failed_online_is_retried_with_backoff() {
    let (ctx, fake) = context();
    fake.fail_writes(Some(SyncError::Network("gateway timeout".into())));
    let outcome = ctx
      .submit(mutations::update_task_status("5", TaskStatus::Done))
      .await
      .unwrap();
    assert!(matches!(outcome, SubmitOutcome::Queued(_)));

    // Retries at 1s, then 2s later, then 4s later
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(ctx.queue().pending().unwrap()[0].attempts, 1);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(ctx.queue().pending().unwrap()[0].attempts, 1);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(ctx.queue().pending().unwrap()[0].attempts, 2);
    assert_eq!(ctx.status(), SyncStatus::Pending(1));

    fake.fail_writes(None);
    wait_for_status(&ctx, SyncStatus::Synced).await;
    assert_eq!(fake.applied().len(), 1);
    assert_eq!(ctx.queue().count().unwrap(), 0);

    // Later writes to the task go straight through again
    let outcome = ctx
      .submit(mutations::update_task_status("5", TaskStatus::Todo))
      .await
      .unwrap();
    assert_eq!(outcome, SubmitOutcome::Applied);
  }

  #[tokio::test(start_paused = true)]
  async fn test_retries_wait_for_reconnect_while_offline() {
    let (ctx, fake) = context();
    fake.fail_writes(Some(SyncError::Network("connection reset".into())));
    ctx
      .submit(mutations::update_task_status("5", TaskStatus::Done))
      .await
      .unwrap();
    ctx.events().set_online(false);
    fake.fail_writes(None);

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert!(fake.applied().is_empty());
    assert_eq!(ctx.queue().count().unwrap(), 1);

    ctx.events().set_online(true);
    wait_for_status(&ctx, SyncStatus::Synced).await;
    assert_eq!(fake.applied().len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_rejected_write_is_returned_and_rolled_back() {
    let (ctx, fake) = context();
    let weekly = ctx.weekly(Some(weekly_params(20)));
    let before = weekly.load().await.data;

    fake.fail_writes(Some(SyncError::Rejected("task 5 not found".into())));
    let err = weekly
      .write(mutations::delete_task("5"), |bundle| bundle.tasks.clear())
      .await
      .unwrap_err();
    assert_eq!(err, SyncError::Rejected("task 5 not found".into()));
    assert_eq!(ctx.queue().count().unwrap(), 0);

    settle().await;
    assert_eq!(weekly.state().data.tasks.len(), before.tasks.len());
  }

  #[tokio::test(start_paused = true)]
  async fn test_permanent_replay_failure_is_reported() {
    let (ctx, fake) = context();
    ctx.events().set_online(false);
    ctx
      .submit(mutations::update_task_status("5", TaskStatus::Done))
      .await
      .unwrap();

    fake.fail_writes(Some(SyncError::Rejected("task 5 was deleted".into())));
    let report = ctx.sync_pending().await.unwrap();
    assert_eq!(report.permanently_failed.len(), 1);
    assert_eq!(ctx.queue().count().unwrap(), 0);
    assert_eq!(ctx.status().to_string(), "1 action(s) failed to sync");

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(ctx.status(), SyncStatus::Synced);
  }

  #[tokio::test(start_paused = true)]
  async fn test_dispose() {
    let (ctx, fake) = context();
    let daily = ctx.daily(Some(DailyParams { date: today() }));
    daily.load().await;
    assert_eq!(lock(&ctx.inner.registry).hooks.len(), 1);

    ctx.dispose();
    assert!(ctx.is_disposed());
    assert_eq!(daily.state().error, Some(SyncError::Disposed));
    assert!(daily.refresh().is_none());
    assert_eq!(ctx.caches().len(), 0);
    assert!(lock(&ctx.inner.registry).hooks.is_empty());
    assert_eq!(
      ctx.submit(mutations::delete_task("5")).await,
      Err(SyncError::Disposed)
    );

    // Events no longer trigger anything
    ctx.events().focus();
    settle().await;
    assert_eq!(fake.calls("daily"), 1);

    let late = ctx.daily(Some(DailyParams { date: today() }));
    assert_eq!(late.load().await.error, Some(SyncError::Disposed));
    assert_eq!(fake.calls("daily"), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_queue_survives_into_new_context() {
    let storage: Arc<dyn QueueStorage> = Arc::new(MemoryQueueStorage::new());
    let fake = Arc::new(FakeAccessor::new());
    let first = SyncContext::init(config(), Arc::clone(&fake), Arc::clone(&storage)).unwrap();
    first.events().set_online(false);
    first
      .submit(mutations::update_task_status("5", TaskStatus::Done))
      .await
      .unwrap();
    first.dispose();

    let second = SyncContext::init(config(), Arc::clone(&fake), storage).unwrap();
    assert_eq!(second.status(), SyncStatus::Pending(1));
    second.sync_pending().await.unwrap();
    assert_eq!(fake.applied().len(), 1);
  }
}
