//! Clocks and periodic tasks.
//!
//! Periodic work (hook polling, the elapsed-time display of a running timer)
//! goes through [`ScheduledTask`] so tests can drive it with tokio's paused
//! clock instead of waiting on wall time.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Source of wall-clock timestamps.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
  now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: Arc::new(Mutex::new(start)),
    }
  }

  pub fn advance(&self, by: chrono::Duration) {
    let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
    *now += by;
  }

  pub fn set(&self, at: DateTime<Utc>) {
    *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

type TickFn = Arc<dyn Fn() + Send + Sync>;

/// A callback run every `period` while started.
///
/// The first tick happens one period after `start()`. Dropping the task
/// stops it.
pub struct ScheduledTask {
  period: Duration,
  tick: TickFn,
  handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
  pub fn new<F>(period: Duration, tick: F) -> Self
  where
    F: Fn() + Send + Sync + 'static,
  {
    Self {
      period,
      tick: Arc::new(tick),
      handle: None,
    }
  }

  pub fn period(&self) -> Duration {
    self.period
  }

  /// Start ticking. No-op if already running.
  pub fn start(&mut self) {
    if self.is_running() {
      return;
    }
    let tick = Arc::clone(&self.tick);
    let period = self.period;
    self.handle = Some(tokio::spawn(async move {
      let mut interval = interval_at(Instant::now() + period, period);
      interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        interval.tick().await;
        tick();
      }
    }));
  }

  pub fn stop(&mut self) {
    if let Some(handle) = self.handle.take() {
      handle.abort();
    }
  }

  /// Run the callback once, outside the schedule.
  pub fn tick(&self) {
    (self.tick)();
  }

  pub fn is_running(&self) -> bool {
    self.handle.as_ref().is_some_and(|h| !h.is_finished())
  }
}

impl Drop for ScheduledTask {
  fn drop(&mut self) {
    self.stop();
  }
}

impl std::fmt::Debug for ScheduledTask {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ScheduledTask")
      .field("period", &self.period)
      .field("running", &self.is_running())
      .finish_non_exhaustive()
  }
}

/// Stopwatch for time tracking, reading time from a [`Clock`].
#[derive(Debug, Clone)]
pub struct ElapsedTimer<C: Clock> {
  clock: C,
  started_at: Option<DateTime<Utc>>,
  accumulated: chrono::Duration,
}

impl<C: Clock> ElapsedTimer<C> {
  pub fn new(clock: C) -> Self {
    Self {
      clock,
      started_at: None,
      accumulated: chrono::Duration::zero(),
    }
  }

  /// Start or resume. Returns the start time of this run.
  pub fn start(&mut self) -> DateTime<Utc> {
    *self.started_at.get_or_insert_with(|| self.clock.now())
  }

  /// Pause and return the total tracked so far.
  pub fn stop(&mut self) -> chrono::Duration {
    if let Some(started) = self.started_at.take() {
      self.accumulated += self.clock.now() - started;
    }
    self.accumulated
  }

  pub fn reset(&mut self) {
    self.started_at = None;
    self.accumulated = chrono::Duration::zero();
  }

  pub fn is_running(&self) -> bool {
    self.started_at.is_some()
  }

  pub fn elapsed(&self) -> chrono::Duration {
    match self.started_at {
      Some(started) => self.accumulated + (self.clock.now() - started),
      None => self.accumulated,
    }
  }
}

/// Render a duration as `HH:MM:SS`.
pub fn format_elapsed(elapsed: chrono::Duration) -> String {
  let secs = elapsed.num_seconds().max(0);
  format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
