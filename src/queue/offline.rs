//! Persisted FIFO of writes made while the server was unreachable.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::action::{Mutation, QueueSnapshot, QueuedAction, Target};
use super::storage::QueueStorage;
use crate::error::SyncError;
use crate::schedule::Clock;

/// Default number of failed replays before an action is given up on.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// An action removed from the queue without being applied.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedAction {
  pub action: QueuedAction,
  pub error: SyncError,
}

/// Outcome of one [`OfflineQueue::drain`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
  /// Actions applied and removed
  pub succeeded: usize,
  /// Actions whose replay failed, transient or not
  pub failed: usize,
  /// Actions not attempted because an earlier action for the same target failed
  pub skipped: usize,
  /// Targets of applied actions, in replay order
  pub applied: Vec<Target>,
  /// Actions dropped for good: rejected by the server or out of attempts
  pub permanently_failed: Vec<FailedAction>,
}

impl DrainReport {
  pub fn is_empty(&self) -> bool {
    self.succeeded == 0 && self.failed == 0 && self.skipped == 0
  }
}

/// Offline write queue backed by a [`QueueStorage`].
///
/// Every change is a read-modify-write of the whole persisted snapshot under
/// one lock, so enqueues racing with a drain are never lost.
pub struct OfflineQueue {
  storage: Arc<dyn QueueStorage>,
  clock: Arc<dyn Clock>,
  max_attempts: u32,
  write_lock: Mutex<()>,
  drain_lock: tokio::sync::Mutex<()>,
  pending: watch::Sender<usize>,
}

impl OfflineQueue {
  pub fn new(storage: Arc<dyn QueueStorage>, clock: Arc<dyn Clock>, max_attempts: u32) -> Result<Self> {
    let pending = storage.load()?.actions.len();
    let (tx, _rx) = watch::channel(pending);
    Ok(Self {
      storage,
      clock,
      max_attempts: max_attempts.max(1),
      write_lock: Mutex::new(()),
      drain_lock: tokio::sync::Mutex::new(()),
      pending: tx,
    })
  }

  /// Record `mutation` for later replay.
  pub fn enqueue(&self, mutation: Mutation) -> Result<QueuedAction> {
    let enqueued_at = self.clock.now();
    let action = self.update(|snapshot| {
      let action = QueuedAction {
        id: snapshot.next_id,
        mutation,
        enqueued_at,
        attempts: 0,
        last_error: None,
      };
      snapshot.next_id += 1;
      snapshot.actions.push(action.clone());
      action
    })?;
    info!(id = action.id, target = %action.target(), kind = ?action.mutation.kind, "queued offline action");
    Ok(action)
  }

  /// Number of actions waiting for replay.
  pub fn count(&self) -> Result<usize> {
    Ok(self.storage.load()?.actions.len())
  }

  /// Actions waiting for replay, oldest first.
  pub fn pending(&self) -> Result<Vec<QueuedAction>> {
    Ok(self.storage.load()?.actions)
  }

  /// Watch the pending count.
  pub fn subscribe(&self) -> watch::Receiver<usize> {
    self.pending.subscribe()
  }

  /// Drop every pending action.
  pub fn clear(&self) -> Result<usize> {
    let removed = self.update(|snapshot| std::mem::take(&mut snapshot.actions).len())?;
    warn!(removed, "cleared offline queue");
    Ok(removed)
  }

  /// Replay pending actions in enqueue order through `apply`.
  ///
  /// A failed action stays at the head of its target: later actions for the
  /// same target are skipped until it succeeds. Rejections, and transient
  /// failures that reach the attempt limit, remove the action and report it
  /// in [`DrainReport::permanently_failed`]. Only one drain runs at a time.
  pub async fn drain<F, Fut>(&self, mut apply: F) -> Result<DrainReport>
  where
    F: FnMut(Mutation) -> Fut,
    Fut: Future<Output = Result<(), SyncError>>,
  {
    let _draining = self.drain_lock.lock().await;
    let actions = self.pending()?;
    let mut report = DrainReport::default();
    if actions.is_empty() {
      return Ok(report);
    }

    info!(count = actions.len(), "draining offline queue");
    let mut blocked: HashSet<Target> = HashSet::new();

    for action in actions {
      if blocked.contains(action.target()) {
        debug!(id = action.id, target = %action.target(), "skipping, earlier action for target failed");
        report.skipped += 1;
        continue;
      }

      match apply(action.mutation.clone()).await {
        Ok(()) => {
          self.remove(action.id)?;
          debug!(id = action.id, target = %action.target(), "replayed offline action");
          report.succeeded += 1;
          report.applied.push(action.mutation.target);
        }
        Err(err) => {
          report.failed += 1;
          blocked.insert(action.target().clone());
          let attempts = action.attempts + 1;

          if err.is_transient() && attempts < self.max_attempts {
            warn!(id = action.id, target = %action.target(), attempts, error = %err, "replay failed, will retry");
            self.record_failure(action.id, &err)?;
          } else {
            error!(id = action.id, target = %action.target(), attempts, error = %err, "giving up on offline action");
            self.remove(action.id)?;
            report.permanently_failed.push(FailedAction {
              action: QueuedAction {
                attempts,
                last_error: Some(err.to_string()),
                ..action
              },
              error: err,
            });
          }
        }
      }
    }

    info!(
      succeeded = report.succeeded,
      failed = report.failed,
      skipped = report.skipped,
      "offline queue drained"
    );
    Ok(report)
  }

  fn remove(&self, id: u64) -> Result<()> {
    self.update(|snapshot| snapshot.actions.retain(|a| a.id != id))
  }

  fn record_failure(&self, id: u64, err: &SyncError) -> Result<()> {
    self.update(|snapshot| {
      if let Some(action) = snapshot.actions.iter_mut().find(|a| a.id == id) {
        action.attempts += 1;
        action.last_error = Some(err.to_string());
      }
    })
  }

  fn update<R>(&self, f: impl FnOnce(&mut QueueSnapshot) -> R) -> Result<R> {
    let _guard = self
      .write_lock
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut snapshot = self.storage.load()?;
    let out = f(&mut snapshot);
    self.storage.save(&snapshot)?;
    self.pending.send_replace(snapshot.actions.len());
    Ok(out)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::queue::action::ActionKind;
  use crate::queue::storage::MemoryQueueStorage;
  use crate::schedule::SystemClock;
  use serde_json::json;

  fn queue(max_attempts: u32) -> OfflineQueue {
    OfflineQueue::new(
      Arc::new(MemoryQueueStorage::new()),
      Arc::new(SystemClock),
      max_attempts,
    )
    .unwrap()
  }

  fn status(task: &str, status: &str) -> Mutation {
    Mutation::new(
      ActionKind::Update,
      Target::new("tasks", task),
      json!({ "status": status }),
    )
  }

  /// Records applied mutations; fails those whose payload status is listed.
  struct Recorder {
    applied: Mutex<Vec<Mutation>>,
    fail_with: Mutex<Vec<(String, SyncError)>>,
  }

  impl Recorder {
    fn new() -> Arc<Self> {
      Arc::new(Self {
        applied: Mutex::new(Vec::new()),
        fail_with: Mutex::new(Vec::new()),
      })
    }

    fn fail(&self, status: &str, err: SyncError) {
      self.fail_with.lock().unwrap().push((status.to_string(), err));
    }

    fn heal(&self) {
      self.fail_with.lock().unwrap().clear();
    }

    fn apply(self: &Arc<Self>) -> impl FnMut(Mutation) -> futures::future::Ready<Result<(), SyncError>> {
      let recorder = Arc::clone(self);
      move |mutation| {
        let failure = recorder
          .fail_with
          .lock()
          .unwrap()
          .iter()
          .find(|(s, _)| mutation.payload["status"] == s.as_str())
          .map(|(_, e)| e.clone());
        let result = match failure {
          Some(err) => Err(err),
          None => {
            recorder.applied.lock().unwrap().push(mutation);
            Ok(())
          }
        };
        futures::future::ready(result)
      }
    }

    fn applied_statuses(&self) -> Vec<String> {
      self
        .applied
        .lock()
        .unwrap()
        .iter()
        .map(|m| m.payload["status"].as_str().unwrap_or_default().to_string())
        .collect()
    }
  }

  #[tokio::test]
  async fn test_drain_of_empty_queue_is_noop() {
    let queue = queue(3);
    let recorder = Recorder::new();
    let report = queue.drain(recorder.apply()).await.unwrap();
    assert_eq!(report, DrainReport::default());
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failed, 0);
  }

  #[tokio::test]
  async fn test_ids_are_monotonic_across_drains() {
    let queue = queue(3);
    let recorder = Recorder::new();
    let first = queue.enqueue(status("5", "DONE")).unwrap();
    queue.drain(recorder.apply()).await.unwrap();
    let second = queue.enqueue(status("5", "TODO")).unwrap();
    assert!(second.id > first.id);
  }

  #[tokio::test]
  async fn test_drain_replays_in_order() {
    let queue = queue(3);
    let recorder = Recorder::new();
    for s in ["a1", "a2", "a3"] {
      queue.enqueue(status("5", s)).unwrap();
    }
    assert_eq!(queue.count().unwrap(), 3);

    let report = queue.drain(recorder.apply()).await.unwrap();
    assert_eq!(report.succeeded, 3);
    assert_eq!(recorder.applied_statuses(), vec!["a1", "a2", "a3"]);
    assert_eq!(queue.count().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_transient_failure_halts_target() {
    let queue = queue(3);
    let recorder = Recorder::new();
    for s in ["a1", "a2", "a3"] {
      queue.enqueue(status("5", s)).unwrap();
    }
    recorder.fail("a2", SyncError::Network("timeout".into()));

    let report = queue.drain(recorder.apply()).await.unwrap();
    assert_eq!(recorder.applied_statuses(), vec!["a1"]);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 1);
    assert!(report.permanently_failed.is_empty());

    let pending = queue.pending().unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].mutation.payload["status"], "a2");
    assert_eq!(pending[0].attempts, 1);
    assert_eq!(pending[0].last_error.as_deref(), Some("network error: timeout"));

    // Next drain picks up where it stopped
    recorder.heal();
    let report = queue.drain(recorder.apply()).await.unwrap();
    assert_eq!(report.succeeded, 2);
    assert_eq!(recorder.applied_statuses(), vec!["a1", "a2", "a3"]);
  }

  #[tokio::test]
  async fn test_failure_does_not_block_other_targets() {
    let queue = queue(3);
    let recorder = Recorder::new();
    queue.enqueue(status("5", "a1")).unwrap();
    queue.enqueue(status("6", "b1")).unwrap();
    queue.enqueue(status("5", "a2")).unwrap();
    recorder.fail("a1", SyncError::Network("timeout".into()));

    let report = queue.drain(recorder.apply()).await.unwrap();
    assert_eq!(recorder.applied_statuses(), vec!["b1"]);
    assert_eq!(report.applied, vec![Target::new("tasks", "6")]);
    assert_eq!(report.skipped, 1);
    assert_eq!(queue.count().unwrap(), 2);
  }

  #[tokio::test]
  async fn test_rejected_action_is_removed_and_reported() {
    let queue = queue(3);
    let recorder = Recorder::new();
    queue.enqueue(status("5", "a1")).unwrap();
    queue.enqueue(status("5", "a2")).unwrap();
    let rejected = SyncError::Rejected("task 5 no longer exists".into());
    recorder.fail("a1", rejected.clone());

    let report = queue.drain(recorder.apply()).await.unwrap();
    assert_eq!(report.permanently_failed.len(), 1);
    assert_eq!(report.permanently_failed[0].error, rejected);
    assert_eq!(report.permanently_failed[0].action.attempts, 1);
    // a2 waits for the next drain
    assert!(recorder.applied_statuses().is_empty());
    assert_eq!(queue.count().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_transient_failures_give_up_after_max_attempts() {
    let queue = queue(2);
    let recorder = Recorder::new();
    queue.enqueue(status("5", "a1")).unwrap();
    recorder.fail("a1", SyncError::Network("timeout".into()));

    let first = queue.drain(recorder.apply()).await.unwrap();
    assert!(first.permanently_failed.is_empty());
    assert_eq!(queue.count().unwrap(), 1);

    let second = queue.drain(recorder.apply()).await.unwrap();
    assert_eq!(second.permanently_failed.len(), 1);
    assert_eq!(second.permanently_failed[0].action.attempts, 2);
    assert_eq!(queue.count().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_enqueue_during_drain_is_kept() {
    let queue = Arc::new(queue(3));
    queue.enqueue(status("5", "a1")).unwrap();

    let inner = Arc::clone(&queue);
    let report = queue
      .drain(move |_mutation| {
        // Arrives while a1 is being replayed
        inner.enqueue(status("7", "late")).unwrap();
        futures::future::ready(Ok(()))
      })
      .await
      .unwrap();

    assert_eq!(report.succeeded, 1);
    let pending = queue.pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].target(), &Target::new("tasks", "7"));
  }

  #[tokio::test]
  async fn test_pending_count_is_published() {
    let queue = queue(3);
    let rx = queue.subscribe();
    queue.enqueue(status("5", "DONE")).unwrap();
    assert_eq!(*rx.borrow(), 1);
    queue.clear().unwrap();
    assert_eq!(*rx.borrow(), 0);
  }
}
