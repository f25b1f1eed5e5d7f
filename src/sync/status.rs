//! Pending/synced indicator for the offline queue.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
  /// Nothing waiting
  Synced,
  /// Actions queued, waiting for connectivity
  Pending(usize),
  /// A drain is replaying this many actions
  Syncing(usize),
  /// This many actions were dropped during the last drain
  Failed(usize),
}

impl fmt::Display for SyncStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SyncStatus::Synced => f.write_str("Synced"),
      SyncStatus::Pending(n) => write!(f, "{} pending", n),
      SyncStatus::Syncing(n) => write!(f, "Syncing {} action(s)", n),
      SyncStatus::Failed(n) => write!(f, "{} action(s) failed to sync", n),
    }
  }
}

/// Publishes the current [`SyncStatus`].
///
/// A failure notice is shown for a while and then falls back to the pending
/// count, unless a newer status replaced it first.
#[derive(Debug, Clone)]
pub struct SyncIndicator {
  tx: Arc<watch::Sender<SyncStatus>>,
  epoch: Arc<AtomicU64>,
  pending: Arc<AtomicUsize>,
}

impl SyncIndicator {
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(SyncStatus::Synced);
    Self {
      tx: Arc::new(tx),
      epoch: Arc::new(AtomicU64::new(0)),
      pending: Arc::new(AtomicUsize::new(0)),
    }
  }

  pub fn current(&self) -> SyncStatus {
    *self.tx.borrow()
  }

  pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
    self.tx.subscribe()
  }

  pub fn set_pending(&self, pending: usize) {
    self.pending.store(pending, Ordering::SeqCst);
    self.publish(pending_status(pending));
  }

  pub fn set_syncing(&self, count: usize) {
    self.publish(SyncStatus::Syncing(count));
  }

  /// Show a failure notice for `display`, then the pending count.
  ///
  /// Must be called from within a tokio runtime.
  pub fn flash_failure(&self, failed: usize, display: Duration, pending: usize) {
    self.pending.store(pending, Ordering::SeqCst);
    let epoch = self.publish(SyncStatus::Failed(failed));

    let indicator = self.clone();
    tokio::spawn(async move {
      tokio::time::sleep(display).await;
      if indicator.epoch.load(Ordering::SeqCst) == epoch {
        let pending = indicator.pending.load(Ordering::SeqCst);
        indicator.publish(pending_status(pending));
      }
    });
  }

  fn publish(&self, status: SyncStatus) -> u64 {
    let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
    self.tx.send_replace(status);
    epoch
  }
}

impl Default for SyncIndicator {
  fn default() -> Self {
    Self::new()
  }
}

fn pending_status(pending: usize) -> SyncStatus {
  if pending == 0 {
    SyncStatus::Synced
  } else {
    SyncStatus::Pending(pending)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_labels() {
    assert_eq!(SyncStatus::Synced.to_string(), "Synced");
    assert_eq!(SyncStatus::Pending(1).to_string(), "1 pending");
    assert_eq!(SyncStatus::Syncing(3).to_string(), "Syncing 3 action(s)");
    assert_eq!(SyncStatus::Failed(2).to_string(), "2 action(s) failed to sync");
  }

  #[test]
  fn test_pending_count() {
    let indicator = SyncIndicator::new();
    indicator.set_pending(1);
    assert_eq!(indicator.current(), SyncStatus::Pending(1));
    indicator.set_pending(0);
    assert_eq!(indicator.current(), SyncStatus::Synced);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failure_notice_clears_after_timeout() {
    let indicator = SyncIndicator::new();
    indicator.flash_failure(2, Duration::from_secs(5), 0);
    assert_eq!(indicator.current(), SyncStatus::Failed(2));

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(indicator.current(), SyncStatus::Failed(2));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(indicator.current(), SyncStatus::Synced);
  }

  #[tokio::test(start_paused = true)]
  async fn test_newer_status_survives_failure_timeout() {
    let indicator = SyncIndicator::new();
    indicator.flash_failure(1, Duration::from_secs(5), 0);
    indicator.set_pending(3);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(indicator.current(), SyncStatus::Pending(3));
  }
}
