//! Process-wide count of in-flight fetches, for a global loading indicator.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct LoadingTracker {
  tx: Arc<watch::Sender<usize>>,
}

impl LoadingTracker {
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(0);
    Self { tx: Arc::new(tx) }
  }

  /// Mark a fetch as started. The count drops again when the guard is dropped.
  pub fn begin(&self) -> LoadingGuard {
    self.tx.send_modify(|n| *n += 1);
    LoadingGuard {
      tx: Arc::clone(&self.tx),
    }
  }

  pub fn in_flight(&self) -> usize {
    *self.tx.borrow()
  }

  pub fn is_loading(&self) -> bool {
    self.in_flight() > 0
  }

  pub fn subscribe(&self) -> watch::Receiver<usize> {
    self.tx.subscribe()
  }
}

impl Default for LoadingTracker {
  fn default() -> Self {
    Self::new()
  }
}

#[derive(Debug)]
pub struct LoadingGuard {
  tx: Arc<watch::Sender<usize>>,
}

impl Drop for LoadingGuard {
  fn drop(&mut self) {
    self.tx.send_modify(|n| *n = n.saturating_sub(1));
  }
}
