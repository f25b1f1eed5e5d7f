use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Environment signals the sync core reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
  /// The user came back to the app
  Focus,
  /// Connectivity restored
  Online,
  /// Connectivity lost
  Offline,
}

const EVENT_CAPACITY: usize = 64;

/// Fan-out of focus and connectivity signals.
///
/// The online flag is also kept as state so writers can check it without
/// listening for transitions.
#[derive(Debug, Clone)]
pub struct EventBus {
  tx: broadcast::Sender<SyncEvent>,
  online: Arc<watch::Sender<bool>>,
}

impl EventBus {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
    let (online, _rx) = watch::channel(online);
    Self {
      tx,
      online: Arc::new(online),
    }
  }

  /// Record connectivity. Only a change emits `Online`/`Offline`.
  pub fn set_online(&self, online: bool) {
    let changed = self.online.send_if_modified(|current| {
      let changed = *current != online;
      *current = online;
      changed
    });
    if changed {
      debug!(online, "connectivity changed");
      let event = if online {
        SyncEvent::Online
      } else {
        SyncEvent::Offline
      };
      // No listeners is fine
      let _ = self.tx.send(event);
    }
  }

  pub fn focus(&self) {
    let _ = self.tx.send(SyncEvent::Focus);
  }

  pub fn is_online(&self) -> bool {
    *self.online.borrow()
  }

  pub fn watch_online(&self) -> watch::Receiver<bool> {
    self.online.subscribe()
  }

  /// Events emitted from now on.
  pub fn stream(&self) -> EventStream {
    EventStream {
      rx: self.tx.subscribe(),
    }
  }
}

impl Default for EventBus {
  fn default() -> Self {
    Self::new(true)
  }
}

pub struct EventStream {
  rx: broadcast::Receiver<SyncEvent>,
}

impl EventStream {
  /// Receive the next event. `None` once the bus is gone.
  pub async fn next(&mut self) -> Option<SyncEvent> {
    loop {
      match self.rx.recv().await {
        Ok(event) => return Some(event),
        Err(RecvError::Lagged(skipped)) => {
          warn!(skipped, "event listener lagged");
        }
        Err(RecvError::Closed) => return None,
      }
    }
  }
}
