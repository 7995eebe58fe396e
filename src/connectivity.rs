//! Online/offline signal shared by the interceptor and the sync processor.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Current connectivity plus a change feed. Clones share one channel;
/// subscribers see it close once every clone is dropped.
#[derive(Clone)]
pub struct Connectivity {
  tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx: Arc::new(tx) }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Update the state. Subscribers are only woken on an actual change.
  pub fn set_online(&self, online: bool) {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });
    if changed {
      info!(online, "Connectivity changed");
    }
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

impl Default for Connectivity {
  fn default() -> Self {
    Self::new(true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_subscribers_see_changes() {
    let connectivity = Connectivity::new(false);
    let mut rx = connectivity.subscribe();
    assert!(!connectivity.is_online());

    connectivity.set_online(true);
    rx.changed().await.unwrap();
    assert!(*rx.borrow_and_update());
    assert!(connectivity.is_online());
  }

  #[test]
  fn test_same_state_does_not_notify() {
    let connectivity = Connectivity::new(true);
    let rx = connectivity.subscribe();
    connectivity.set_online(true);
    assert!(!rx.has_changed().unwrap());
  }

  #[tokio::test]
  async fn test_clones_share_state() {
    let connectivity = Connectivity::new(true);
    let clone = connectivity.clone();
    let mut rx = connectivity.subscribe();

    clone.set_online(false);
    assert!(!connectivity.is_online());

    drop(connectivity);
    drop(clone);
    rx.borrow_and_update();
    assert!(rx.changed().await.is_err());
  }
}
