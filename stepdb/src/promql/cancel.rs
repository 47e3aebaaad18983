// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use crate::utils::sync::{Arc, AtomicCell};

/// A handle used to cancel a running query. Clones share the same state.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
  canceled: Arc<AtomicCell<bool>>,
}

impl CancellationToken {
  pub fn new() -> Self {
    Self::default()
  }

  /// Request cancellation. The query fails with Canceled at its next check.
  pub fn cancel(&self) {
    self.canceled.store(true);
  }

  pub fn is_canceled(&self) -> bool {
    self.canceled.load()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use crate::utils::sync::is_sync_send;

  #[test]
  fn test_cancel_is_shared() {
    is_sync_send::<CancellationToken>();

    let token = CancellationToken::new();
    let clone = token.clone();
    assert!(!token.is_canceled());

    std::thread::spawn(move || clone.cancel()).join().unwrap();
    assert!(token.is_canceled());
  }
}
