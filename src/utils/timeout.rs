use crate::config::{SessionOptions, TimeoutKey};
use crate::wire::{ClosePolicy, CloseTimeout, ServerResource};

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The timeout of one operation kind.
///
/// The value is pulled from the session options the first time it is read and
/// cached from then on; `set` replaces it immediately.
pub struct OperationTimeout {
  options: Arc<SessionOptions>,
  key: TimeoutKey,
  value: Mutex<Option<Duration>>,
}

impl OperationTimeout {
  pub fn new(options: Arc<SessionOptions>, key: TimeoutKey) -> Self {
    Self {
      options,
      key,
      value: Mutex::new(None),
    }
  }

  pub fn key(&self) -> TimeoutKey {
    self.key
  }

  pub fn set(&self, timeout: Duration) {
    *self.value.lock() = Some(timeout);
  }

  pub fn get(&self) -> Duration {
    *self
      .value
      .lock()
      .get_or_insert_with(|| self.options.get_timeout(self.key))
  }

  /// Pushes the current value onto `target` as its close deadline. Nothing happens without a target.
  pub fn apply<R>(&self, target: Option<&R>)
  where
    R: ServerResource + ?Sized,
  {
    if let Some(target) = target {
      target.set_close_timeout(CloseTimeout {
        duration: self.get(),
        policy: ClosePolicy::Error,
      });
    }
  }
}

impl fmt::Debug for OperationTimeout {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("OperationTimeout")
      .field("key", &self.key)
      .field("value", &*self.value.lock())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::wire::WaitError;

  struct Recorder(Mutex<Vec<CloseTimeout>>);

  impl ServerResource for Recorder {
    fn set_close_timeout(&self, timeout: CloseTimeout) {
      self.0.lock().push(timeout);
    }

    fn close(&self) -> Result<(), WaitError> {
      Ok(())
    }
  }

  #[test]
  fn value_is_cached_after_first_read() {
    let options = Arc::new(SessionOptions::new().timeout(TimeoutKey::TransactionCommit, Duration::from_secs(2)));
    let timeout = OperationTimeout::new(options, TimeoutKey::TransactionCommit);
    assert_eq!(timeout.get(), Duration::from_secs(2));

    timeout.set(Duration::from_millis(10));
    assert_eq!(timeout.get(), Duration::from_millis(10));
  }

  #[test]
  fn apply_pushes_error_policy() {
    let options = Arc::new(SessionOptions::new().timeout(TimeoutKey::Default, Duration::from_secs(5)));
    let timeout = OperationTimeout::new(options, TimeoutKey::TransactionClose);
    let target = Recorder(Mutex::new(Vec::new()));

    timeout.apply::<Recorder>(None);
    timeout.apply(Some(&target));

    let pushed = target.0.lock();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].duration, Duration::from_secs(5));
    assert_eq!(pushed[0].policy, ClosePolicy::Error);
  }
}
