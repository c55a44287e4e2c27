use crate::error::{TxError, TxResult};

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Append-only listener list. Each notification iterates a snapshot, so adding
/// a listener from inside a callback is safe.
pub struct ListenerList<L: ?Sized> {
  inner: RwLock<Arc<Vec<Arc<L>>>>,
}

impl<L: ?Sized> Default for ListenerList<L> {
  fn default() -> Self {
    Self {
      inner: RwLock::new(Arc::new(Vec::new())),
    }
  }
}

impl<L: ?Sized> ListenerList<L> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&self, listener: Arc<L>) {
    let mut guard = self.inner.write();
    let mut next = Vec::with_capacity(guard.len() + 1);
    next.extend(guard.iter().cloned());
    next.push(listener);
    *guard = Arc::new(next);
  }

  pub fn snapshot(&self) -> Arc<Vec<Arc<L>>> {
    self.inner.read().clone()
  }

  pub fn is_empty(&self) -> bool {
    self.inner.read().is_empty()
  }

  pub fn len(&self) -> usize {
    self.inner.read().len()
  }

  /// Runs `action` for every listener. A failing listener does not stop its
  /// siblings; the failures come back aggregated.
  pub fn notify<F>(&self, mut action: F) -> TxResult<()>
  where
    F: FnMut(&L) -> TxResult<()>,
  {
    let snapshot = self.snapshot();
    if snapshot.is_empty() {
      return Ok(());
    }
    let failures: Vec<TxError> = snapshot.iter().filter_map(|l| action(l).err()).collect();
    match TxError::aggregate(None, failures) {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }
}

impl<L: ?Sized> fmt::Debug for ListenerList<L> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ListenerList").field("len", &self.len()).finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  trait Ping: Send + Sync {
    fn ping(&self) -> TxResult<()>;
  }

  struct Counting(AtomicUsize, bool);

  impl Ping for Counting {
    fn ping(&self) -> TxResult<()> {
      self.0.fetch_add(1, Ordering::SeqCst);
      if self.1 {
        Err(TxError::other("ping failed"))
      } else {
        Ok(())
      }
    }
  }

  #[test]
  fn failing_listener_does_not_block_siblings() {
    let list: ListenerList<dyn Ping> = ListenerList::new();
    let first = Arc::new(Counting(AtomicUsize::new(0), true));
    let second = Arc::new(Counting(AtomicUsize::new(0), true));
    let third = Arc::new(Counting(AtomicUsize::new(0), false));
    list.add(first.clone());
    list.add(second.clone());
    list.add(third.clone());

    let e = list.notify(|l| l.ping()).unwrap_err();
    assert_eq!(e.suppressed().len(), 1);
    assert_eq!(first.0.load(Ordering::SeqCst), 1);
    assert_eq!(second.0.load(Ordering::SeqCst), 1);
    assert_eq!(third.0.load(Ordering::SeqCst), 1);
  }
}
