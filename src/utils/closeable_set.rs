use crate::error::{TxError, TxResult};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// A resource that can be force-closed by its owner.
pub trait Closeable: Send + Sync {
  fn close(&self) -> TxResult<()>;
}

/// Handle returned by [`CloseableSet::add`], used to deregister on normal close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChildKey(u64);

/// Child resources opened under an owner, closed in registration order.
///
/// Entries are held weakly: a child dropped by its user has already released
/// itself, so the set never keeps one alive.
#[derive(Default)]
pub struct CloseableSet {
  entries: Mutex<Vec<(ChildKey, Weak<dyn Closeable>)>>,
  next_key: AtomicU64,
}

impl CloseableSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add<C>(&self, child: &Arc<C>) -> ChildKey
  where
    C: Closeable + 'static,
  {
    let key = ChildKey(self.next_key.fetch_add(1, Ordering::Relaxed));
    let weak: Weak<C> = Arc::downgrade(child);
    let weak: Weak<dyn Closeable> = weak;
    self.entries.lock().push((key, weak));
    key
  }

  pub fn remove(&self, key: ChildKey) {
    self.entries.lock().retain(|(k, _)| *k != key);
  }

  pub fn len(&self) -> usize {
    self
      .entries
      .lock()
      .iter()
      .filter(|(_, weak)| weak.strong_count() > 0)
      .count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Closes every registered child and returns the failures instead of raising them.
  ///
  /// The set is emptied first, so children removing themselves while closing
  /// do not contend with this call.
  pub fn close(&self) -> Vec<TxError> {
    let entries = std::mem::take(&mut *self.entries.lock());
    entries
      .into_iter()
      .filter_map(|(_, weak)| weak.upgrade())
      .filter_map(|child| child.close().err())
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Child {
    name: &'static str,
    fail: bool,
    log: Arc<Mutex<Vec<&'static str>>>,
  }

  impl Closeable for Child {
    fn close(&self) -> TxResult<()> {
      self.log.lock().push(self.name);
      if self.fail {
        Err(TxError::other(self.name))
      } else {
        Ok(())
      }
    }
  }

  fn child(name: &'static str, fail: bool, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<Child> {
    Arc::new(Child {
      name,
      fail,
      log: log.clone(),
    })
  }

  #[test]
  fn closes_in_registration_order_collecting_failures() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let set = CloseableSet::new();
    let a = child("a", true, &log);
    let b = child("b", false, &log);
    let c = child("c", true, &log);
    set.add(&a);
    set.add(&b);
    set.add(&c);

    let failures = set.close();
    assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    assert_eq!(failures.len(), 2);
    assert!(set.is_empty());
  }

  #[test]
  fn removed_and_dropped_children_are_skipped() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let set = CloseableSet::new();
    let a = child("a", false, &log);
    let key = set.add(&a);
    {
      let dropped = child("dropped", false, &log);
      set.add(&dropped);
    }
    set.remove(key);

    assert!(set.close().is_empty());
    assert!(log.lock().is_empty());
  }
}
