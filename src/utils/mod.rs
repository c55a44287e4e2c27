//! Building blocks shared by sessions, transactions and results: operation
//! timeouts, the wait-and-close resolver for protocol responses, the child
//! resource registry and copy-on-write listener lists.

pub mod closeable_set;
pub mod io;
pub mod listeners;
pub mod timeout;

pub use closeable_set::{ChildKey, Closeable, CloseableSet};
pub use listeners::ListenerList;
pub use timeout::OperationTimeout;

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide id sequence; ids start at 1 so that 0 can mean "not assigned".
#[derive(Debug)]
pub(crate) struct IdSequence(AtomicU64);

impl IdSequence {
  pub(crate) const fn new() -> Self {
    IdSequence(AtomicU64::new(0))
  }

  pub(crate) fn next(&self) -> u64 {
    self.0.fetch_add(1, Ordering::Relaxed) + 1
  }
}
