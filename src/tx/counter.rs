//! Aggregate statistics over transaction manager runs.

use super::manager_event::TmEventListener;
use super::transaction::Transaction;
use crate::error::TxError;
use crate::types::{CommitType, TxOption};

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Add;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Live counters, updated atomically.
#[derive(Debug, Default)]
pub struct TmCountAtomic {
  execute: AtomicU64,
  transaction: AtomicU64,
  exception: AtomicU64,
  retry: AtomicU64,
  retry_over: AtomicU64,
  before_commit: AtomicU64,
  commit: AtomicU64,
  rollback: AtomicU64,
  success_commit: AtomicU64,
  success_rollback: AtomicU64,
  fail: AtomicU64,
}

macro_rules! increments {
  ($($name:ident => $field:ident),* $(,)?) => {
    $(
      pub fn $name(&self) {
        self.$field.fetch_add(1, Ordering::Relaxed);
      }
    )*
  };
}

impl TmCountAtomic {
  pub fn new() -> Self {
    Self::default()
  }

  increments! {
    increment_execute_count => execute,
    increment_transaction_count => transaction,
    increment_exception_count => exception,
    increment_retry_count => retry,
    increment_retry_over_count => retry_over,
    increment_before_commit_count => before_commit,
    increment_commit_count => commit,
    increment_rollback_count => rollback,
    increment_success_commit_count => success_commit,
    increment_success_rollback_count => success_rollback,
    increment_fail_count => fail,
  }

  /// Point-in-time snapshot. Counters are read one by one, not as a unit.
  pub fn count(&self) -> TmCount {
    let read = |c: &AtomicU64| c.load(Ordering::Relaxed);
    TmCount {
      execute_count: read(&self.execute),
      transaction_count: read(&self.transaction),
      exception_count: read(&self.exception),
      retry_count: read(&self.retry),
      retry_over_count: read(&self.retry_over),
      before_commit_count: read(&self.before_commit),
      commit_count: read(&self.commit),
      rollback_count: read(&self.rollback),
      success_commit_count: read(&self.success_commit),
      success_rollback_count: read(&self.success_rollback),
      fail_count: read(&self.fail),
    }
  }
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TmCount {
  /// Manager runs started.
  pub execute_count: u64,
  /// Attempts, i.e. transactions created.
  pub transaction_count: u64,
  pub exception_count: u64,
  pub retry_count: u64,
  pub retry_over_count: u64,
  pub before_commit_count: u64,
  /// Commit requests issued.
  pub commit_count: u64,
  /// Rollback requests issued by the manager after a failed attempt.
  pub rollback_count: u64,
  pub success_commit_count: u64,
  /// Runs that ended successfully because the unit of work rolled back itself.
  pub success_rollback_count: u64,
  pub fail_count: u64,
}

impl TmCount {
  pub fn success_count(&self) -> u64 {
    self.success_commit_count + self.success_rollback_count
  }

  pub fn sum<I>(counts: I) -> TmCount
  where
    I: IntoIterator<Item = TmCount>,
  {
    counts.into_iter().fold(TmCount::default(), Add::add)
  }
}

impl Add for TmCount {
  type Output = TmCount;

  fn add(self, rhs: TmCount) -> TmCount {
    TmCount {
      execute_count: self.execute_count + rhs.execute_count,
      transaction_count: self.transaction_count + rhs.transaction_count,
      exception_count: self.exception_count + rhs.exception_count,
      retry_count: self.retry_count + rhs.retry_count,
      retry_over_count: self.retry_over_count + rhs.retry_over_count,
      before_commit_count: self.before_commit_count + rhs.before_commit_count,
      commit_count: self.commit_count + rhs.commit_count,
      rollback_count: self.rollback_count + rhs.rollback_count,
      success_commit_count: self.success_commit_count + rhs.success_commit_count,
      success_rollback_count: self.success_rollback_count + rhs.success_rollback_count,
      fail_count: self.fail_count + rhs.fail_count,
    }
  }
}

impl fmt::Display for TmCount {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "[execute_count={}, transaction_count={}, exception_count={}, retry_count={}, retry_over_count={}, \
       before_commit_count={}, commit_count={}, rollback_count={}, success_commit_count={}, \
       success_rollback_count={}, fail_count={}]",
      self.execute_count,
      self.transaction_count,
      self.exception_count,
      self.retry_count,
      self.retry_over_count,
      self.before_commit_count,
      self.commit_count,
      self.rollback_count,
      self.success_commit_count,
      self.success_rollback_count,
      self.fail_count
    )
  }
}

// --- Listeners ---

/// Feeds the manager events into counters chosen per event.
trait CountSink {
  fn for_option(&self, option: Option<&TxOption>) -> Arc<TmCountAtomic>;
}

fn on_execute_end(sink: &impl CountSink, transaction: &Transaction, committed: bool) {
  let count = sink.for_option(Some(transaction.option()));
  if committed {
    count.increment_success_commit_count();
  } else {
    count.increment_success_rollback_count();
  }
}

/// Counts every run into a single set of counters.
#[derive(Debug, Default)]
pub struct TmSimpleCounter {
  count: Arc<TmCountAtomic>,
}

impl TmSimpleCounter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn count(&self) -> TmCount {
    self.count.count()
  }
}

impl CountSink for TmSimpleCounter {
  fn for_option(&self, _option: Option<&TxOption>) -> Arc<TmCountAtomic> {
    self.count.clone()
  }
}

/// Counts per transaction-option label. Unlabelled options count under `""`.
///
/// A run is counted under the label of the option of the attempt the event
/// belongs to, so a run escalating from one label to another shows up under both.
#[derive(Debug, Default)]
pub struct TmLabelCounter {
  counts: RwLock<BTreeMap<String, Arc<TmCountAtomic>>>,
}

impl TmLabelCounter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn find_count(&self, label: &str) -> Option<TmCount> {
    self.counts.read().get(label).map(|c| c.count())
  }

  /// Snapshot of every label seen so far, sorted by label.
  pub fn counts(&self) -> BTreeMap<String, TmCount> {
    self
      .counts
      .read()
      .iter()
      .map(|(label, count)| (label.clone(), count.count()))
      .collect()
  }

  pub fn total(&self) -> TmCount {
    TmCount::sum(self.counts().into_values())
  }
}

impl CountSink for TmLabelCounter {
  fn for_option(&self, option: Option<&TxOption>) -> Arc<TmCountAtomic> {
    let label = option.and_then(TxOption::label_str).unwrap_or("");
    if let Some(count) = self.counts.read().get(label) {
      return count.clone();
    }
    self.counts.write().entry(label.to_string()).or_default().clone()
  }
}

macro_rules! counting_listener {
  ($type:ty) => {
    impl TmEventListener for $type {
      fn execute_start(&self, _tm_execute_id: u64, option: Option<&TxOption>) {
        self.for_option(option).increment_execute_count();
      }

      fn transaction_start(&self, transaction: &Transaction) {
        self.for_option(Some(transaction.option())).increment_transaction_count();
      }

      fn transaction_exception(&self, transaction: &Transaction, _error: &TxError) {
        self.for_option(Some(transaction.option())).increment_exception_count();
      }

      fn transaction_rollback_start(&self, transaction: &Transaction) {
        self.for_option(Some(transaction.option())).increment_rollback_count();
      }

      fn transaction_retry(&self, transaction: &Transaction, _error: &TxError, _next_option: &TxOption) {
        self.for_option(Some(transaction.option())).increment_retry_count();
      }

      fn transaction_retry_over(&self, transaction: &Transaction, _error: &TxError) {
        self.for_option(Some(transaction.option())).increment_retry_over_count();
      }

      fn transaction_before_commit(&self, transaction: &Transaction, _commit_type: CommitType) {
        self.for_option(Some(transaction.option())).increment_before_commit_count();
      }

      fn transaction_commit_start(&self, transaction: &Transaction, _commit_type: CommitType) {
        self.for_option(Some(transaction.option())).increment_commit_count();
      }

      fn execute_end_success(&self, _tm_execute_id: u64, transaction: &Transaction, committed: bool) {
        on_execute_end(self, transaction, committed);
      }

      fn execute_end_fail(
        &self,
        _tm_execute_id: u64,
        option: Option<&TxOption>,
        transaction: Option<&Transaction>,
        _error: &TxError,
      ) {
        let option = transaction.map(Transaction::option).or(option);
        self.for_option(option).increment_fail_count();
      }
    }
  };
}

counting_listener!(TmSimpleCounter);
counting_listener!(TmLabelCounter);

#[cfg(test)]
mod tests {
  use super::*;

  fn bump(f: impl Fn(), times: usize) {
    for _ in 0..times {
      f();
    }
  }

  #[test]
  fn sum_and_display() {
    let a = TmCountAtomic::new();
    bump(|| a.increment_execute_count(), 1);
    bump(|| a.increment_transaction_count(), 2);
    bump(|| a.increment_exception_count(), 3);
    bump(|| a.increment_retry_count(), 4);
    bump(|| a.increment_retry_over_count(), 5);
    bump(|| a.increment_before_commit_count(), 6);
    bump(|| a.increment_commit_count(), 7);
    bump(|| a.increment_rollback_count(), 8);
    bump(|| a.increment_success_commit_count(), 9);
    bump(|| a.increment_success_rollback_count(), 10);
    bump(|| a.increment_fail_count(), 11);
    let b = TmCountAtomic::new();
    bump(|| b.increment_execute_count(), 11);
    bump(|| b.increment_success_commit_count(), 19);
    bump(|| b.increment_fail_count(), 21);

    let total = TmCount::sum([a.count(), b.count()]);
    assert_eq!(total.execute_count, 12);
    assert_eq!(total.success_commit_count, 28);
    assert_eq!(total.success_count(), 38);
    assert_eq!(total.fail_count, 32);
    assert_eq!(
      total.to_string(),
      "[execute_count=12, transaction_count=2, exception_count=3, retry_count=4, retry_over_count=5, \
       before_commit_count=6, commit_count=7, rollback_count=8, success_commit_count=28, \
       success_rollback_count=10, fail_count=32]"
    );
  }

  #[test]
  fn label_counter_groups_unlabelled_under_empty() {
    let counter = TmLabelCounter::new();
    counter.execute_start(1, Some(&TxOption::occ().label("batch")));
    counter.execute_start(2, Some(&TxOption::occ()));
    counter.execute_start(3, None);

    assert_eq!(counter.find_count("batch").map(|c| c.execute_count), Some(1));
    assert_eq!(counter.find_count("").map(|c| c.execute_count), Some(2));
    assert_eq!(counter.find_count("missing"), None);
    assert_eq!(counter.total().execute_count, 3);
  }
}
