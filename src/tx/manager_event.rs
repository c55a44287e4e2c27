//! Observers of a transaction manager run.

use super::transaction::Transaction;
use crate::error::TxError;
use crate::types::{CommitType, TxOption};

/// Receives the events of [`TransactionManager`](super::TransactionManager) runs.
/// Every method defaults to a no-op.
///
/// Per attempt, `transaction_start` fires once, followed either by the commit
/// events or by `transaction_exception` and then retry, retry-over or nothing.
#[allow(unused_variables)]
pub trait TmEventListener: Send + Sync {
  /// `option` is the option of attempt 0, `None` when the policy refused to run at all.
  fn execute_start(&self, tm_execute_id: u64, option: Option<&TxOption>) {}

  fn transaction_start(&self, transaction: &Transaction) {}

  fn transaction_exception(&self, transaction: &Transaction, error: &TxError) {}

  fn transaction_rollback_start(&self, transaction: &Transaction) {}

  fn transaction_rollback_end(&self, transaction: &Transaction, occurred: Option<&TxError>) {}

  fn transaction_retry(&self, transaction: &Transaction, error: &TxError, next_option: &TxOption) {}

  fn transaction_retry_over(&self, transaction: &Transaction, error: &TxError) {}

  fn transaction_before_commit(&self, transaction: &Transaction, commit_type: CommitType) {}

  fn transaction_commit_start(&self, transaction: &Transaction, commit_type: CommitType) {}

  fn transaction_commit_end(&self, transaction: &Transaction, commit_type: CommitType, occurred: Option<&TxError>) {}

  /// `committed` is false when the unit of work rolled the transaction back itself.
  fn execute_end_success(&self, tm_execute_id: u64, transaction: &Transaction, committed: bool) {}

  /// `transaction` is `None` when no attempt was started.
  fn execute_end_fail(
    &self,
    tm_execute_id: u64,
    option: Option<&TxOption>,
    transaction: Option<&Transaction>,
    error: &TxError,
  ) {
  }
}
