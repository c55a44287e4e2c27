//! Observers of a single transaction.

use super::transaction::Transaction;
use crate::error::{TxError, TxResult};
use crate::types::{CommitType, TxMethod};

use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

/// Receives lifecycle events of a transaction. Every method defaults to a no-op.
///
/// A failing callback never stops the other listeners; its failure is
/// suppressed onto whatever failure the transaction is already raising, or
/// raised on its own otherwise.
///
/// `low_transaction_get_start`/`_end` run while the begin handle is being
/// resolved; calling [`Transaction::low_transaction`] from them deadlocks.
/// Likewise `commit_*` and `rollback_*` run under the transaction's finish
/// lock, which is not reentrant: calling [`Transaction::commit`] or
/// [`Transaction::rollback`] from them deadlocks.
#[allow(unused_variables)]
pub trait TransactionEventListener: Send + Sync {
  fn low_transaction_get_start(&self, transaction: &Transaction) -> TxResult<()> {
    Ok(())
  }

  fn low_transaction_get_end(
    &self,
    transaction: &Transaction,
    transaction_id: Option<&str>,
    occurred: Option<&TxError>,
  ) -> TxResult<()> {
    Ok(())
  }

  fn execute_start(
    &self,
    transaction: &Transaction,
    method: TxMethod,
    tx_execute_id: u64,
    sql: &str,
    parameter: Option<&dyn Debug>,
  ) -> TxResult<()> {
    Ok(())
  }

  /// `result` is the value handed back to the caller, e.g. a `QueryResult<R>`, a `Vec<R>` or a count.
  fn execute_end(
    &self,
    transaction: &Transaction,
    method: TxMethod,
    tx_execute_id: u64,
    sql: &str,
    result: Option<&dyn Any>,
    occurred: Option<&TxError>,
  ) -> TxResult<()> {
    Ok(())
  }

  fn commit_start(&self, transaction: &Transaction, commit_type: CommitType) -> TxResult<()> {
    Ok(())
  }

  fn commit_end(&self, transaction: &Transaction, commit_type: CommitType, occurred: Option<&TxError>) -> TxResult<()> {
    Ok(())
  }

  fn rollback_start(&self, transaction: &Transaction) -> TxResult<()> {
    Ok(())
  }

  fn rollback_end(&self, transaction: &Transaction, occurred: Option<&TxError>) -> TxResult<()> {
    Ok(())
  }

  fn close_transaction(&self, transaction: &Transaction, occurred: Option<&TxError>) -> TxResult<()> {
    Ok(())
  }
}

// --- Single-callback adapters ---

enum Hook {
  BeforeCommit,
  Commit,
  Rollback,
}

struct CallbackListener<F> {
  hook: Hook,
  callback: F,
}

impl<F> TransactionEventListener for CallbackListener<F>
where
  F: Fn(&Transaction) -> TxResult<()> + Send + Sync,
{
  fn commit_start(&self, transaction: &Transaction, _commit_type: CommitType) -> TxResult<()> {
    match self.hook {
      Hook::BeforeCommit => (self.callback)(transaction),
      _ => Ok(()),
    }
  }

  fn commit_end(&self, transaction: &Transaction, _commit_type: CommitType, occurred: Option<&TxError>) -> TxResult<()> {
    match (&self.hook, occurred) {
      (Hook::Commit, None) => (self.callback)(transaction),
      _ => Ok(()),
    }
  }

  fn rollback_end(&self, transaction: &Transaction, occurred: Option<&TxError>) -> TxResult<()> {
    match (&self.hook, occurred) {
      (Hook::Rollback, None) => (self.callback)(transaction),
      _ => Ok(()),
    }
  }
}

/// Runs `callback` right before the commit request is issued.
///
/// The callback runs under the finish lock; it must not call
/// [`Transaction::commit`] or [`Transaction::rollback`] on the same transaction.
pub fn before_commit_listener<F>(callback: F) -> Arc<dyn TransactionEventListener>
where
  F: Fn(&Transaction) -> TxResult<()> + Send + Sync + 'static,
{
  Arc::new(CallbackListener {
    hook: Hook::BeforeCommit,
    callback,
  })
}

/// Runs `callback` after a successful commit, still under the finish lock.
pub fn commit_listener<F>(callback: F) -> Arc<dyn TransactionEventListener>
where
  F: Fn(&Transaction) -> TxResult<()> + Send + Sync + 'static,
{
  Arc::new(CallbackListener {
    hook: Hook::Commit,
    callback,
  })
}

/// Runs `callback` after a successful rollback, still under the finish lock.
pub fn rollback_listener<F>(callback: F) -> Arc<dyn TransactionEventListener>
where
  F: Fn(&Transaction) -> TxResult<()> + Send + Sync + 'static,
{
  Arc::new(CallbackListener {
    hook: Hook::Rollback,
    callback,
  })
}
