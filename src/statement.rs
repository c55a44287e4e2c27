//! Statement collaborators and the results they hand back.
//!
//! This crate never looks at SQL text or parameter encoding. A statement
//! implementation talks to the wire layer (usually through
//! [`Transaction::execute_low`]) and wraps what it gets back in a
//! [`StatementResult`] or a [`QueryResult`], which register themselves as
//! children of the transaction so that commit, rollback and close can release
//! them first.

use crate::config::TimeoutKey;
use crate::error::{TxError, TxResult};
use crate::tx::transaction::Transaction;
use crate::utils::io;
use crate::utils::{ChildKey, Closeable, CloseableSet, OperationTimeout};
use crate::wire::{BoxFuture, RecordCursor};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

// --- Collaborator traits ---

/// An update or DDL statement. `P` is the parameter type; `()` for unprepared statements.
pub trait SqlStatement<P: ?Sized = ()> {
  fn sql(&self) -> &str;

  fn execute(&self, transaction: &Transaction, parameter: &P) -> TxResult<StatementResult>;
}

/// A query producing records of type `Record`.
pub trait SqlQuery<P: ?Sized = ()> {
  type Record: Send + 'static;

  fn sql(&self) -> &str;

  fn execute(&self, transaction: &Transaction, parameter: &P) -> TxResult<QueryResult<Self::Record>>;
}

// --- Registration ---

/// Where a result is registered, so it can deregister on its own close.
struct Registration {
  owner: Weak<CloseableSet>,
  key: OnceCell<ChildKey>,
}

impl Registration {
  fn new(transaction: &Transaction) -> Self {
    Self {
      owner: Arc::downgrade(transaction.children()),
      key: OnceCell::new(),
    }
  }

  fn deregister(&self) {
    if let (Some(owner), Some(key)) = (self.owner.upgrade(), self.key.get()) {
      owner.remove(*key);
    }
  }
}

// --- Statement result ---

struct StatementSlot {
  future: Mutex<Option<BoxFuture<i64>>>,
  update_count: OnceCell<TxResult<i64>>,
  check_timeout: OperationTimeout,
  registration: Registration,
}

impl StatementSlot {
  fn release(&self) -> TxResult<()> {
    match self.future.lock().take() {
      Some(future) => future.close().map_err(|e| io::server_error(e, false)),
      None => Ok(()),
    }
  }
}

impl Closeable for StatementSlot {
  fn close(&self) -> TxResult<()> {
    self.release()
  }
}

/// Outcome of an update statement, resolved on demand.
pub struct StatementResult {
  slot: Arc<StatementSlot>,
}

impl StatementResult {
  /// Wraps the pending response of an update and registers it with `transaction`.
  pub fn new(transaction: &Transaction, future: BoxFuture<i64>) -> TxResult<Self> {
    let options = transaction.session_options().clone();
    OperationTimeout::new(options.clone(), TimeoutKey::ResultClose).apply(Some(&*future));

    let slot = Arc::new(StatementSlot {
      future: Mutex::new(Some(future)),
      update_count: OnceCell::new(),
      check_timeout: OperationTimeout::new(options, TimeoutKey::ResultCheck),
      registration: Registration::new(transaction),
    });
    let key = transaction.add_child(&slot)?;
    let _ = slot.registration.key.set(key);
    Ok(Self { slot })
  }

  pub fn set_check_timeout(&self, timeout: Duration) {
    self.slot.check_timeout.set(timeout);
  }

  /// Waits for the statement to finish and returns the count the server reported.
  ///
  /// The response is resolved and closed on the first call; later calls see the
  /// same outcome, failure included. The count is passed through unchanged,
  /// whatever the statement kind.
  pub fn update_count(&self) -> TxResult<i64> {
    self
      .slot
      .update_count
      .get_or_init(|| {
        let future = self.slot.future.lock().take();
        match future {
          Some(future) => io::get_and_close_future_in_transaction(future, &self.slot.check_timeout),
          None => Err(TxError::AlreadyClosed("statement result")),
        }
      })
      .clone()
  }

  /// Releases the response and deregisters from the transaction. Idempotent.
  pub fn close(&self) -> TxResult<()> {
    let result = self.slot.release();
    self.slot.registration.deregister();
    result
  }
}

impl Drop for StatementResult {
  fn drop(&mut self) {
    if let Err(e) = self.close() {
      log::error!("Implicit close of statement result failed: {}", e);
    }
  }
}

impl fmt::Debug for StatementResult {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StatementResult")
      .field("update_count", &self.slot.update_count.get())
      .finish_non_exhaustive()
  }
}

// --- Query result ---

struct QuerySlot<R> {
  cursor: Mutex<Option<Box<dyn RecordCursor<R>>>>,
  check_timeout: OperationTimeout,
  registration: Registration,
}

impl<R> QuerySlot<R> {
  fn release(&self) -> TxResult<()> {
    match self.cursor.lock().take() {
      Some(mut cursor) => cursor.close().map_err(|e| io::server_error(e, false)),
      None => Ok(()),
    }
  }
}

impl<R: Send + 'static> Closeable for QuerySlot<R> {
  fn close(&self) -> TxResult<()> {
    self.release()
  }
}

/// Records of a query, read one by one from the server.
pub struct QueryResult<R: Send + 'static> {
  slot: Arc<QuerySlot<R>>,
}

impl<R: Send + 'static> QueryResult<R> {
  /// Wraps an open cursor and registers it with `transaction`.
  pub fn new(transaction: &Transaction, cursor: Box<dyn RecordCursor<R>>) -> TxResult<Self> {
    let slot = Arc::new(QuerySlot {
      cursor: Mutex::new(Some(cursor)),
      check_timeout: OperationTimeout::new(transaction.session_options().clone(), TimeoutKey::ResultCheck),
      registration: Registration::new(transaction),
    });
    let key = transaction.add_child(&slot)?;
    let _ = slot.registration.key.set(key);
    Ok(Self { slot })
  }

  pub fn set_check_timeout(&self, timeout: Duration) {
    self.slot.check_timeout.set(timeout);
  }

  /// The next record, `None` once the cursor is exhausted.
  pub fn next_record(&self) -> TxResult<Option<R>> {
    let mut guard = self.slot.cursor.lock();
    let cursor = guard.as_mut().ok_or(TxError::AlreadyClosed("query result"))?;
    let timeout = self.slot.check_timeout.get();
    cursor
      .next_record(timeout)
      .map_err(|e| io::wait_error(e, true, TimeoutKey::ResultCheck, timeout))
  }

  pub fn for_each<F>(&self, mut action: F) -> TxResult<()>
  where
    F: FnMut(R) -> TxResult<()>,
  {
    while let Some(record) = self.next_record()? {
      action(record)?;
    }
    Ok(())
  }

  pub fn record_list(&self) -> TxResult<Vec<R>> {
    let mut records = Vec::new();
    self.for_each(|record| {
      records.push(record);
      Ok(())
    })?;
    Ok(records)
  }

  /// The first record; the rest are not read.
  pub fn find_record(&self) -> TxResult<Option<R>> {
    self.next_record()
  }

  /// Releases the cursor and deregisters from the transaction. Idempotent.
  pub fn close(&self) -> TxResult<()> {
    let result = self.slot.release();
    self.slot.registration.deregister();
    result
  }
}

impl<R: Send + 'static> Drop for QueryResult<R> {
  fn drop(&mut self) {
    if let Err(e) = self.close() {
      log::error!("Implicit close of query result failed: {}", e);
    }
  }
}

impl<R: Send + 'static> fmt::Debug for QueryResult<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueryResult")
      .field("open", &self.slot.cursor.lock().is_some())
      .finish_non_exhaustive()
  }
}
