//! Provides `Session`, the entry point that creates transactions and transaction managers.

use crate::config::SessionOptions;
use crate::error::{TxError, TxResult};
use crate::tx::event::TransactionEventListener;
use crate::tx::manager::{TmSetting, TransactionManager};
use crate::tx::transaction::Transaction;
use crate::types::TxOption;
use crate::utils::io;
use crate::utils::{ChildKey, CloseableSet, ListenerList};
use crate::wire::SqlClient;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct SessionInner {
  client: Arc<dyn SqlClient>,
  options: Arc<SessionOptions>,
  children: CloseableSet,
  tx_listeners: ListenerList<dyn TransactionEventListener>,
  closed: AtomicBool,
}

/// A logical connection to the server. Cheap to clone; clones share state.
///
/// Transactions created here are tracked until they close, and closing the
/// session closes every transaction still open.
#[derive(Clone)]
pub struct Session {
  inner: Arc<SessionInner>,
}

impl Session {
  pub fn new(client: Arc<dyn SqlClient>, options: SessionOptions) -> Self {
    log::debug!("session open. label={:?}", options.label);
    Self {
      inner: Arc::new(SessionInner {
        client,
        options: Arc::new(options),
        children: CloseableSet::new(),
        tx_listeners: ListenerList::new(),
        closed: AtomicBool::new(false),
      }),
    }
  }

  pub fn options(&self) -> &Arc<SessionOptions> {
    &self.inner.options
  }

  pub fn label(&self) -> Option<&str> {
    self.inner.options.label.as_deref()
  }

  /// Installs `listener` on every transaction created from now on.
  pub fn add_transaction_listener(&self, listener: Arc<dyn TransactionEventListener>) -> &Self {
    self.inner.tx_listeners.add(listener);
    self
  }

  /// Sends the begin request and returns without waiting for it.
  pub fn create_transaction(&self, option: TxOption) -> TxResult<Arc<Transaction>> {
    self.check_close()?;
    let begin = self
      .inner
      .client
      .create_transaction(&option)
      .map_err(|e| io::server_error(e, false))?;

    let transaction = Transaction::new(self.clone(), begin, option);
    for listener in self.inner.tx_listeners.snapshot().iter() {
      transaction.add_event_listener(listener.clone());
    }
    let key = self.inner.children.add(&transaction);
    transaction.set_session_key(key);
    log::trace!("transaction created. {}", transaction);

    if self.is_closed() {
      // Lost a race with close(); the set may already have been drained.
      let e = TxError::AlreadyClosed("session");
      return match transaction.close() {
        Ok(()) => Err(e),
        Err(close_error) => Err(e.with_suppressed(close_error)),
      };
    }
    Ok(transaction)
  }

  /// A manager without a default setting; use [`TransactionManager::execute_with`].
  pub fn create_transaction_manager(&self) -> TransactionManager {
    TransactionManager::new(self.clone(), None)
  }

  pub fn create_transaction_manager_with(&self, setting: TmSetting) -> TransactionManager {
    TransactionManager::new(self.clone(), Some(setting))
  }

  pub(crate) fn remove_child(&self, key: ChildKey) {
    self.inner.children.remove(key);
  }

  /// Number of transactions created here and not yet closed.
  pub fn open_transactions(&self) -> usize {
    self.inner.children.len()
  }

  /// Closes every open transaction. Only the first call does any work.
  pub fn close(&self) -> TxResult<()> {
    if self.inner.closed.swap(true, Ordering::SeqCst) {
      return Ok(());
    }
    log::debug!("session close. open_transactions={}", self.open_transactions());
    match TxError::aggregate(None, self.inner.children.close()) {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }

  pub fn is_closed(&self) -> bool {
    self.inner.closed.load(Ordering::SeqCst)
  }

  fn check_close(&self) -> TxResult<()> {
    if self.is_closed() {
      Err(TxError::AlreadyClosed("session"))
    } else {
      Ok(())
    }
  }
}

impl fmt::Debug for Session {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Session")
      .field("options", &self.inner.options)
      .field("open_transactions", &self.open_transactions())
      .field("closed", &self.is_closed())
      .finish()
  }
}
