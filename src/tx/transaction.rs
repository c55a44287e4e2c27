//! Provides the `Transaction` struct, which owns one server-side transaction
//! from lazy begin through commit or rollback to close.

use super::event::TransactionEventListener;
use super::manager::TransactionManager;
use crate::config::{SessionOptions, TimeoutKey};
use crate::error::{TxError, TxErrorContext, TxResult, TxResultExt};
use crate::session::Session;
use crate::statement::{QueryResult, SqlQuery, SqlStatement, StatementResult};
use crate::types::{CommitType, TxMethod, TxOption};
use crate::utils::io::{self, close_children_then};
use crate::utils::{ChildKey, Closeable, CloseableSet, IdSequence, ListenerList, OperationTimeout};
use crate::wire::{BoxFuture, LowTransaction, WaitError};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

static TRANSACTION_IDS: IdSequence = IdSequence::new();
static TX_EXECUTE_IDS: IdSequence = IdSequence::new();

/// Set when a transaction manager created the transaction.
struct TxOwner {
  manager: TransactionManager,
  tm_execute_id: u64,
  attempt: usize,
}

/// Begin handle and its resolution. Resolved at most once.
#[derive(Default)]
struct LowState {
  begin_future: Option<BoxFuture<Arc<dyn LowTransaction>>>,
  low_transaction: Option<Arc<dyn LowTransaction>>,
  failure: Option<TxError>,
}

/// One server-side transaction.
///
/// Obtain an instance via [`Session::create_transaction`] or let a
/// [`TransactionManager`] drive it. The begin request is already in flight at
/// creation; it is awaited the first time the server transaction is needed.
///
/// Finish with [`commit`](Self::commit) or [`rollback`](Self::rollback), then
/// [`close`](Self::close). Closing an unfinished transaction abandons it and
/// leaves the cleanup to the server. Dropping an unclosed transaction closes it.
///
/// Commit, rollback and begin resolution are mutually exclusive per instance.
/// The `execute_*` family is not: do not run statements on one transaction
/// from several threads at once.
pub struct Transaction {
  tx_id: u64,
  session: Session,
  option: TxOption,
  owner: OnceCell<TxOwner>,
  session_key: OnceCell<ChildKey>,
  transaction_id: OnceCell<String>,
  low: Mutex<LowState>,
  finish_lock: Mutex<()>,
  committed: AtomicBool,
  rolled_back: AtomicBool,
  closed: AtomicBool,
  begin_timeout: OperationTimeout,
  commit_timeout: OperationTimeout,
  rollback_timeout: OperationTimeout,
  close_timeout: OperationTimeout,
  listeners: ListenerList<dyn TransactionEventListener>,
  children: Arc<CloseableSet>,
}

impl Transaction {
  pub(crate) fn new(session: Session, begin_future: BoxFuture<Arc<dyn LowTransaction>>, option: TxOption) -> Arc<Self> {
    let options = session.options().clone();
    let close_timeout = OperationTimeout::new(options.clone(), TimeoutKey::TransactionClose);
    close_timeout.apply(Some(&*begin_future));

    Arc::new(Transaction {
      tx_id: TRANSACTION_IDS.next(),
      option,
      owner: OnceCell::new(),
      session_key: OnceCell::new(),
      transaction_id: OnceCell::new(),
      low: Mutex::new(LowState {
        begin_future: Some(begin_future),
        ..Default::default()
      }),
      finish_lock: Mutex::new(()),
      committed: AtomicBool::new(false),
      rolled_back: AtomicBool::new(false),
      closed: AtomicBool::new(false),
      begin_timeout: OperationTimeout::new(options.clone(), TimeoutKey::TransactionBegin),
      commit_timeout: OperationTimeout::new(options.clone(), TimeoutKey::TransactionCommit),
      rollback_timeout: OperationTimeout::new(options, TimeoutKey::TransactionRollback),
      close_timeout,
      listeners: ListenerList::new(),
      children: Arc::new(CloseableSet::new()),
      session,
    })
  }

  pub(crate) fn set_session_key(&self, key: ChildKey) {
    let _ = self.session_key.set(key);
  }

  // --- Identity ---

  /// Process-local id, assigned at construction.
  pub fn tx_id(&self) -> u64 {
    self.tx_id
  }

  pub fn session(&self) -> &Session {
    &self.session
  }

  pub fn session_options(&self) -> &Arc<SessionOptions> {
    self.session.options()
  }

  pub fn option(&self) -> &TxOption {
    &self.option
  }

  /// Records the manager run this transaction belongs to. Only the first call has an effect.
  pub fn set_owner(&self, manager: TransactionManager, tm_execute_id: u64, attempt: usize) {
    let _ = self.owner.set(TxOwner {
      manager,
      tm_execute_id,
      attempt,
    });
  }

  /// The owning manager, `None` if this transaction was not created by one.
  pub fn transaction_manager(&self) -> Option<&TransactionManager> {
    self.owner.get().map(|o| &o.manager)
  }

  /// Manager execution id, 0 if this transaction was not created by a manager.
  pub fn tm_execute_id(&self) -> u64 {
    self.owner.get().map_or(0, |o| o.tm_execute_id)
  }

  /// 0-based attempt number, 0 if this transaction was not created by a manager.
  pub fn attempt(&self) -> usize {
    self.owner.get().map_or(0, |o| o.attempt)
  }

  /// Server transaction id, resolving the begin request if necessary.
  pub fn transaction_id(&self) -> TxResult<String> {
    if let Some(id) = self.transaction_id.get() {
      return Ok(id.clone());
    }
    let low = self.low_transaction()?;
    Ok(self.transaction_id.get_or_init(|| low.transaction_id()).clone())
  }

  /// Server transaction id if the begin request has completed.
  pub fn known_transaction_id(&self) -> Option<&str> {
    self.transaction_id.get().map(String::as_str)
  }

  pub(crate) fn error_context(&self) -> TxErrorContext {
    TxErrorContext {
      tx_id: self.tx_id,
      transaction_id: self.transaction_id.get().cloned(),
      tm_execute_id: self.tm_execute_id(),
      attempt: self.attempt(),
      option: self.option.clone(),
    }
  }

  // --- Timeouts ---

  pub fn set_begin_timeout(&self, timeout: std::time::Duration) {
    self.begin_timeout.set(timeout);
  }

  pub fn set_commit_timeout(&self, timeout: std::time::Duration) {
    self.commit_timeout.set(timeout);
  }

  pub fn set_rollback_timeout(&self, timeout: std::time::Duration) {
    self.rollback_timeout.set(timeout);
  }

  /// Also pushed onto the pending begin request and the begun transaction.
  pub fn set_close_timeout(&self, timeout: std::time::Duration) {
    self.close_timeout.set(timeout);
    let low = self.low.lock();
    self.close_timeout.apply(low.begin_future.as_deref());
    self.close_timeout.apply(low.low_transaction.as_deref());
  }

  // --- Listeners ---

  pub fn add_event_listener(&self, listener: Arc<dyn TransactionEventListener>) -> &Self {
    self.listeners.add(listener);
    self
  }

  // --- Begin ---

  /// The begun server transaction, awaiting the begin request on first use.
  ///
  /// A failed begin is cached and returned again on every later call; it is never retried.
  pub fn low_transaction(&self) -> TxResult<Arc<dyn LowTransaction>> {
    let mut low = self.low.lock();
    if let Some(low_transaction) = &low.low_transaction {
      return Ok(low_transaction.clone());
    }
    if let Some(e) = &low.failure {
      return Err(e.clone());
    }
    self.check_close()?;

    log::trace!("low transaction get start. tx_id={}", self.tx_id);
    self.listeners.notify(|l| l.low_transaction_get_start(self))?;

    let future = low.begin_future.take().ok_or(TxError::AlreadyClosed("transaction"))?;
    let low_transaction = match io::get_and_close_future(future, &self.begin_timeout) {
      Ok(low_transaction) => low_transaction,
      Err(e) => {
        low.failure = Some(e.clone());
        let notified = self.listeners.notify(|l| l.low_transaction_get_end(self, None, Some(&e)));
        let failed: TxResult<Arc<dyn LowTransaction>> = Err(e);
        return failed.finally_with(|| notified);
      }
    };
    log::trace!("low transaction get end. tx_id={}", self.tx_id);

    self.close_timeout.apply(Some(&*low_transaction));
    let transaction_id = self.transaction_id.get_or_init(|| low_transaction.transaction_id());
    low.low_transaction = Some(low_transaction.clone());

    self
      .listeners
      .notify(|l| l.low_transaction_get_end(self, Some(transaction_id.as_str()), None))?;
    Ok(low_transaction)
  }

  /// Best-effort check: `false` once closed or when the begin request failed.
  pub fn available(&self) -> bool {
    if self.is_closed() {
      return false;
    }
    match self.low_transaction() {
      Ok(_) => true,
      Err(e) => {
        log::debug!("transaction {} unavailable: {}", self.tx_id, e);
        false
      }
    }
  }

  /// Runs `task` against the begun server transaction. Used by statement implementations.
  pub fn execute_low<R, F>(&self, task: F) -> TxResult<R>
  where
    F: FnOnce(&dyn LowTransaction) -> TxResult<R>,
  {
    self.check_close()?;
    let low = self.low_transaction()?;
    task(&*low)
  }

  // --- Execute ---

  fn execute_observed<T, F>(&self, method: TxMethod, sql: &str, parameter: Option<&dyn Debug>, body: F) -> TxResult<T>
  where
    T: Any,
    F: FnOnce() -> TxResult<T>,
  {
    let tx_execute_id = TX_EXECUTE_IDS.next();
    self
      .listeners
      .notify(|l| l.execute_start(self, method, tx_execute_id, sql, parameter))?;

    let mut result = body();
    if let Err(e) = &mut result {
      e.set_tx_method(method, tx_execute_id);
      e.attach_context(|| self.error_context());
    }

    let notified = match &result {
      Ok(value) => self
        .listeners
        .notify(|l| l.execute_end(self, method, tx_execute_id, sql, Some(value as &dyn Any), None)),
      Err(e) => self
        .listeners
        .notify(|l| l.execute_end(self, method, tx_execute_id, sql, None, Some(e))),
    };
    result.finally_with(|| notified)
  }

  pub fn execute_query<Q>(&self, ps: &Q) -> TxResult<QueryResult<Q::Record>>
  where
    Q: SqlQuery,
  {
    self.execute_observed(TxMethod::ExecuteQuery, ps.sql(), None, || ps.execute(self, &()))
  }

  pub fn execute_query_with<P, Q>(&self, ps: &Q, parameter: &P) -> TxResult<QueryResult<Q::Record>>
  where
    P: Debug,
    Q: SqlQuery<P>,
  {
    self.execute_observed(TxMethod::ExecuteQuery, ps.sql(), Some(parameter as &dyn Debug), || {
      ps.execute(self, parameter)
    })
  }

  pub fn execute_statement<S>(&self, ps: &S) -> TxResult<StatementResult>
  where
    S: SqlStatement,
  {
    self.execute_observed(TxMethod::ExecuteStatement, ps.sql(), None, || ps.execute(self, &()))
  }

  pub fn execute_statement_with<P, S>(&self, ps: &S, parameter: &P) -> TxResult<StatementResult>
  where
    P: Debug,
    S: SqlStatement<P>,
  {
    self.execute_observed(TxMethod::ExecuteStatement, ps.sql(), Some(parameter as &dyn Debug), || {
      ps.execute(self, parameter)
    })
  }

  pub fn execute_and_for_each<Q, A>(&self, ps: &Q, action: A) -> TxResult<()>
  where
    Q: SqlQuery,
    A: FnMut(Q::Record) -> TxResult<()>,
  {
    self.execute_observed(TxMethod::ExecuteForEach, ps.sql(), None, || {
      let rs = ps.execute(self, &())?;
      rs.for_each(action).finally_with(|| rs.close())
    })
  }

  pub fn execute_and_for_each_with<P, Q, A>(&self, ps: &Q, parameter: &P, action: A) -> TxResult<()>
  where
    P: Debug,
    Q: SqlQuery<P>,
    A: FnMut(Q::Record) -> TxResult<()>,
  {
    self.execute_observed(TxMethod::ExecuteForEach, ps.sql(), Some(parameter as &dyn Debug), || {
      let rs = ps.execute(self, parameter)?;
      rs.for_each(action).finally_with(|| rs.close())
    })
  }

  pub fn execute_and_get_list<Q>(&self, ps: &Q) -> TxResult<Vec<Q::Record>>
  where
    Q: SqlQuery,
  {
    self.execute_observed(TxMethod::ExecuteGetList, ps.sql(), None, || {
      let rs = ps.execute(self, &())?;
      rs.record_list().finally_with(|| rs.close())
    })
  }

  pub fn execute_and_get_list_with<P, Q>(&self, ps: &Q, parameter: &P) -> TxResult<Vec<Q::Record>>
  where
    P: Debug,
    Q: SqlQuery<P>,
  {
    self.execute_observed(TxMethod::ExecuteGetList, ps.sql(), Some(parameter as &dyn Debug), || {
      let rs = ps.execute(self, parameter)?;
      rs.record_list().finally_with(|| rs.close())
    })
  }

  pub fn execute_and_find_record<Q>(&self, ps: &Q) -> TxResult<Option<Q::Record>>
  where
    Q: SqlQuery,
  {
    self.execute_observed(TxMethod::ExecuteFindRecord, ps.sql(), None, || {
      let rs = ps.execute(self, &())?;
      rs.find_record().finally_with(|| rs.close())
    })
  }

  pub fn execute_and_find_record_with<P, Q>(&self, ps: &Q, parameter: &P) -> TxResult<Option<Q::Record>>
  where
    P: Debug,
    Q: SqlQuery<P>,
  {
    self.execute_observed(TxMethod::ExecuteFindRecord, ps.sql(), Some(parameter as &dyn Debug), || {
      let rs = ps.execute(self, parameter)?;
      rs.find_record().finally_with(|| rs.close())
    })
  }

  /// Returns the update count exactly as the statement result reports it.
  pub fn execute_and_get_count<S>(&self, ps: &S) -> TxResult<i64>
  where
    S: SqlStatement,
  {
    self.execute_observed(TxMethod::ExecuteGetCount, ps.sql(), None, || {
      let rs = ps.execute(self, &())?;
      rs.update_count().finally_with(|| rs.close())
    })
  }

  pub fn execute_and_get_count_with<P, S>(&self, ps: &S, parameter: &P) -> TxResult<i64>
  where
    P: Debug,
    S: SqlStatement<P>,
  {
    self.execute_observed(TxMethod::ExecuteGetCount, ps.sql(), Some(parameter as &dyn Debug), || {
      let rs = ps.execute(self, parameter)?;
      rs.update_count().finally_with(|| rs.close())
    })
  }

  // --- Commit / Rollback ---

  /// Commits the transaction. A second commit is a no-op; commit after rollback is an illegal state.
  ///
  /// Open results are closed first. Their close failures never prevent the
  /// commit request and are reported after it.
  pub fn commit(&self, commit_type: CommitType) -> TxResult<()> {
    self.check_close()?;
    let _finishing = self.finish_lock.lock();
    if self.committed.load(Ordering::SeqCst) {
      return Ok(());
    }
    if self.rolled_back.load(Ordering::SeqCst) {
      return Err(TxError::IllegalState("rollback has already been called".to_string()));
    }

    log::trace!("transaction commit start. tx_id={}, commit_type={:?}", self.tx_id, commit_type);
    self.listeners.notify(|l| l.commit_start(self, commit_type))?;

    let mut result = close_children_then(&self.children, || {
      self.finish(|low| low.commit(commit_type), &self.commit_timeout)?;
      self.committed.store(true, Ordering::SeqCst);
      Ok(())
    });
    if let Err(e) = &mut result {
      e.set_tx_method(TxMethod::Commit, 0);
      e.attach_context(|| self.error_context());
    }

    let notified = self
      .listeners
      .notify(|l| l.commit_end(self, commit_type, result.as_ref().err()));
    log::trace!("transaction commit end. tx_id={}", self.tx_id);
    result.finally_with(|| notified)
  }

  /// Rolls the transaction back. A no-op once committed or rolled back.
  pub fn rollback(&self) -> TxResult<()> {
    self.check_close()?;
    let _finishing = self.finish_lock.lock();
    if self.committed.load(Ordering::SeqCst) || self.rolled_back.load(Ordering::SeqCst) {
      return Ok(());
    }

    log::trace!("transaction rollback start. tx_id={}", self.tx_id);
    self.listeners.notify(|l| l.rollback_start(self))?;

    let mut result = close_children_then(&self.children, || {
      self.finish(|low| low.rollback(), &self.rollback_timeout)?;
      self.rolled_back.store(true, Ordering::SeqCst);
      Ok(())
    });
    if let Err(e) = &mut result {
      e.set_tx_method(TxMethod::Rollback, 0);
      e.attach_context(|| self.error_context());
    }

    let notified = self.listeners.notify(|l| l.rollback_end(self, result.as_ref().err()));
    log::trace!("transaction rollback end. tx_id={}", self.tx_id);
    result.finally_with(|| notified)
  }

  fn finish<F>(&self, finisher: F, timeout: &OperationTimeout) -> TxResult<()>
  where
    F: FnOnce(&dyn LowTransaction) -> Result<BoxFuture<()>, WaitError>,
  {
    let low = self.low_transaction()?;
    let future = finisher(&*low).map_err(|e| io::server_error(e, true))?;
    self.close_timeout.apply(Some(&*future));
    io::get_and_close_future_in_transaction(future, timeout)
  }

  pub fn is_committed(&self) -> bool {
    self.committed.load(Ordering::SeqCst)
  }

  pub fn is_rolled_back(&self) -> bool {
    self.rolled_back.load(Ordering::SeqCst)
  }

  // --- Children ---

  /// Registers a resource to be closed before commit, rollback and close.
  pub fn add_child<C>(&self, child: &Arc<C>) -> TxResult<ChildKey>
  where
    C: Closeable + 'static,
  {
    self.check_close()?;
    Ok(self.children.add(child))
  }

  pub fn remove_child(&self, key: ChildKey) {
    self.children.remove(key);
  }

  pub(crate) fn children(&self) -> &Arc<CloseableSet> {
    &self.children
  }

  // --- Close ---

  /// Releases the transaction. Only the first call does any work.
  ///
  /// The closed flag is raised before anything else so that other threads
  /// observe it while teardown is still running. Children, the begin request,
  /// the begun transaction and the session registration are all released even
  /// if some of them fail; the failures are reported together.
  pub fn close(&self) -> TxResult<()> {
    if self.closed.swap(true, Ordering::SeqCst) {
      return Ok(());
    }
    log::trace!(
      "transaction close start. tx_id={}, committed={}, rolled_back={}",
      self.tx_id,
      self.is_committed(),
      self.is_rolled_back()
    );

    let result = close_children_then(&self.children, || {
      let (low_transaction, begin_future) = {
        let mut low = self.low.lock();
        (low.low_transaction.take(), low.begin_future.take())
      };
      let closed = io::close_results(vec![
        low_transaction.map_or(Ok(()), |t| t.close()),
        begin_future.map_or(Ok(()), |f| f.close()),
      ]);
      if let Some(key) = self.session_key.get() {
        self.session.remove_child(*key);
      }
      closed
    });

    let notified = self.listeners.notify(|l| l.close_transaction(self, result.as_ref().err()));
    log::trace!("transaction close end. tx_id={}", self.tx_id);
    result.finally_with(|| notified)
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::SeqCst)
  }

  fn check_close(&self) -> TxResult<()> {
    if self.is_closed() {
      Err(TxError::AlreadyClosed("transaction"))
    } else {
      Ok(())
    }
  }
}

impl Closeable for Transaction {
  fn close(&self) -> TxResult<()> {
    Transaction::close(self)
  }
}

impl fmt::Display for Transaction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "Transaction({}, tx_id={}, tm_execute_id={}, attempt={}, transaction_id={})",
      self.option,
      self.tx_id,
      self.tm_execute_id(),
      self.attempt(),
      self.known_transaction_id().unwrap_or("-")
    )
  }
}

impl fmt::Debug for Transaction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Transaction")
      .field("tx_id", &self.tx_id)
      .field("option", &self.option)
      .field("tm_execute_id", &self.tm_execute_id())
      .field("attempt", &self.attempt())
      .field("transaction_id", &self.known_transaction_id())
      .field("committed", &self.is_committed())
      .field("rolled_back", &self.is_rolled_back())
      .field("closed", &self.is_closed())
      .finish()
  }
}

impl Drop for Transaction {
  fn drop(&mut self) {
    if !self.is_closed() {
      log::warn!("{} dropped without close. Closing.", self);
      if let Err(e) = self.close() {
        log::error!("Implicit close of transaction {} failed: {}", self.tx_id, e);
      }
    }
  }
}
