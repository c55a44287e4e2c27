//! The retry-driven execution engine.
//!
//! A [`TransactionManager`] runs a unit of work in a fresh [`Transaction`]
//! per attempt and commits it. When an attempt fails with a failure the
//! retry policy classifies as retryable, the policy is asked for the option
//! of the next attempt; anything else is raised immediately.

use super::manager_event::TmEventListener;
use super::policies::{FixedRetry, OptionList, RetryPolicy};
use super::transaction::Transaction;
use crate::error::{TxError, TxResult, TxResultExt};
use crate::session::Session;
use crate::statement::{SqlQuery, SqlStatement};
use crate::types::{CommitType, TxOption};
use crate::utils::{IdSequence, ListenerList};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

static TM_EXECUTE_IDS: IdSequence = IdSequence::new();

// --- Settings ---

/// Per-run configuration of a [`TransactionManager`].
///
/// Cloning is cheap and clones share their event listeners.
#[derive(Clone)]
pub struct TmSetting {
  policy: Arc<dyn RetryPolicy>,
  commit_type: Option<CommitType>,
  begin_timeout: Option<Duration>,
  commit_timeout: Option<Duration>,
  rollback_timeout: Option<Duration>,
  listeners: Arc<ListenerList<dyn TmEventListener>>,
}

impl TmSetting {
  pub fn new<P>(policy: P) -> Self
  where
    P: RetryPolicy + 'static,
  {
    Self {
      policy: Arc::new(policy),
      commit_type: None,
      begin_timeout: None,
      commit_timeout: None,
      rollback_timeout: None,
      listeners: Arc::new(ListenerList::new()),
    }
  }

  /// Attempt `n` runs with the `n`th option; no attempt beyond the last option.
  pub fn of<I>(options: I) -> Self
  where
    I: IntoIterator<Item = TxOption>,
  {
    Self::new(OptionList::new(options))
  }

  /// Every attempt runs with `option`, at most `max_attempts` attempts.
  pub fn of_always(option: TxOption, max_attempts: usize) -> Self {
    Self::new(FixedRetry::new(option, max_attempts))
  }

  /// Overrides the session's default commit type.
  pub fn commit_type(mut self, commit_type: CommitType) -> Self {
    self.commit_type = Some(commit_type);
    self
  }

  pub fn begin_timeout(mut self, timeout: Duration) -> Self {
    self.begin_timeout = Some(timeout);
    self
  }

  pub fn commit_timeout(mut self, timeout: Duration) -> Self {
    self.commit_timeout = Some(timeout);
    self
  }

  pub fn rollback_timeout(mut self, timeout: Duration) -> Self {
    self.rollback_timeout = Some(timeout);
    self
  }

  pub fn add_event_listener(&self, listener: Arc<dyn TmEventListener>) -> &Self {
    self.listeners.add(listener);
    self
  }

  pub fn policy(&self) -> &dyn RetryPolicy {
    &*self.policy
  }

  fn resolve_commit_type(&self, transaction: &Transaction) -> CommitType {
    self
      .commit_type
      .unwrap_or(transaction.session_options().commit_type)
  }

  fn apply_timeouts(&self, transaction: &Transaction) {
    if let Some(timeout) = self.begin_timeout {
      transaction.set_begin_timeout(timeout);
    }
    if let Some(timeout) = self.commit_timeout {
      transaction.set_commit_timeout(timeout);
    }
    if let Some(timeout) = self.rollback_timeout {
      transaction.set_rollback_timeout(timeout);
    }
  }
}

impl fmt::Debug for TmSetting {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TmSetting")
      .field("commit_type", &self.commit_type)
      .field("begin_timeout", &self.begin_timeout)
      .field("commit_timeout", &self.commit_timeout)
      .field("rollback_timeout", &self.rollback_timeout)
      .field("listeners", &self.listeners)
      .finish_non_exhaustive()
  }
}

// --- Manager ---

struct TmInner {
  session: Session,
  default_setting: Option<TmSetting>,
  listeners: ListenerList<dyn TmEventListener>,
}

/// Runs units of work with commit and retry. Cheap to clone; clones share listeners.
#[derive(Clone)]
pub struct TransactionManager {
  inner: Arc<TmInner>,
}

impl TransactionManager {
  pub(crate) fn new(session: Session, default_setting: Option<TmSetting>) -> Self {
    Self {
      inner: Arc::new(TmInner {
        session,
        default_setting,
        listeners: ListenerList::new(),
      }),
    }
  }

  pub fn session(&self) -> &Session {
    &self.inner.session
  }

  pub fn default_setting(&self) -> Option<&TmSetting> {
    self.inner.default_setting.as_ref()
  }

  /// Listeners added here observe every run of this manager, whatever its setting.
  pub fn add_event_listener(&self, listener: Arc<dyn TmEventListener>) -> &Self {
    self.inner.listeners.add(listener);
    self
  }

  /// Runs `action` with the default setting. Fails with `IllegalState` if the manager has none.
  pub fn execute<R, F>(&self, action: F) -> TxResult<R>
  where
    F: FnMut(&Transaction) -> TxResult<R>,
  {
    let setting = self.require_default_setting()?;
    self.execute_with(setting, action)
  }

  /// Runs `action` until it commits, the unit of work rolls back itself, or the policy stops.
  ///
  /// `action` runs once per attempt, each time against a fresh transaction.
  /// Only the final outcome reaches the caller: a success, the first
  /// non-retryable failure, or `RetryOver` carrying the last retryable failure.
  pub fn execute_with<R, F>(&self, setting: &TmSetting, mut action: F) -> TxResult<R>
  where
    F: FnMut(&Transaction) -> TxResult<R>,
  {
    let tm_execute_id = TM_EXECUTE_IDS.next();
    let first = setting.policy.get(0, None);
    self.fire(setting, |l| l.execute_start(tm_execute_id, first.as_ref()));

    let mut option = match first {
      Some(option) => option,
      None => {
        log::debug!("tm_execute_id={}: retry policy refused attempt 0", tm_execute_id);
        let e = TxError::RetryOver {
          attempts: 0,
          cause: None,
        };
        self.fire(setting, |l| l.execute_end_fail(tm_execute_id, None, None, &e));
        return Err(e);
      }
    };

    let mut attempt = 0;
    loop {
      let transaction = match self.inner.session.create_transaction(option.clone()) {
        Ok(transaction) => transaction,
        Err(e) => {
          self.fire(setting, |l| l.execute_end_fail(tm_execute_id, Some(&option), None, &e));
          return Err(e);
        }
      };
      transaction.set_owner(self.clone(), tm_execute_id, attempt);
      setting.apply_timeouts(&transaction);
      log::trace!("tm_execute_id={}: attempt {} with {}", tm_execute_id, attempt, option);
      self.fire(setting, |l| l.transaction_start(&transaction));

      let e = match self.run_attempt(setting, &transaction, &mut action) {
        Ok((value, committed)) => {
          let result: TxResult<R> = Ok(value);
          let result = result.finally_with(|| transaction.close());
          match &result {
            Ok(_) => self.fire(setting, |l| l.execute_end_success(tm_execute_id, &transaction, committed)),
            Err(e) => self.fire(setting, |l| {
              l.execute_end_fail(tm_execute_id, Some(&option), Some(&*transaction), e)
            }),
          }
          return result;
        }
        Err(e) => e,
      };

      self.fire(setting, |l| l.transaction_exception(&transaction, &e));
      let e = self.rollback_attempt(setting, &transaction, e);
      let e = match transaction.close() {
        Ok(()) => e,
        Err(close_error) => {
          log::warn!("tm_execute_id={}: close of failed attempt {} failed: {}", tm_execute_id, attempt, close_error);
          e.with_suppressed(close_error)
        }
      };

      if !setting.policy.is_retryable(&e) {
        log::debug!("tm_execute_id={}: attempt {} failed, not retryable: {}", tm_execute_id, attempt, e);
        self.fire(setting, |l| {
          l.execute_end_fail(tm_execute_id, Some(&option), Some(&*transaction), &e)
        });
        return Err(e);
      }

      match setting.policy.get(attempt + 1, Some(&e)) {
        Some(next) => {
          log::debug!(
            "tm_execute_id={}: attempt {} failed, retrying with {}: {}",
            tm_execute_id,
            attempt,
            next,
            e
          );
          self.fire(setting, |l| l.transaction_retry(&transaction, &e, &next));
          attempt += 1;
          option = next;
        }
        None => {
          log::debug!("tm_execute_id={}: retry over after {} attempt(s): {}", tm_execute_id, attempt + 1, e);
          self.fire(setting, |l| l.transaction_retry_over(&transaction, &e));
          let e = TxError::RetryOver {
            attempts: attempt + 1,
            cause: Some(Box::new(e)),
          };
          self.fire(setting, |l| {
            l.execute_end_fail(tm_execute_id, Some(&option), Some(&*transaction), &e)
          });
          return Err(e);
        }
      }
    }
  }

  /// Runs the unit of work and commits unless it rolled back itself.
  /// Returns whether the transaction was committed.
  fn run_attempt<R, F>(&self, setting: &TmSetting, transaction: &Transaction, action: &mut F) -> TxResult<(R, bool)>
  where
    F: FnMut(&Transaction) -> TxResult<R>,
  {
    let value = action(transaction)?;
    if transaction.is_rolled_back() {
      return Ok((value, false));
    }

    let commit_type = setting.resolve_commit_type(transaction);
    self.fire(setting, |l| l.transaction_before_commit(transaction, commit_type));
    self.fire(setting, |l| l.transaction_commit_start(transaction, commit_type));
    let result = transaction.commit(commit_type);
    self.fire(setting, |l| {
      l.transaction_commit_end(transaction, commit_type, result.as_ref().err())
    });
    result?;
    Ok((value, true))
  }

  /// Rolls back a failed attempt. A rollback failure is suppressed onto the attempt failure.
  ///
  /// Nothing is sent when the transaction never began, is already finished, or was closed.
  fn rollback_attempt(&self, setting: &TmSetting, transaction: &Transaction, e: TxError) -> TxError {
    if transaction.is_committed()
      || transaction.is_rolled_back()
      || transaction.is_closed()
      || transaction.known_transaction_id().is_none()
    {
      return e;
    }

    self.fire(setting, |l| l.transaction_rollback_start(transaction));
    let result = transaction.rollback();
    self.fire(setting, |l| l.transaction_rollback_end(transaction, result.as_ref().err()));
    match result {
      Ok(()) => e,
      Err(rollback_error) => {
        log::warn!("rollback of failed transaction {} failed: {}", transaction.tx_id(), rollback_error);
        e.with_suppressed(rollback_error)
      }
    }
  }

  fn fire<F>(&self, setting: &TmSetting, event: F)
  where
    F: Fn(&dyn TmEventListener),
  {
    for listener in self.inner.listeners.snapshot().iter() {
      event(&**listener);
    }
    for listener in setting.listeners.snapshot().iter() {
      event(&**listener);
    }
  }

  fn require_default_setting(&self) -> TxResult<&TmSetting> {
    self
      .inner
      .default_setting
      .as_ref()
      .ok_or_else(|| TxError::IllegalState("transaction manager has no default setting".to_string()))
  }

  // --- Convenience runs with the default setting ---

  pub fn execute_and_get_list<Q>(&self, ps: &Q) -> TxResult<Vec<Q::Record>>
  where
    Q: SqlQuery,
  {
    self.execute(|transaction| transaction.execute_and_get_list(ps))
  }

  pub fn execute_and_find_record<Q>(&self, ps: &Q) -> TxResult<Option<Q::Record>>
  where
    Q: SqlQuery,
  {
    self.execute(|transaction| transaction.execute_and_find_record(ps))
  }

  pub fn execute_and_get_count<S>(&self, ps: &S) -> TxResult<i64>
  where
    S: SqlStatement,
  {
    self.execute(|transaction| transaction.execute_and_get_count(ps))
  }
}

impl fmt::Debug for TransactionManager {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TransactionManager")
      .field("default_setting", &self.inner.default_setting)
      .field("listeners", &self.inner.listeners)
      .finish()
  }
}
