//! Retry policies for the transaction manager.

use crate::error::TxError;
use crate::types::TxOption;

use std::thread;
use std::time::Duration;

// --- Trait Definitions ---

/// Decides whether, and with which transaction option, the next attempt runs.
///
/// This trait allows users to implement custom retry and backoff logic.
pub trait RetryPolicy: Send + Sync {
  /// Returns the option for `attempt` (0-based), or `None` to stop.
  ///
  /// Attempt 0 is always asked with `last = None`. Later attempts are only
  /// asked after a failure this policy classified as retryable. An
  /// implementation is responsible for any delay before the next attempt.
  fn get(&self, attempt: usize, last: Option<&TxError>) -> Option<TxOption>;

  /// Classifies a failed attempt. Anything not retryable is raised immediately.
  fn is_retryable(&self, error: &TxError) -> bool {
    error.is_retryable()
  }
}

impl<F> RetryPolicy for F
where
  F: Fn(usize, Option<&TxError>) -> Option<TxOption> + Send + Sync,
{
  fn get(&self, attempt: usize, last: Option<&TxError>) -> Option<TxOption> {
    self(attempt, last)
  }
}

// --- Default Retry Policies ---

/// Uses the same option for every attempt, up to `max_attempts` attempts in total,
/// sleeping `backoff` before each retry.
#[derive(Debug, Clone)]
pub struct FixedRetry {
  pub option: TxOption,
  pub max_attempts: usize,
  pub backoff: Duration,
}

impl FixedRetry {
  pub fn new(option: TxOption, max_attempts: usize) -> Self {
    Self {
      option,
      max_attempts,
      backoff: Duration::ZERO,
    }
  }

  pub fn with_backoff(mut self, backoff: Duration) -> Self {
    self.backoff = backoff;
    self
  }
}

impl RetryPolicy for FixedRetry {
  fn get(&self, attempt: usize, last: Option<&TxError>) -> Option<TxOption> {
    if attempt >= self.max_attempts {
      return None;
    }
    match last {
      None => Some(self.option.clone()),
      Some(e) if self.is_retryable(e) => {
        log::debug!(
          "Transaction conflict detected (attempt {}): {}. Retrying after {:?}...",
          attempt,
          e,
          self.backoff
        );
        if self.backoff > Duration::ZERO {
          thread::sleep(self.backoff);
        }
        Some(self.option.clone())
      }
      Some(_) => None,
    }
  }
}

/// Runs exactly one attempt with the given option.
#[derive(Debug, Clone)]
pub struct NoRetry(pub TxOption);

impl RetryPolicy for NoRetry {
  fn get(&self, attempt: usize, _last: Option<&TxError>) -> Option<TxOption> {
    if attempt == 0 {
      Some(self.0.clone())
    } else {
      None
    }
  }
}

/// Attempt `n` uses the `n`th option; the policy stops once the list is exhausted.
///
/// Typical use is escalation, e.g. a couple of OCC attempts followed by one LTX.
#[derive(Debug, Clone)]
pub struct OptionList {
  options: Vec<TxOption>,
}

impl OptionList {
  pub fn new<I>(options: I) -> Self
  where
    I: IntoIterator<Item = TxOption>,
  {
    Self {
      options: options.into_iter().collect(),
    }
  }

  pub fn options(&self) -> &[TxOption] {
    &self.options
  }
}

impl RetryPolicy for OptionList {
  fn get(&self, attempt: usize, last: Option<&TxError>) -> Option<TxOption> {
    if let Some(e) = last {
      if !self.is_retryable(e) {
        return None;
      }
    }
    self.options.get(attempt).cloned()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::{DiagnosticCode, ServerError, TransactionFailure};

  fn retryable() -> TxError {
    TransactionFailure::new(ServerError::new(DiagnosticCode::SerializationFailure, "abort")).into()
  }

  fn fatal() -> TxError {
    TransactionFailure::new(ServerError::new(DiagnosticCode::IllegalOperation, "no wp")).into()
  }

  #[test]
  fn fixed_retry_bounds_attempts() {
    let policy = FixedRetry::new(TxOption::occ(), 3);
    assert!(policy.get(0, None).is_some());
    assert!(policy.get(1, Some(&retryable())).is_some());
    assert!(policy.get(2, Some(&retryable())).is_some());
    assert!(policy.get(3, Some(&retryable())).is_none());
    assert!(policy.get(1, Some(&fatal())).is_none());
  }

  #[test]
  fn zero_attempts_refuses_even_the_first() {
    assert!(FixedRetry::new(TxOption::occ(), 0).get(0, None).is_none());
  }

  #[test]
  fn no_retry_runs_once() {
    let policy = NoRetry(TxOption::rtx());
    assert_eq!(policy.get(0, None), Some(TxOption::rtx()));
    assert_eq!(policy.get(1, Some(&retryable())), None);
  }

  #[test]
  fn option_list_escalates() {
    let policy = OptionList::new([TxOption::occ(), TxOption::occ(), TxOption::ltx(["t"])]);
    assert_eq!(policy.get(0, None), Some(TxOption::occ()));
    assert_eq!(policy.get(2, Some(&retryable())), Some(TxOption::ltx(["t"])));
    assert_eq!(policy.get(3, Some(&retryable())), None);
  }

  #[test]
  fn closures_are_policies() {
    let policy = |attempt: usize, _last: Option<&TxError>| (attempt < 2).then(TxOption::occ);
    assert!(RetryPolicy::get(&policy, 1, Some(&retryable())).is_some());
    assert!(RetryPolicy::get(&policy, 2, Some(&retryable())).is_none());
  }
}
