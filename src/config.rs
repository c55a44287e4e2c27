//! Session-wide configuration: timeouts keyed by operation kind and commit defaults.

use crate::types::CommitType;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Used when neither the operation's key nor `TimeoutKey::Default` is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_nanos(i64::MAX as u64);

/// Operation kinds that carry their own timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeoutKey {
  /// Fallback for every key without an explicit value.
  Default,
  TransactionBegin,
  TransactionCommit,
  TransactionRollback,
  TransactionClose,
  ResultCheck,
  ResultClose,
}

impl fmt::Display for TimeoutKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      TimeoutKey::Default => "default",
      TimeoutKey::TransactionBegin => "transaction begin",
      TimeoutKey::TransactionCommit => "transaction commit",
      TimeoutKey::TransactionRollback => "transaction rollback",
      TimeoutKey::TransactionClose => "transaction close",
      TimeoutKey::ResultCheck => "result check",
      TimeoutKey::ResultClose => "result close",
    };
    f.write_str(name)
  }
}

/// Configuration shared by a session and everything opened under it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOptions {
  pub label: Option<String>,
  pub timeouts: HashMap<TimeoutKey, Duration>,
  pub commit_type: CommitType,
}

impl Default for SessionOptions {
  fn default() -> Self {
    Self {
      label: None,
      timeouts: HashMap::new(),
      commit_type: CommitType::Default,
    }
  }
}

impl SessionOptions {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the timeout for `key`; `TimeoutKey::Default` sets the fallback.
  pub fn timeout(mut self, key: TimeoutKey, duration: Duration) -> Self {
    self.timeouts.insert(key, duration);
    self
  }

  pub fn label(mut self, label: impl Into<String>) -> Self {
    self.label = Some(label.into());
    self
  }

  pub fn commit_type(mut self, commit_type: CommitType) -> Self {
    self.commit_type = commit_type;
    self
  }

  /// Explicit value for `key`, else the default key's value, else `DEFAULT_TIMEOUT`.
  pub fn get_timeout(&self, key: TimeoutKey) -> Duration {
    self
      .timeouts
      .get(&key)
      .or_else(|| self.timeouts.get(&TimeoutKey::Default))
      .copied()
      .unwrap_or(DEFAULT_TIMEOUT)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn timeout_falls_back_to_default_key() {
    let options = SessionOptions::new()
      .timeout(TimeoutKey::Default, Duration::from_secs(3))
      .timeout(TimeoutKey::TransactionCommit, Duration::from_secs(9));

    assert_eq!(options.get_timeout(TimeoutKey::TransactionCommit), Duration::from_secs(9));
    assert_eq!(options.get_timeout(TimeoutKey::TransactionBegin), Duration::from_secs(3));
    assert_eq!(SessionOptions::default().get_timeout(TimeoutKey::ResultClose), DEFAULT_TIMEOUT);
  }

  #[test]
  fn options_load_through_serde() {
    let options = SessionOptions::new()
      .label("batch")
      .commit_type(CommitType::Stored)
      .timeout(TimeoutKey::TransactionBegin, Duration::from_millis(250));

    let bytes = rmp_serde::to_vec_named(&options).unwrap();
    let loaded: SessionOptions = rmp_serde::from_slice(&bytes).unwrap();
    assert_eq!(loaded.get_timeout(TimeoutKey::TransactionBegin), Duration::from_millis(250));
    assert_eq!(loaded.commit_type, CommitType::Stored);
    assert_eq!(loaded.label.as_deref(), Some("batch"));
  }
}
