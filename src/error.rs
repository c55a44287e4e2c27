use crate::config::TimeoutKey;
use crate::types::{TxMethod, TxOption};

use std::fmt;
use std::time::Duration;
use thiserror::Error;

// --- Server Diagnostics ---

/// Diagnostic category reported by the server alongside a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCode {
  /// Serialization failure detected by concurrency control (typically an OCC abort).
  SerializationFailure,
  /// A long transaction lost a conflict on its write preserve area.
  ConflictOnWritePreserve,
  /// The transaction is no longer active on the server.
  InactiveTransaction,
  /// The operation is not permitted for this transaction (e.g. LTX write outside write preserve).
  IllegalOperation,
  /// The operation is not supported for this transaction type (e.g. write in RTX).
  Unsupported,
  UniqueConstraintViolation,
  TargetNotFound,
  Other(i32),
}

impl DiagnosticCode {
  /// Whether the server considers a fresh attempt of the whole transaction worthwhile.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      DiagnosticCode::SerializationFailure | DiagnosticCode::ConflictOnWritePreserve
    )
  }
}

impl fmt::Display for DiagnosticCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DiagnosticCode::SerializationFailure => f.write_str("ERR_SERIALIZATION_FAILURE"),
      DiagnosticCode::ConflictOnWritePreserve => f.write_str("ERR_CONFLICT_ON_WRITE_PRESERVE"),
      DiagnosticCode::InactiveTransaction => f.write_str("ERR_INACTIVE_TRANSACTION"),
      DiagnosticCode::IllegalOperation => f.write_str("ERR_ILLEGAL_OPERATION"),
      DiagnosticCode::Unsupported => f.write_str("ERR_UNSUPPORTED"),
      DiagnosticCode::UniqueConstraintViolation => f.write_str("ERR_UNIQUE_CONSTRAINT_VIOLATION"),
      DiagnosticCode::TargetNotFound => f.write_str("ERR_NOT_FOUND"),
      DiagnosticCode::Other(code) => write!(f, "ERR_{}", code),
    }
  }
}

/// A failure reported by the server through a protocol response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ServerError {
  pub code: DiagnosticCode,
  pub message: String,
}

impl ServerError {
  pub fn new(code: DiagnosticCode, message: impl Into<String>) -> Self {
    Self {
      code,
      message: message.into(),
    }
  }
}

// --- Transaction Scoped Failures ---

/// Identity of the transaction a failure occurred in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxErrorContext {
  pub tx_id: u64,
  pub transaction_id: Option<String>,
  pub tm_execute_id: u64,
  pub attempt: usize,
  pub option: TxOption,
}

impl fmt::Display for TxErrorContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "Transaction({}, tx_id={}, tm_execute_id={}, attempt={}, transaction_id={})",
      self.option,
      self.tx_id,
      self.tm_execute_id,
      self.attempt,
      self.transaction_id.as_deref().unwrap_or("-")
    )
  }
}

/// A server failure raised within the scope of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionFailure {
  pub server: ServerError,
  pub tx_method: Option<TxMethod>,
  pub tx_execute_id: u64,
  pub context: Option<TxErrorContext>,
}

impl TransactionFailure {
  pub fn new(server: ServerError) -> Self {
    Self {
      server,
      tx_method: None,
      tx_execute_id: 0,
      context: None,
    }
  }
}

impl fmt::Display for TransactionFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.server)?;
    if let Some(method) = self.tx_method {
      write!(f, ". tx_method={}, tx_execute_id={}", method, self.tx_execute_id)?;
    }
    if let Some(context) = &self.context {
      write!(f, ". {}", context)?;
    }
    Ok(())
  }
}

// --- The Error Type ---

#[derive(Error, Debug)]
pub enum TxError {
  #[error("Server I/O failure: {0}")]
  Io(ServerError),

  #[error("Transaction failure: {0}")]
  Transaction(Box<TransactionFailure>),

  #[error("{key} timed out after {duration:?}")]
  Timeout { key: TimeoutKey, duration: Duration },

  #[error("Wire failure: {0}")]
  Wire(String),

  #[error("{0} already closed")]
  AlreadyClosed(&'static str),

  #[error("Illegal state: {0}")]
  IllegalState(String),

  #[error("Transaction retry over after {attempts} attempt(s){}", .cause.as_ref().map(|c| format!(". cause: {}", c)).unwrap_or_default())]
  RetryOver {
    attempts: usize,
    cause: Option<Box<TxError>>,
  },

  #[error("Transaction log I/O failed: {0}")]
  FileIo(#[from] std::io::Error),

  #[error("Operation failed: {0}")]
  Other(String),

  #[error("{primary} (suppressed: {})", .suppressed.len())]
  Suppressed {
    primary: Box<TxError>,
    suppressed: Vec<TxError>,
  },
}

impl Clone for TxError {
  fn clone(&self) -> Self {
    match self {
      // std::io::Error is not Clone; keep its message.
      Self::FileIo(e) => Self::Other(format!("(Cloned) transaction log I/O error: {}", e)),

      Self::Io(e) => Self::Io(e.clone()),
      Self::Transaction(f) => Self::Transaction(f.clone()),
      Self::Timeout { key, duration } => Self::Timeout {
        key: *key,
        duration: *duration,
      },
      Self::Wire(s) => Self::Wire(s.clone()),
      Self::AlreadyClosed(s) => Self::AlreadyClosed(s),
      Self::IllegalState(s) => Self::IllegalState(s.clone()),
      Self::RetryOver { attempts, cause } => Self::RetryOver {
        attempts: *attempts,
        cause: cause.clone(),
      },
      Self::Other(s) => Self::Other(s.clone()),
      Self::Suppressed { primary, suppressed } => Self::Suppressed {
        primary: primary.clone(),
        suppressed: suppressed.clone(),
      },
    }
  }
}

impl From<TransactionFailure> for TxError {
  fn from(failure: TransactionFailure) -> Self {
    TxError::Transaction(Box::new(failure))
  }
}

impl TxError {
  pub fn other(message: impl fmt::Display) -> Self {
    TxError::Other(message.to_string())
  }

  /// The failure that determines how this error is classified, looking through suppression.
  pub fn primary(&self) -> &TxError {
    match self {
      TxError::Suppressed { primary, .. } => primary.primary(),
      other => other,
    }
  }

  /// Secondary failures aggregated onto this one.
  pub fn suppressed(&self) -> &[TxError] {
    match self {
      TxError::Suppressed { suppressed, .. } => suppressed,
      _ => &[],
    }
  }

  /// Attaches `other` as a suppressed cause, keeping `self` as the primary failure.
  pub fn with_suppressed(self, other: TxError) -> TxError {
    match self {
      TxError::Suppressed { primary, mut suppressed } => {
        suppressed.push(other);
        TxError::Suppressed { primary, suppressed }
      }
      primary => TxError::Suppressed {
        primary: Box::new(primary),
        suppressed: vec![other],
      },
    }
  }

  /// Combines an in-flight failure with collected secondary failures.
  ///
  /// With no primary the first collected failure is promoted and the rest are suppressed onto it.
  pub fn aggregate(primary: Option<TxError>, collected: Vec<TxError>) -> Option<TxError> {
    let mut iter = collected.into_iter();
    let mut head = match primary {
      Some(e) => e,
      None => iter.next()?,
    };
    for e in iter {
      head = head.with_suppressed(e);
    }
    Some(head)
  }

  /// The server diagnostic carried by this failure, if any.
  pub fn diagnostic_code(&self) -> Option<DiagnosticCode> {
    match self.primary() {
      TxError::Io(e) => Some(e.code),
      TxError::Transaction(f) => Some(f.server.code),
      TxError::RetryOver { cause: Some(cause), .. } => cause.diagnostic_code(),
      _ => None,
    }
  }

  /// Only transaction scoped server failures with a retryable diagnostic qualify.
  pub fn is_retryable(&self) -> bool {
    match self.primary() {
      TxError::Transaction(f) => f.server.code.is_retryable(),
      _ => false,
    }
  }

  pub fn is_timeout(&self) -> bool {
    matches!(self.primary(), TxError::Timeout { .. })
  }

  pub fn transaction_failure(&self) -> Option<&TransactionFailure> {
    match self.primary() {
      TxError::Transaction(f) => Some(f),
      _ => None,
    }
  }

  /// Tags a transaction scoped failure with the method and execution id it surfaced from.
  pub(crate) fn set_tx_method(&mut self, method: TxMethod, tx_execute_id: u64) {
    if let Some(failure) = self.transaction_failure_mut() {
      failure.tx_method = Some(method);
      failure.tx_execute_id = tx_execute_id;
    }
  }

  /// Fills in the transaction identity unless a more specific one is already present.
  pub(crate) fn attach_context(&mut self, context: impl FnOnce() -> TxErrorContext) {
    if let Some(failure) = self.transaction_failure_mut() {
      if failure.context.is_none() {
        failure.context = Some(context());
      }
    }
  }

  fn transaction_failure_mut(&mut self) -> Option<&mut TransactionFailure> {
    match self {
      TxError::Transaction(f) => Some(f),
      TxError::Suppressed { primary, .. } => primary.transaction_failure_mut(),
      _ => None,
    }
  }
}

// Helper type alias
pub type TxResult<T> = Result<T, TxError>;

pub trait TxResultExt<T> {
  /// Runs `cleanup` regardless of the outcome of `self`; a cleanup failure is
  /// suppressed onto an existing failure or becomes the failure itself.
  fn finally_with<F>(self, cleanup: F) -> TxResult<T>
  where
    Self: Sized,
    F: FnOnce() -> TxResult<()>;
}

impl<T> TxResultExt<T> for TxResult<T> {
  #[inline]
  fn finally_with<F>(self, cleanup: F) -> TxResult<T>
  where
    F: FnOnce() -> TxResult<()>,
  {
    let cleaned = cleanup();
    match (self, cleaned) {
      (Ok(value), Ok(())) => Ok(value),
      (Ok(_), Err(e)) => Err(e),
      (Err(e), Ok(())) => Err(e),
      (Err(e), Err(c)) => Err(e.with_suppressed(c)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn conflict() -> TxError {
    TransactionFailure::new(ServerError::new(DiagnosticCode::SerializationFailure, "conflict")).into()
  }

  #[test]
  fn suppression_keeps_primary_classification() {
    let e = conflict()
      .with_suppressed(TxError::Wire("close failed".into()))
      .with_suppressed(TxError::other("listener"));
    assert!(e.is_retryable());
    assert_eq!(e.suppressed().len(), 2);
    assert!(matches!(e.primary(), TxError::Transaction(_)));
  }

  #[test]
  fn aggregate_promotes_first_collected_failure() {
    let collected = vec![TxError::Wire("a".into()), TxError::Wire("b".into())];
    let e = TxError::aggregate(None, collected).unwrap();
    assert!(matches!(e.primary(), TxError::Wire(m) if m == "a"));
    assert_eq!(e.suppressed().len(), 1);

    assert!(TxError::aggregate(None, vec![]).is_none());
  }

  #[test]
  fn io_failures_are_not_retryable() {
    let e = TxError::Io(ServerError::new(DiagnosticCode::SerializationFailure, "outside tx"));
    assert!(!e.is_retryable());
    assert_eq!(e.diagnostic_code(), Some(DiagnosticCode::SerializationFailure));
  }

  #[test]
  fn finally_with_suppresses_cleanup_failure() {
    let r: TxResult<()> = Err(conflict());
    let r = r.finally_with(|| Err(TxError::Wire("cleanup".into())));
    let e = r.unwrap_err();
    assert!(e.is_retryable());
    assert_eq!(e.suppressed().len(), 1);

    let ok: TxResult<u8> = Ok(1);
    let e = ok.finally_with(|| Err(TxError::Wire("cleanup".into()))).unwrap_err();
    assert!(matches!(e, TxError::Wire(_)));
  }
}
