//! Interfaces of the wire/session layer this crate drives.
//!
//! The wire layer owns connections and protocol messages. From here it is only
//! seen as something that hands out future-like responses which can be awaited
//! with a timeout and must be closed afterwards.

use crate::error::ServerError;
use crate::types::{CommitType, TxOption};

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// What a resource does when its close deadline passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosePolicy {
  /// Closing fails with a timeout.
  Error,
  /// Closing gives up silently.
  Ignore,
}

/// Deadline pushed onto a server resource for its own `close`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseTimeout {
  pub duration: Duration,
  pub policy: ClosePolicy,
}

/// Failure of a wait on, or close of, a wire resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
  #[error("server error: {0}")]
  Server(ServerError),
  #[error("wait timed out")]
  Timeout,
  #[error("I/O error: {0}")]
  Io(String),
}

impl From<ServerError> for WaitError {
  fn from(e: ServerError) -> Self {
    WaitError::Server(e)
  }
}

/// A server-side resource that must be released explicitly.
pub trait ServerResource: Send + Sync {
  fn set_close_timeout(&self, timeout: CloseTimeout);

  fn close(&self) -> Result<(), WaitError>;
}

/// A pending protocol response.
pub trait FutureResponse<V>: ServerResource {
  /// Waits at most `timeout` for the response.
  fn get(&mut self, timeout: Duration) -> Result<V, WaitError>;
}

pub type BoxFuture<V> = Box<dyn FutureResponse<V>>;

/// A begun server transaction.
pub trait LowTransaction: ServerResource {
  /// Server-issued identifier, unique for the lifetime of the server.
  fn transaction_id(&self) -> String;

  fn commit(&self, commit_type: CommitType) -> Result<BoxFuture<()>, WaitError>;

  fn rollback(&self) -> Result<BoxFuture<()>, WaitError>;
}

/// A cursor over records produced by a query; decoding is the wire layer's job.
pub trait RecordCursor<R>: Send {
  /// Waits at most `timeout` for the next record; `None` once exhausted.
  fn next_record(&mut self, timeout: Duration) -> Result<Option<R>, WaitError>;

  fn close(&mut self) -> Result<(), WaitError>;
}

/// The SQL service of an established connection.
pub trait SqlClient: Send + Sync {
  fn create_transaction(&self, option: &TxOption) -> Result<BoxFuture<Arc<dyn LowTransaction>>, WaitError>;
}
