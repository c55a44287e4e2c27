//! Waiting on protocol responses and releasing server resources.
//!
//! Every response is closed exactly once whatever the outcome of the wait. A
//! failing close never replaces the failure of the wait; it is suppressed onto
//! it, and only becomes the failure when the wait itself succeeded.

use super::closeable_set::CloseableSet;
use super::timeout::OperationTimeout;
use crate::config::TimeoutKey;
use crate::error::{ServerError, TransactionFailure, TxError, TxResult, TxResultExt};
use crate::wire::{BoxFuture, WaitError};

use std::time::Duration;

type Wrap = fn(ServerError) -> TxError;

/// Waits for `future` within `timeout` and closes it. Server failures become `TxError::Io`.
pub fn get_and_close_future<V>(future: BoxFuture<V>, timeout: &OperationTimeout) -> TxResult<V> {
  resolve(future, timeout, TxError::Io)
}

/// Like [`get_and_close_future`], but server failures become transaction scoped failures.
pub fn get_and_close_future_in_transaction<V>(future: BoxFuture<V>, timeout: &OperationTimeout) -> TxResult<V> {
  resolve(future, timeout, in_transaction)
}

fn in_transaction(e: ServerError) -> TxError {
  TransactionFailure::new(e).into()
}

fn wrapper(in_tx: bool) -> Wrap {
  if in_tx {
    in_transaction
  } else {
    TxError::Io
  }
}

fn resolve<V>(mut future: BoxFuture<V>, timeout: &OperationTimeout, wrap: Wrap) -> TxResult<V> {
  let duration = timeout.get();
  let result = future
    .get(duration)
    .map_err(|e| translate(e, wrap, Some((timeout.key(), duration))));
  result.finally_with(|| future.close().map_err(|e| translate(e, wrap, None)))
}

fn translate(e: WaitError, wrap: Wrap, deadline: Option<(TimeoutKey, Duration)>) -> TxError {
  match (e, deadline) {
    (WaitError::Server(e), _) => wrap(e),
    (WaitError::Timeout, Some((key, duration))) => TxError::Timeout { key, duration },
    (WaitError::Timeout, None) => TxError::Wire("server resource timed out".to_string()),
    (WaitError::Io(message), _) => TxError::Wire(message),
  }
}

/// Maps a failure that happened outside any bounded wait, e.g. submitting a request.
pub(crate) fn server_error(e: WaitError, in_tx: bool) -> TxError {
  translate(e, wrapper(in_tx), None)
}

/// Maps a failure of a wait bounded by the configured timeout of `key`.
pub(crate) fn wait_error(e: WaitError, in_tx: bool, key: TimeoutKey, duration: Duration) -> TxError {
  translate(e, wrapper(in_tx), Some((key, duration)))
}

/// Aggregates the outcomes of closing several resources. Callers evaluate every close first.
pub fn close_results(results: Vec<Result<(), WaitError>>) -> TxResult<()> {
  let failures: Vec<TxError> = results
    .into_iter()
    .filter_map(Result::err)
    .map(|e| server_error(e, false))
    .collect();
  match TxError::aggregate(None, failures) {
    Some(e) => Err(e),
    None => Ok(()),
  }
}

/// Closes the children in `set`, then runs `action` whatever happened to them.
///
/// Child failures are suppressed onto a failure of `action`; otherwise the
/// first of them is raised with the rest suppressed.
pub fn close_children_then<F>(set: &CloseableSet, action: F) -> TxResult<()>
where
  F: FnOnce() -> TxResult<()>,
{
  let child_failures = set.close();
  let primary = action().err();
  match TxError::aggregate(primary, child_failures) {
    Some(e) => Err(e),
    None => Ok(()),
  }
}
