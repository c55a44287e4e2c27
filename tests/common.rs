#![allow(dead_code)]

use txsolid::error::{DiagnosticCode, ServerError, TxResult};
use txsolid::statement::{QueryResult, SqlQuery, SqlStatement, StatementResult};
use txsolid::tx::Transaction;
use txsolid::types::{CommitType, TxOption};
use txsolid::wire::{
  BoxFuture, CloseTimeout, FutureResponse, LowTransaction, RecordCursor, ServerResource, SqlClient, WaitError,
};
use txsolid::{Session, SessionOptions};

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::thread;
use std::time::Duration;

static LOG_INIT: Once = Once::new();

pub fn setup_logging() {
  LOG_INIT.call_once(|| {
    env_logger::builder()
      .is_test(true)
      .try_init()
      .unwrap_or_else(|e| eprintln!("Failed to init logger: {}", e));
  });
}

// --- Call counters ---

#[derive(Debug, Default)]
pub struct Calls {
  pub begin: AtomicUsize,
  pub begin_wait: AtomicUsize,
  pub commit: AtomicUsize,
  pub rollback: AtomicUsize,
  pub low_close: AtomicUsize,
  pub future_close: AtomicUsize,
  pub cursor_close: AtomicUsize,
  pub result_wait: AtomicUsize,
}

impl Calls {
  pub fn get(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
  }
}

// --- Scripts ---

/// What the next response of one kind does.
#[derive(Debug, Clone)]
pub enum Step {
  Ok,
  Fail(ServerError),
  /// Succeeds, but only after the delay.
  Delay(Duration),
}

pub fn server_error(code: DiagnosticCode) -> ServerError {
  ServerError::new(code, format!("scripted {}", code))
}

pub fn conflict() -> Step {
  Step::Fail(server_error(DiagnosticCode::SerializationFailure))
}

#[derive(Debug, Default)]
pub struct Script {
  pub begin: VecDeque<Step>,
  pub commit: VecDeque<Step>,
  pub rollback: VecDeque<Step>,
  pub fail_low_close: bool,
}

fn next_step(queue: &mut VecDeque<Step>) -> Step {
  queue.pop_front().unwrap_or(Step::Ok)
}

// --- Futures ---

pub struct MockFuture<V> {
  value: Option<Result<V, WaitError>>,
  delay: Duration,
  fail_close: bool,
  calls: Arc<Calls>,
  on_wait: Option<fn(&Calls)>,
}

impl<V> MockFuture<V> {
  pub fn ready(value: Result<V, WaitError>, calls: Arc<Calls>) -> Self {
    Self {
      value: Some(value),
      delay: Duration::ZERO,
      fail_close: false,
      calls,
      on_wait: None,
    }
  }

  fn scripted(step: Step, ok: V, calls: Arc<Calls>) -> Self {
    let mut future = Self::ready(Ok(ok), calls);
    match step {
      Step::Ok => {}
      Step::Fail(e) => future.value = Some(Err(WaitError::Server(e))),
      Step::Delay(delay) => future.delay = delay,
    }
    future
  }

  pub fn failing_close(mut self) -> Self {
    self.fail_close = true;
    self
  }
}

impl<V: Send + Sync> ServerResource for MockFuture<V> {
  fn set_close_timeout(&self, _timeout: CloseTimeout) {}

  fn close(&self) -> Result<(), WaitError> {
    self.calls.future_close.fetch_add(1, Ordering::SeqCst);
    if self.fail_close {
      Err(WaitError::Io("scripted close failure".to_string()))
    } else {
      Ok(())
    }
  }
}

impl<V: Send + Sync> FutureResponse<V> for MockFuture<V> {
  fn get(&mut self, timeout: Duration) -> Result<V, WaitError> {
    if let Some(on_wait) = self.on_wait {
      on_wait(&self.calls);
    }
    if self.delay > timeout {
      thread::sleep(timeout);
      return Err(WaitError::Timeout);
    }
    thread::sleep(self.delay);
    self
      .value
      .take()
      .unwrap_or_else(|| Err(WaitError::Io("response already taken".to_string())))
  }
}

// --- Server ---

pub struct MockLowTransaction {
  id: String,
  script: Arc<Mutex<Script>>,
  calls: Arc<Calls>,
}

impl ServerResource for MockLowTransaction {
  fn set_close_timeout(&self, _timeout: CloseTimeout) {}

  fn close(&self) -> Result<(), WaitError> {
    self.calls.low_close.fetch_add(1, Ordering::SeqCst);
    if self.script.lock().fail_low_close {
      Err(WaitError::Io("scripted transaction close failure".to_string()))
    } else {
      Ok(())
    }
  }
}

impl LowTransaction for MockLowTransaction {
  fn transaction_id(&self) -> String {
    self.id.clone()
  }

  fn commit(&self, _commit_type: CommitType) -> Result<BoxFuture<()>, WaitError> {
    self.calls.commit.fetch_add(1, Ordering::SeqCst);
    let step = next_step(&mut self.script.lock().commit);
    Ok(Box::new(MockFuture::scripted(step, (), self.calls.clone())))
  }

  fn rollback(&self) -> Result<BoxFuture<()>, WaitError> {
    self.calls.rollback.fetch_add(1, Ordering::SeqCst);
    let step = next_step(&mut self.script.lock().rollback);
    Ok(Box::new(MockFuture::scripted(step, (), self.calls.clone())))
  }
}

#[derive(Clone, Default)]
pub struct MockServer {
  pub script: Arc<Mutex<Script>>,
  pub calls: Arc<Calls>,
  next_id: Arc<AtomicUsize>,
}

impl MockServer {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn session(&self) -> Session {
    self.session_with(SessionOptions::default())
  }

  pub fn session_with(&self, options: SessionOptions) -> Session {
    setup_logging();
    Session::new(Arc::new(self.clone()), options)
  }

  pub fn script_begin(&self, step: Step) -> &Self {
    self.script.lock().begin.push_back(step);
    self
  }

  pub fn script_commit(&self, step: Step) -> &Self {
    self.script.lock().commit.push_back(step);
    self
  }

  pub fn script_rollback(&self, step: Step) -> &Self {
    self.script.lock().rollback.push_back(step);
    self
  }
}

impl SqlClient for MockServer {
  fn create_transaction(&self, _option: &TxOption) -> Result<BoxFuture<Arc<dyn LowTransaction>>, WaitError> {
    self.calls.begin.fetch_add(1, Ordering::SeqCst);
    let id = format!("TID-{:04}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
    let step = next_step(&mut self.script.lock().begin);
    let low: Arc<dyn LowTransaction> = Arc::new(MockLowTransaction {
      id,
      script: self.script.clone(),
      calls: self.calls.clone(),
    });
    let mut future = MockFuture::scripted(step, low, self.calls.clone());
    future.on_wait = Some(|calls: &Calls| {
      calls.begin_wait.fetch_add(1, Ordering::SeqCst);
    });
    Ok(Box::new(future))
  }
}

// --- Statements ---

/// An update reporting `count`, or failing with `error` when resolved.
pub struct MockUpdate {
  pub sql: String,
  pub count: i64,
  pub error: Option<ServerError>,
  pub fail_close: bool,
  pub delay: Duration,
  pub calls: Arc<Calls>,
}

impl MockUpdate {
  pub fn new(server: &MockServer, sql: &str, count: i64) -> Self {
    Self {
      sql: sql.to_string(),
      count,
      error: None,
      fail_close: false,
      delay: Duration::ZERO,
      calls: server.calls.clone(),
    }
  }

  pub fn failing(mut self, code: DiagnosticCode) -> Self {
    self.error = Some(server_error(code));
    self
  }

  pub fn failing_close(mut self) -> Self {
    self.fail_close = true;
    self
  }

  /// The count is reported only after `delay`.
  pub fn delayed(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  fn open(&self, transaction: &Transaction) -> TxResult<StatementResult> {
    transaction.execute_low(|_low| Ok(()))?;
    let value = match &self.error {
      Some(e) => Err(WaitError::Server(e.clone())),
      None => Ok(self.count),
    };
    let mut future = MockFuture::ready(value, self.calls.clone());
    future.delay = self.delay;
    future.on_wait = Some(|calls: &Calls| {
      calls.result_wait.fetch_add(1, Ordering::SeqCst);
    });
    if self.fail_close {
      future = future.failing_close();
    }
    StatementResult::new(transaction, Box::new(future))
  }
}

impl SqlStatement for MockUpdate {
  fn sql(&self) -> &str {
    &self.sql
  }

  fn execute(&self, transaction: &Transaction, _parameter: &()) -> TxResult<StatementResult> {
    self.open(transaction)
  }
}

impl SqlStatement<i64> for MockUpdate {
  fn sql(&self) -> &str {
    &self.sql
  }

  /// The parameter overrides the reported count.
  fn execute(&self, transaction: &Transaction, parameter: &i64) -> TxResult<StatementResult> {
    let statement = MockUpdate {
      sql: self.sql.clone(),
      count: *parameter,
      error: self.error.clone(),
      fail_close: self.fail_close,
      delay: self.delay,
      calls: self.calls.clone(),
    };
    statement.open(transaction)
  }
}

pub struct MockCursor {
  rows: VecDeque<i32>,
  calls: Arc<Calls>,
}

impl RecordCursor<i32> for MockCursor {
  fn next_record(&mut self, _timeout: Duration) -> Result<Option<i32>, WaitError> {
    Ok(self.rows.pop_front())
  }

  fn close(&mut self) -> Result<(), WaitError> {
    self.calls.cursor_close.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

pub struct MockQuery {
  pub sql: String,
  pub rows: Vec<i32>,
  pub calls: Arc<Calls>,
}

impl MockQuery {
  pub fn new(server: &MockServer, sql: &str, rows: Vec<i32>) -> Self {
    Self {
      sql: sql.to_string(),
      rows,
      calls: server.calls.clone(),
    }
  }
}

impl SqlQuery for MockQuery {
  type Record = i32;

  fn sql(&self) -> &str {
    &self.sql
  }

  fn execute(&self, transaction: &Transaction, _parameter: &()) -> TxResult<QueryResult<i32>> {
    transaction.execute_low(|_low| Ok(()))?;
    let cursor = MockCursor {
      rows: self.rows.iter().copied().collect(),
      calls: self.calls.clone(),
    };
    QueryResult::new(transaction, Box::new(cursor))
  }
}
