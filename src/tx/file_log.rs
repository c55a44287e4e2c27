//! Writes a log file per transaction, recording its lifecycle events.
//!
//! Install a [`TxFileLogger`] on a session through
//! [`Session::add_transaction_listener`](crate::Session::add_transaction_listener)
//! or on a single transaction.

use super::event::TransactionEventListener;
use super::transaction::Transaction;
use crate::error::{TxError, TxResult};
use crate::types::{CommitType, TxMethod};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const DEFAULT_HEADER_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Layout of the log files under the output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TxFileLogDirectoryType {
  /// `tx{tx_id}.log`
  #[default]
  Tx,
  /// `tm{tm_execute_id}/tx{tx_id}.log`; transactions without a manager fall back to `Tx`.
  TmTx,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxFileLogConfig {
  pub output_dir: PathBuf,
  pub directory_type: TxFileLogDirectoryType,
  /// Flush after every line.
  pub auto_flush: bool,
  /// `chrono` format of the timestamp starting each line.
  pub header_format: String,
}

impl TxFileLogConfig {
  pub fn new(output_dir: impl Into<PathBuf>) -> Self {
    Self {
      output_dir: output_dir.into(),
      directory_type: TxFileLogDirectoryType::default(),
      auto_flush: false,
      header_format: DEFAULT_HEADER_FORMAT.to_string(),
    }
  }

  pub fn directory_type(mut self, directory_type: TxFileLogDirectoryType) -> Self {
    self.directory_type = directory_type;
    self
  }

  pub fn auto_flush(mut self, auto_flush: bool) -> Self {
    self.auto_flush = auto_flush;
    self
  }

  pub fn header_format(mut self, header_format: impl Into<String>) -> Self {
    self.header_format = header_format.into();
    self
  }

  /// Where the log of `transaction` goes.
  pub fn log_file(&self, transaction: &Transaction) -> PathBuf {
    let file_name = format!("tx{}.log", transaction.tx_id());
    match (self.directory_type, transaction.tm_execute_id()) {
      (TxFileLogDirectoryType::TmTx, tm_execute_id) if tm_execute_id != 0 => self
        .output_dir
        .join(format!("tm{}", tm_execute_id))
        .join(file_name),
      _ => self.output_dir.join(file_name),
    }
  }
}

struct TxFileLogWriter {
  out: BufWriter<File>,
  auto_flush: bool,
}

impl TxFileLogWriter {
  fn open(path: &Path, auto_flush: bool) -> io::Result<Self> {
    if let Some(dir) = path.parent() {
      fs::create_dir_all(dir)?;
    }
    Ok(Self {
      out: BufWriter::new(File::create(path)?),
      auto_flush,
    })
  }

  fn println(&mut self, header_format: &str, text: &str) -> io::Result<()> {
    let now = chrono::Local::now();
    writeln!(self.out, "{} {}", now.format(header_format), text)?;
    if self.auto_flush {
      self.out.flush()?;
    }
    Ok(())
  }
}

/// A [`TransactionEventListener`] writing one file per transaction.
///
/// A file is created on the first event of its transaction and released on
/// the close event.
pub struct TxFileLogger {
  config: TxFileLogConfig,
  writers: Mutex<HashMap<u64, TxFileLogWriter>>,
}

impl TxFileLogger {
  pub fn new(config: TxFileLogConfig) -> Self {
    Self {
      config,
      writers: Mutex::new(HashMap::new()),
    }
  }

  pub fn config(&self) -> &TxFileLogConfig {
    &self.config
  }

  /// Number of files currently held open.
  pub fn open_files(&self) -> usize {
    self.writers.lock().len()
  }

  fn open_writer(&self, transaction: &Transaction) -> io::Result<TxFileLogWriter> {
    let path = self.config.log_file(transaction);
    log::debug!("transaction log file: {}", path.display());
    let mut writer = TxFileLogWriter::open(&path, self.config.auto_flush)?;
    writer.println(&self.config.header_format, &format!("[{}] created", transaction))?;
    Ok(writer)
  }

  fn println(&self, transaction: &Transaction, text: &str) -> TxResult<()> {
    let mut writers = self.writers.lock();
    let writer = match writers.entry(transaction.tx_id()) {
      std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
      std::collections::hash_map::Entry::Vacant(entry) => entry.insert(self.open_writer(transaction)?),
    };
    writer.println(&self.config.header_format, text)?;
    Ok(())
  }

  fn println_outcome(&self, transaction: &Transaction, what: &str, occurred: Option<&TxError>) -> TxResult<()> {
    self.println(transaction, &outcome(what, occurred))
  }

  /// Writes the last line of a transaction's file and releases it, even when the write fails.
  fn release<F>(&self, tx_id: u64, text: &str, open: F) -> TxResult<()>
  where
    F: FnOnce() -> io::Result<TxFileLogWriter>,
  {
    let removed = self.writers.lock().remove(&tx_id);
    let mut writer = match removed {
      Some(writer) => writer,
      None => open()?,
    };
    writer.println(&self.config.header_format, text)?;
    writer.out.flush()?;
    Ok(())
  }
}

fn outcome(what: &str, occurred: Option<&TxError>) -> String {
  match occurred {
    None => format!("{} end", what),
    Some(e) => format!("{} failed: {}", what, e),
  }
}

impl TransactionEventListener for TxFileLogger {
  fn low_transaction_get_start(&self, transaction: &Transaction) -> TxResult<()> {
    self.println(
      transaction,
      &format!(
        "transaction begin start. option={}, tm_execute_id={}, attempt={}",
        transaction.option(),
        transaction.tm_execute_id(),
        transaction.attempt()
      ),
    )
  }

  fn low_transaction_get_end(
    &self,
    transaction: &Transaction,
    transaction_id: Option<&str>,
    occurred: Option<&TxError>,
  ) -> TxResult<()> {
    match (transaction_id, occurred) {
      (_, Some(e)) => self.println(transaction, &format!("transaction begin failed: {}", e)),
      (id, None) => self.println(
        transaction,
        &format!("transaction begin end. transaction_id={}", id.unwrap_or("-")),
      ),
    }
  }

  fn execute_start(
    &self,
    transaction: &Transaction,
    method: TxMethod,
    tx_execute_id: u64,
    sql: &str,
    parameter: Option<&dyn Debug>,
  ) -> TxResult<()> {
    let text = match parameter {
      Some(parameter) => format!("[exec-{}] {} start. sql={} parameter={:?}", tx_execute_id, method, sql, parameter),
      None => format!("[exec-{}] {} start. sql={}", tx_execute_id, method, sql),
    };
    self.println(transaction, &text)
  }

  fn execute_end(
    &self,
    transaction: &Transaction,
    method: TxMethod,
    tx_execute_id: u64,
    _sql: &str,
    result: Option<&dyn Any>,
    occurred: Option<&TxError>,
  ) -> TxResult<()> {
    let what = format!("[exec-{}] {}", tx_execute_id, method);
    match result.and_then(|r| r.downcast_ref::<i64>()) {
      Some(count) if occurred.is_none() => self.println(transaction, &format!("{} end. count={}", what, count)),
      _ => self.println_outcome(transaction, &what, occurred),
    }
  }

  fn commit_start(&self, transaction: &Transaction, commit_type: CommitType) -> TxResult<()> {
    self.println(transaction, &format!("commit start. commit_type={:?}", commit_type))
  }

  fn commit_end(&self, transaction: &Transaction, _commit_type: CommitType, occurred: Option<&TxError>) -> TxResult<()> {
    self.println_outcome(transaction, "commit", occurred)
  }

  fn rollback_start(&self, transaction: &Transaction) -> TxResult<()> {
    self.println(transaction, "rollback start")
  }

  fn rollback_end(&self, transaction: &Transaction, occurred: Option<&TxError>) -> TxResult<()> {
    self.println_outcome(transaction, "rollback", occurred)
  }

  fn close_transaction(&self, transaction: &Transaction, occurred: Option<&TxError>) -> TxResult<()> {
    self.release(transaction.tx_id(), &outcome("transaction close", occurred), || {
      self.open_writer(transaction)
    })
  }
}
