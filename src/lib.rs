//! Retrying transaction execution on top of a future-based SQL client.
//!
//! A [`Session`] creates [`Transaction`]s whose begin, commit and rollback are
//! asynchronous requests awaited with configured timeouts. A
//! [`TransactionManager`] runs a unit of work in a fresh transaction per
//! attempt, commits it, and retries failures its [`RetryPolicy`] classifies as
//! retryable.

// Make modules public for library usage
pub mod config;
pub mod error;
pub mod session;
pub mod statement;
pub mod tx; // Transactions, the manager and their observers
pub mod types;
pub mod utils; // Timeouts, resolvers and the child resource registry
pub mod wire;

// --- Re-exports ---
pub use config::{SessionOptions, TimeoutKey};
pub use error::{DiagnosticCode, ServerError, TxError, TxResult, TxResultExt};
pub use session::Session;
pub use statement::{QueryResult, SqlQuery, SqlStatement, StatementResult};
pub use tx::{
  FixedRetry, NoRetry, OptionList, RetryPolicy, TmCount, TmEventListener, TmLabelCounter, TmSetting,
  TmSimpleCounter, Transaction, TransactionEventListener, TransactionManager, TxFileLogConfig, TxFileLogger,
};
pub use types::{CommitType, TxMethod, TxOption};
