//! Transactions and the retry-driven transaction manager.
//!
//! [`Transaction`] wraps one server-side transaction. [`TransactionManager`]
//! drives a unit of work through as many transactions as its
//! [`RetryPolicy`] allows.

pub mod counter;
pub mod event;
pub mod file_log;
pub mod manager;
pub mod manager_event;
pub mod policies;
pub mod transaction;

pub use counter::{TmCount, TmCountAtomic, TmLabelCounter, TmSimpleCounter};
pub use event::{before_commit_listener, commit_listener, rollback_listener, TransactionEventListener};
pub use file_log::{TxFileLogConfig, TxFileLogDirectoryType, TxFileLogger};
pub use manager::{TmSetting, TransactionManager};
pub use manager_event::TmEventListener;
pub use policies::{FixedRetry, NoRetry, OptionList, RetryPolicy};
pub use transaction::Transaction;
