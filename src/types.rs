use serde::{Deserialize, Serialize};
use std::fmt;

// --- Transaction Option ---

/// Concurrency control mode of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxKind {
  /// Short optimistic transaction; conflicts surface at commit.
  Occ,
  /// Long pessimistic transaction that declares the tables it will write.
  Ltx { write_preserve: Vec<String> },
  /// Read-only transaction.
  Rtx,
}

/// Immutable definition of a transaction: its mode plus a free-text label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxOption {
  kind: TxKind,
  label: Option<String>,
}

impl TxOption {
  pub fn occ() -> Self {
    Self {
      kind: TxKind::Occ,
      label: None,
    }
  }

  pub fn ltx<I, S>(write_preserve: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      kind: TxKind::Ltx {
        write_preserve: write_preserve.into_iter().map(Into::into).collect(),
      },
      label: None,
    }
  }

  pub fn rtx() -> Self {
    Self {
      kind: TxKind::Rtx,
      label: None,
    }
  }

  /// Returns a copy of this option carrying `label`.
  pub fn label(mut self, label: impl Into<String>) -> Self {
    self.label = Some(label.into());
    self
  }

  pub fn label_str(&self) -> Option<&str> {
    self.label.as_deref()
  }

  pub fn kind(&self) -> &TxKind {
    &self.kind
  }

  pub fn type_name(&self) -> &'static str {
    match self.kind {
      TxKind::Occ => "OCC",
      TxKind::Ltx { .. } => "LTX",
      TxKind::Rtx => "RTX",
    }
  }

  pub fn is_ltx(&self) -> bool {
    matches!(self.kind, TxKind::Ltx { .. })
  }

  /// Tables declared for writing; empty for anything but LTX.
  pub fn write_preserve(&self) -> &[String] {
    match &self.kind {
      TxKind::Ltx { write_preserve } => write_preserve,
      _ => &[],
    }
  }
}

impl fmt::Display for TxOption {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}{{", self.type_name())?;
    if let Some(label) = &self.label {
      write!(f, "label={}", label)?;
    }
    if let TxKind::Ltx { write_preserve } = &self.kind {
      if self.label.is_some() {
        f.write_str(", ")?;
      }
      write!(f, "write_preserve={:?}", write_preserve)?;
    }
    f.write_str("}")
  }
}

// --- Commit Type ---

/// Durability the server must reach before acknowledging a commit. Passed through opaquely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CommitType {
  /// Whatever the server is configured to use.
  #[default]
  Default,
  Accepted,
  Available,
  Stored,
  Propagated,
}

// --- Transaction Method ---

/// The transaction operation a failure or an event originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxMethod {
  ExecuteQuery,
  ExecuteStatement,
  ExecuteForEach,
  ExecuteGetList,
  ExecuteFindRecord,
  ExecuteGetCount,
  Commit,
  Rollback,
}

impl TxMethod {
  pub fn method_name(&self) -> &'static str {
    match self {
      TxMethod::ExecuteQuery => "execute_query",
      TxMethod::ExecuteStatement => "execute_statement",
      TxMethod::ExecuteForEach => "execute_and_for_each",
      TxMethod::ExecuteGetList => "execute_and_get_list",
      TxMethod::ExecuteFindRecord => "execute_and_find_record",
      TxMethod::ExecuteGetCount => "execute_and_get_count",
      TxMethod::Commit => "commit",
      TxMethod::Rollback => "rollback",
    }
  }
}

impl fmt::Display for TxMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.method_name())
  }
}
