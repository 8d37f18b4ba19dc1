//! Operation log entries.
//!
//! A replica records every write statement it executed as a [`LogEntry`].
//! Entries are immutable once appended and are exchanged between peers
//! verbatim, so the wire shape matters:
//!
//! ```json
//! { "timestamp": 0, "operationKind": "exec", "statement": "INSERT ..." }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of operation produced a log entry.
///
/// Only `exec` is produced locally. Any other kind found in a remote log is
/// kept as-is so it survives a round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OperationKind {
    /// A statement run through the execution engine.
    Exec,
    /// A kind this build does not know about.
    Other(String),
}

impl OperationKind {
    /// Returns the wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Exec => "exec",
            Self::Other(kind) => kind,
        }
    }
}

impl From<String> for OperationKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "exec" => Self::Exec,
            _ => Self::Other(s),
        }
    }
}

impl From<OperationKind> for String {
    fn from(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Exec => "exec".to_string(),
            OperationKind::Other(s) => s,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single executed write operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Local sequence number. Dense and zero-based while only local execs
    /// append; replay from a peer may break density.
    pub timestamp: u64,
    /// The operation kind.
    pub operation_kind: OperationKind,
    /// The statement text handed to the engine.
    pub statement: String,
}

impl LogEntry {
    /// Creates an `exec` entry.
    #[must_use]
    pub fn exec(timestamp: u64, statement: impl Into<String>) -> Self {
        Self {
            timestamp,
            operation_kind: OperationKind::Exec,
            statement: statement.into(),
        }
    }

    /// Serializes the entry to its JSON wire form.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses an entry from its JSON wire form.
    pub fn from_json(s: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}
