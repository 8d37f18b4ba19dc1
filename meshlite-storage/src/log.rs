//! The append-only operation log.

use meshlite_types::{LogEntry, OperationKind};

/// Ordered record of executed write operations, owned by one replica.
///
/// Timestamps come from a local counter that starts at 0 and grows by one
/// per append. The counter is per replica, not a global order: two replicas
/// writing concurrently will hand out the same timestamps.
#[derive(Debug, Clone, Default)]
pub struct OperationLog {
    entries: Vec<LogEntry>,
    next_timestamp: u64,
}

impl OperationLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry stamped with the next counter value.
    pub fn append(&mut self, operation_kind: OperationKind, statement: impl Into<String>) -> &LogEntry {
        let timestamp = self.next_timestamp;
        self.next_timestamp += 1;
        self.entries.push(LogEntry {
            timestamp,
            operation_kind,
            statement: statement.into(),
        });
        &self.entries[self.entries.len() - 1]
    }

    /// Timestamp of the last entry, if any.
    pub fn local_max(&self) -> Option<u64> {
        self.entries.last().map(|e| e.timestamp)
    }

    /// All entries in append order.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
