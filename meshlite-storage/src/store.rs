//! Log store: engine + log, snapshot transfer and suffix sync.

use crate::engine::{ExecOutput, ExecutionEngine, SqliteEngine, Value};
use crate::error::StorageResult;
use crate::log::OperationLog;
use meshlite_types::{LogEntry, OperationKind};
use tracing::{debug, info, warn};

/// Outcome of replaying a remote log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Our last timestamp before the sync.
    pub local_max: Option<u64>,
    /// Largest timestamp in the remote log.
    pub remote_max: Option<u64>,
    /// Remote entries run through `exec`.
    pub replayed: usize,
}

/// A replica's engine paired with its operation log.
///
/// The two are not transactionally linked. Importing a snapshot replaces
/// the engine state and leaves the log untouched, so after an import the
/// log no longer describes how the data came to be.
pub struct LogStore<E: ExecutionEngine = SqliteEngine> {
    engine: E,
    log: OperationLog,
}

impl LogStore<SqliteEngine> {
    /// Opens a store over a fresh in-memory SQLite database.
    pub fn open_in_memory() -> StorageResult<Self> {
        Ok(Self::new(SqliteEngine::open_in_memory()?))
    }
}

impl<E: ExecutionEngine> LogStore<E> {
    /// Creates a store over the given engine with an empty log.
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            log: OperationLog::new(),
        }
    }

    /// Runs a statement and logs it when it had an effect.
    pub fn exec(&mut self, statement: &str) -> StorageResult<Vec<Vec<Value>>> {
        let ExecOutput {
            rows, has_effect, ..
        } = self.engine.execute(statement)?;

        if has_effect {
            let entry = self.log.append(OperationKind::Exec, statement);
            debug!("appended log entry {}", entry.timestamp);
        }
        Ok(rows)
    }

    /// Runs a read against the engine. Never logs; statements that could
    /// modify the dataset are refused before they run.
    pub fn query(&self, statement: &str) -> StorageResult<Vec<Vec<Value>>> {
        self.engine.query(statement)
    }

    /// Exports the engine's dataset. Independent of the log.
    pub fn snapshot_export(&self) -> StorageResult<Vec<u8>> {
        self.engine.export_snapshot()
    }

    /// Replaces the engine's dataset. The log is neither rolled back nor
    /// validated against the new state.
    pub fn snapshot_import(&mut self, blob: &[u8]) -> StorageResult<()> {
        self.engine.import_snapshot(blob)?;
        info!(
            "imported {} byte snapshot; log left at {} entries",
            blob.len(),
            self.log.len()
        );
        Ok(())
    }

    /// Returns a copy of the full log for transmission to a peer.
    pub fn export_log(&self) -> Vec<LogEntry> {
        self.log.entries().to_vec()
    }

    /// Borrows the log.
    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    /// Borrows the engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Replays every remote entry newer than our last timestamp.
    ///
    /// Correct only while the two logs share a prefix and differ in a single
    /// trailing suffix. Entries written independently at the same timestamp
    /// on two replicas are not detected: the remote one is either skipped or
    /// replayed under a new local timestamp, and the replicas may stay
    /// diverged.
    ///
    /// Replay is sequential and stops at the first failing statement.
    pub fn sync_with(&mut self, remote_log: &[LogEntry]) -> StorageResult<SyncReport> {
        let local_max = self.log.local_max();
        let remote_max = remote_log.iter().map(|e| e.timestamp).max();
        let mut report = SyncReport {
            local_max,
            remote_max,
            replayed: 0,
        };

        let Some(remote_max) = remote_max else {
            return Ok(report);
        };
        if local_max.is_some_and(|local| remote_max <= local) {
            debug!("remote log holds nothing past {local_max:?}");
            return Ok(report);
        }

        for entry in remote_log {
            if local_max.is_some_and(|local| entry.timestamp <= local) {
                continue;
            }
            if entry.operation_kind != OperationKind::Exec {
                warn!(
                    "replaying entry {} of kind {} as exec",
                    entry.timestamp, entry.operation_kind
                );
            }
            self.exec(&entry.statement)?;
            report.replayed += 1;
        }

        info!(
            "replayed {} remote entries (local max {local_max:?}, remote max {remote_max})",
            report.replayed
        );
        Ok(report)
    }
}
