//! Execution engine seam and its SQLite implementation.

use crate::error::{StorageError, StorageResult};
use rusqlite::types::ValueRef;
use rusqlite::{Batch, Connection, DatabaseName, Statement};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A single cell returned by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(i) => Self::Integer(i),
            ValueRef::Real(f) => Self::Real(f),
            ValueRef::Text(t) => Self::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Self::Blob(b.to_vec()),
        }
    }
}

/// What running a statement produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutput {
    /// Rows of the first statement that returned columns.
    pub rows: Vec<Vec<Value>>,
    /// Rows changed by write statements.
    pub changes: usize,
    /// False when every statement in the batch was read-only. Such a run
    /// is the "no effect" result and is never logged.
    pub has_effect: bool,
}

/// An engine that accepts statements and returns rows or fails.
///
/// Snapshot blobs are opaque: only the engine that produced one knows how
/// to read it.
pub trait ExecutionEngine {
    /// Runs one statement (or a `;`-separated batch). A batch either
    /// applies completely or not at all.
    fn execute(&mut self, statement: &str) -> StorageResult<ExecOutput>;

    /// Runs a read-only statement and returns the rows of the first result
    /// set. Fails with [`StorageError::NotReadOnly`] before stepping any
    /// statement that could modify the dataset.
    fn query(&self, statement: &str) -> StorageResult<Vec<Vec<Value>>>;

    /// Exports the whole dataset.
    fn export_snapshot(&self) -> StorageResult<Vec<u8>>;

    /// Replaces the whole dataset.
    fn import_snapshot(&mut self, blob: &[u8]) -> StorageResult<()>;
}

/// In-memory SQLite engine.
pub struct SqliteEngine {
    conn: Connection,
}

impl SqliteEngine {
    /// Opens an empty in-memory database.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Wraps an existing connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }
}

impl std::fmt::Debug for SqliteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteEngine").finish_non_exhaustive()
    }
}

impl ExecutionEngine for SqliteEngine {
    fn execute(&mut self, statement: &str) -> StorageResult<ExecOutput> {
        // A batch that fails partway must not leave its earlier statements
        // applied: the log only records batches that succeeded.
        let output = if self.conn.is_autocommit() {
            let savepoint = self.conn.savepoint()?;
            let output = run_batch(&savepoint, statement)?;
            savepoint.commit()?;
            output
        } else {
            run_batch(&self.conn, statement)?
        };

        debug!(
            "executed statement: {} rows, {} changes, effect={}",
            output.rows.len(),
            output.changes,
            output.has_effect
        );
        Ok(output)
    }

    fn query(&self, statement: &str) -> StorageResult<Vec<Vec<Value>>> {
        let mut result = None;
        let mut batch = Batch::new(&self.conn, statement);

        while let Some(mut stmt) = batch.next()? {
            if !stmt.readonly() {
                return Err(StorageError::NotReadOnly(statement.to_string()));
            }
            let has_columns = stmt.column_count() > 0;
            let rows = collect_rows(&mut stmt)?;
            if result.is_none() && has_columns {
                result = Some(rows);
            }
        }
        Ok(result.unwrap_or_default())
    }

    fn export_snapshot(&self) -> StorageResult<Vec<u8>> {
        let staging = tempfile::NamedTempFile::new()?;
        self.conn
            .backup(DatabaseName::Main, staging.path(), None)
            .map_err(|e| StorageError::Snapshot(format!("backup failed: {e}")))?;
        Ok(std::fs::read(staging.path())?)
    }

    fn import_snapshot(&mut self, blob: &[u8]) -> StorageResult<()> {
        let staging = tempfile::NamedTempFile::new()?;
        std::fs::write(staging.path(), blob)?;
        self.conn
            .restore(
                DatabaseName::Main,
                staging.path(),
                None::<fn(rusqlite::backup::Progress)>,
            )
            .map_err(|e| StorageError::Snapshot(format!("restore failed: {e}")))?;
        Ok(())
    }
}

fn run_batch(conn: &Connection, statement: &str) -> StorageResult<ExecOutput> {
    let mut output = ExecOutput::default();
    let mut rows_taken = false;
    let mut batch = Batch::new(conn, statement);

    while let Some(mut stmt) = batch.next()? {
        if !stmt.readonly() {
            output.has_effect = true;
        }

        if stmt.column_count() == 0 {
            output.changes += stmt.execute([])?;
            continue;
        }

        let collected = collect_rows(&mut stmt)?;
        if !rows_taken {
            output.rows = collected;
            rows_taken = true;
        }
    }
    Ok(output)
}

fn collect_rows(stmt: &mut Statement<'_>) -> StorageResult<Vec<Vec<Value>>> {
    let column_count = stmt.column_count();
    let mut rows = stmt.query([])?;
    let mut collected = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            values.push(Value::from(row.get_ref(i)?));
        }
        collected.push(values);
    }
    Ok(collected)
}
