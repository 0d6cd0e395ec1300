//! Error types for the LedgerDB storage core.
//!
//! All public APIs return `LedgerResult<T>` - no panics in library code.

use crate::table::{RowIndex, RowState, TableId};
use thiserror::Error;

/// Unified error type for all LedgerDB operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Lifecycle transition that does not strictly follow the current state
    #[error("invalid state transition for row {row}: {from:?} -> {to:?}")]
    InvalidStateTransition {
        row: RowIndex,
        from: RowState,
        to: RowState,
    },

    /// Same row marked for deletion twice before a sweep
    #[error("row {row} of table {table} already marked for deletion")]
    DuplicateDeletionMark { table: TableId, row: RowIndex },

    /// Change registry appended with a non-increasing commit sequence
    #[error("out of order commit: last={last}, got={got}")]
    OutOfOrderCommit { last: u64, got: u64 },

    /// Root lock released more times than it was taken
    #[error("root lock of table {table} released below zero")]
    UnlockBelowZero { table: TableId },

    /// Row index is out of range or no longer valid
    #[error("row {row} not found in table {table}")]
    RowNotFound { table: TableId, row: RowIndex },

    /// Row was physically reclaimed by the sweeper
    #[error("row {row} of table {table} has been reclaimed")]
    RowReclaimed { table: TableId, row: RowIndex },

    /// Row was loaded in the terminal error state
    #[error("row {row} of table {table} is corrupt")]
    CorruptRow { table: TableId, row: RowIndex },

    /// Underlying storage medium rejected an operation
    #[error("storage fault: {0}")]
    StorageFault(String),

    /// Column index outside of the table width
    #[error("column {column} out of range (width {width})")]
    ColumnOutOfRange { column: usize, width: usize },

    /// Logical row index outside of a view's row count
    #[error("row {row} out of range (row count {count})")]
    RowOutOfRange { row: usize, count: usize },

    /// Ancestor table number outside of a composition
    #[error("ancestor {table_num} out of range ({ancestors} ancestors)")]
    AncestorOutOfRange { table_num: usize, ancestors: usize },

    /// Row width does not match the table schema
    #[error("schema mismatch: expected {expected} columns, got {actual}")]
    SchemaMismatch { expected: usize, actual: usize },

    /// Requested table does not exist
    #[error("table {0} not found")]
    TableNotFound(TableId),

    /// Table has been closed or dropped
    #[error("table {0} is closed")]
    TableClosed(TableId),

    /// Snapshot predates the oldest retained change registry
    #[error("snapshot at {requested} is older than merged history ({merged_through})")]
    SnapshotTooOld { requested: u64, merged_through: u64 },

    /// Write-write conflict detected at commit time
    #[error("transaction conflict on row {row} of table {table}")]
    TransactionConflict { table: TableId, row: RowIndex },

    /// Operation on a transaction that already committed or rolled back
    #[error("transaction already finished")]
    TransactionFinished,

    /// Invalid or unreadable configuration
    #[error("config error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Standard I/O error
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Result type alias for all LedgerDB operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    /// Caller bug; fatal to the operation, never retried.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidStateTransition { .. }
                | LedgerError::DuplicateDeletionMark { .. }
                | LedgerError::OutOfOrderCommit { .. }
                | LedgerError::UnlockBelowZero { .. }
        )
    }

    /// The caller's snapshot expired; the row index is no longer usable.
    pub fn is_stale_reference(&self) -> bool {
        matches!(
            self,
            LedgerError::RowNotFound { .. }
                | LedgerError::RowReclaimed { .. }
                | LedgerError::SnapshotTooOld { .. }
        )
    }
}

// From 구현들
impl From<sled::Error> for LedgerError {
    fn from(err: sled::Error) -> Self {
        LedgerError::StorageFault(err.to_string())
    }
}

impl From<bincode::Error> for LedgerError {
    fn from(err: bincode::Error) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Config(err.to_string())
    }
}
