//! Storage module - the durability backend behind each row ledger.
//!
//! Ledgers depend only on the [`RowStore`] trait, never on a concrete medium.
//! The persisted layout is an internal concern of each implementation.

pub mod memory_store;
pub mod sled_store;

pub use memory_store::InMemoryRowStore;
pub use sled_store::SledRowStore;

use crate::error::LedgerResult;
use crate::table::{RowIndex, RowState, TableId, Value};
use serde::{Deserialize, Serialize};

/// Core storage interface - read/write by (table, row) offset.
///
/// # Contract
///
/// - `put_row`: Upsert semantics - overwrites an existing slot.
/// - `get_row`: Returns `None` for an empty slot.
/// - `remove_row`: Returns `true` if the slot existed.
/// - `scan_rows`: Returns slots in row order.
/// - Any failure of the medium surfaces as `LedgerError::StorageFault`.
pub trait RowStore: Send + Sync {
    /// Write an encoded row into a slot.
    fn put_row(&self, table: TableId, row: RowIndex, bytes: &[u8]) -> LedgerResult<()>;

    /// Read an encoded row.
    fn get_row(&self, table: TableId, row: RowIndex) -> LedgerResult<Option<Vec<u8>>>;

    /// Free a slot.
    fn remove_row(&self, table: TableId, row: RowIndex) -> LedgerResult<bool>;

    /// All occupied slots of a table, ordered by row index.
    fn scan_rows(&self, table: TableId) -> LedgerResult<Vec<(RowIndex, Vec<u8>)>>;

    /// Store a per-table metadata entry (schema, unique id counter).
    fn put_meta(&self, table: TableId, key: &str, bytes: &[u8]) -> LedgerResult<()>;

    /// Read a per-table metadata entry.
    fn get_meta(&self, table: TableId, key: &str) -> LedgerResult<Option<Vec<u8>>>;

    /// Remove every row and metadata entry of a table.
    fn drop_table(&self, table: TableId) -> LedgerResult<()>;

    /// All tables with persisted metadata.
    fn table_ids(&self) -> LedgerResult<Vec<TableId>>;

    /// Flush any buffered data to durable storage.
    fn flush(&self) -> LedgerResult<()>;
}

/// Metadata key of the persisted schema.
pub const META_SCHEMA: &str = "schema";
/// Metadata key of the unique id counter.
pub const META_UNIQUE_ID: &str = "unique_id";

#[derive(Serialize)]
struct StoredRowRef<'a> {
    state: RowState,
    values: &'a [Value],
}

/// Decoded form of a persisted row slot.
#[derive(Debug, Deserialize)]
pub struct StoredRow {
    pub state: RowState,
    pub values: Vec<Value>,
}

/// Encode a row slot (bincode).
pub fn encode_row(state: RowState, values: &[Value]) -> LedgerResult<Vec<u8>> {
    Ok(bincode::serialize(&StoredRowRef { state, values })?)
}

/// Decode a row slot written by [`encode_row`].
pub fn decode_row(bytes: &[u8]) -> LedgerResult<StoredRow> {
    Ok(bincode::deserialize(bytes)?)
}
