//! IndexSet - a transaction's point-in-time view of one table's visible rows.

use crate::table::{RowIndex, TableId};

/// Immutable set of physical rows visible at `as_of`.
///
/// Owned by the transaction that built it and never shared, so reads need no
/// locking once it exists.
#[derive(Debug)]
pub struct IndexSet {
    table: TableId,
    as_of: u64,
    /// Ascending, unique
    rows: Vec<RowIndex>,
}

impl IndexSet {
    pub(crate) fn new(table: TableId, as_of: u64, mut rows: Vec<RowIndex>) -> Self {
        rows.sort_unstable();
        rows.dedup();
        Self { table, as_of, rows }
    }

    pub fn table(&self) -> TableId {
        self.table
    }

    /// Commit sequence this snapshot reflects.
    pub fn as_of(&self) -> u64 {
        self.as_of
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, row: RowIndex) -> bool {
        self.rows.binary_search(&row).is_ok()
    }

    /// Visible rows in ascending order.
    pub fn rows(&self) -> &[RowIndex] {
        &self.rows
    }

    pub fn iter(&self) -> impl Iterator<Item = RowIndex> + '_ {
        self.rows.iter().copied()
    }

    /// Visible rows are exactly `0..len`.
    pub fn is_identity(&self) -> bool {
        self.rows.last().is_none_or(|last| *last + 1 == self.rows.len())
    }
}
