//! Change registry - the immutable record of one commit's row changes.

use crate::table::RowIndex;
use smallvec::SmallVec;

/// Row index list; most commits touch a handful of rows.
pub type RowList = SmallVec<[RowIndex; 8]>;

/// One committed transaction's insertions and removals for a single table.
///
/// Created once at commit and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRegistry {
    commit_seq: u64,
    added: RowList,
    removed: RowList,
}

impl ChangeRegistry {
    pub fn new(
        commit_seq: u64,
        added: impl IntoIterator<Item = RowIndex>,
        removed: impl IntoIterator<Item = RowIndex>,
    ) -> Self {
        let mut added: RowList = added.into_iter().collect();
        let mut removed: RowList = removed.into_iter().collect();
        added.sort_unstable();
        added.dedup();
        removed.sort_unstable();
        removed.dedup();
        Self {
            commit_seq,
            added,
            removed,
        }
    }

    pub fn commit_seq(&self) -> u64 {
        self.commit_seq
    }

    /// Rows this commit added, ascending.
    pub fn added(&self) -> &[RowIndex] {
        &self.added
    }

    /// Rows this commit removed, ascending.
    pub fn removed(&self) -> &[RowIndex] {
        &self.removed
    }

    pub fn is_added(&self, row: RowIndex) -> bool {
        self.added.binary_search(&row).is_ok()
    }

    pub fn is_removed(&self, row: RowIndex) -> bool {
        self.removed.binary_search(&row).is_ok()
    }

    /// First of `rows` this commit also removed (write-write conflict).
    pub fn conflicts_with(&self, rows: &[RowIndex]) -> Option<RowIndex> {
        rows.iter().copied().find(|r| self.is_removed(*r))
    }
}
