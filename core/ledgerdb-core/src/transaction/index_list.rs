//! Versioned index list - commit-ordered change registries of one table.
//!
//! Appended at the back on commit, consumed from the front on merge.

use crate::error::{LedgerError, LedgerResult};
use crate::transaction::registry::ChangeRegistry;
use std::collections::VecDeque;
use std::sync::Arc;

/// Ordered sequence of [`ChangeRegistry`] values with strictly increasing
/// commit sequence numbers.
#[derive(Debug, Default)]
pub struct VersionedIndexList {
    registries: VecDeque<Arc<ChangeRegistry>>,
    /// Highest commit sequence ever appended
    last_commit_seq: u64,
    /// Highest sequence passed to a merge; older snapshots cannot be rebuilt
    merged_through: u64,
}

impl VersionedIndexList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a list whose history before `commit_seq` is already merged.
    pub fn starting_at(commit_seq: u64) -> Self {
        Self {
            registries: VecDeque::new(),
            last_commit_seq: commit_seq,
            merged_through: commit_seq,
        }
    }

    /// Append a registry at the tail.
    pub fn append_registry(&mut self, registry: ChangeRegistry) -> LedgerResult<()> {
        let got = registry.commit_seq();
        if got <= self.last_commit_seq {
            return Err(LedgerError::OutOfOrderCommit {
                last: self.last_commit_seq,
                got,
            });
        }
        self.last_commit_seq = got;
        self.registries.push_back(Arc::new(registry));
        Ok(())
    }

    /// Remove the tail registry of a commit that failed on another table.
    ///
    /// The sequence number stays consumed: `last_commit_seq` is unchanged.
    pub fn revert_last(&mut self, commit_seq: u64) -> LedgerResult<Arc<ChangeRegistry>> {
        let mismatch = LedgerError::OutOfOrderCommit {
            last: self.last_commit_seq,
            got: commit_seq,
        };
        if self.registries.back().map(|r| r.commit_seq()) != Some(commit_seq) {
            return Err(mismatch);
        }
        self.registries.pop_back().ok_or(mismatch)
    }

    /// Remove and return the prefix of registries with commit sequence <= `commit_seq`.
    pub fn drain_up_to(&mut self, commit_seq: u64) -> Vec<Arc<ChangeRegistry>> {
        let mut drained = Vec::new();
        while let Some(front) = self.registries.front() {
            if front.commit_seq() > commit_seq {
                break;
            }
            if let Some(reg) = self.registries.pop_front() {
                drained.push(reg);
            }
        }
        self.merged_through = self.merged_through.max(commit_seq);
        drained
    }

    /// Discard registries no live snapshot needs. Returns whether the list is now empty.
    pub fn merge_up_to(&mut self, commit_seq: u64) -> bool {
        self.drain_up_to(commit_seq);
        self.registries.is_empty()
    }

    /// Registries with commit sequence >= `commit_seq`, in commit order.
    pub fn changes_since(&self, commit_seq: u64) -> Vec<Arc<ChangeRegistry>> {
        let start = self
            .registries
            .partition_point(|r| r.commit_seq() < commit_seq);
        self.registries.range(start..).cloned().collect()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Arc<ChangeRegistry>> {
        self.registries.iter()
    }

    pub fn last_commit_seq(&self) -> u64 {
        self.last_commit_seq
    }

    pub fn merged_through(&self) -> u64 {
        self.merged_through
    }

    pub fn len(&self) -> usize {
        self.registries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }

    /// Unmerged changes exist; the sweeper's safety gate stays closed.
    pub fn has_pending(&self) -> bool {
        !self.registries.is_empty()
    }
}
