//! Row lifecycle states.

use serde::{Deserialize, Serialize};

/// 행 생명주기 상태
///
/// 전이는 항상 앞으로만 진행됩니다:
/// `Uncommitted → CommittedAdded → CommittedRemoved → DeletedReclaimable`.
/// `Error`는 종단 상태이며 복구되지 않습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowState {
    /// Added by a transaction that has not committed yet
    Uncommitted,
    /// Visible to snapshots that start after the adding commit
    CommittedAdded,
    /// Removed by a commit; older snapshots may still see it
    CommittedRemoved,
    /// No live snapshot can see it; waiting for physical reclamation
    DeletedReclaimable,
    /// Terminal; the stored row could not be read back
    Error,
}

impl RowState {
    /// The only state that may follow this one.
    pub fn successor(self) -> Option<RowState> {
        match self {
            RowState::Uncommitted => Some(RowState::CommittedAdded),
            RowState::CommittedAdded => Some(RowState::CommittedRemoved),
            RowState::CommittedRemoved => Some(RowState::DeletedReclaimable),
            RowState::DeletedReclaimable | RowState::Error => None,
        }
    }

    pub fn can_transition_to(self, next: RowState) -> bool {
        self.successor() == Some(next)
    }

    pub fn is_reclaimable(self) -> bool {
        self == RowState::DeletedReclaimable
    }
}
