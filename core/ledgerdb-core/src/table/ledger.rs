//! Row Ledger - physical row storage and lifecycle state of one table.
//!
//! The ledger is the sole owner of physical row slots. Everything else refers
//! to rows by [`RowIndex`] and to history by commit sequence number.
//!
//! # 동시성
//!
//! 모든 구조 변경(상태 전이, 레지스트리 추가/병합, 회수)은 테이블당 하나의
//! `RwLock` 임계 구역을 통해 직렬화됩니다. 이미 만들어진 [`IndexSet`]은
//! 불변이므로 읽기에 잠금이 필요하지 않습니다.

use crate::error::{LedgerError, LedgerResult};
use crate::storage::{self, META_SCHEMA, META_UNIQUE_ID, RowStore};
use crate::table::root_lock::{RootLock, RootLockGuard};
use crate::table::{RowIndex, RowState, TableId, TableSchema, Value};
use crate::transaction::gc::SweeperState;
use crate::transaction::index_list::VersionedIndexList;
use crate::transaction::index_set::IndexSet;
use crate::transaction::registry::ChangeRegistry;
use ahash::AHashSet;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Metadata key of the last commit applied to the table.
pub const META_COMMIT_SEQ: &str = "commit_seq";

/// In-memory copy of one physical row.
#[derive(Debug, Clone)]
pub(crate) struct RowSlot {
    pub(crate) state: RowState,
    pub(crate) values: Arc<[Value]>,
}

/// State guarded by the ledger's critical section.
pub(crate) struct LedgerInner {
    pub(crate) closed: bool,
    /// `None` marks a physically reclaimed slot; indices are never reused
    pub(crate) slots: Vec<Option<RowSlot>>,
    pub(crate) index_list: VersionedIndexList,
    pub(crate) sweeper: SweeperState,
    pub(crate) unique_id: u64,
}

impl LedgerInner {
    pub(crate) fn slot(&self, table: TableId, row: RowIndex) -> LedgerResult<&RowSlot> {
        match self.slots.get(row) {
            Some(Some(slot)) => Ok(slot),
            _ => Err(LedgerError::RowNotFound { table, row }),
        }
    }
}

/// Physical row storage for one table.
pub struct RowLedger {
    id: TableId,
    schema: Arc<TableSchema>,
    store: Arc<dyn RowStore>,
    root_lock: Arc<RootLock>,
    pub(crate) inner: RwLock<LedgerInner>,
}

impl std::fmt::Debug for RowLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowLedger")
            .field("id", &self.id)
            .field("schema", &self.schema.name)
            .field("root_locks", &self.root_lock.count())
            .finish()
    }
}

impl RowLedger {
    /// Create a new, empty table and persist its schema.
    pub fn create(
        id: TableId,
        schema: TableSchema,
        store: Arc<dyn RowStore>,
    ) -> LedgerResult<Self> {
        store.put_meta(id, META_SCHEMA, &bincode::serialize(&schema)?)?;
        store.put_meta(id, META_UNIQUE_ID, &0u64.to_le_bytes())?;
        info!(table = %id, name = %schema.name, "table created");

        Ok(Self {
            id,
            schema: Arc::new(schema),
            store,
            root_lock: Arc::new(RootLock::new(id)),
            inner: RwLock::new(LedgerInner {
                closed: false,
                slots: Vec::new(),
                index_list: VersionedIndexList::new(),
                sweeper: SweeperState::default(),
                unique_id: 0,
            }),
        })
    }

    /// Reopen a table from its persisted rows.
    ///
    /// Rows left `Uncommitted` by a crash are dropped, rows the last run
    /// removed become reclaimable, and undecodable rows load in
    /// [`RowState::Error`].
    pub fn open(
        id: TableId,
        schema: TableSchema,
        store: Arc<dyn RowStore>,
        full_sweep: bool,
    ) -> LedgerResult<Self> {
        let stored = store.scan_rows(id)?;
        let len = stored.last().map(|(i, _)| i + 1).unwrap_or(0);
        let mut slots: Vec<Option<RowSlot>> = vec![None; len];
        let mut discarded = 0usize;

        for (row, bytes) in stored {
            let slot = match storage::decode_row(&bytes) {
                Ok(decoded) if decoded.values.len() != schema.width() => RowSlot {
                    state: RowState::Error,
                    values: Arc::from(Vec::new()),
                },
                Ok(decoded) => match decoded.state {
                    RowState::Uncommitted => {
                        store.remove_row(id, row)?;
                        discarded += 1;
                        continue;
                    }
                    // No snapshot survives a restart.
                    RowState::CommittedRemoved => RowSlot {
                        state: RowState::DeletedReclaimable,
                        values: Arc::from(decoded.values),
                    },
                    state => RowSlot {
                        state,
                        values: Arc::from(decoded.values),
                    },
                },
                Err(e) => {
                    warn!(table = %id, row, "row failed to decode: {}", e);
                    RowSlot {
                        state: RowState::Error,
                        values: Arc::from(Vec::new()),
                    }
                }
            };
            slots[row] = Some(slot);
        }

        let unique_id = read_u64_meta(store.as_ref(), id, META_UNIQUE_ID)?;
        let commit_seq = read_u64_meta(store.as_ref(), id, META_COMMIT_SEQ)?;

        let mut sweeper = SweeperState::default();
        sweeper.full_sweep_due = full_sweep;

        info!(
            table = %id,
            rows = slots.len(),
            discarded,
            commit_seq,
            "table opened"
        );

        Ok(Self {
            id,
            schema: Arc::new(schema),
            store,
            root_lock: Arc::new(RootLock::new(id)),
            inner: RwLock::new(LedgerInner {
                closed: false,
                slots,
                index_list: VersionedIndexList::starting_at(commit_seq),
                sweeper,
                unique_id,
            }),
        })
    }

    /// Read the schema persisted by [`RowLedger::create`].
    pub fn load_schema(store: &dyn RowStore, id: TableId) -> LedgerResult<TableSchema> {
        let bytes = store
            .get_meta(id, META_SCHEMA)?
            .ok_or(LedgerError::TableNotFound(id))?;
        Ok(bincode::deserialize(&bytes)?)
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    pub(crate) fn store(&self) -> &Arc<dyn RowStore> {
        &self.store
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }

    /// Close the table. Later mutations fail with `TableClosed` and sweeps
    /// become no-ops.
    pub fn close(&self) {
        let mut inner = self.inner.write();
        if !inner.closed {
            inner.closed = true;
            inner.sweeper.pending.clear();
            info!(table = %self.id, "table closed");
        }
    }

    fn ensure_open(&self, inner: &LedgerInner) -> LedgerResult<()> {
        if inner.closed {
            Err(LedgerError::TableClosed(self.id))
        } else {
            Ok(())
        }
    }

    /// Append a new row in `Uncommitted` state.
    pub fn add_row(&self, values: Vec<Value>) -> LedgerResult<RowIndex> {
        if values.len() != self.schema.width() {
            return Err(LedgerError::SchemaMismatch {
                expected: self.schema.width(),
                actual: values.len(),
            });
        }

        let mut inner = self.inner.write();
        self.ensure_open(&inner)?;

        let row = inner.slots.len();
        let bytes = storage::encode_row(RowState::Uncommitted, &values)?;
        self.store.put_row(self.id, row, &bytes)?;

        inner.slots.push(Some(RowSlot {
            state: RowState::Uncommitted,
            values: Arc::from(values),
        }));
        Ok(row)
    }

    /// Advance a row's lifecycle by exactly one step.
    pub fn transition(&self, row: RowIndex, new_state: RowState) -> LedgerResult<()> {
        let mut inner = self.inner.write();
        self.ensure_open(&inner)?;
        self.transition_locked(&mut inner, row, new_state)
    }

    fn transition_locked(
        &self,
        inner: &mut LedgerInner,
        row: RowIndex,
        new_state: RowState,
    ) -> LedgerResult<()> {
        let slot = inner.slot(self.id, row)?;
        if !slot.state.can_transition_to(new_state) {
            return Err(LedgerError::InvalidStateTransition {
                row,
                from: slot.state,
                to: new_state,
            });
        }
        self.persist_state(inner, row, new_state)
    }

    /// Write a new state for an existing slot, then apply it in memory.
    fn persist_state(
        &self,
        inner: &mut LedgerInner,
        row: RowIndex,
        state: RowState,
    ) -> LedgerResult<()> {
        let bytes = storage::encode_row(state, &inner.slot(self.id, row)?.values)?;
        self.store.put_row(self.id, row, &bytes)?;
        if let Some(Some(slot)) = inner.slots.get_mut(row) {
            slot.state = state;
        }
        Ok(())
    }

    pub fn row_state(&self, row: RowIndex) -> LedgerResult<RowState> {
        Ok(self.inner.read().slot(self.id, row)?.state)
    }

    fn live_slot(&self, inner: &LedgerInner, row: RowIndex) -> LedgerResult<RowSlot> {
        match inner.slots.get(row) {
            None => Err(LedgerError::RowNotFound {
                table: self.id,
                row,
            }),
            Some(None) => Err(LedgerError::RowReclaimed {
                table: self.id,
                row,
            }),
            Some(Some(slot)) if slot.state == RowState::Error => Err(LedgerError::CorruptRow {
                table: self.id,
                row,
            }),
            Some(Some(slot)) => Ok(slot.clone()),
        }
    }

    /// Read one cell of a row that has not been physically reclaimed.
    ///
    /// `RowReclaimed` means the caller read without a root lock or outside its
    /// snapshot; treat it as fatal.
    pub fn get_value(&self, row: RowIndex, column: usize) -> LedgerResult<Value> {
        let width = self.schema.width();
        if column >= width {
            return Err(LedgerError::ColumnOutOfRange { column, width });
        }
        let inner = self.inner.read();
        let slot = self.live_slot(&inner, row)?;
        Ok(slot.values[column].clone())
    }

    /// Read a whole row.
    pub fn get_row(&self, row: RowIndex) -> LedgerResult<Arc<[Value]>> {
        let inner = self.inner.read();
        Ok(self.live_slot(&inner, row)?.values)
    }

    /// Physical slots ever allocated, reclaimed ones included.
    pub fn row_count(&self) -> usize {
        self.inner.read().slots.len()
    }

    /// Slots not yet physically reclaimed.
    pub fn live_row_count(&self) -> usize {
        self.inner.read().slots.iter().filter(|s| s.is_some()).count()
    }

    /// Build the snapshot of rows visible at `as_of_commit_seq`.
    ///
    /// Base visibility is the committed row set with every unmerged registry
    /// unapplied newest-first; registries at or before `as_of_commit_seq` are then replayed
    /// in commit order. Does not modify the ledger.
    pub fn create_index_set(&self, as_of_commit_seq: u64) -> LedgerResult<IndexSet> {
        let inner = self.inner.read();
        self.ensure_open(&inner)?;

        let merged_through = inner.index_list.merged_through();
        if as_of_commit_seq < merged_through {
            return Err(LedgerError::SnapshotTooOld {
                requested: as_of_commit_seq,
                merged_through,
            });
        }

        let mut visible: AHashSet<RowIndex> = inner
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match s {
                Some(slot) if slot.state == RowState::CommittedAdded => Some(i),
                _ => None,
            })
            .collect();

        for reg in inner.index_list.iter().rev() {
            for row in reg.added() {
                visible.remove(row);
            }
            visible.extend(reg.removed().iter().copied());
        }

        for reg in inner
            .index_list
            .iter()
            .take_while(|r| r.commit_seq() <= as_of_commit_seq)
        {
            visible.extend(reg.added().iter().copied());
            for row in reg.removed() {
                visible.remove(row);
            }
        }

        Ok(IndexSet::new(
            self.id,
            as_of_commit_seq,
            visible.into_iter().collect(),
        ))
    }

    /// Return the current unique id and advance the counter.
    pub fn next_unique_id(&self) -> LedgerResult<u64> {
        let mut inner = self.inner.write();
        self.ensure_open(&inner)?;
        let id = inner.unique_id;
        self.store
            .put_meta(self.id, META_UNIQUE_ID, &(id + 1).to_le_bytes())?;
        inner.unique_id = id + 1;
        Ok(id)
    }

    /// Overwrite the unique id counter (restore path).
    pub fn set_unique_id(&self, value: u64) -> LedgerResult<()> {
        let mut inner = self.inner.write();
        self.ensure_open(&inner)?;
        self.store
            .put_meta(self.id, META_UNIQUE_ID, &value.to_le_bytes())?;
        inner.unique_id = value;
        Ok(())
    }

    /// Pin the current physical rows until the guard is dropped.
    pub fn lock_root(&self) -> RootLockGuard {
        self.root_lock.acquire()
    }

    /// Release a lock kept with [`RootLockGuard::into_raw`].
    pub fn unlock_root(&self) -> LedgerResult<()> {
        self.root_lock.release()
    }

    pub fn root_lock_count(&self) -> usize {
        self.root_lock.count()
    }

    pub fn is_root_locked(&self) -> bool {
        self.root_lock.is_locked()
    }

    /// Apply one committed transaction's changes and record them as a registry.
    ///
    /// Every row is validated before anything is written, so a contract
    /// violation leaves the ledger untouched.
    pub fn apply_commit(
        &self,
        commit_seq: u64,
        added: &[RowIndex],
        removed: &[RowIndex],
    ) -> LedgerResult<()> {
        let mut inner = self.inner.write();
        self.ensure_open(&inner)?;

        let last = inner.index_list.last_commit_seq();
        if commit_seq <= last {
            return Err(LedgerError::OutOfOrderCommit {
                last,
                got: commit_seq,
            });
        }

        let registry = ChangeRegistry::new(
            commit_seq,
            added.iter().copied(),
            removed.iter().copied(),
        );
        let changes = state_changes(&registry);

        for (row, to) in &changes {
            let from = inner.slot(self.id, *row)?.state;
            if !from.can_transition_to(*to) {
                return Err(LedgerError::InvalidStateTransition {
                    row: *row,
                    from,
                    to: *to,
                });
            }
        }

        for (i, (row, to)) in changes.iter().enumerate() {
            if let Err(e) = self.persist_state(&mut inner, *row, *to) {
                self.undo_states(&mut inner, &changes[..i]);
                return Err(e);
            }
        }

        // Sequence first: a reopen must never resume below an applied commit.
        if let Err(e) = self
            .store
            .put_meta(self.id, META_COMMIT_SEQ, &commit_seq.to_le_bytes())
        {
            self.undo_states(&mut inner, &changes);
            return Err(e);
        }
        inner.index_list.append_registry(registry)?;

        debug!(
            table = %self.id,
            commit_seq,
            added = added.len(),
            removed = removed.len(),
            "registry appended"
        );
        Ok(())
    }

    /// Undo the newest [`apply_commit`](Self::apply_commit) when the same
    /// commit failed on another table.
    ///
    /// Added rows go back to `Uncommitted` and removed rows to
    /// `CommittedAdded`. `commit_seq` must be the tail registry.
    pub fn revert_commit(&self, commit_seq: u64) -> LedgerResult<()> {
        let mut inner = self.inner.write();
        self.ensure_open(&inner)?;
        let registry = inner.index_list.revert_last(commit_seq)?;
        let changes = state_changes(&registry);
        self.undo_states(&mut inner, &changes);
        debug!(table = %self.id, commit_seq, "registry reverted");
        Ok(())
    }

    /// Best-effort revert of states already written by a failed commit.
    fn undo_states(&self, inner: &mut LedgerInner, done: &[(RowIndex, RowState)]) {
        for (row, to) in done.iter().rev() {
            let prev = match to {
                RowState::CommittedAdded => RowState::Uncommitted,
                _ => RowState::CommittedAdded,
            };
            if let Err(e) = self.persist_state(inner, *row, prev) {
                warn!(table = %self.id, row, "failed to revert row state: {}", e);
                if let Some(Some(slot)) = inner.slots.get_mut(*row) {
                    slot.state = prev;
                }
            }
        }
    }

    /// Roll back a row added by an unfinished transaction.
    ///
    /// The only edge outside the forward chain: `Uncommitted → DeletedReclaimable`.
    pub fn discard_uncommitted(&self, row: RowIndex) -> LedgerResult<()> {
        let mut inner = self.inner.write();
        self.ensure_open(&inner)?;
        let from = inner.slot(self.id, row)?.state;
        if from != RowState::Uncommitted {
            return Err(LedgerError::InvalidStateTransition {
                row,
                from,
                to: RowState::DeletedReclaimable,
            });
        }
        self.persist_state(&mut inner, row, RowState::DeletedReclaimable)?;
        if !inner.sweeper.full_sweep_due {
            inner.sweeper.pending.insert(row);
        }
        Ok(())
    }

    /// Discard registries every live snapshot already incorporates.
    ///
    /// `min_open_seq` is the minimum start sequence over open transactions.
    /// Rows removed by the discarded registries become reclaimable and are
    /// marked for the sweeper. Returns whether the list was fully drained.
    pub fn merge_registries(&self, min_open_seq: u64) -> LedgerResult<bool> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Ok(inner.index_list.is_empty());
        }

        let drained = inner.index_list.drain_up_to(min_open_seq);
        for reg in &drained {
            for row in reg.removed() {
                let row = *row;
                let removed = matches!(
                    inner.slots.get(row),
                    Some(Some(slot)) if slot.state == RowState::CommittedRemoved
                );
                if !removed {
                    continue;
                }
                if let Err(e) = self.persist_state(&mut inner, row, RowState::DeletedReclaimable) {
                    // Reopen treats CommittedRemoved as reclaimable anyway.
                    warn!(table = %self.id, row, "failed to persist reclaimable state: {}", e);
                    if let Some(Some(slot)) = inner.slots.get_mut(row) {
                        slot.state = RowState::DeletedReclaimable;
                    }
                }
                if !inner.sweeper.full_sweep_due {
                    inner.sweeper.pending.insert(row);
                }
            }
        }

        if !drained.is_empty() {
            debug!(
                table = %self.id,
                min_open_seq,
                merged = drained.len(),
                remaining = inner.index_list.len(),
                "registries merged"
            );
        }
        Ok(inner.index_list.is_empty())
    }

    /// Registries with commit sequence >= `commit_seq`, in commit order.
    pub fn changes_since(&self, commit_seq: u64) -> Vec<Arc<ChangeRegistry>> {
        self.inner.read().index_list.changes_since(commit_seq)
    }

    /// Number of registries not yet merged.
    pub fn pending_registries(&self) -> usize {
        self.inner.read().index_list.len()
    }

    pub fn last_commit_seq(&self) -> u64 {
        self.inner.read().index_list.last_commit_seq()
    }
}

/// Target state of every row a registry touches.
fn state_changes(registry: &ChangeRegistry) -> Vec<(RowIndex, RowState)> {
    registry
        .added()
        .iter()
        .map(|r| (*r, RowState::CommittedAdded))
        .chain(
            registry
                .removed()
                .iter()
                .map(|r| (*r, RowState::CommittedRemoved)),
        )
        .collect()
}

fn read_u64_meta(store: &dyn RowStore, id: TableId, key: &str) -> LedgerResult<u64> {
    match store.get_meta(id, key)? {
        Some(bytes) if bytes.len() == 8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes);
            Ok(u64::from_le_bytes(buf))
        }
        Some(_) => Err(LedgerError::Serialization(format!(
            "invalid {key} metadata for table {id}"
        ))),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryRowStore;
    use crate::table::{ColumnDef, DataType};
    use parking_lot::Mutex;

    fn schema() -> TableSchema {
        TableSchema::new(
            "accounts",
            vec![
                ColumnDef::new("id", DataType::Int64, false),
                ColumnDef::new("owner", DataType::Utf8, true),
            ],
        )
    }

    fn ledger() -> RowLedger {
        RowLedger::create(TableId(1), schema(), Arc::new(InMemoryRowStore::new())).unwrap()
    }

    fn row(id: i64) -> Vec<Value> {
        vec![Value::Int64(id), Value::Utf8(format!("owner-{id}"))]
    }

    #[test]
    fn test_add_row_starts_uncommitted() -> LedgerResult<()> {
        let ledger = ledger();
        assert_eq!(ledger.add_row(row(1))?, 0);
        assert_eq!(ledger.add_row(row(2))?, 1);
        assert_eq!(ledger.row_state(0)?, RowState::Uncommitted);
        assert_eq!(ledger.get_value(1, 0)?, Value::Int64(2));
        Ok(())
    }

    #[test]
    fn test_add_row_checks_width() {
        let ledger = ledger();
        let err = ledger.add_row(vec![Value::Int64(1)]).unwrap_err();
        assert!(matches!(err, LedgerError::SchemaMismatch { expected: 2, actual: 1 }));
    }

    #[test]
    fn test_transition_rejects_skip() -> LedgerResult<()> {
        let ledger = ledger();
        ledger.add_row(row(1))?;
        let err = ledger.transition(0, RowState::CommittedRemoved).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidStateTransition { .. }));
        assert_eq!(ledger.row_state(0)?, RowState::Uncommitted);
        Ok(())
    }

    #[test]
    fn test_transition_unknown_row() {
        let ledger = ledger();
        let err = ledger.transition(5, RowState::CommittedAdded).unwrap_err();
        assert!(matches!(err, LedgerError::RowNotFound { row: 5, .. }));
    }

    #[test]
    fn test_get_value_bounds() -> LedgerResult<()> {
        let ledger = ledger();
        ledger.add_row(row(1))?;
        assert!(matches!(
            ledger.get_value(0, 2),
            Err(LedgerError::ColumnOutOfRange { column: 2, width: 2 })
        ));
        assert!(matches!(
            ledger.get_value(3, 0),
            Err(LedgerError::RowNotFound { row: 3, .. })
        ));
        Ok(())
    }

    #[test]
    fn test_index_set_overlays_registries() -> LedgerResult<()> {
        let ledger = ledger();
        let r0 = ledger.add_row(row(0))?;
        let r1 = ledger.add_row(row(1))?;
        ledger.apply_commit(5, &[r0, r1], &[])?;

        let r2 = ledger.add_row(row(2))?;
        ledger.apply_commit(8, &[r2], &[r0])?;

        assert!(ledger.create_index_set(4)?.is_empty());
        assert_eq!(ledger.create_index_set(5)?.rows(), &[0, 1]);
        assert_eq!(ledger.create_index_set(7)?.rows(), &[0, 1]);
        assert_eq!(ledger.create_index_set(8)?.rows(), &[1, 2]);
        Ok(())
    }

    #[test]
    fn test_index_set_ignores_uncommitted() -> LedgerResult<()> {
        let ledger = ledger();
        let r0 = ledger.add_row(row(0))?;
        ledger.apply_commit(1, &[r0], &[])?;
        ledger.add_row(row(1))?;
        assert_eq!(ledger.create_index_set(10)?.rows(), &[0]);
        Ok(())
    }

    #[test]
    fn test_snapshot_too_old_after_merge() -> LedgerResult<()> {
        let ledger = ledger();
        let r0 = ledger.add_row(row(0))?;
        ledger.apply_commit(3, &[r0], &[])?;
        assert!(ledger.merge_registries(3)?);
        assert!(matches!(
            ledger.create_index_set(2),
            Err(LedgerError::SnapshotTooOld { requested: 2, merged_through: 3 })
        ));
        assert_eq!(ledger.create_index_set(3)?.rows(), &[0]);
        Ok(())
    }

    #[test]
    fn test_apply_commit_is_all_or_nothing() -> LedgerResult<()> {
        let ledger = ledger();
        let r0 = ledger.add_row(row(0))?;
        // r0 is not committed yet, so it cannot be removed.
        let err = ledger.apply_commit(1, &[r0], &[r0]).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidStateTransition { .. }));
        assert_eq!(ledger.row_state(r0)?, RowState::Uncommitted);
        assert_eq!(ledger.pending_registries(), 0);
        Ok(())
    }

    #[test]
    fn test_apply_commit_out_of_order() -> LedgerResult<()> {
        let ledger = ledger();
        let r0 = ledger.add_row(row(0))?;
        ledger.apply_commit(4, &[r0], &[])?;
        let r1 = ledger.add_row(row(1))?;
        assert!(matches!(
            ledger.apply_commit(4, &[r1], &[]),
            Err(LedgerError::OutOfOrderCommit { last: 4, got: 4 })
        ));
        Ok(())
    }

    #[test]
    fn test_merge_makes_removed_rows_reclaimable() -> LedgerResult<()> {
        let ledger = ledger();
        let r0 = ledger.add_row(row(0))?;
        ledger.apply_commit(1, &[r0], &[])?;
        ledger.apply_commit(2, &[], &[r0])?;
        assert_eq!(ledger.row_state(r0)?, RowState::CommittedRemoved);

        assert!(!ledger.merge_registries(1)?);
        assert_eq!(ledger.row_state(r0)?, RowState::CommittedRemoved);
        assert!(ledger.merge_registries(2)?);
        assert_eq!(ledger.row_state(r0)?, RowState::DeletedReclaimable);
        assert_eq!(ledger.sweeper_status().pending, 1);
        Ok(())
    }

    #[test]
    fn test_unique_id_is_monotonic_and_persisted() -> LedgerResult<()> {
        let store: Arc<dyn RowStore> = Arc::new(InMemoryRowStore::new());
        let ledger = RowLedger::create(TableId(2), schema(), Arc::clone(&store))?;
        assert_eq!(ledger.next_unique_id()?, 0);
        assert_eq!(ledger.next_unique_id()?, 1);
        ledger.set_unique_id(100)?;
        assert_eq!(ledger.next_unique_id()?, 100);

        let reopened = RowLedger::open(TableId(2), schema(), store, false)?;
        assert_eq!(reopened.next_unique_id()?, 101);
        Ok(())
    }

    #[test]
    fn test_root_lock_counting() -> LedgerResult<()> {
        let ledger = ledger();
        let guard = ledger.lock_root();
        ledger.lock_root().into_raw();
        assert_eq!(ledger.root_lock_count(), 2);
        ledger.unlock_root()?;
        drop(guard);
        assert!(!ledger.is_root_locked());
        assert!(matches!(
            ledger.unlock_root(),
            Err(LedgerError::UnlockBelowZero { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_closed_ledger_rejects_writes() {
        let ledger = ledger();
        ledger.close();
        assert!(ledger.is_closed());
        assert!(matches!(
            ledger.add_row(row(0)),
            Err(LedgerError::TableClosed(_))
        ));
    }

    #[test]
    fn test_reopen_recovers_rows() -> LedgerResult<()> {
        let store: Arc<dyn RowStore> = Arc::new(InMemoryRowStore::new());
        {
            let ledger = RowLedger::create(TableId(3), schema(), Arc::clone(&store))?;
            let r0 = ledger.add_row(row(0))?;
            let r1 = ledger.add_row(row(1))?;
            ledger.apply_commit(1, &[r0, r1], &[])?;
            ledger.apply_commit(2, &[], &[r1])?;
            // Left uncommitted by a crash.
            ledger.add_row(row(2))?;
        }

        let ledger = RowLedger::open(TableId(3), schema(), Arc::clone(&store), true)?;
        assert_eq!(ledger.row_state(0)?, RowState::CommittedAdded);
        assert_eq!(ledger.row_state(1)?, RowState::DeletedReclaimable);
        assert!(matches!(ledger.row_state(2), Err(LedgerError::RowNotFound { .. })));
        assert_eq!(ledger.last_commit_seq(), 2);
        assert_eq!(ledger.create_index_set(2)?.rows(), &[0]);
        assert!(ledger.sweeper_status().full_sweep_due);
        Ok(())
    }

    #[test]
    fn test_reopen_marks_corrupt_rows() -> LedgerResult<()> {
        let store: Arc<dyn RowStore> = Arc::new(InMemoryRowStore::new());
        RowLedger::create(TableId(4), schema(), Arc::clone(&store))?;
        store.put_row(TableId(4), 0, &[0xde, 0xad])?;

        let ledger = RowLedger::open(TableId(4), schema(), store, false)?;
        assert_eq!(ledger.row_state(0)?, RowState::Error);
        assert!(matches!(ledger.get_value(0, 0), Err(LedgerError::CorruptRow { .. })));
        assert!(matches!(
            ledger.transition(0, RowState::CommittedAdded),
            Err(LedgerError::InvalidStateTransition { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_load_schema() -> LedgerResult<()> {
        let store: Arc<dyn RowStore> = Arc::new(InMemoryRowStore::new());
        RowLedger::create(TableId(5), schema(), Arc::clone(&store))?;
        assert_eq!(RowLedger::load_schema(store.as_ref(), TableId(5))?, schema());
        assert!(RowLedger::load_schema(store.as_ref(), TableId(6)).is_err());
        Ok(())
    }

    /// Store that fails writes of one row, or of the commit sequence.
    #[derive(Default)]
    struct FailingStore {
        inner: InMemoryRowStore,
        fail_row: Mutex<Option<RowIndex>>,
        fail_commit_seq: Mutex<bool>,
    }

    impl RowStore for FailingStore {
        fn put_row(&self, t: TableId, r: RowIndex, b: &[u8]) -> LedgerResult<()> {
            if *self.fail_row.lock() == Some(r) {
                return Err(LedgerError::StorageFault("disk full".into()));
            }
            self.inner.put_row(t, r, b)
        }
        fn get_row(&self, t: TableId, r: RowIndex) -> LedgerResult<Option<Vec<u8>>> {
            self.inner.get_row(t, r)
        }
        fn remove_row(&self, t: TableId, r: RowIndex) -> LedgerResult<bool> {
            self.inner.remove_row(t, r)
        }
        fn scan_rows(&self, t: TableId) -> LedgerResult<Vec<(RowIndex, Vec<u8>)>> {
            self.inner.scan_rows(t)
        }
        fn put_meta(&self, t: TableId, k: &str, b: &[u8]) -> LedgerResult<()> {
            if k == META_COMMIT_SEQ && *self.fail_commit_seq.lock() {
                return Err(LedgerError::StorageFault("disk full".into()));
            }
            self.inner.put_meta(t, k, b)
        }
        fn get_meta(&self, t: TableId, k: &str) -> LedgerResult<Option<Vec<u8>>> {
            self.inner.get_meta(t, k)
        }
        fn drop_table(&self, t: TableId) -> LedgerResult<()> {
            self.inner.drop_table(t)
        }
        fn table_ids(&self) -> LedgerResult<Vec<TableId>> {
            self.inner.table_ids()
        }
        fn flush(&self) -> LedgerResult<()> {
            Ok(())
        }
    }

    fn stored_state(store: &dyn RowStore, row: RowIndex) -> LedgerResult<RowState> {
        let bytes = store
            .get_row(TableId(7), row)?
            .ok_or(LedgerError::RowNotFound { table: TableId(7), row })?;
        Ok(storage::decode_row(&bytes)?.state)
    }

    #[test]
    fn test_apply_commit_reverts_written_rows_on_store_failure() -> LedgerResult<()> {
        let store = Arc::new(FailingStore::default());
        let ledger = RowLedger::create(TableId(7), schema(), store.clone())?;
        let r0 = ledger.add_row(row(0))?;
        let r1 = ledger.add_row(row(1))?;

        *store.fail_row.lock() = Some(r1);
        let err = ledger.apply_commit(1, &[r0, r1], &[]).unwrap_err();
        assert!(matches!(err, LedgerError::StorageFault(_)));

        // r0 was written as CommittedAdded, then put back.
        assert_eq!(ledger.row_state(r0)?, RowState::Uncommitted);
        assert_eq!(stored_state(store.as_ref(), r0)?, RowState::Uncommitted);
        assert_eq!(ledger.pending_registries(), 0);
        assert_eq!(ledger.last_commit_seq(), 0);

        *store.fail_row.lock() = None;
        ledger.apply_commit(1, &[r0, r1], &[])?;
        assert_eq!(ledger.create_index_set(1)?.rows(), &[0, 1]);
        Ok(())
    }

    #[test]
    fn test_apply_commit_fails_when_sequence_not_persisted() -> LedgerResult<()> {
        let store = Arc::new(FailingStore::default());
        let ledger = RowLedger::create(TableId(7), schema(), store.clone())?;
        let r0 = ledger.add_row(row(0))?;

        *store.fail_commit_seq.lock() = true;
        assert!(matches!(
            ledger.apply_commit(1, &[r0], &[]),
            Err(LedgerError::StorageFault(_))
        ));
        assert_eq!(ledger.row_state(r0)?, RowState::Uncommitted);
        assert_eq!(stored_state(store.as_ref(), r0)?, RowState::Uncommitted);
        assert_eq!(ledger.pending_registries(), 0);
        assert!(ledger.create_index_set(1)?.is_empty());

        *store.fail_commit_seq.lock() = false;
        ledger.apply_commit(1, &[r0], &[])?;
        let reopened = RowLedger::open(TableId(7), schema(), store, false)?;
        assert_eq!(reopened.last_commit_seq(), 1);
        Ok(())
    }

    #[test]
    fn test_revert_commit_restores_states() -> LedgerResult<()> {
        let ledger = ledger();
        let r0 = ledger.add_row(row(0))?;
        ledger.apply_commit(1, &[r0], &[])?;
        let r1 = ledger.add_row(row(1))?;
        ledger.apply_commit(2, &[r1], &[r0])?;

        assert!(matches!(
            ledger.revert_commit(1),
            Err(LedgerError::OutOfOrderCommit { last: 2, got: 1 })
        ));
        ledger.revert_commit(2)?;
        assert_eq!(ledger.row_state(r0)?, RowState::CommittedAdded);
        assert_eq!(ledger.row_state(r1)?, RowState::Uncommitted);
        assert_eq!(ledger.pending_registries(), 1);
        assert_eq!(ledger.create_index_set(2)?.rows(), &[0]);

        // The reverted sequence is never reused.
        assert!(matches!(
            ledger.apply_commit(2, &[r1], &[]),
            Err(LedgerError::OutOfOrderCommit { last: 2, got: 2 })
        ));
        ledger.apply_commit(3, &[r1], &[])?;
        Ok(())
    }
}
