use crate::error::{LedgerError, LedgerResult};
use crate::table::{RootLockGuard, RowIndex, RowLedger, TableCatalog, TableId, Value};
use crate::transaction::index_set::IndexSet;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Transaction identifier.
pub type TxId = u64;

/// A source of monotonically increasing commit sequence numbers.
///
/// - start sequence: the last commit a transaction's snapshot includes.
/// - commit sequence: the number stamped on a new change registry.
#[derive(Debug)]
pub struct CommitSequencer {
    /// The last allocated sequence number.
    current: AtomicU64,
}

impl CommitSequencer {
    /// Create a sequencer whose last allocated number is `start`.
    pub fn new(start: u64) -> Self {
        Self {
            current: AtomicU64::new(start),
        }
    }

    /// Allocate and return the next sequence number.
    pub fn next(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Read the last allocated number without incrementing.
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }
}

impl Default for CommitSequencer {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Commit coordinator: tracks open transactions and their start sequences.
pub struct TransactionManager {
    catalog: Arc<TableCatalog>,
    sequencer: CommitSequencer,
    /// Open transactions and snapshot pins: id -> start_seq
    active: DashMap<TxId, u64>,
    next_tx: AtomicU64,
    /// Serializes commits against each other and against `begin`
    commit_lock: Mutex<()>,
}

impl TransactionManager {
    /// Resume the sequence after the newest commit found in the catalog.
    pub fn new(catalog: Arc<TableCatalog>) -> Self {
        let start = catalog.max_commit_seq();
        Self {
            catalog,
            sequencer: CommitSequencer::new(start),
            active: DashMap::new(),
            next_tx: AtomicU64::new(1),
            commit_lock: Mutex::new(()),
        }
    }

    /// Start a transaction whose snapshot includes every commit so far.
    pub fn begin(self: &Arc<Self>) -> Transaction {
        let id = self.next_tx.fetch_add(1, Ordering::SeqCst);
        let start_seq = {
            let _commit = self.commit_lock.lock();
            let start_seq = self.sequencer.current();
            self.active.insert(id, start_seq);
            start_seq
        };
        debug!(tx = id, start_seq, "transaction started");

        Transaction {
            manager: Arc::clone(self),
            id,
            start_seq,
            tables: BTreeMap::new(),
            finished: false,
        }
    }

    /// Hold the merge watermark at the latest commit until the pin drops.
    ///
    /// Used by read-only views that outlive any transaction.
    pub fn pin_snapshot(self: &Arc<Self>) -> SnapshotPin {
        let id = self.next_tx.fetch_add(1, Ordering::SeqCst);
        let seq = {
            let _commit = self.commit_lock.lock();
            let seq = self.sequencer.current();
            self.active.insert(id, seq);
            seq
        };
        debug!(pin = id, seq, "snapshot pinned");
        SnapshotPin {
            manager: Arc::clone(self),
            id,
            seq,
        }
    }

    /// Minimum start sequence over open transactions and pins.
    pub fn min_active_seq(&self) -> Option<u64> {
        self.active.iter().map(|entry| *entry.value()).min()
    }

    /// Highest sequence every live snapshot already incorporates.
    ///
    /// Computed under the commit lock, so no `begin` or commit can land
    /// between reading the open set and reading the sequence.
    pub fn merge_watermark(&self) -> u64 {
        let _commit = self.commit_lock.lock();
        let current = self.sequencer.current();
        self.min_active_seq().map_or(current, |min| min.min(current))
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn current_seq(&self) -> u64 {
        self.sequencer.current()
    }

    pub fn catalog(&self) -> &Arc<TableCatalog> {
        &self.catalog
    }

    /// Merge registries of every table up to the current watermark.
    pub fn merge_all(&self) -> LedgerResult<()> {
        let watermark = self.merge_watermark();
        for ledger in self.catalog.ledgers() {
            ledger.merge_registries(watermark)?;
        }
        Ok(())
    }

    fn release_pin(&self, id: TxId) {
        self.active.remove(&id);
        if let Err(e) = self.merge_all() {
            warn!(pin = id, "registry merge failed: {}", e);
        }
    }

    fn end(&self, id: TxId, touched: &[Arc<RowLedger>]) {
        self.active.remove(&id);
        let watermark = self.merge_watermark();
        for ledger in touched {
            if let Err(e) = ledger.merge_registries(watermark) {
                warn!(tx = id, table = %ledger.id(), "registry merge failed: {}", e);
            }
        }
    }
}

/// Read-only registration in the open set, released on drop.
pub struct SnapshotPin {
    manager: Arc<TransactionManager>,
    id: TxId,
    seq: u64,
}

impl SnapshotPin {
    /// The commit sequence the pinned view reads at.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl Drop for SnapshotPin {
    fn drop(&mut self) {
        self.manager.release_pin(self.id);
    }
}

/// Per-table state of one transaction.
struct TableWork {
    ledger: Arc<RowLedger>,
    snapshot: IndexSet,
    added: Vec<RowIndex>,
    removed: Vec<RowIndex>,
    _root: RootLockGuard,
}

impl TableWork {
    fn is_visible(&self, row: RowIndex) -> bool {
        self.added.contains(&row)
            || (self.snapshot.contains(row) && !self.removed.contains(&row))
    }

    fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// A snapshot-isolated unit of work.
///
/// Reads go through one [`IndexSet`] per table built at `start_seq`; writes are
/// staged in the ledger as `Uncommitted` rows and become a change registry on
/// commit. Every touched table stays root-locked until the transaction ends.
/// Dropping an unfinished transaction rolls it back.
pub struct Transaction {
    manager: Arc<TransactionManager>,
    id: TxId,
    start_seq: u64,
    tables: BTreeMap<TableId, TableWork>,
    finished: bool,
}

impl Transaction {
    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn start_seq(&self) -> u64 {
        self.start_seq
    }

    fn work(&mut self, table: TableId) -> LedgerResult<&mut TableWork> {
        if self.finished {
            return Err(LedgerError::TransactionFinished);
        }
        if !self.tables.contains_key(&table) {
            let ledger = self.manager.catalog.get(table)?;
            let root = ledger.lock_root();
            let snapshot = ledger.create_index_set(self.start_seq)?;
            self.tables.insert(
                table,
                TableWork {
                    ledger,
                    snapshot,
                    added: Vec::new(),
                    removed: Vec::new(),
                    _root: root,
                },
            );
        }
        self.tables
            .get_mut(&table)
            .ok_or(LedgerError::TableNotFound(table))
    }

    /// The snapshot of `table` this transaction reads through.
    pub fn index_set(&mut self, table: TableId) -> LedgerResult<&IndexSet> {
        Ok(&self.work(table)?.snapshot)
    }

    /// Stage a new row.
    pub fn insert(&mut self, table: TableId, values: Vec<Value>) -> LedgerResult<RowIndex> {
        let work = self.work(table)?;
        let row = work.ledger.add_row(values)?;
        work.added.push(row);
        Ok(row)
    }

    /// Stage removal of a visible row.
    pub fn delete(&mut self, table: TableId, row: RowIndex) -> LedgerResult<()> {
        let work = self.work(table)?;
        if let Some(pos) = work.added.iter().position(|r| *r == row) {
            work.ledger.discard_uncommitted(row)?;
            work.added.remove(pos);
            return Ok(());
        }
        if !work.is_visible(row) {
            return Err(LedgerError::RowNotFound { table, row });
        }
        work.removed.push(row);
        Ok(())
    }

    /// Rows this transaction sees: its snapshot plus its own staged changes.
    pub fn visible_rows(&mut self, table: TableId) -> LedgerResult<Vec<RowIndex>> {
        let work = self.work(table)?;
        let mut rows: Vec<RowIndex> = work
            .snapshot
            .iter()
            .filter(|r| !work.removed.contains(r))
            .chain(work.added.iter().copied())
            .collect();
        rows.sort_unstable();
        Ok(rows)
    }

    pub fn get_value(
        &mut self,
        table: TableId,
        row: RowIndex,
        column: usize,
    ) -> LedgerResult<Value> {
        let work = self.work(table)?;
        if !work.is_visible(row) {
            return Err(LedgerError::RowNotFound { table, row });
        }
        work.ledger.get_value(row, column)
    }

    /// Commit staged changes. Returns the commit sequence number, or the
    /// start sequence when nothing was staged.
    ///
    /// A row this transaction removed that a later commit also removed is a
    /// write-write conflict; the transaction is rolled back. A commit spanning
    /// several tables is all-or-nothing: if one table fails, the tables
    /// already applied are reverted before the error is returned.
    pub fn commit(mut self) -> LedgerResult<u64> {
        if self.finished {
            return Err(LedgerError::TransactionFinished);
        }

        let manager = Arc::clone(&self.manager);
        let commit = manager.commit_lock.lock();

        if let Some((table, row)) = self.find_conflict() {
            drop(commit);
            debug!(tx = self.id, table = %table, row, "write-write conflict");
            self.abort();
            return Err(LedgerError::TransactionConflict { table, row });
        }

        if !self.tables.values().any(TableWork::has_changes) {
            drop(commit);
            self.finish();
            return Ok(self.start_seq);
        }

        let commit_seq = manager.sequencer.next();
        let mut applied: Vec<Arc<RowLedger>> = Vec::new();
        let mut failure = None;
        for work in self.tables.values().filter(|w| w.has_changes()) {
            match work
                .ledger
                .apply_commit(commit_seq, &work.added, &work.removed)
            {
                Ok(()) => applied.push(Arc::clone(&work.ledger)),
                Err(e) => {
                    warn!(tx = self.id, table = %work.ledger.id(), commit_seq, "commit failed: {}", e);
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = failure {
            // Still under the commit lock: no reader can start at commit_seq yet.
            for ledger in applied.iter().rev() {
                if let Err(revert) = ledger.revert_commit(commit_seq) {
                    warn!(tx = self.id, table = %ledger.id(), commit_seq, "commit revert failed: {}", revert);
                }
            }
            drop(commit);
            self.abort();
            return Err(e);
        }

        // Applied rows are no longer ours to discard.
        for work in self.tables.values_mut() {
            work.added.clear();
            work.removed.clear();
        }
        drop(commit);

        debug!(tx = self.id, commit_seq, "transaction committed");
        self.finish();
        Ok(commit_seq)
    }

    /// First row this transaction removed that a commit after its start also
    /// removed.
    fn find_conflict(&self) -> Option<(TableId, RowIndex)> {
        self.tables.iter().find_map(|(table, work)| {
            work.ledger
                .changes_since(self.start_seq + 1)
                .iter()
                .find_map(|reg| reg.conflicts_with(&work.removed))
                .map(|row| (*table, row))
        })
    }

    /// Discard staged changes.
    pub fn rollback(mut self) -> LedgerResult<()> {
        if self.finished {
            return Err(LedgerError::TransactionFinished);
        }
        self.abort();
        Ok(())
    }

    fn abort(&mut self) {
        for work in self.tables.values_mut() {
            for row in work.added.drain(..) {
                if let Err(e) = work.ledger.discard_uncommitted(row) {
                    warn!(tx = self.id, table = %work.ledger.id(), row, "rollback discard failed: {}", e);
                }
            }
            work.removed.clear();
        }
        debug!(tx = self.id, "transaction rolled back");
        self.finish();
    }

    fn finish(&mut self) {
        self.finished = true;
        let touched: Vec<Arc<RowLedger>> =
            self.tables.values().map(|w| Arc::clone(&w.ledger)).collect();
        self.manager.end(self.id, &touched);
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            self.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryRowStore;
    use crate::table::{ColumnDef, DataType, RowState, TableSchema};

    fn setup() -> (Arc<TransactionManager>, TableId) {
        let catalog = Arc::new(TableCatalog::new(Arc::new(InMemoryRowStore::new())));
        let table = catalog
            .create_table(TableSchema::new(
                "items",
                vec![ColumnDef::new("id", DataType::Int64, false)],
            ))
            .unwrap()
            .id();
        (Arc::new(TransactionManager::new(catalog)), table)
    }

    #[test]
    fn test_sequencer() {
        let seq = CommitSequencer::new(10);
        assert_eq!(seq.next(), 11);
        assert_eq!(seq.next(), 12);
        assert_eq!(seq.current(), 12);
    }

    #[test]
    fn test_commit_makes_rows_visible() -> LedgerResult<()> {
        let (mgr, table) = setup();
        let mut tx = mgr.begin();
        let row = tx.insert(table, vec![Value::Int64(1)])?;
        assert_eq!(tx.visible_rows(table)?, vec![row]);
        let seq = tx.commit()?;
        assert_eq!(seq, 1);

        let mut reader = mgr.begin();
        assert_eq!(reader.start_seq(), 1);
        assert_eq!(reader.get_value(table, row, 0)?, Value::Int64(1));
        Ok(())
    }

    #[test]
    fn test_snapshot_isolation() -> LedgerResult<()> {
        let (mgr, table) = setup();
        let mut reader = mgr.begin();
        assert!(reader.visible_rows(table)?.is_empty());

        let mut writer = mgr.begin();
        writer.insert(table, vec![Value::Int64(1)])?;
        writer.commit()?;

        // Snapshot was built before the commit.
        assert!(reader.visible_rows(table)?.is_empty());
        let mut late = mgr.begin();
        assert_eq!(late.visible_rows(table)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_lazy_snapshot_still_isolated() -> LedgerResult<()> {
        let (mgr, table) = setup();
        let mut reader = mgr.begin();

        let mut writer = mgr.begin();
        writer.insert(table, vec![Value::Int64(1)])?;
        writer.commit()?;

        // First touch after the commit still reflects the start sequence.
        assert!(reader.visible_rows(table)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_write_write_conflict() -> LedgerResult<()> {
        let (mgr, table) = setup();
        let mut setup_tx = mgr.begin();
        let row = setup_tx.insert(table, vec![Value::Int64(1)])?;
        setup_tx.commit()?;

        let mut t1 = mgr.begin();
        let mut t2 = mgr.begin();
        t1.delete(table, row)?;
        t2.delete(table, row)?;
        t1.commit()?;

        let err = t2.commit().unwrap_err();
        assert!(matches!(err, LedgerError::TransactionConflict { row: 0, .. }));
        assert_eq!(mgr.active_count(), 0);
        Ok(())
    }

    #[test]
    fn test_rollback_discards_rows() -> LedgerResult<()> {
        let (mgr, table) = setup();
        let mut tx = mgr.begin();
        let row = tx.insert(table, vec![Value::Int64(1)])?;
        tx.rollback()?;

        let ledger = mgr.catalog().get(table)?;
        assert_eq!(ledger.row_state(row)?, RowState::DeletedReclaimable);
        assert_eq!(ledger.sweeper_status().pending, 1);
        Ok(())
    }

    #[test]
    fn test_drop_rolls_back_and_releases_locks() -> LedgerResult<()> {
        let (mgr, table) = setup();
        let ledger = mgr.catalog().get(table)?;
        {
            let mut tx = mgr.begin();
            tx.insert(table, vec![Value::Int64(1)])?;
            assert_eq!(ledger.root_lock_count(), 1);
        }
        assert_eq!(ledger.root_lock_count(), 0);
        assert_eq!(mgr.active_count(), 0);
        assert_eq!(ledger.row_state(0)?, RowState::DeletedReclaimable);
        Ok(())
    }

    #[test]
    fn test_delete_own_insert() -> LedgerResult<()> {
        let (mgr, table) = setup();
        let mut tx = mgr.begin();
        let row = tx.insert(table, vec![Value::Int64(1)])?;
        tx.delete(table, row)?;
        assert!(tx.visible_rows(table)?.is_empty());
        assert_eq!(tx.commit()?, 0);
        Ok(())
    }

    #[test]
    fn test_snapshot_pin_holds_watermark() -> LedgerResult<()> {
        let (mgr, table) = setup();
        let mut t = mgr.begin();
        let row = t.insert(table, vec![Value::Int64(1)])?;
        t.commit()?;

        let pin = mgr.pin_snapshot();
        assert_eq!(pin.seq(), 1);

        let mut deleter = mgr.begin();
        deleter.delete(table, row)?;
        assert_eq!(deleter.commit()?, 2);

        let ledger = mgr.catalog().get(table)?;
        assert_eq!(mgr.merge_watermark(), 1);
        assert_eq!(ledger.pending_registries(), 1);
        assert_eq!(ledger.row_state(row)?, RowState::CommittedRemoved);

        drop(pin);
        assert_eq!(mgr.active_count(), 0);
        assert_eq!(mgr.merge_watermark(), 2);
        assert_eq!(ledger.pending_registries(), 0);
        assert_eq!(ledger.row_state(row)?, RowState::DeletedReclaimable);
        Ok(())
    }

    #[test]
    fn test_watermark_never_passes_current_seq() -> LedgerResult<()> {
        let (mgr, table) = setup();
        assert_eq!(mgr.merge_watermark(), 0);
        let mut t = mgr.begin();
        t.insert(table, vec![Value::Int64(1)])?;
        t.commit()?;

        let reader = mgr.begin();
        assert_eq!(mgr.merge_watermark(), 1);
        let mut writer = mgr.begin();
        writer.insert(table, vec![Value::Int64(2)])?;
        writer.commit()?;
        assert_eq!(mgr.merge_watermark(), reader.start_seq());
        drop(reader);
        assert_eq!(mgr.merge_watermark(), mgr.current_seq());
        Ok(())
    }

    #[test]
    fn test_delete_invisible_row() {
        let (mgr, table) = setup();
        let mut tx = mgr.begin();
        assert!(matches!(
            tx.delete(table, 3),
            Err(LedgerError::RowNotFound { row: 3, .. })
        ));
    }

    #[test]
    fn test_merge_waits_for_oldest_reader() -> LedgerResult<()> {
        let (mgr, table) = setup();
        let mut t = mgr.begin();
        let row = t.insert(table, vec![Value::Int64(1)])?;
        t.commit()?;

        let mut old_reader = mgr.begin();
        assert_eq!(old_reader.visible_rows(table)?, vec![row]);

        let mut deleter = mgr.begin();
        deleter.delete(table, row)?;
        deleter.commit()?;

        let ledger = mgr.catalog().get(table)?;
        assert_eq!(ledger.pending_registries(), 1);
        assert_eq!(old_reader.get_value(table, row, 0)?, Value::Int64(1));

        drop(old_reader);
        assert_eq!(ledger.pending_registries(), 0);
        assert_eq!(ledger.row_state(row)?, RowState::DeletedReclaimable);
        Ok(())
    }
}
