//! Reclamation sweeper - physical removal of deleted rows.
//!
//! A row is physically reclaimed only when it is `DeletedReclaimable` and no
//! unmerged registry references it. Collection runs under the ledger's
//! critical section.
//!
//! # Algorithm
//!
//! 1. Closed table → no-op
//! 2. Safety gate: `force`, or (no root lock held and no unmerged registries).
//!    A closed gate defers the sweep; the next trigger retries.
//! 3. Full sweep due → check every slot; otherwise only the marked rows
//! 4. Store failures are logged and the row stays marked for a later retry
//!
//! # Example
//!
//! ```rust
//! use ledgerdb_core::storage::InMemoryRowStore;
//! use ledgerdb_core::table::{ColumnDef, DataType, RowLedger, RowState, TableId, TableSchema, Value};
//! use ledgerdb_core::transaction::gc::CollectOutcome;
//! use std::sync::Arc;
//!
//! # fn main() -> ledgerdb_core::LedgerResult<()> {
//! let schema = TableSchema::new("t", vec![ColumnDef::new("id", DataType::Int64, false)]);
//! let ledger = RowLedger::create(TableId(1), schema, Arc::new(InMemoryRowStore::new()))?;
//!
//! let row = ledger.add_row(vec![Value::Int64(1)])?;
//! ledger.transition(row, RowState::CommittedAdded)?;
//! ledger.transition(row, RowState::CommittedRemoved)?;
//! ledger.transition(row, RowState::DeletedReclaimable)?;
//! ledger.mark_deleted(row)?;
//!
//! let outcome = ledger.collect(true);
//! assert_eq!(outcome, CollectOutcome::Completed { reclaimed: 1, failed: 0 });
//! # Ok(())
//! # }
//! ```

use crate::config::GcConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::table::ledger::LedgerInner;
use crate::table::{RowIndex, RowLedger, TableCatalog, TableId};
use ahash::AHashSet;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Per-table sweeper state, guarded by the ledger's critical section.
#[derive(Debug, Default)]
pub struct SweeperState {
    /// Rows explicitly marked for reclamation
    pub(crate) pending: AHashSet<RowIndex>,
    /// Eligibility must be re-derived by a linear scan
    pub(crate) full_sweep_due: bool,
    pub(crate) last_success: Option<Instant>,
    pub(crate) last_attempt: Option<Instant>,
    pub(crate) total_reclaimed: u64,
    pub(crate) failed_reclaims: u64,
    pub(crate) last_error: Option<String>,
}

impl SweeperState {
    /// Mark one row. Redundant while a full sweep is scheduled.
    pub(crate) fn mark(&mut self, table: TableId, row: RowIndex) -> LedgerResult<()> {
        if self.full_sweep_due {
            return Ok(());
        }
        if !self.pending.insert(row) {
            return Err(LedgerError::DuplicateDeletionMark { table, row });
        }
        Ok(())
    }
}

/// Snapshot of a table's sweeper state.
#[derive(Debug, Clone)]
pub struct SweeperStatus {
    pub pending: usize,
    pub full_sweep_due: bool,
    pub last_success: Option<Instant>,
    pub last_attempt: Option<Instant>,
    pub total_reclaimed: u64,
    pub failed_reclaims: u64,
    pub last_error: Option<String>,
}

/// Result of one `collect` call. Failures never surface as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectOutcome {
    /// Table closed; nothing to do
    Closed,
    /// Safety gate closed; retried on the next trigger
    Deferred,
    /// Reclamation ran
    Completed { reclaimed: usize, failed: usize },
}

impl RowLedger {
    /// Mark a row for reclamation by the next sweep.
    pub fn mark_deleted(&self, row: RowIndex) -> LedgerResult<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(LedgerError::TableClosed(self.id()));
        }
        inner.slot(self.id(), row)?;
        inner.sweeper.mark(self.id(), row)
    }

    /// Require the next collection to re-check every row.
    pub fn schedule_full_sweep(&self) {
        let mut inner = self.inner.write();
        inner.sweeper.full_sweep_due = true;
        inner.sweeper.pending.clear();
    }

    pub fn sweeper_status(&self) -> SweeperStatus {
        let inner = self.inner.read();
        let s = &inner.sweeper;
        SweeperStatus {
            pending: s.pending.len(),
            full_sweep_due: s.full_sweep_due,
            last_success: s.last_success,
            last_attempt: s.last_attempt,
            total_reclaimed: s.total_reclaimed,
            failed_reclaims: s.failed_reclaims,
            last_error: s.last_error.clone(),
        }
    }

    /// Physically reclaim eligible rows.
    ///
    /// Without `force` the sweep is deferred while the table is root-locked or
    /// has unmerged registries.
    pub fn collect(&self, force: bool) -> CollectOutcome {
        let mut inner = self.inner.write();
        if inner.closed {
            return CollectOutcome::Closed;
        }

        let now = Instant::now();
        inner.sweeper.last_attempt = Some(now);

        if !force && (self.is_root_locked() || inner.index_list.has_pending()) {
            debug!(
                table = %self.id(),
                root_locks = self.root_lock_count(),
                pending_registries = inner.index_list.len(),
                "collection deferred"
            );
            return CollectOutcome::Deferred;
        }

        let full = inner.sweeper.full_sweep_due;
        let candidates: Vec<RowIndex> = if full {
            (0..inner.slots.len()).collect()
        } else {
            let mut rows: Vec<RowIndex> = inner.sweeper.pending.drain().collect();
            rows.sort_unstable();
            rows
        };

        let mut reclaimed = 0usize;
        let mut retry = AHashSet::new();
        for row in candidates {
            if !self.is_eligible(&inner, row) {
                if !full && inner.slots.get(row).is_some_and(|s| s.is_some()) {
                    warn!(table = %self.id(), row, "marked row is not reclaimable, mark dropped");
                }
                continue;
            }
            match self.store().remove_row(self.id(), row) {
                Ok(_) => {
                    inner.slots[row] = None;
                    reclaimed += 1;
                }
                Err(e) => {
                    warn!(table = %self.id(), row, "reclamation failed: {}", e);
                    inner.sweeper.last_error = Some(e.to_string());
                    retry.insert(row);
                }
            }
        }

        let failed = retry.len();
        let sweeper = &mut inner.sweeper;
        sweeper.full_sweep_due = false;
        sweeper.pending.extend(retry);
        sweeper.last_success = Some(now);
        sweeper.total_reclaimed += reclaimed as u64;
        sweeper.failed_reclaims += failed as u64;

        debug!(table = %self.id(), full, reclaimed, failed, "collection complete");
        CollectOutcome::Completed { reclaimed, failed }
    }

    fn is_eligible(&self, inner: &LedgerInner, row: RowIndex) -> bool {
        let reclaimable = matches!(
            inner.slots.get(row),
            Some(Some(slot)) if slot.state.is_reclaimable()
        );
        reclaimable
            && !inner
                .index_list
                .iter()
                .any(|reg| reg.is_added(row) || reg.is_removed(row))
    }
}

/// Work items for the background collector.
#[derive(Debug, Clone)]
pub enum GcJob {
    /// Collect one table
    Collect { table: TableId, force: bool },
    /// Collect every open table without forcing
    CollectAll,
    Shutdown,
}

/// Background collector driving `collect(false)` across the catalog.
///
/// The worker stops deterministically when the collector is dropped.
pub struct GarbageCollector {
    sender: Sender<GcJob>,
    worker: Option<JoinHandle<()>>,
}

impl GarbageCollector {
    /// Spawn the worker thread.
    pub fn start(catalog: Arc<TableCatalog>, config: &GcConfig) -> LedgerResult<Self> {
        let (sender, receiver) = mpsc::channel::<GcJob>();
        let interval = Duration::from_millis(config.interval_ms.max(1));

        let worker = std::thread::Builder::new()
            .name("ledgerdb-gc".to_string())
            .spawn(move || {
                loop {
                    match receiver.recv_timeout(interval) {
                        Ok(GcJob::Collect { table, force }) => {
                            if let Ok(ledger) = catalog.get(table) {
                                ledger.collect(force);
                            }
                        }
                        Ok(GcJob::CollectAll) | Err(RecvTimeoutError::Timeout) => {
                            for ledger in catalog.ledgers() {
                                ledger.collect(false);
                            }
                        }
                        Ok(GcJob::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;

        info!(interval_ms = config.interval_ms, "garbage collector started");
        Ok(Self {
            sender,
            worker: Some(worker),
        })
    }

    /// Queue a job for the worker.
    pub fn request(&self, job: GcJob) -> LedgerResult<()> {
        self.sender
            .send(job)
            .map_err(|e| LedgerError::StorageFault(format!("gc worker stopped: {e}")))
    }
}

impl Drop for GarbageCollector {
    fn drop(&mut self) {
        let _ = self.sender.send(GcJob::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
