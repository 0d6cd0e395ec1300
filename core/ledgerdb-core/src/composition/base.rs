use crate::composition::enumeration::RowEnumeration;
use crate::error::{LedgerError, LedgerResult};
use crate::table::{RootLockGuard, RowIndex, RowLedger, TableId, TableSchema, Value};
use crate::transaction::{IndexSet, SnapshotPin};
use std::fmt;
use std::sync::Arc;

/// Ledger-backed leaf of a composition.
///
/// Holds a root lock for its whole lifetime, so unforced sweeps are deferred
/// while the view exists. A view built with [`BaseTable::pinned`] also keeps
/// the registries it reads past unmerged, so even a forced sweep cannot reach
/// its rows. Views from a transaction's [`IndexSet`] rely on the transaction
/// staying open instead.
pub struct BaseTable {
    ledger: Arc<RowLedger>,
    rows: RowEnumeration,
    _root: RootLockGuard,
    _pin: Option<SnapshotPin>,
}

impl fmt::Debug for BaseTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseTable")
            .field("table", &self.ledger.id())
            .field("rows", &self.rows)
            .field("pinned_at", &self._pin.as_ref().map(SnapshotPin::seq))
            .finish()
    }
}

impl BaseTable {
    /// View over the rows of a snapshot.
    pub fn from_index_set(ledger: Arc<RowLedger>, set: &IndexSet) -> LedgerResult<Self> {
        if set.table() != ledger.id() {
            return Err(LedgerError::TableNotFound(set.table()));
        }
        let root = ledger.lock_root();
        let rows = if set.is_identity() {
            RowEnumeration::Simple(set.len())
        } else {
            RowEnumeration::Explicit(set.rows().into())
        };
        Ok(Self {
            ledger,
            rows,
            _root: root,
            _pin: None,
        })
    }

    /// View over the rows committed as of `as_of`.
    pub fn snapshot(ledger: Arc<RowLedger>, as_of: u64) -> LedgerResult<Self> {
        let set = ledger.create_index_set(as_of)?;
        Self::from_index_set(ledger, &set)
    }

    /// View at `pin`'s sequence that holds the pin until dropped.
    pub fn pinned(ledger: Arc<RowLedger>, pin: SnapshotPin) -> LedgerResult<Self> {
        let mut view = Self::snapshot(ledger, pin.seq())?;
        view._pin = Some(pin);
        Ok(view)
    }

    pub fn table_id(&self) -> TableId {
        self.ledger.id()
    }

    pub fn ledger(&self) -> &Arc<RowLedger> {
        &self.ledger
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        self.ledger.schema()
    }

    pub fn enumeration(&self) -> &RowEnumeration {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.ledger.schema().width()
    }

    /// Physical ledger row behind logical `row`.
    #[inline]
    pub fn physical_row(&self, row: RowIndex) -> LedgerResult<RowIndex> {
        self.rows.get(row)
    }

    pub fn get_value(&self, row: RowIndex, column: usize) -> LedgerResult<Value> {
        self.ledger.get_value(self.physical_row(row)?, column)
    }
}
