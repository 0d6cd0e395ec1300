//! Table catalog - resolves [`TableId`] handles to ledgers.
//!
//! Components hold table ids, not ledger references, so the transaction
//! manager, the sweeper and compositions never form ownership cycles.

use crate::error::{LedgerError, LedgerResult};
use crate::storage::RowStore;
use crate::table::{RowLedger, TableId, TableSchema};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::info;

/// Central registry of open tables.
pub struct TableCatalog {
    store: Arc<dyn RowStore>,
    tables: DashMap<TableId, Arc<RowLedger>>,
    next_id: AtomicU32,
}

impl TableCatalog {
    /// Empty catalog over a store.
    pub fn new(store: Arc<dyn RowStore>) -> Self {
        Self {
            store,
            tables: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }

    /// Reopen every table persisted in the store.
    pub fn recover(store: Arc<dyn RowStore>, full_sweep_on_open: bool) -> LedgerResult<Self> {
        let catalog = Self::new(Arc::clone(&store));
        let ids = store.table_ids()?;
        for id in &ids {
            let schema = RowLedger::load_schema(store.as_ref(), *id)?;
            let ledger = RowLedger::open(*id, schema, Arc::clone(&store), full_sweep_on_open)?;
            catalog.tables.insert(*id, Arc::new(ledger));
        }
        let next = ids.iter().map(|id| id.0 + 1).max().unwrap_or(1);
        catalog.next_id.store(next, Ordering::SeqCst);
        info!("Recovered {} tables from persistent storage", ids.len());
        Ok(catalog)
    }

    /// Create a new table with a fresh id.
    pub fn create_table(&self, schema: TableSchema) -> LedgerResult<Arc<RowLedger>> {
        let id = TableId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let ledger = Arc::new(RowLedger::create(id, schema, Arc::clone(&self.store))?);
        self.tables.insert(id, Arc::clone(&ledger));
        Ok(ledger)
    }

    /// Open a persisted table with an explicitly supplied schema.
    pub fn open_table(
        &self,
        id: TableId,
        schema: TableSchema,
        full_sweep: bool,
    ) -> LedgerResult<Arc<RowLedger>> {
        if let Some(existing) = self.tables.get(&id) {
            return Ok(Arc::clone(existing.value()));
        }
        let ledger = Arc::new(RowLedger::open(id, schema, Arc::clone(&self.store), full_sweep)?);
        self.tables.insert(id, Arc::clone(&ledger));
        self.next_id.fetch_max(id.0 + 1, Ordering::SeqCst);
        Ok(ledger)
    }

    pub fn get(&self, id: TableId) -> LedgerResult<Arc<RowLedger>> {
        self.tables
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(LedgerError::TableNotFound(id))
    }

    /// Find a table by schema name.
    pub fn find(&self, name: &str) -> Option<Arc<RowLedger>> {
        self.tables
            .iter()
            .find(|e| e.value().schema().name == name)
            .map(|e| Arc::clone(e.value()))
    }

    /// Close a table and delete its stored rows.
    pub fn drop_table(&self, id: TableId) -> LedgerResult<()> {
        let (_, ledger) = self
            .tables
            .remove(&id)
            .ok_or(LedgerError::TableNotFound(id))?;
        ledger.close();
        self.store.drop_table(id)?;
        info!(table = %id, "table dropped");
        Ok(())
    }

    pub fn table_ids(&self) -> Vec<TableId> {
        let mut ids: Vec<TableId> = self.tables.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn ledgers(&self) -> Vec<Arc<RowLedger>> {
        self.table_ids()
            .into_iter()
            .filter_map(|id| self.get(id).ok())
            .collect()
    }

    /// Highest commit sequence applied to any table.
    pub fn max_commit_seq(&self) -> u64 {
        self.tables
            .iter()
            .map(|e| e.value().last_commit_seq())
            .max()
            .unwrap_or(0)
    }

    /// Close every table (shutdown).
    pub fn close_all(&self) {
        for ledger in self.ledgers() {
            ledger.close();
        }
    }

    pub fn store(&self) -> &Arc<dyn RowStore> {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
