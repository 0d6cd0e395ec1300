//! Engine - 스토리지, 카탈로그, 트랜잭션 관리자, GC 워커를 묶는 진입점

mod constructors;

use crate::composition::BaseTable;
use crate::config::EngineConfig;
use crate::error::LedgerResult;
use crate::table::{RowLedger, TableCatalog, TableId, TableSchema};
use crate::transaction::{CollectOutcome, GarbageCollector, GcJob, Transaction, TransactionManager};
use std::sync::Arc;
use tracing::{instrument, warn};

/// Embedded table-storage engine.
///
/// ```rust
/// use ledgerdb_core::Engine;
/// use ledgerdb_core::table::{ColumnDef, DataType, TableSchema, Value};
///
/// # fn main() -> ledgerdb_core::LedgerResult<()> {
/// let engine = Engine::open_in_memory()?;
/// let users = engine.create_table(TableSchema::new(
///     "users",
///     vec![ColumnDef::new("name", DataType::Utf8, false)],
/// ))?;
///
/// let mut tx = engine.begin();
/// let row = tx.insert(users.id(), vec![Value::from("alice")])?;
/// tx.commit()?;
///
/// let mut reader = engine.begin();
/// assert_eq!(reader.get_value(users.id(), row, 0)?, Value::from("alice"));
/// # Ok(())
/// # }
/// ```
pub struct Engine {
    config: EngineConfig,
    catalog: Arc<TableCatalog>,
    transactions: Arc<TransactionManager>,
    /// Background collector, present when `gc.enabled`
    gc: Option<GarbageCollector>,
}

impl Engine {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<TableCatalog> {
        &self.catalog
    }

    pub fn transactions(&self) -> &Arc<TransactionManager> {
        &self.transactions
    }

    /// Start a snapshot-isolated transaction.
    pub fn begin(&self) -> Transaction {
        self.transactions.begin()
    }

    #[instrument(skip(self, schema), fields(name = %schema.name))]
    pub fn create_table(&self, schema: TableSchema) -> LedgerResult<Arc<RowLedger>> {
        self.catalog.create_table(schema)
    }

    pub fn table(&self, id: TableId) -> LedgerResult<Arc<RowLedger>> {
        self.catalog.get(id)
    }

    pub fn drop_table(&self, id: TableId) -> LedgerResult<()> {
        self.catalog.drop_table(id)
    }

    /// Root-locked view of `table` as of the latest commit.
    ///
    /// The view is pinned in the transaction manager: registries committed
    /// after it stay unmerged, so its rows survive even a forced collection.
    pub fn snapshot(&self, table: TableId) -> LedgerResult<BaseTable> {
        let ledger = self.catalog.get(table)?;
        BaseTable::pinned(ledger, self.transactions.pin_snapshot())
    }

    /// Merge what no open transaction still needs, then collect `table`
    /// on the calling thread.
    #[instrument(skip(self, table), fields(table = %table))]
    pub fn collect_now(&self, table: TableId, force: bool) -> LedgerResult<CollectOutcome> {
        let ledger = self.catalog.get(table)?;
        ledger.merge_registries(self.transactions.merge_watermark())?;
        Ok(ledger.collect(force))
    }

    /// Ask the background collector for a pass over every table.
    ///
    /// No-op when the collector is disabled.
    pub fn request_collect_all(&self) -> LedgerResult<()> {
        match &self.gc {
            Some(gc) => gc.request(GcJob::CollectAll),
            None => Ok(()),
        }
    }

    pub fn flush(&self) -> LedgerResult<()> {
        self.catalog.store().flush()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Stop the worker before tables close under it.
        drop(self.gc.take());
        self.catalog.close_all();
        if let Err(e) = self.catalog.store().flush() {
            warn!("flush on close failed: {}", e);
        }
    }
}
