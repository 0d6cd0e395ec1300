//! In-memory row store using BTreeMap
//!
//! Used for temporary databases and tests; nothing survives a restart.

use crate::error::LedgerResult;
use crate::storage::RowStore;
use crate::table::{RowIndex, TableId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

#[derive(Default)]
struct TableSlots {
    rows: BTreeMap<RowIndex, Vec<u8>>,
    meta: HashMap<String, Vec<u8>>,
}

/// In-memory row store
#[derive(Default)]
pub struct InMemoryRowStore {
    tables: RwLock<HashMap<TableId, TableSlots>>,
}

impl InMemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RowStore for InMemoryRowStore {
    fn put_row(&self, table: TableId, row: RowIndex, bytes: &[u8]) -> LedgerResult<()> {
        self.tables
            .write()
            .entry(table)
            .or_default()
            .rows
            .insert(row, bytes.to_vec());
        Ok(())
    }

    fn get_row(&self, table: TableId, row: RowIndex) -> LedgerResult<Option<Vec<u8>>> {
        let tables = self.tables.read();
        Ok(tables.get(&table).and_then(|t| t.rows.get(&row).cloned()))
    }

    fn remove_row(&self, table: TableId, row: RowIndex) -> LedgerResult<bool> {
        let mut tables = self.tables.write();
        Ok(tables
            .get_mut(&table)
            .is_some_and(|t| t.rows.remove(&row).is_some()))
    }

    fn scan_rows(&self, table: TableId) -> LedgerResult<Vec<(RowIndex, Vec<u8>)>> {
        let tables = self.tables.read();
        Ok(tables
            .get(&table)
            .map(|t| t.rows.iter().map(|(k, v)| (*k, v.clone())).collect())
            .unwrap_or_default())
    }

    fn put_meta(&self, table: TableId, key: &str, bytes: &[u8]) -> LedgerResult<()> {
        self.tables
            .write()
            .entry(table)
            .or_default()
            .meta
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get_meta(&self, table: TableId, key: &str) -> LedgerResult<Option<Vec<u8>>> {
        let tables = self.tables.read();
        Ok(tables.get(&table).and_then(|t| t.meta.get(key).cloned()))
    }

    fn drop_table(&self, table: TableId) -> LedgerResult<()> {
        self.tables.write().remove(&table);
        Ok(())
    }

    fn table_ids(&self) -> LedgerResult<Vec<TableId>> {
        let mut ids: Vec<TableId> = self.tables.read().keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    fn flush(&self) -> LedgerResult<()> {
        // No-op for in-memory backend
        Ok(())
    }
}
