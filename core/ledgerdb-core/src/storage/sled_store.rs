//! sled-backed durable row storage.
//!
//! Each table maps to two sled `Tree`s: `rows/<id>` keyed by big-endian row
//! index, and `meta/<id>` keyed by metadata name.

use crate::error::LedgerResult;
use crate::storage::RowStore;
use crate::table::{RowIndex, TableId};
use std::path::Path;

const ROWS_PREFIX: &str = "rows/";
const META_PREFIX: &str = "meta/";

/// sled-backed persistent row store.
pub struct SledRowStore {
    db: sled::Db,
}

impl SledRowStore {
    /// Open the store at the given directory path.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Open a temporary store (for testing). Data is deleted on drop.
    pub fn open_temporary() -> LedgerResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Ok(Self { db })
    }

    fn rows(&self, table: TableId) -> LedgerResult<sled::Tree> {
        Ok(self.db.open_tree(format!("{ROWS_PREFIX}{}", table.0))?)
    }

    fn meta(&self, table: TableId) -> LedgerResult<sled::Tree> {
        Ok(self.db.open_tree(format!("{META_PREFIX}{}", table.0))?)
    }
}

fn row_key(row: RowIndex) -> [u8; 8] {
    (row as u64).to_be_bytes()
}

impl RowStore for SledRowStore {
    fn put_row(&self, table: TableId, row: RowIndex, bytes: &[u8]) -> LedgerResult<()> {
        self.rows(table)?.insert(row_key(row), bytes)?;
        Ok(())
    }

    fn get_row(&self, table: TableId, row: RowIndex) -> LedgerResult<Option<Vec<u8>>> {
        Ok(self.rows(table)?.get(row_key(row))?.map(|ivec| ivec.to_vec()))
    }

    fn remove_row(&self, table: TableId, row: RowIndex) -> LedgerResult<bool> {
        Ok(self.rows(table)?.remove(row_key(row))?.is_some())
    }

    fn scan_rows(&self, table: TableId) -> LedgerResult<Vec<(RowIndex, Vec<u8>)>> {
        let mut result = Vec::new();
        for item in self.rows(table)?.iter() {
            let (k, v) = item?;
            let mut idx = [0u8; 8];
            if k.len() != 8 {
                continue;
            }
            idx.copy_from_slice(&k);
            result.push((u64::from_be_bytes(idx) as RowIndex, v.to_vec()));
        }
        Ok(result)
    }

    fn put_meta(&self, table: TableId, key: &str, bytes: &[u8]) -> LedgerResult<()> {
        self.meta(table)?.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    fn get_meta(&self, table: TableId, key: &str) -> LedgerResult<Option<Vec<u8>>> {
        Ok(self.meta(table)?.get(key.as_bytes())?.map(|ivec| ivec.to_vec()))
    }

    fn drop_table(&self, table: TableId) -> LedgerResult<()> {
        self.db.drop_tree(format!("{ROWS_PREFIX}{}", table.0))?;
        self.db.drop_tree(format!("{META_PREFIX}{}", table.0))?;
        Ok(())
    }

    fn table_ids(&self) -> LedgerResult<Vec<TableId>> {
        let mut ids: Vec<TableId> = self
            .db
            .tree_names()
            .into_iter()
            .filter_map(|name| {
                let s = String::from_utf8(name.to_vec()).ok()?;
                s.strip_prefix(META_PREFIX)?.parse().ok().map(TableId)
            })
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn flush(&self) -> LedgerResult<()> {
        self.db.flush()?;
        Ok(())
    }
}
