//! Table module - row ledgers, lifecycle states, root locks and the catalog.

pub mod catalog;
pub mod ledger;
pub mod root_lock;
pub mod row_state;
pub mod schema;

pub use catalog::TableCatalog;
pub use ledger::RowLedger;
pub use root_lock::{RootLock, RootLockGuard};
pub use row_state::RowState;
pub use schema::{ColumnDef, DataType, TableSchema, Value};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical row position inside a ledger. Never reused.
pub type RowIndex = usize;

/// Handle of a table, resolved through the [`TableCatalog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
