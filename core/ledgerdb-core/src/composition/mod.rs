//! Row-composition algebra
//!
//! 조인/셀렉션 결과를 행 복사 없이 조상 테이블의 인덱스 매핑으로 표현한다.
//!
//! ```text
//! CompositionNode (a ⋈ b, 12 rows)
//!   ├── BaseTable a (3 rows, Simple)    r / 4
//!   └── BaseTable b (4 rows, Simple)    r % 4
//! ```
//!
//! Leaves hold a root lock on their ledger, so a composition stays valid while
//! the sweeper runs.

pub mod base;
pub mod enumeration;
pub mod join;
pub mod node;

pub use base::BaseTable;
pub use enumeration::RowEnumeration;
pub use node::CompositionNode;

use crate::error::LedgerResult;
use crate::table::{RowIndex, TableId, TableSchema, Value};
use std::sync::Arc;

/// Any table a composition can read from.
#[derive(Debug, Clone)]
pub enum TableSource {
    Base(Arc<BaseTable>),
    Composite(Arc<CompositionNode>),
}

impl TableSource {
    pub fn base(table: BaseTable) -> Self {
        TableSource::Base(Arc::new(table))
    }

    pub fn composite(node: CompositionNode) -> Self {
        TableSource::Composite(Arc::new(node))
    }

    pub fn schema(&self) -> Arc<TableSchema> {
        match self {
            TableSource::Base(t) => Arc::clone(t.schema()),
            TableSource::Composite(n) => Arc::clone(n.schema()),
        }
    }

    pub fn row_count(&self) -> usize {
        match self {
            TableSource::Base(t) => t.row_count(),
            TableSource::Composite(n) => n.row_count(),
        }
    }

    pub fn column_count(&self) -> usize {
        match self {
            TableSource::Base(t) => t.column_count(),
            TableSource::Composite(n) => n.column_count(),
        }
    }

    pub fn get_value(&self, row: RowIndex, column: usize) -> LedgerResult<Value> {
        match self {
            TableSource::Base(t) => t.get_value(row, column),
            TableSource::Composite(n) => n.get_value(row, column),
        }
    }

    /// Physical ledger rows behind logical `row`.
    pub fn leaf_rows(&self, row: RowIndex) -> LedgerResult<Vec<(TableId, RowIndex)>> {
        match self {
            TableSource::Base(t) => Ok(vec![(t.table_id(), t.physical_row(row)?)]),
            TableSource::Composite(n) => n.leaf_rows(row),
        }
    }

    /// Materialize one logical row.
    pub fn row(&self, row: RowIndex) -> LedgerResult<Vec<Value>> {
        (0..self.column_count())
            .map(|c| self.get_value(row, c))
            .collect()
    }
}

impl From<BaseTable> for TableSource {
    fn from(table: BaseTable) -> Self {
        TableSource::base(table)
    }
}

impl From<CompositionNode> for TableSource {
    fn from(node: CompositionNode) -> Self {
        TableSource::composite(node)
    }
}
