use crate::composition::TableSource;
use crate::composition::enumeration::RowEnumeration;
use crate::error::{LedgerError, LedgerResult};
use crate::table::{RowIndex, TableId, TableSchema, Value};
use rayon::prelude::*;
use std::sync::Arc;

/// Bulk resolution goes parallel at this many rows.
const PARALLEL_THRESHOLD: usize = 1000;

/// How logical rows map onto ancestor rows.
#[derive(Debug, Clone)]
pub(crate) enum RowMapping {
    /// Cartesian product in row-major order, first ancestor varies slowest.
    /// `strides[t]` is the product of the lengths after `t`.
    Product {
        enumerations: Vec<RowEnumeration>,
        strides: Vec<usize>,
        len: usize,
    },
    /// Row `r` maps to `columns[t][r]` in every ancestor.
    Zipped { columns: Vec<Arc<[RowIndex]>>, len: usize },
}

impl RowMapping {
    pub(crate) fn product(enumerations: Vec<RowEnumeration>) -> Self {
        let mut strides = vec![1usize; enumerations.len()];
        let mut len = 1usize;
        for (t, e) in enumerations.iter().enumerate().rev() {
            strides[t] = len;
            len = len.saturating_mul(e.len());
        }
        if enumerations.is_empty() {
            len = 0;
        }
        RowMapping::Product {
            enumerations,
            strides,
            len,
        }
    }

    fn len(&self) -> usize {
        match self {
            RowMapping::Product { len, .. } | RowMapping::Zipped { len, .. } => *len,
        }
    }

    #[inline]
    fn resolve(&self, table_num: usize, row: RowIndex) -> LedgerResult<RowIndex> {
        match self {
            RowMapping::Product {
                enumerations,
                strides,
                ..
            } => {
                let e = &enumerations[table_num];
                e.get((row / strides[table_num]) % e.len())
            }
            RowMapping::Zipped { columns, .. } => Ok(columns[table_num][row]),
        }
    }
}

/// A logical table defined purely as index mappings into its ancestors.
///
/// Never owns row data and never mutates anything. Ancestors are kept alive
/// (and their leaf ledgers root-locked) for as long as the node exists.
#[derive(Debug)]
pub struct CompositionNode {
    schema: Arc<TableSchema>,
    ancestors: Vec<TableSource>,
    /// Column offset of each ancestor in the combined row
    offsets: Vec<usize>,
    mapping: RowMapping,
}

impl CompositionNode {
    pub(crate) fn build(
        schema: Arc<TableSchema>,
        ancestors: Vec<TableSource>,
        mapping: RowMapping,
    ) -> Self {
        let offsets = ancestors
            .iter()
            .scan(0usize, |acc, a| {
                let offset = *acc;
                *acc += a.column_count();
                Some(offset)
            })
            .collect();
        Self {
            schema,
            ancestors,
            offsets,
            mapping,
        }
    }

    pub(crate) fn joined_schema(ancestors: &[TableSource]) -> Arc<TableSchema> {
        let schemas: Vec<Arc<TableSchema>> = ancestors.iter().map(TableSource::schema).collect();
        let parts: Vec<&TableSchema> = schemas.iter().map(|s| s.as_ref()).collect();
        let name = parts
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join("_");
        Arc::new(TableSchema::concat(name, &parts))
    }

    /// Cartesian product of `a` and `b` over their full enumerations.
    ///
    /// Logical row `r` maps to `a` row `r / b.row_count()` and `b` row
    /// `r % b.row_count()`.
    pub fn natural_join(a: TableSource, b: TableSource) -> Self {
        let enumerations = vec![
            RowEnumeration::Simple(a.row_count()),
            RowEnumeration::Simple(b.row_count()),
        ];
        let ancestors = vec![a, b];
        Self::build(
            Self::joined_schema(&ancestors),
            ancestors,
            RowMapping::product(enumerations),
        )
    }

    /// Cartesian product over filtered ancestors. `None` keeps the
    /// ancestor's own enumeration.
    pub fn natural_join_with(
        a: TableSource,
        a_rows: Option<Vec<RowIndex>>,
        b: TableSource,
        b_rows: Option<Vec<RowIndex>>,
    ) -> LedgerResult<Self> {
        Self::virtual_table(vec![(a, a_rows), (b, b_rows)])
    }

    /// Row-major product over any number of ancestors, each either filtered
    /// by an explicit row list or enumerated unchanged.
    pub fn virtual_table(parts: Vec<(TableSource, Option<Vec<RowIndex>>)>) -> LedgerResult<Self> {
        let mut ancestors = Vec::with_capacity(parts.len());
        let mut enumerations = Vec::with_capacity(parts.len());
        for (source, rows) in parts {
            let count = source.row_count();
            enumerations.push(match rows {
                Some(rows) => RowEnumeration::from_rows(rows, count)?,
                None => RowEnumeration::Simple(count),
            });
            ancestors.push(source);
        }
        Ok(Self::build(
            Self::joined_schema(&ancestors),
            ancestors,
            RowMapping::product(enumerations),
        ))
    }

    /// Selection: the given rows of `source`, in the given order.
    pub fn select(source: TableSource, rows: Vec<RowIndex>) -> LedgerResult<Self> {
        let enumeration = RowEnumeration::from_rows(rows, source.row_count())?;
        let schema = source.schema();
        Ok(Self::build(
            schema,
            vec![source],
            RowMapping::product(vec![enumeration]),
        ))
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    pub fn ancestors(&self) -> &[TableSource] {
        &self.ancestors
    }

    pub fn ancestor_count(&self) -> usize {
        self.ancestors.len()
    }

    pub fn row_count(&self) -> usize {
        self.mapping.len()
    }

    pub fn column_count(&self) -> usize {
        self.schema.width()
    }

    /// Whether ancestor `table_num` is walked without an index list.
    pub fn is_simple(&self, table_num: usize) -> bool {
        match &self.mapping {
            RowMapping::Product { enumerations, .. } => {
                enumerations.get(table_num).is_some_and(RowEnumeration::is_simple)
            }
            RowMapping::Zipped { .. } => false,
        }
    }

    fn check(&self, table_num: usize, row: RowIndex) -> LedgerResult<()> {
        if table_num >= self.ancestors.len() {
            return Err(LedgerError::AncestorOutOfRange {
                table_num,
                ancestors: self.ancestors.len(),
            });
        }
        let count = self.row_count();
        if row >= count {
            return Err(LedgerError::RowOutOfRange { row, count });
        }
        Ok(())
    }

    /// Row of ancestor `table_num` behind logical `row`.
    pub fn resolve_row(&self, table_num: usize, row: RowIndex) -> LedgerResult<RowIndex> {
        self.check(table_num, row)?;
        self.mapping.resolve(table_num, row)
    }

    /// Bulk [`resolve_row`](Self::resolve_row). Output order and length match
    /// the input.
    pub fn resolve_rows(&self, table_num: usize, rows: &[RowIndex]) -> LedgerResult<Vec<RowIndex>> {
        if rows.len() >= PARALLEL_THRESHOLD {
            rows.par_iter()
                .map(|r| self.resolve_row(table_num, *r))
                .collect()
        } else {
            rows.iter().map(|r| self.resolve_row(table_num, *r)).collect()
        }
    }

    pub fn get_value(&self, row: RowIndex, column: usize) -> LedgerResult<Value> {
        let width = self.column_count();
        if column >= width {
            return Err(LedgerError::ColumnOutOfRange { column, width });
        }
        let table_num = self.offsets.partition_point(|o| *o <= column) - 1;
        let ancestor_row = self.resolve_row(table_num, row)?;
        self.ancestors[table_num].get_value(ancestor_row, column - self.offsets[table_num])
    }

    /// Physical ledger rows behind logical `row`, one per leaf, in ancestor
    /// order.
    pub fn leaf_rows(&self, row: RowIndex) -> LedgerResult<Vec<(TableId, RowIndex)>> {
        let mut out = Vec::with_capacity(self.ancestors.len());
        for (t, ancestor) in self.ancestors.iter().enumerate() {
            let ancestor_row = self.resolve_row(t, row)?;
            out.extend(ancestor.leaf_rows(ancestor_row)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::BaseTable;
    use crate::storage::InMemoryRowStore;
    use crate::table::{ColumnDef, DataType, RowLedger};

    fn table(id: u32, name: &str, n: i64) -> LedgerResult<TableSource> {
        let schema = TableSchema::new(name, vec![ColumnDef::new("v", DataType::Int64, false)]);
        let ledger = Arc::new(RowLedger::create(
            TableId(id),
            schema,
            Arc::new(InMemoryRowStore::new()),
        )?);
        let rows = (0..n)
            .map(|v| ledger.add_row(vec![Value::Int64(v)]))
            .collect::<LedgerResult<Vec<_>>>()?;
        ledger.apply_commit(1, &rows, &[])?;
        Ok(TableSource::base(BaseTable::snapshot(ledger, 1)?))
    }

    #[test]
    fn test_natural_join_mapping() -> LedgerResult<()> {
        let join = CompositionNode::natural_join(table(1, "a", 3)?, table(2, "b", 4)?);
        assert_eq!(join.row_count(), 12);
        assert_eq!(join.resolve_row(0, 5)?, 1);
        assert_eq!(join.resolve_row(1, 5)?, 1);
        assert_eq!(join.resolve_row(0, 11)?, 2);
        assert_eq!(join.resolve_row(1, 11)?, 3);
        assert!(join.is_simple(0) && join.is_simple(1));
        Ok(())
    }

    #[test]
    fn test_join_values_and_schema() -> LedgerResult<()> {
        let join = CompositionNode::natural_join(table(1, "a", 3)?, table(2, "b", 4)?);
        assert_eq!(join.column_count(), 2);
        assert_eq!(join.schema().column_index("b.v"), Some(1));
        assert_eq!(join.get_value(6, 0)?, Value::Int64(1));
        assert_eq!(join.get_value(6, 1)?, Value::Int64(2));
        assert!(matches!(
            join.get_value(0, 2),
            Err(LedgerError::ColumnOutOfRange { column: 2, width: 2 })
        ));
        Ok(())
    }

    #[test]
    fn test_filtered_join() -> LedgerResult<()> {
        let join = CompositionNode::natural_join_with(
            table(1, "a", 3)?,
            Some(vec![2, 0]),
            table(2, "b", 4)?,
            None,
        )?;
        assert_eq!(join.row_count(), 8);
        assert!(!join.is_simple(0));
        assert_eq!(join.resolve_row(0, 0)?, 2);
        assert_eq!(join.resolve_row(0, 4)?, 0);
        assert_eq!(join.resolve_row(1, 5)?, 1);
        Ok(())
    }

    #[test]
    fn test_out_of_range() -> LedgerResult<()> {
        let join = CompositionNode::natural_join(table(1, "a", 3)?, table(2, "b", 4)?);
        assert!(matches!(
            join.resolve_row(2, 0),
            Err(LedgerError::AncestorOutOfRange { table_num: 2, ancestors: 2 })
        ));
        assert!(matches!(
            join.resolve_row(0, 12),
            Err(LedgerError::RowOutOfRange { row: 12, count: 12 })
        ));
        Ok(())
    }

    #[test]
    fn test_empty_ancestor() -> LedgerResult<()> {
        let join = CompositionNode::natural_join(table(1, "a", 3)?, table(2, "b", 0)?);
        assert_eq!(join.row_count(), 0);
        assert!(join.resolve_row(0, 0).is_err());
        Ok(())
    }

    #[test]
    fn test_nested_resolution() -> LedgerResult<()> {
        let inner = CompositionNode::select(table(1, "a", 5)?, vec![4, 3])?;
        let outer =
            CompositionNode::natural_join(TableSource::composite(inner), table(2, "b", 2)?);
        assert_eq!(outer.row_count(), 4);
        // outer row 2 -> inner row 1 -> a row 3, b row 0
        assert_eq!(outer.resolve_row(0, 2)?, 1);
        assert_eq!(outer.leaf_rows(2)?, vec![(TableId(1), 3), (TableId(2), 0)]);
        assert_eq!(outer.get_value(2, 0)?, Value::Int64(3));
        Ok(())
    }

    #[test]
    fn test_resolve_rows_keeps_order() -> LedgerResult<()> {
        let join = CompositionNode::natural_join(table(1, "a", 40)?, table(2, "b", 50)?);
        let rows: Vec<RowIndex> = (0..join.row_count()).rev().collect();
        let resolved = join.resolve_rows(1, &rows)?;
        assert_eq!(resolved.len(), rows.len());
        for (r, b) in rows.iter().zip(&resolved) {
            assert_eq!(*b, r % 50);
        }
        Ok(())
    }
}
