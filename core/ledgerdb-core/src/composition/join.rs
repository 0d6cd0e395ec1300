//! Equi-join - hash build on the left input, probe from the right.

use crate::composition::TableSource;
use crate::composition::node::{CompositionNode, RowMapping};
use crate::error::{LedgerError, LedgerResult};
use crate::table::RowIndex;
use ahash::AHashMap;
use std::sync::Arc;

impl CompositionNode {
    /// Rows of `left` x `right` where `left[left_col] == right[right_col]`.
    ///
    /// Output is grouped by right row in ascending order, then by left row
    /// ascending. NULL keys never match.
    pub fn equi_join(
        left: TableSource,
        left_col: usize,
        right: TableSource,
        right_col: usize,
    ) -> LedgerResult<Self> {
        check_column(&left, left_col)?;
        check_column(&right, right_col)?;

        // Build phase: key -> left rows
        let mut build_table: AHashMap<Vec<u8>, Vec<RowIndex>> = AHashMap::new();
        for row in 0..left.row_count() {
            if let Some(key) = join_key(&left, row, left_col)? {
                build_table.entry(key).or_default().push(row);
            }
        }

        // Probe phase
        let mut left_rows = Vec::new();
        let mut right_rows = Vec::new();
        if !build_table.is_empty() {
            for row in 0..right.row_count() {
                let Some(key) = join_key(&right, row, right_col)? else {
                    continue;
                };
                if let Some(matches) = build_table.get(&key) {
                    for &l in matches {
                        left_rows.push(l);
                        right_rows.push(row);
                    }
                }
            }
        }

        let len = left_rows.len();
        let ancestors = vec![left, right];
        let schema = Self::joined_schema(&ancestors);
        Ok(Self::build(
            schema,
            ancestors,
            RowMapping::Zipped {
                columns: vec![Arc::from(left_rows), Arc::from(right_rows)],
                len,
            },
        ))
    }
}

fn check_column(source: &TableSource, column: usize) -> LedgerResult<()> {
    let width = source.column_count();
    if column >= width {
        return Err(LedgerError::ColumnOutOfRange { column, width });
    }
    Ok(())
}

fn join_key(source: &TableSource, row: RowIndex, column: usize) -> LedgerResult<Option<Vec<u8>>> {
    let value = source.get_value(row, column)?;
    if value.is_null() {
        return Ok(None);
    }
    let mut key = Vec::new();
    value.append_key(&mut key);
    Ok(Some(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::BaseTable;
    use crate::storage::InMemoryRowStore;
    use crate::table::{ColumnDef, DataType, RowLedger, TableId, TableSchema, Value};

    fn table(id: u32, name: &str, keys: &[Value]) -> LedgerResult<TableSource> {
        let schema = TableSchema::new(name, vec![ColumnDef::new("k", DataType::Int64, true)]);
        let ledger = Arc::new(RowLedger::create(
            TableId(id),
            schema,
            Arc::new(InMemoryRowStore::new()),
        )?);
        let rows = keys
            .iter()
            .map(|k| ledger.add_row(vec![k.clone()]))
            .collect::<LedgerResult<Vec<_>>>()?;
        ledger.apply_commit(1, &rows, &[])?;
        Ok(TableSource::base(BaseTable::snapshot(ledger, 1)?))
    }

    #[test]
    fn test_equi_join_matches() -> LedgerResult<()> {
        let left = table(1, "l", &[Value::Int64(1), Value::Int64(2), Value::Int64(1)])?;
        let right = table(2, "r", &[Value::Int64(2), Value::Int64(1), Value::Int64(9)])?;
        let join = CompositionNode::equi_join(left, 0, right, 0)?;

        assert_eq!(join.row_count(), 3);
        // right row 0 (key 2) -> left row 1
        assert_eq!(join.resolve_row(0, 0)?, 1);
        assert_eq!(join.resolve_row(1, 0)?, 0);
        // right row 1 (key 1) -> left rows 0, 2
        assert_eq!(join.resolve_rows(0, &[1, 2])?, vec![0, 2]);
        assert_eq!(join.resolve_rows(1, &[1, 2])?, vec![1, 1]);
        for r in 0..join.row_count() {
            assert_eq!(join.get_value(r, 0)?, join.get_value(r, 1)?);
        }
        Ok(())
    }

    #[test]
    fn test_null_keys_never_match() -> LedgerResult<()> {
        let left = table(1, "l", &[Value::Null, Value::Int64(3)])?;
        let right = table(2, "r", &[Value::Null])?;
        let join = CompositionNode::equi_join(left, 0, right, 0)?;
        assert_eq!(join.row_count(), 0);
        Ok(())
    }

    #[test]
    fn test_bad_key_column() -> LedgerResult<()> {
        let left = table(1, "l", &[Value::Int64(1)])?;
        let right = table(2, "r", &[Value::Int64(1)])?;
        assert!(matches!(
            CompositionNode::equi_join(left, 1, right, 0),
            Err(LedgerError::ColumnOutOfRange { column: 1, width: 1 })
        ));
        Ok(())
    }
}
