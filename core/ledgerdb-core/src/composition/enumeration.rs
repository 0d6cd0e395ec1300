use crate::error::{LedgerError, LedgerResult};
use crate::table::RowIndex;
use std::sync::Arc;

/// How a composition walks the rows of one ancestor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowEnumeration {
    /// Identity `0..n`; position equals ancestor row, nothing allocated
    Simple(usize),
    /// Ordered ancestor rows, dereferenced by position
    Explicit(Arc<[RowIndex]>),
}

impl RowEnumeration {
    /// Build from a row list, collapsing an identity list into `Simple`.
    ///
    /// Every entry must be below `ancestor_rows`.
    pub fn from_rows(rows: Vec<RowIndex>, ancestor_rows: usize) -> LedgerResult<Self> {
        if let Some(&row) = rows.iter().find(|r| **r >= ancestor_rows) {
            return Err(LedgerError::RowOutOfRange {
                row,
                count: ancestor_rows,
            });
        }
        if is_identity(&rows) {
            Ok(RowEnumeration::Simple(rows.len()))
        } else {
            Ok(RowEnumeration::Explicit(rows.into()))
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RowEnumeration::Simple(n) => *n,
            RowEnumeration::Explicit(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_simple(&self) -> bool {
        matches!(self, RowEnumeration::Simple(_))
    }

    /// Ancestor row at `position`.
    #[inline]
    pub fn get(&self, position: usize) -> LedgerResult<RowIndex> {
        match self {
            RowEnumeration::Simple(n) if position < *n => Ok(position),
            RowEnumeration::Explicit(rows) => {
                rows.get(position)
                    .copied()
                    .ok_or(LedgerError::RowOutOfRange {
                        row: position,
                        count: rows.len(),
                    })
            }
            RowEnumeration::Simple(n) => Err(LedgerError::RowOutOfRange {
                row: position,
                count: *n,
            }),
        }
    }
}

fn is_identity(rows: &[RowIndex]) -> bool {
    rows.iter().enumerate().all(|(i, r)| i == *r)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_collapses() -> LedgerResult<()> {
        let e = RowEnumeration::from_rows(vec![0, 1, 2], 5)?;
        assert_eq!(e, RowEnumeration::Simple(3));
        assert_eq!(e.get(2)?, 2);
        assert!(e.get(3).is_err());
        Ok(())
    }

    #[test]
    fn test_explicit_dereference() -> LedgerResult<()> {
        let e = RowEnumeration::from_rows(vec![4, 0, 2], 5)?;
        assert!(!e.is_simple());
        assert_eq!(e.len(), 3);
        assert_eq!(e.get(0)?, 4);
        assert_eq!(e.get(2)?, 2);
        Ok(())
    }

    #[test]
    fn test_out_of_range_entry() {
        assert!(matches!(
            RowEnumeration::from_rows(vec![0, 7], 5),
            Err(LedgerError::RowOutOfRange { row: 7, count: 5 })
        ));
    }
}
