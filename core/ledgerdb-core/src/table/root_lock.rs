//! Root lock - per-table reference count pinning physical rows.
//!
//! The sweeper only reclaims when the count is zero. The count is advisory to
//! every other component: a reader that does not hold a guard may observe
//! `RowReclaimed`.

use crate::error::{LedgerError, LedgerResult};
use crate::table::TableId;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Lock counter shared between a ledger and its guards.
#[derive(Debug)]
pub struct RootLock {
    table: TableId,
    count: AtomicUsize,
}

impl RootLock {
    pub fn new(table: TableId) -> Self {
        Self {
            table,
            count: AtomicUsize::new(0),
        }
    }

    /// Take one lock and return the guard that releases it.
    pub fn acquire(self: &Arc<Self>) -> RootLockGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        RootLockGuard {
            lock: Arc::clone(self),
            released: false,
        }
    }

    /// Release one lock.
    ///
    /// Releasing an unlocked table is a logic error and leaves the count at zero.
    pub fn release(&self) -> LedgerResult<()> {
        self.count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_sub(1))
            .map(|_| ())
            .map_err(|_| LedgerError::UnlockBelowZero { table: self.table })
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_locked(&self) -> bool {
        self.count() > 0
    }
}

/// RAII token for one root lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct RootLockGuard {
    lock: Arc<RootLock>,
    released: bool,
}

impl RootLockGuard {
    pub fn table(&self) -> TableId {
        self.lock.table
    }

    /// Release now and surface an underflow instead of logging it.
    pub fn release(mut self) -> LedgerResult<()> {
        self.released = true;
        self.lock.release()
    }

    /// Keep the lock held without a guard; pair with `RowLedger::unlock_root`.
    pub fn into_raw(mut self) {
        self.released = true;
    }
}

impl Clone for RootLockGuard {
    fn clone(&self) -> Self {
        self.lock.acquire()
    }
}

impl Drop for RootLockGuard {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = self.lock.release()
        {
            tracing::error!(table = %self.lock.table, "root lock guard dropped: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_counts() {
        let lock = Arc::new(RootLock::new(TableId(1)));
        let g1 = lock.acquire();
        let g2 = lock.acquire();
        assert_eq!(lock.count(), 2);

        drop(g1);
        assert_eq!(lock.count(), 1);
        drop(g2);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_clone_takes_another_lock() {
        let lock = Arc::new(RootLock::new(TableId(1)));
        let g1 = lock.acquire();
        let g2 = g1.clone();
        assert_eq!(lock.count(), 2);
        drop(g1);
        drop(g2);
        assert_eq!(lock.count(), 0);
    }

    #[test]
    fn test_release_below_zero() {
        let lock = RootLock::new(TableId(9));
        let err = lock.release().unwrap_err();
        assert!(matches!(err, LedgerError::UnlockBelowZero { .. }));
        assert_eq!(lock.count(), 0);
    }

    #[test]
    fn test_into_raw_keeps_lock() {
        let lock = Arc::new(RootLock::new(TableId(1)));
        lock.acquire().into_raw();
        assert_eq!(lock.count(), 1);
        lock.release().unwrap();
        assert_eq!(lock.count(), 0);
    }
}
