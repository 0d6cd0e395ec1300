//! 트랜잭션 계층: change registry, versioned index list, snapshot, sweeper

pub mod gc;
pub mod index_list;
pub mod index_set;
pub mod manager;
pub mod registry;

pub use gc::{CollectOutcome, GarbageCollector, GcJob, SweeperStatus};
pub use index_list::VersionedIndexList;
pub use index_set::IndexSet;
pub use manager::{CommitSequencer, SnapshotPin, Transaction, TransactionManager, TxId};
pub use registry::{ChangeRegistry, RowList};
