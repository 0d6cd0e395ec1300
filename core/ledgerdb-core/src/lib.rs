//! # LedgerDB - Transactional Table-Storage Core
//!
//! LedgerDB는 임베디드 관계형 데이터베이스의 트랜잭션 테이블 저장 계층입니다.
//! 행 수명주기, 동시 트랜잭션 간 다중 버전 가시성, 지연된 물리적 회수,
//! 그리고 데이터 복사 없는 조인/셀렉션 표현을 담당합니다.
//!
//! ## 주요 특징
//!
//! - **Row Ledger**: 테이블별 행 저장소와 행 상태 머신
//! - **Snapshot Isolation**: 커밋 시퀀스 기반 change registry 오버레이
//! - **Reclamation Sweeper**: root lock 과 미병합 registry 를 확인한 뒤 회수
//! - **Row-Composition Algebra**: 인덱스 매핑만으로 표현되는 조인 뷰
//!
//! ## 빠른 시작
//!
//! ```rust
//! use ledgerdb_core::Engine;
//! use ledgerdb_core::composition::{CompositionNode, TableSource};
//! use ledgerdb_core::table::{ColumnDef, DataType, TableSchema, Value};
//!
//! # fn main() -> ledgerdb_core::LedgerResult<()> {
//! let engine = Engine::open_in_memory()?;
//! let a = engine.create_table(TableSchema::new("a", vec![ColumnDef::new("x", DataType::Int64, false)]))?;
//! let b = engine.create_table(TableSchema::new("b", vec![ColumnDef::new("y", DataType::Int64, false)]))?;
//!
//! let mut tx = engine.begin();
//! for v in 0..3 {
//!     tx.insert(a.id(), vec![Value::Int64(v)])?;
//! }
//! for v in 0..4 {
//!     tx.insert(b.id(), vec![Value::Int64(v)])?;
//! }
//! tx.commit()?;
//!
//! let join = CompositionNode::natural_join(
//!     TableSource::base(engine.snapshot(a.id())?),
//!     TableSource::base(engine.snapshot(b.id())?),
//! );
//! assert_eq!(join.row_count(), 12);
//! assert_eq!(join.resolve_row(0, 5)?, 1);
//! assert_eq!(join.resolve_row(1, 5)?, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## 데이터 흐름
//!
//! ```text
//! begin (start_seq) → IndexSet snapshot → insert/delete (Uncommitted)
//!     → commit → ChangeRegistry(commit_seq) → VersionedIndexList
//!     → merge (min open start_seq) → DeletedReclaimable → Sweeper
//! ```
//!
//! ## 모듈 구조
//!
//! - [`engine`] - 진입점 ([`Engine`])
//! - [`table`] - row ledger, 행 상태, root lock, 카탈로그
//! - [`transaction`] - change registry, versioned index list, 트랜잭션, GC
//! - [`composition`] - 조인/셀렉션 뷰
//! - [`storage`] - 행 저장 매체 (in-memory, sled)
//! - [`config`] - 엔진 설정
//! - [`logging`] - tracing subscriber 초기화 (`logging` feature)

pub mod composition;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod storage;
pub mod table;
pub mod transaction;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{LedgerError, LedgerResult};
