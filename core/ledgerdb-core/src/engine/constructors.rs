//! Engine constructors

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::LedgerResult;
use crate::storage::{InMemoryRowStore, RowStore, SledRowStore};
use crate::table::TableCatalog;
use crate::transaction::{GarbageCollector, TransactionManager};
use std::sync::Arc;
use tracing::{info, instrument};

impl Engine {
    /// 설정에 따라 엔진을 열거나 생성합니다.
    ///
    /// 기존 sled 디렉토리면 모든 테이블을 복구하고, 커밋 시퀀스는 가장 최근
    /// 커밋 이후부터 이어집니다.
    #[instrument(skip(config))]
    pub fn open(config: EngineConfig) -> LedgerResult<Self> {
        let store: Arc<dyn RowStore> = match (&config.storage.path, config.storage.temporary) {
            (_, true) => Arc::new(SledRowStore::open_temporary()?),
            (Some(path), false) => {
                info!("Opening engine at {:?}", path);
                std::fs::create_dir_all(path)?;
                Arc::new(SledRowStore::open(path)?)
            }
            (None, false) => Arc::new(InMemoryRowStore::new()),
        };

        let catalog = Arc::new(TableCatalog::recover(store, config.gc.full_sweep_on_open)?);
        let transactions = Arc::new(TransactionManager::new(Arc::clone(&catalog)));
        let gc = if config.gc.enabled {
            Some(GarbageCollector::start(Arc::clone(&catalog), &config.gc)?)
        } else {
            None
        };

        info!(
            tables = catalog.len(),
            commit_seq = transactions.current_seq(),
            "engine ready"
        );
        Ok(Self {
            config,
            catalog,
            transactions,
            gc,
        })
    }

    /// 인메모리 엔진, 백그라운드 GC 없음
    pub fn open_in_memory() -> LedgerResult<Self> {
        Self::open(EngineConfig::in_memory())
    }

    /// 기본값 → 파일(있으면) → 환경 변수 순서로 설정을 읽어 엔진을 엽니다.
    pub fn open_from_env(config_file: Option<&std::path::Path>) -> LedgerResult<Self> {
        let mut config = match config_file {
            Some(path) if path.exists() => EngineConfig::load_from_file(path)?,
            _ => EngineConfig::default(),
        };
        config.apply_env()?;
        Self::open(config)
    }
}
