//! Engine configuration
//!
//! 기본값 → JSON 파일 → 환경 변수 순서로 덮어쓴다.
//!
//! - `LEDGERDB_GC_ENABLED` - `true`/`1` 이면 백그라운드 GC 활성화
//! - `LEDGERDB_GC_INTERVAL_MS` - GC 주기 (밀리초)
//! - `LEDGERDB_DATA_PATH` - sled 데이터 디렉토리

use crate::error::{LedgerError, LedgerResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_GC_ENABLED: &str = "LEDGERDB_GC_ENABLED";
pub const ENV_GC_INTERVAL_MS: &str = "LEDGERDB_GC_INTERVAL_MS";
pub const ENV_DATA_PATH: &str = "LEDGERDB_DATA_PATH";

/// Where rows live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// sled directory; `None` keeps everything in memory
    pub path: Option<PathBuf>,
    /// Use a sled database that is removed on drop
    pub temporary: bool,
}

/// Reclamation sweeper settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Run the background collector thread
    pub enabled: bool,
    /// Tick interval of the background collector
    pub interval_ms: u64,
    /// Schedule a full sweep for every table recovered on open
    pub full_sweep_on_open: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1000,
            full_sweep_on_open: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub gc: GcConfig,
}

impl EngineConfig {
    /// In-memory storage, background GC off.
    pub fn in_memory() -> Self {
        Self {
            storage: StorageConfig::default(),
            gc: GcConfig {
                enabled: false,
                ..GcConfig::default()
            },
        }
    }

    /// sled storage at `path`.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig {
                path: Some(path.into()),
                temporary: false,
            },
            gc: GcConfig::default(),
        }
    }

    /// 파일에서 로드. 없는 필드는 기본값.
    pub fn load_from_file(path: &Path) -> LedgerResult<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// 파일에 저장
    pub fn save_to_file(&self, path: &Path) -> LedgerResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)?;
        Ok(())
    }

    /// 환경 변수 적용
    pub fn apply_env(&mut self) -> LedgerResult<()> {
        self.apply_vars(|key| env::var(key).ok())
    }

    fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> LedgerResult<()> {
        if let Some(value) = lookup(ENV_GC_ENABLED) {
            self.gc.enabled = parse_bool(&value);
        }
        if let Some(value) = lookup(ENV_GC_INTERVAL_MS) {
            self.gc.interval_ms = value.trim().parse().map_err(|_| {
                LedgerError::Config(format!("{ENV_GC_INTERVAL_MS}: invalid value {value:?}"))
            })?;
        }
        if let Some(value) = lookup(ENV_DATA_PATH).filter(|v| !v.is_empty()) {
            self.storage.path = Some(PathBuf::from(value));
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}
