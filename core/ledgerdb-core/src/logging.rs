//! tracing subscriber setup
//!
//! Library code only emits events; installing a subscriber is up to the
//! embedding application. Without the `logging` feature these are no-ops.

#[cfg(feature = "logging")]
use tracing_subscriber::{EnvFilter, fmt};

/// `RUST_LOG` wins over `fallback`.
#[cfg(feature = "logging")]
fn env_or(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// `RUST_LOG` 이 없으면 `warn` 레벨로 초기화
///
/// ```rust
/// ledgerdb_core::logging::init();
/// ```
#[cfg(feature = "logging")]
pub fn init() {
    init_with_level("warn")
}

/// Install a subscriber with `level` (trace, debug, info, warn, error) as the
/// fallback filter. A second call is ignored.
#[cfg(feature = "logging")]
pub fn init_with_level(level: &str) {
    let _ = fmt()
        .with_env_filter(env_or(level))
        .with_thread_names(true)
        .try_init();
}

/// 테스트용: ledgerdb_core 는 debug, 출력은 test writer
#[cfg(feature = "logging")]
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(env_or("ledgerdb_core=debug"))
        .with_test_writer()
        .try_init();
}

#[cfg(not(feature = "logging"))]
pub fn init() {}

#[cfg(not(feature = "logging"))]
pub fn init_with_level(_level: &str) {}

#[cfg(not(feature = "logging"))]
pub fn init_test() {}
