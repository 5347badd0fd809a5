//! Tracing/logging setup shared by binaries and tests embedding `rolegate`.

pub mod tracing;

pub use self::tracing::{LogConfig, LogFormat};

/// Initialize process-wide logging.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(config: &LogConfig) {
    self::tracing::init(config);
}
