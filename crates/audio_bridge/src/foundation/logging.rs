//! Logging utilities and structured logging support

pub use log::{debug, error, info, trace, warn, LevelFilter};

/// Initialize the logging system from `RUST_LOG`
///
/// Calling this more than once is harmless; only the first call installs
/// the logger.
pub fn init() {
    let _ = env_logger::try_init();
}

/// Initialize the logging system with a fixed default level
///
/// `RUST_LOG` still overrides the level when it is set.
pub fn init_with_level(level: LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .try_init();
}
