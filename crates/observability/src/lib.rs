//! Process-wide logging setup.

/// Log output format and subscriber installation.
pub mod logging;

pub use logging::LogFormat;

/// Initialize process-wide logging from the environment.
///
/// `RUST_LOG` sets the filter (default `info`); `ACCESSGATE_LOG_FORMAT=pretty`
/// switches from JSON to human-readable output. Safe to call multiple times;
/// subsequent calls are no-ops.
pub fn init() {
    logging::init(LogFormat::from_env());
}
