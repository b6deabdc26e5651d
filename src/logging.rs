//! Logging setup on top of `env_logger`, plus the frame dump helper used by
//! the transports.

use crate::util::hex::format_hex_compact;
use log::{debug, log_enabled, Level, LevelFilter};

/// Initializes the logger with the `env_logger` crate.
///
/// `RUST_LOG` is honoured as usual; without it only warnings are shown.
pub fn init_logger() {
    init_logger_with_debug(false);
}

/// Initializes `env_logger` with a default level, still overridable by `RUST_LOG`.
///
/// `debug` raises the default from `warn` to `debug`, which includes the hex
/// dump of every frame sent and received.
pub fn init_logger_with_debug(debug: bool) {
    let default = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let _ = env_logger::Builder::new()
        .filter_level(default)
        .parse_env("RUST_LOG")
        .format_timestamp_millis()
        .try_init();
}

/// Logs the raw bytes of a frame at debug level.
///
/// The hex text is only built when debug output is enabled.
pub fn log_frame(direction: &str, bytes: &[u8]) {
    if log_enabled!(Level::Debug) {
        debug!("{direction} {}", format_hex_compact(bytes));
    }
}
