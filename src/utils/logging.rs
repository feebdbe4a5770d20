// src/utils/logging.rs
//! Logging configuration
//!
//! Sets up `env_logger` for the supervisor binary. Library code only uses
//! the `log` macros; every session-level line is prefixed with the session
//! id, so the format only adds time, level and origin.

use env_logger::{Builder, Target};
use log::{Level, LevelFilter};
use std::env;

/// Initializes logging with an `info` default
///
/// `RUST_LOG`, when set, overrides the default filter.
pub fn init_logging() {
    init_with_default(LevelFilter::Info);
}

/// Initializes logging with a `debug` default
///
/// Raw backend output that could not be parsed is logged at debug level,
/// so this is the mode to use when diagnosing a misbehaving backend.
pub fn init_verbose_logging() {
    init_with_default(LevelFilter::Debug);
}

fn init_with_default(level: LevelFilter) {
    let mut builder = common_log_config();

    if env::var("RUST_LOG").is_err() {
        builder.filter_level(level);
    } else {
        builder.parse_env("RUST_LOG");
    }

    // A second init (tests, embedding GUI) is not an error worth surfacing.
    let _ = builder.try_init();
}

/// Base builder on stdout
///
/// Lines read `[ts level target] message`; debug and trace records also
/// carry the source line.
fn common_log_config() -> Builder {
    let mut builder = Builder::new();

    builder
        .format(|buf, record| {
            use std::io::Write;
            let ts = buf.timestamp_millis();
            let target = record.target();
            match (record.level(), record.line()) {
                (level @ (Level::Debug | Level::Trace), Some(line)) => writeln!(
                    buf,
                    "[{} {:<5} {}:{}] {}",
                    ts,
                    level,
                    target,
                    line,
                    record.args()
                ),
                (level, _) => {
                    writeln!(buf, "[{} {:<5} {}] {}", ts, level, target, record.args())
                }
            }
        })
        .target(Target::Stdout);

    builder
}
