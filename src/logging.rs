use std::sync::Once;

use env_logger::Env;
use log::LevelFilter;

static LOG_ONCE: Once = Once::new();

fn env_level() -> LevelFilter {
    std::env::var("THERMOPOLL_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .as_deref()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info)
}

fn level_to_str(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    }
}

/// Parse a level name such as `"debug"`; `None` for anything unrecognised.
pub fn parse_level(input: Option<&str>) -> Option<LevelFilter> {
    input.and_then(|s| s.parse::<LevelFilter>().ok())
}

/// Install the stderr logger, leveled by `THERMOPOLL_LOG`/`RUST_LOG`.
/// Later calls are no-ops.
pub fn init_logging() {
    init_logging_with(None);
}

/// Install the stderr logger at `level`, or the environment's level when `None`.
pub fn init_logging_with(level: Option<LevelFilter>) {
    LOG_ONCE.call_once(|| {
        let mut builder = match level {
            Some(level) => {
                let mut builder = env_logger::Builder::new();
                builder.filter_level(level);
                builder
            }
            None => env_logger::Builder::from_env(
                Env::default().default_filter_or(level_to_str(env_level())),
            ),
        };
        // Another logger may already be installed (tests, embedding apps).
        let _ = builder
            .format_timestamp_millis()
            .format_module_path(true)
            .format_target(true)
            .try_init();
    });
}
