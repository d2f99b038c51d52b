use std::io;

use tracing_subscriber::{fmt, EnvFilter};

/// Build the log filter: `--debug` wins, then `--log-level`, then `RUST_LOG`,
/// and `warn` otherwise.
pub fn log_filter(log_level: Option<&str>, debug: bool) -> EnvFilter {
    if debug {
        return EnvFilter::new("debug");
    }
    match log_level {
        Some(level) => match level.to_lowercase().as_str() {
            "off" => EnvFilter::new("off"),
            "error" => EnvFilter::new("error"),
            "warn" | "warning" => EnvFilter::new("warn"),
            "info" => EnvFilter::new("info"),
            "debug" => EnvFilter::new("debug"),
            "trace" => EnvFilter::new("trace"),
            _ => {
                eprintln!("warning: invalid log level '{}', using 'info'", level);
                EnvFilter::new("info")
            }
        },
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    }
}

/// Logs go to stderr so stdout only carries events.
pub fn init_logging(log_level: Option<&str>, debug: bool) {
    let _ = fmt()
        .with_env_filter(log_filter(log_level, debug))
        .with_target(debug)
        .with_writer(io::stderr)
        .try_init();
}
