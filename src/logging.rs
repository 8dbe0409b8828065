use std::io;

use time::macros::format_description;
use time::UtcOffset;
use tracing_subscriber::{self, fmt, prelude::*};

/// Install a stderr tracing subscriber. Opt-in for embedders; the library
/// itself never installs one.
pub fn init_logger(no_color: bool, log_level: Option<&str>) -> io::Result<()> {
    let timer = fmt::time::OffsetTime::new(
        UtcOffset::UTC,
        format_description!("[[[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z]"),
    );

    // Log to stderr
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(timer)
        .with_ansi(!no_color);

    // Configure the log level based on whether a level was provided
    let env_filter = match log_level {
        Some(level) => {
            // If a level is provided, use it directly
            tracing_subscriber::EnvFilter::new(level)
        }
        None => {
            // Otherwise fall back to RUST_LOG or default to "warn"
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
        }
    };

    // Combine the layers using a registry
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .init();

    Ok(())
}
