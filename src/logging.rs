//! Tracing setup.
//!
//! Everything is written through a non-blocking rolling file appender; in
//! text mode an ANSI stdout mirror is added for interactive runs, while
//! JSON mode stays file-only for log shippers. The returned guard must
//! live as long as the process, or buffered lines are lost on shutdown.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;

pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let (writer, guard) = tracing_appender::non_blocking(file_appender(config));
    let registry = tracing_subscriber::registry().with(filter(config));

    if config.use_json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(writer)
                    .with_ansi(false),
            )
            .init();
    } else {
        let file = fmt::layer()
            .with_target(false)
            .with_writer(writer)
            .with_ansi(false);
        let stdout = fmt::layer().with_target(false).with_ansi(true);
        registry.with(file).with(stdout).init();
    }

    guard
}

fn file_appender(config: &AppConfig) -> RollingFileAppender {
    match config.rotation.as_str() {
        "hourly" => rolling::hourly(&config.log_dir, &config.log_file),
        "daily" => rolling::daily(&config.log_dir, &config.log_file),
        _ => rolling::never(&config.log_dir, &config.log_file),
    }
}

/// `RUST_LOG` wins when set. Otherwise the configured level applies, with
/// this crate's own spans silenced when tracing is turned off so dependency
/// warnings still surface.
fn filter(config: &AppConfig) -> EnvFilter {
    let directives = if config.enable_tracing {
        config.log_level.clone()
    } else {
        format!("{},settlement_core=off", config.log_level)
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives))
}
