// src/logger.rs

use std::path::Path;

use anyhow::Result;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Install the global tracing subscriber: an `EnvFilter` built from
/// `log_level`, a console pretty-printer, and — when `log_dir` is given — a
/// daily-rolling plain-text file appender next to it.
pub fn init_tracing(log_level: &str, log_dir: Option<&Path>) -> Result<()> {
    let env_filter = EnvFilter::new(log_level);
    let console_layer = fmt::layer();

    match log_dir {
        Some(dir) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "botic.log");
            let file_layer = fmt::layer().with_writer(appender).with_ansi(false);
            Registry::default()
                .with(env_filter)
                .with(console_layer)
                .with(file_layer)
                .init();
        }
        None => {
            Registry::default()
                .with(env_filter)
                .with(console_layer)
                .init();
        }
    }
    Ok(())
}
