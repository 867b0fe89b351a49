//! Logging initialization: level filter from the CLI, output to the
//! configured log file.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;
use crate::error::Result;

pub fn init(level: LogLevel, log_file: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level.as_filter()))
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}
