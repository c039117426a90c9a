//! File logger setup

use std::fs::File;
use std::path::Path;
use std::str::FromStr;

use simplelog::{ConfigBuilder, LevelFilter, WriteLogger};

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("unknown log level {0:?}")]
    UnknownLevel(String),

    #[error("cannot create log file: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    AlreadyInitialized(#[from] log::SetLoggerError),
}

/// Parse `off`, `error`, `warn`, `info`, `debug` or `trace` (any case)
pub fn parse_level(level: &str) -> Result<LevelFilter, LoggingError> {
    LevelFilter::from_str(level.trim()).map_err(|_| LoggingError::UnknownLevel(level.to_string()))
}

/// Route the `log` macros into `path`, truncating it
pub fn init(level: LevelFilter, path: &Path) -> Result<(), LoggingError> {
    let config = ConfigBuilder::new()
        .set_thread_level(LevelFilter::Error)
        .set_target_level(LevelFilter::Error)
        .build();
    WriteLogger::init(level, config, File::create(path)?)?;
    Ok(())
}
