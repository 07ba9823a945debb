//! Logger setup for the `pfsim` binary and other front ends.
//!
//! Log lines have the form `YYYY-mm-dd HH:MM:SS.mmm [LEVEL] - message` and go to stderr unless a log
//! file is given, in which case they are appended to it.
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::LevelFilter;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("cannot open log file {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    AlreadyInitialized(#[from] log::SetLoggerError),
}

/// Parse a level name (off, error, warn, info, debug, trace), falling back to `info`.
pub fn parse_level(log_level: &str) -> LevelFilter {
    log_level.trim().parse::<LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        LevelFilter::Info
    })
}

/// Open `path` for appending, creating missing parent directories.
pub fn open_log_file(path: &Path) -> Result<File, LoggingError> {
    let file_error = |source| LoggingError::File {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(file_error)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(file_error)
}

/// Install the global logger.
///
/// # Errors
/// [LoggingError::File] if the log file cannot be opened, [LoggingError::AlreadyInitialized] if a
/// logger is already installed.
pub fn init_logger(log_level: &str, log_file: Option<&Path>) -> Result<(), LoggingError> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(parse_level(log_level));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });
    if let Some(path) = log_file {
        let file = open_log_file(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names() {
        assert_eq!(parse_level("debug"), LevelFilter::Debug);
        assert_eq!(parse_level(" WARN "), LevelFilter::Warn);
        assert_eq!(parse_level("off"), LevelFilter::Off);
        assert_eq!(parse_level("loud"), LevelFilter::Info);
    }
    #[test]
    fn log_file_is_created_with_its_directories_and_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("run").join("pfsim.log");
        writeln!(open_log_file(&path).unwrap(), "first").unwrap();
        writeln!(open_log_file(&path).unwrap(), "second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }
    #[test]
    fn unopenable_log_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        match open_log_file(dir.path()) {
            Err(LoggingError::File { path, .. }) => assert_eq!(path, dir.path()),
            other => panic!("expected a file error, got {:?}", other),
        }
    }
}
