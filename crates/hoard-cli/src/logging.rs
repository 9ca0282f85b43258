use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_LOG_FILE: &str = "./logs/hoard.log";

/// Console output plus a plain-text log file.
///
/// `TRACING_LEVEL` sets the filter (`info` by default, `debug` with `--verbose`),
/// `LOG_FILE_PATH` the file (`./logs/hoard.log`). Keep the guard alive until exit
/// or the tail of the file is lost.
pub fn init_logger(verbose: bool) -> WorkerGuard {
    let default_level = if verbose { "debug" } else { "info" };
    let filter_layer = EnvFilter::try_from_env("TRACING_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let log_file_path = env::var("LOG_FILE_PATH").unwrap_or_else(|_| DEFAULT_LOG_FILE.to_string());
    let (directory, file_name) = split_log_path(&log_file_path);
    let file_appender = tracing_appender::rolling::never(&directory, &file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .compact()
                .with_target(verbose)
                .without_time()
                .with_ansi(true),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_thread_names(true)
                .with_ansi(false),
        )
        .with(filter_layer)
        .init();

    debug!("Logging to {}", directory.join(&file_name).display());
    guard
}

/// Folder and file name of the log file; a bare name lands in the working directory.
fn split_log_path(path: &str) -> (PathBuf, OsString) {
    let path = Path::new(path);
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let file_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("hoard.log"));
    (directory, file_name)
}
