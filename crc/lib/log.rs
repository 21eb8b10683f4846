//! Tracing subscribers of the `crc` binary.

use std::{ffi::OsStr, path::Path};

use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{self, RollingFileAppender},
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::{config::CrcPaths, CrcError, CrcResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const FILE_LEVEL: &str = "debug";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The console filter: `RUST_LOG` when set, otherwise `info`, or `debug` when `verbose`.
pub fn console_filter(verbose: bool) -> EnvFilter {
    let default = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Logs to stderr and to `crc.log` in the home directory.
///
/// The returned guard flushes the file writer when dropped and must outlive the command.
pub fn init_cli_logging(paths: &CrcPaths, verbose: bool) -> CrcResult<WorkerGuard> {
    let log_path = paths.get_log_path();
    let file_name = log_file_name(&log_path)?;
    std::fs::create_dir_all(paths.get_home())?;
    init_logging(rolling::never(paths.get_home(), file_name), verbose)
}

/// Logs to stderr and to `crcd.log` in the home directory, rotated daily.
pub fn init_daemon_logging(paths: &CrcPaths, verbose: bool) -> CrcResult<WorkerGuard> {
    let log_path = paths.get_daemon_log_path();
    let file_name = log_file_name(&log_path)?;
    std::fs::create_dir_all(paths.get_home())?;
    init_logging(rolling::daily(paths.get_home(), file_name), verbose)
}

fn log_file_name(log_path: &Path) -> CrcResult<&OsStr> {
    log_path
        .file_name()
        .ok_or_else(|| CrcError::InvalidArgument(format!("bad log path {}", log_path.display())))
}

fn init_logging(appender: RollingFileAppender, verbose: bool) -> CrcResult<WorkerGuard> {
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_level(true)
        .with_filter(console_filter(verbose));

    let file = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_filter(EnvFilter::new(FILE_LEVEL));

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .map_err(CrcError::custom)?;

    Ok(guard)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
