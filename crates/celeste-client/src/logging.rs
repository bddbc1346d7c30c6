//! Log setup and fatal-error reporting.
//!
//! A process writes its log to one plain-text file, truncated at start.
//! When the process dies on an error, [`log_fatal`] appends the error chain
//! and a backtrace to the same file.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use celeste_core::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

use crate::error::ClientError;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` overrides the configured level. With an empty `path`, logs go
/// to stderr.
pub fn init(config: &LoggingConfig) -> Result<(), ClientError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| ClientError::Logging(e.to_string()))?;

    let result = match open_log_file(config)? {
        Some(file) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    };
    result.map_err(|e| ClientError::Logging(e.to_string()))
}

/// Create (or truncate) the configured log file.
fn open_log_file(config: &LoggingConfig) -> Result<Option<File>, ClientError> {
    let Some(path) = config.log_file() else {
        return Ok(None);
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Some(File::create(path)?))
}

/// Append `error`, its causes and a backtrace to the log file at `path`.
///
/// `backtrace` is the one recorded where the error was raised; when it is
/// missing or was not captured, one is taken here instead. Also emits the
/// error through `tracing`, so it reaches stderr when no file is
/// configured.
pub fn log_fatal(
    path: Option<&Path>,
    error: &(dyn std::error::Error + 'static),
    backtrace: Option<&Backtrace>,
) {
    let report = match backtrace {
        Some(bt) if bt.status() == BacktraceStatus::Captured => fatal_report(error, bt),
        _ => fatal_report(error, &Backtrace::force_capture()),
    };
    tracing::error!(%error, "Fatal error");

    let Some(path) = path else {
        return;
    };
    let written = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(report.as_bytes()));
    if let Err(e) = written {
        tracing::error!(path = %path.display(), error = %e, "Could not write fatal error to log file");
    }
}

fn fatal_report(error: &(dyn std::error::Error + 'static), backtrace: &Backtrace) -> String {
    use std::fmt::Write as _;

    let mut report = format!("Fatal error: {error}\n");
    let mut source = error.source();
    while let Some(cause) = source {
        let _ = writeln!(report, "Caused by: {cause}");
        source = cause.source();
    }
    let _ = writeln!(report, "Backtrace:\n{backtrace}");
    report
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use celeste_bridge::BridgeError;

    use super::*;

    #[test]
    fn report_includes_cause_chain() {
        let err = ClientError::Bridge(BridgeError::Disconnected {
            queue: "observation",
        });
        let report = fatal_report(&err, &Backtrace::disabled());
        assert!(report.starts_with("Fatal error: Bridge error"));
        assert!(report.contains("Caused by:"));
        assert!(report.contains("observation"));
        assert!(report.contains("Backtrace:"));
    }

    #[test]
    fn fatal_error_is_appended_to_existing_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.log");
        std::fs::write(&path, "earlier line\n").unwrap();

        log_fatal(Some(&path), &ClientError::ForwarderGone, None);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("earlier line\n"));
        assert!(content.contains("Reward forwarder thread is gone"));
        assert!(content.contains("Backtrace:"));
    }

    #[test]
    fn log_file_is_created_and_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("celeste_logs.txt");
        let config = LoggingConfig {
            path: Some(path.clone()),
            ..LoggingConfig::default()
        };

        drop(open_log_file(&config).unwrap().unwrap());
        assert!(path.exists());

        std::fs::write(&path, "previous run\n").unwrap();
        drop(open_log_file(&config).unwrap().unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn empty_path_logs_to_stderr() {
        let config = LoggingConfig {
            path: Some(PathBuf::new()),
            ..LoggingConfig::default()
        };
        assert!(open_log_file(&config).unwrap().is_none());
    }

    #[test]
    fn captured_backtrace_is_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.log");
        let origin = Backtrace::force_capture();

        log_fatal(Some(&path), &ClientError::ForwarderGone, Some(&origin));

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains(&origin.to_string()));
    }
}
