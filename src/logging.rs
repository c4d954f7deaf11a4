//! Tracing subscriber setup for the binary.
//!
//! Events go to the console and, when a log file is given, are appended to it
//! without ANSI colours. `RUST_LOG` overrides the default `info` filter.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "info";

/// Installs the global subscriber.
///
/// A log file that can't be opened leaves console logging in place and is
/// reported as a warning. Calling this twice keeps the first subscriber.
pub fn init(log_file: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (file_layer, file_error) = match log_file.map(open_append) {
        Some(Ok(file)) => (
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file))),
            None,
        ),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .is_ok();

    if let (true, Some(e), Some(path)) = (installed, file_error, log_file) {
        warn!(path = %path.display(), error = %e, "Could not open log file, logging to console only");
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_open_append_keeps_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("kobomail.log");

        open_append(&path).unwrap().write_all(b"first\n").unwrap();
        open_append(&path).unwrap().write_all(b"second\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_open_append_fails_on_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(open_append(dir.path()).is_err());
    }
}
