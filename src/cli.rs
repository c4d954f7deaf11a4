//! Command-line entry point.
//!
//! Parses arguments, loads the configuration, picks a notification sink and
//! hands over to [`RunController`]. Kept separate from `main` so it can be
//! driven from tests.

use crate::backend::ImapBackend;
use crate::config::Config;
use crate::device::{DeviceControl, DevicePaths, SystemDevice, DEFAULT_CONFIG_FILE, DEFAULT_LOG_FILE};
use crate::error::Result;
use crate::notify;
use crate::run::{config_failure_message, RunController, RunTally};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Fetches ebooks sent by email into the e-reader library.
#[derive(Debug, Parser)]
#[clap(name = "kobo-mail", version, about)]
pub struct Cli {
    /// Path to the TOML config file
    #[clap(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// File to append logs to, in addition to the console
    #[clap(long, default_value = DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,
}

/// Runs one pass with the real device and IMAP connection.
///
/// # Errors
///
/// Returns the fatal error after it has been announced on the device.
pub async fn run(cli: &Cli) -> Result<RunTally> {
    run_with_device(cli, Arc::new(SystemDevice)).await
}

/// Like [`run`], with a caller-supplied device.
///
/// # Errors
///
/// Same as [`run`].
pub async fn run_with_device(cli: &Cli, device: Arc<dyn DeviceControl>) -> Result<RunTally> {
    info!(version = env!("CARGO_PKG_VERSION"), config = %cli.config.display(), "Starting");

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Couldn't read config, aborting");
            // The configured device paths are unknown, so probe the stock layout.
            let sink = notify::select_sink(device, &DevicePaths::default()).await;
            sink.announce_fatal(&config_failure_message(&e)).await;
            return Err(e);
        }
    };

    info!(
        imap_host = %config.imap_host,
        mode = %config.execution_mode,
        filetypes = ?config.filetypes,
        library = %config.device.library_dir.display(),
        "Configuration loaded"
    );
    if let Some(kepubify) = &config.kepubify {
        info!(path = %kepubify.display(), "kepubify configured, conversion is not performed");
    }

    let sink = notify::select_sink(Arc::clone(&device), &config.device).await;
    let backend = ImapBackend::new(config.timeouts.clone());

    RunController::new(&config, device.as_ref(), sink.as_ref())
        .run(backend)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MockDeviceControl;
    use crate::error::Error;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["kobo-mail"]);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        assert_eq!(cli.log_file, PathBuf::from(DEFAULT_LOG_FILE));
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::parse_from(["kobo-mail", "--config", "/tmp/km.toml", "--log-file", "/tmp/km.log"]);
        assert_eq!(cli.config, PathBuf::from("/tmp/km.toml"));
        assert_eq!(cli.log_file, PathBuf::from("/tmp/km.log"));
    }

    #[tokio::test]
    async fn test_missing_config_is_announced() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli {
            config: dir.path().join("absent.toml"),
            log_file: dir.path().join("kobomail.log"),
        };

        let bodies = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorded = Arc::clone(&bodies);
        let mut device = MockDeviceControl::new();
        device.expect_exists().returning(|_| true);
        device.expect_automation().returning(move |_, args| {
            if args.iter().any(|a| a == "ndbVersion") {
                return Ok("0.2.0".to_string());
            }
            if args.get(1).map(String::as_str) == Some("dlgConfirmSetBody") {
                recorded.lock().unwrap().push(args[2].clone());
            }
            Ok(String::new())
        });

        let result = run_with_device(&cli, Arc::new(device)).await;

        assert!(matches!(result, Err(Error::ReadConfig { .. })));
        let bodies = bodies.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].starts_with("Couldn't read config: "));
    }
}
