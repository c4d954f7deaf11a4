//! Narrow interface to the reading device's filesystem and helper programs.
//!
//! Everything the agent does to the device outside the library directory goes
//! through [`DeviceControl`]: probing for files, installing or removing trigger
//! files, invoking the automation-control executable and writing synthetic
//! hardware events. [`SystemDevice`] is the real implementation.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

#[cfg(test)]
use mockall::automock;

/// Default configuration file path.
pub const DEFAULT_CONFIG_FILE: &str = "/mnt/onboard/.adds/kobomail/kobomail_cfg.toml";

/// Default log file path.
pub const DEFAULT_LOG_FILE: &str = "/mnt/onboard/.adds/kobomail/kobomail.log";

/// Filesystem locations the agent reads and writes on the device.
///
/// Every field has a default matching the stock installation layout and can be
/// overridden from the `[device]` table of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DevicePaths {
    /// Where accepted attachments are written.
    pub library_dir: PathBuf,
    /// Presence of this directory means the menu launcher is installed.
    pub menu_dir: PathBuf,
    /// Template for the menu entry.
    pub menu_template: PathBuf,
    /// Installed menu entry (manual trigger).
    pub menu_entry: PathBuf,
    /// Template for the udev rule.
    pub udev_template: PathBuf,
    /// Installed udev rule (automatic trigger).
    pub udev_rule: PathBuf,
    /// Presence of this directory means the automation service is installed.
    pub automation_dir: PathBuf,
    /// The automation-control executable.
    pub automation_program: PathBuf,
    /// Named pipe the host reads hardware status events from.
    pub status_pipe: PathBuf,
}

impl Default for DevicePaths {
    fn default() -> Self {
        Self {
            library_dir: "/mnt/onboard/KoboMailLibrary/".into(),
            menu_dir: "/mnt/onboard/.adds/nm".into(),
            menu_template: "/usr/local/kobomail/kobomail_nm.tmpl".into(),
            menu_entry: "/mnt/onboard/.adds/nm/kobomail".into(),
            udev_template: "/usr/local/kobomail/97-kobomail.rules.tmpl".into(),
            udev_rule: "/etc/udev/rules.d/97-kobomail.rules".into(),
            automation_dir: "/mnt/onboard/.adds/nickeldbus".into(),
            automation_program: "/usr/bin/qndb".into(),
            status_pipe: "/tmp/nickel-hardware-status".into(),
        }
    }
}

impl DevicePaths {
    /// Lays out every path under `root`, mirroring the on-device structure.
    ///
    /// Useful for running against a scratch directory instead of a real device.
    #[must_use]
    pub fn rooted_at(root: &Path) -> Self {
        let rebase = |path: PathBuf| root.join(path.strip_prefix("/").unwrap_or(path.as_path()));
        let defaults = Self::default();
        Self {
            library_dir: rebase(defaults.library_dir),
            menu_dir: rebase(defaults.menu_dir),
            menu_template: rebase(defaults.menu_template),
            menu_entry: rebase(defaults.menu_entry),
            udev_template: rebase(defaults.udev_template),
            udev_rule: rebase(defaults.udev_rule),
            automation_dir: rebase(defaults.automation_dir),
            automation_program: rebase(defaults.automation_program),
            status_pipe: rebase(defaults.status_pipe),
        }
    }
}

/// Device operations used by the reconciler and the notification sinks.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Returns whether a file or directory exists at `path`.
    async fn exists(&self, path: &Path) -> bool;

    /// Copies `template` to `destination`, replacing any existing file.
    async fn install(&self, template: &Path, destination: &Path) -> Result<()>;

    /// Removes the file at `path`. A missing file is not an error.
    async fn remove(&self, path: &Path) -> Result<()>;

    /// Runs the automation-control executable and returns its combined output.
    ///
    /// A non-zero exit is an error.
    async fn automation(&self, program: &Path, args: &[String]) -> Result<String>;

    /// Writes `payload` to the status pipe in a single write.
    async fn write_status(&self, pipe: &Path, payload: &str) -> Result<()>;
}

/// [`DeviceControl`] backed by the local filesystem and real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDevice;

#[async_trait]
impl DeviceControl for SystemDevice {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }

    #[instrument(name = "device::install", skip(self))]
    async fn install(&self, template: &Path, destination: &Path) -> Result<()> {
        tokio::fs::copy(template, destination)
            .await
            .map_err(|source| Error::TriggerInstall {
                template: template.to_path_buf(),
                destination: destination.to_path_buf(),
                source,
            })?;
        debug!("Trigger file installed");
        Ok(())
    }

    #[instrument(name = "device::remove", skip(self))]
    async fn remove(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!("Trigger file removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::TriggerRemove {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    #[instrument(name = "device::automation", skip(self))]
    async fn automation(&self, program: &Path, args: &[String]) -> Result<String> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|source| Error::AutomationSpawn {
                program: program.to_path_buf(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(Error::AutomationStatus {
                program: program.to_path_buf(),
                status: output.status,
                output: combined,
            });
        }

        debug!(output = %combined.trim(), "Automation command completed");
        Ok(combined)
    }

    #[instrument(name = "device::write_status", skip(self))]
    async fn write_status(&self, pipe: &Path, payload: &str) -> Result<()> {
        let to_error = |source| Error::StatusPipe {
            path: pipe.to_path_buf(),
            source,
        };

        // Opened read-write so the open doesn't block waiting for a reader.
        let mut file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(pipe)
            .await
            .map_err(to_error)?;
        file.write_all(payload.as_bytes()).await.map_err(to_error)?;
        file.flush().await.map_err(to_error)?;
        Ok(())
    }
}
