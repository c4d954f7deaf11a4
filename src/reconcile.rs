//! Keeps the device trigger files in line with the configured execution mode.
//!
//! Automatic runs are triggered by a udev rule firing on network-up; manual
//! runs by a menu entry. Exactly one of the two should be installed.
//! [`transition`] is the pure decision table, [`reconcile`] observes the
//! device and applies its result.

use crate::config::ExecutionMode;
use crate::device::{DeviceControl, DevicePaths};
use crate::error::{Error, Result};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, instrument};

/// Which trigger files are currently installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    /// Neither trigger is installed.
    None,
    /// Only the udev rule.
    UdevOnly,
    /// Only the menu entry.
    MenuOnly,
    /// Both triggers.
    Both,
}

impl ArtifactState {
    /// Builds the state from the presence of each file.
    #[must_use]
    pub fn from_presence(udev: bool, menu: bool) -> Self {
        match (udev, menu) {
            (false, false) => Self::None,
            (true, false) => Self::UdevOnly,
            (false, true) => Self::MenuOnly,
            (true, true) => Self::Both,
        }
    }

    fn has_udev(self) -> bool {
        matches!(self, Self::UdevOnly | Self::Both)
    }

    fn has_menu(self) -> bool {
        matches!(self, Self::MenuOnly | Self::Both)
    }
}

/// What the device looks like before reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observed {
    /// Installed trigger files.
    pub artifacts: ArtifactState,
    /// Whether the menu launcher is installed at all.
    pub menu_capability: bool,
}

/// A change to the device's trigger files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAction {
    /// Copy the menu template into place.
    InstallMenu,
    /// Delete the menu entry.
    RemoveMenu,
    /// Copy the udev template into place.
    InstallUdev,
    /// Delete the udev rule.
    RemoveUdev,
}

impl fmt::Display for TriggerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InstallMenu => "install_menu",
            Self::RemoveMenu => "remove_menu",
            Self::InstallUdev => "install_udev",
            Self::RemoveUdev => "remove_udev",
        })
    }
}

/// Decides which actions bring `observed` in line with `mode`.
///
/// Installs come before removals so a failure part-way never leaves the
/// device without any trigger.
///
/// # Errors
///
/// Returns [`Error::MenuUnavailable`] for manual mode without the menu
/// launcher; `menu_dir` is only used to report where it was looked for.
pub fn transition(
    mode: ExecutionMode,
    observed: Observed,
    menu_dir: &Path,
) -> Result<Vec<TriggerAction>> {
    let artifacts = observed.artifacts;

    let actions = match mode {
        ExecutionMode::Manual => {
            if !observed.menu_capability {
                return Err(Error::MenuUnavailable {
                    path: menu_dir.to_path_buf(),
                });
            }
            let mut actions = Vec::new();
            if !artifacts.has_menu() {
                actions.push(TriggerAction::InstallMenu);
            }
            if artifacts.has_udev() {
                actions.push(TriggerAction::RemoveUdev);
            }
            actions
        }
        ExecutionMode::Auto => {
            let mut actions = Vec::new();
            if !artifacts.has_udev() {
                actions.push(TriggerAction::InstallUdev);
            }
            if artifacts.has_menu() {
                actions.push(TriggerAction::RemoveMenu);
            }
            actions
        }
    };

    Ok(actions)
}

/// Probes the device for trigger files and the menu launcher.
pub async fn observe(device: &dyn DeviceControl, paths: &DevicePaths) -> Observed {
    let udev = device.exists(&paths.udev_rule).await;
    let menu = device.exists(&paths.menu_entry).await;
    let menu_capability = device.exists(&paths.menu_dir).await;

    Observed {
        artifacts: ArtifactState::from_presence(udev, menu),
        menu_capability,
    }
}

/// Observes the device and applies whatever [`transition`] decides.
///
/// Returns the actions that were applied, empty when already consistent.
///
/// # Errors
///
/// Fails if manual mode can't be honoured or a trigger file can't be
/// installed or removed.
#[instrument(name = "reconcile", skip(device, paths))]
pub async fn reconcile(
    mode: ExecutionMode,
    device: &dyn DeviceControl,
    paths: &DevicePaths,
) -> Result<Vec<TriggerAction>> {
    let observed = observe(device, paths).await;
    debug!(?observed, "Observed trigger files");

    let actions = transition(mode, observed, &paths.menu_dir)?;

    for action in &actions {
        match action {
            TriggerAction::InstallMenu => device.install(&paths.menu_template, &paths.menu_entry).await?,
            TriggerAction::RemoveMenu => device.remove(&paths.menu_entry).await?,
            TriggerAction::InstallUdev => device.install(&paths.udev_template, &paths.udev_rule).await?,
            TriggerAction::RemoveUdev => device.remove(&paths.udev_rule).await?,
        }
        info!(%action, "Applied trigger change");
    }

    if actions.is_empty() {
        debug!("Trigger files already match execution mode");
    }

    Ok(actions)
}
