//! On-device progress reporting.
//!
//! Two sinks exist. [`AutomationSink`] drives a status dialog through the
//! automation-control executable and asks the host to rescan its library.
//! [`ReconnectSink`] is the fallback when that service is missing or the wrong
//! version: it only simulates plugging in a USB cable so the host imports new
//! files on its own. [`select_sink`] probes once at startup and picks one.
//!
//! Sinks never fail. Anything that goes wrong while notifying is logged and
//! swallowed, since the files are already written by then.

use crate::device::{DeviceControl, DevicePaths};
use crate::run::RunTally;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Automation service version this agent speaks to.
pub const EXPECTED_AUTOMATION_VERSION: &str = "0.2.0";

/// How long the host gets to finish a library rescan, in milliseconds.
pub const RESCAN_TIMEOUT_MS: u32 = 30_000;

/// Time between the simulated plug and unplug events.
pub const RECONNECT_DWELL: Duration = Duration::from_secs(10);

const DIALOG_TITLE: &str = "KoboMail";
const PLUG_ADD: &str = "usb plug add";
const PLUG_REMOVE: &str = "usb plug remove";

/// Receives progress of a run.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &'static str;

    /// The run has started.
    async fn announce_start(&self);

    /// `messages` matched the search and are about to be processed.
    async fn announce_progress(&self, messages: usize);

    /// The run finished.
    async fn announce_done(&self, tally: &RunTally);

    /// The run is aborting with `message`.
    async fn announce_fatal(&self, message: &str);
}

/// Status dialog driven by the automation-control executable.
pub struct AutomationSink {
    device: Arc<dyn DeviceControl>,
    program: PathBuf,
    dialog_open: AtomicBool,
}

impl AutomationSink {
    /// Creates a sink invoking `program` through `device`.
    pub fn new(device: Arc<dyn DeviceControl>, program: impl Into<PathBuf>) -> Self {
        Self {
            device,
            program: program.into(),
            dialog_open: AtomicBool::new(false),
        }
    }

    async fn call(&self, args: &[&str]) {
        let args: Vec<String> = args.iter().map(|arg| (*arg).to_string()).collect();
        match self.device.automation(&self.program, &args).await {
            Ok(output) => debug!(?args, output = %output.trim(), "Automation call done"),
            Err(e) => warn!(?args, error = %e, "Automation call failed"),
        }
    }

    async fn dialog(&self, verb: &str, args: &[&str]) {
        let mut call = vec!["-m", verb];
        call.extend_from_slice(args);
        self.call(&call).await;
    }

    async fn create_dialog(&self, body: &str) {
        self.dialog("dlgConfirmCreate", &[]).await;
        self.dialog("dlgConfirmSetTitle", &[DIALOG_TITLE]).await;
        self.dialog("dlgConfirmSetBody", &[body]).await;
        self.dialog("dlgConfirmSetModal", &["false"]).await;
        self.dialog("dlgConfirmShowClose", &["true"]).await;
        self.dialog("dlgConfirmShow", &[]).await;
        self.dialog_open.store(true, Ordering::SeqCst);
    }

    /// Updates the open dialog, creating one first if needed.
    async fn show(&self, body: &str) {
        if self.dialog_open.load(Ordering::SeqCst) {
            self.dialog("dlgConfirmSetBody", &[body]).await;
        } else {
            self.create_dialog(body).await;
        }
    }

    async fn add_dismiss(&self) {
        self.dialog("dlgConfirmSetAccept", &["OK"]).await;
    }

    async fn rescan_library(&self) {
        let timeout = RESCAN_TIMEOUT_MS.to_string();
        self.call(&[
            "-t",
            timeout.as_str(),
            "-s",
            "pfmDoneProcessing",
            "-m",
            "pfmRescanBooksFull",
        ])
        .await;
    }
}

impl std::fmt::Debug for AutomationSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomationSink")
            .field("program", &self.program)
            .field("dialog_open", &self.dialog_open)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl NotificationSink for AutomationSink {
    fn name(&self) -> &'static str {
        "automation"
    }

    async fn announce_start(&self) {
        self.create_dialog("Starting up, please wait.").await;
    }

    async fn announce_progress(&self, messages: usize) {
        self.show(&format!("Found {messages} emails to process. Please wait..."))
            .await;
    }

    async fn announce_done(&self, tally: &RunTally) {
        let ebooks = tally.ebooks_persisted();
        if tally.messages_found == 0 {
            self.show("No emails found, nothing to be done.").await;
        } else if ebooks > 0 {
            // The rescan closes open dialogs, so the result gets a fresh one.
            self.rescan_library().await;
            self.create_dialog(&format!("Processed {ebooks} new ebooks.")).await;
        } else {
            self.show(&format!(
                "No new ebooks found in {} emails.",
                tally.messages_found
            ))
            .await;
        }
        self.add_dismiss().await;
    }

    async fn announce_fatal(&self, message: &str) {
        self.show(message).await;
        self.add_dismiss().await;
    }
}

/// Fallback sink simulating a USB reconnect through the status pipe.
pub struct ReconnectSink {
    device: Arc<dyn DeviceControl>,
    pipe: PathBuf,
    dwell: Duration,
}

impl ReconnectSink {
    /// Creates a sink writing to `pipe` with the default dwell.
    pub fn new(device: Arc<dyn DeviceControl>, pipe: impl Into<PathBuf>) -> Self {
        Self {
            device,
            pipe: pipe.into(),
            dwell: RECONNECT_DWELL,
        }
    }

    /// Overrides the time between plug and unplug.
    #[must_use]
    pub fn with_dwell(mut self, dwell: Duration) -> Self {
        self.dwell = dwell;
        self
    }

    async fn write(&self, payload: &str) {
        if let Err(e) = self.device.write_status(&self.pipe, payload).await {
            warn!(payload, error = %e, "Could not write hardware status event");
        }
    }
}

impl std::fmt::Debug for ReconnectSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectSink")
            .field("pipe", &self.pipe)
            .field("dwell", &self.dwell)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl NotificationSink for ReconnectSink {
    fn name(&self) -> &'static str {
        "reconnect"
    }

    async fn announce_start(&self) {}

    async fn announce_progress(&self, messages: usize) {
        debug!(messages, "Processing messages");
    }

    #[instrument(name = "ReconnectSink::announce_done", skip_all)]
    async fn announce_done(&self, tally: &RunTally) {
        if tally.ebooks_persisted() == 0 {
            return;
        }

        info!(
            dwell_secs = self.dwell.as_secs(),
            "Simulating USB plug so the device imports new ebooks"
        );
        self.write(PLUG_ADD).await;
        tokio::time::sleep(self.dwell).await;
        info!("Simulating USB unplug");
        self.write(PLUG_REMOVE).await;
    }

    async fn announce_fatal(&self, message: &str) {
        debug!(fatal = message, "No on-device display for fatal message");
    }
}

/// Result of looking for the automation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// Not installed.
    Absent,
    /// Installed but the version query failed.
    Unavailable {
        /// Why the query failed.
        reason: String,
    },
    /// Installed but reports a different version.
    Incompatible {
        /// Version the service reported.
        reported: String,
    },
    /// Installed with the expected version.
    Compatible,
}

/// Checks whether the automation service is installed and speaks our version.
pub async fn probe_automation(device: &dyn DeviceControl, paths: &DevicePaths) -> Probe {
    if !device.exists(&paths.automation_dir).await {
        return Probe::Absent;
    }

    let args = ["-m".to_string(), "ndbVersion".to_string()];
    match device.automation(&paths.automation_program, &args).await {
        Ok(output) => {
            let reported = output.trim();
            if reported == EXPECTED_AUTOMATION_VERSION {
                Probe::Compatible
            } else {
                Probe::Incompatible {
                    reported: reported.to_string(),
                }
            }
        }
        Err(e) => Probe::Unavailable {
            reason: e.to_string(),
        },
    }
}

/// Probes the device and returns the sink to use for this run.
#[instrument(name = "notify::select_sink", skip_all)]
pub async fn select_sink(
    device: Arc<dyn DeviceControl>,
    paths: &DevicePaths,
) -> Box<dyn NotificationSink> {
    let probe = probe_automation(device.as_ref(), paths).await;

    match probe {
        Probe::Compatible => {
            info!(version = EXPECTED_AUTOMATION_VERSION, "Found automation service");
            return Box::new(AutomationSink::new(device, &paths.automation_program));
        }
        Probe::Absent => info!("Automation service not installed"),
        Probe::Unavailable { reason } => {
            warn!(%reason, "Automation service not responding, falling back to USB reconnect");
        }
        Probe::Incompatible { reported } => {
            warn!(
                expected = EXPECTED_AUTOMATION_VERSION,
                %reported,
                "Automation service version mismatch, falling back to USB reconnect"
            );
        }
    }

    Box::new(ReconnectSink::new(device, &paths.status_pipe))
}
