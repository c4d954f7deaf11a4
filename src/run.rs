//! One end-to-end pass: trigger reconciliation, mail retrieval, extraction.

use crate::backend::MailBackend;
use crate::config::Config;
use crate::device::DeviceControl;
use crate::error::{Error, ErrorCategory, Result};
use crate::extract;
use crate::mail_session::{MailSession, MessageStream};
use crate::notify::NotificationSink;
use crate::reconcile;
use crate::search::SearchPredicate;
use std::path::PathBuf;
use tracing::{error, info, instrument};

/// Outcome of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunTally {
    /// Messages matching the search.
    pub messages_found: usize,
    /// Files written to the library, in processing order.
    pub persisted: Vec<PathBuf>,
}

impl RunTally {
    /// Number of ebooks written to the library.
    #[must_use]
    pub fn ebooks_persisted(&self) -> usize {
        self.persisted.len()
    }
}

/// Drives a run against a device and a notification sink.
pub struct RunController<'a> {
    config: &'a Config,
    device: &'a dyn DeviceControl,
    sink: &'a dyn NotificationSink,
}

impl<'a> RunController<'a> {
    /// Creates a controller for one run.
    pub fn new(config: &'a Config, device: &'a dyn DeviceControl, sink: &'a dyn NotificationSink) -> Self {
        Self { config, device, sink }
    }

    /// Runs the pipeline with `backend` as the IMAP connection.
    ///
    /// Start, progress and completion are announced on the sink. A fatal
    /// error is announced with a user-facing message and then returned.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error. Files written before it stay in the
    /// library.
    #[instrument(name = "RunController::run", skip_all, fields(sink = self.sink.name()))]
    pub async fn run<B: MailBackend>(&self, backend: B) -> Result<RunTally> {
        self.sink.announce_start().await;

        match self.execute(backend).await {
            Ok(tally) => {
                info!(
                    messages = tally.messages_found,
                    ebooks = tally.ebooks_persisted(),
                    "Run complete"
                );
                self.sink.announce_done(&tally).await;
                Ok(tally)
            }
            Err(e) => {
                error!(error = %e, category = %e.category(), "Run failed");
                self.sink.announce_fatal(&fatal_message(&e, self.config)).await;
                Err(e)
            }
        }
    }

    async fn execute<B: MailBackend>(&self, backend: B) -> Result<RunTally> {
        let applied = reconcile::reconcile(self.config.execution_mode, self.device, &self.config.device).await?;
        if !applied.is_empty() {
            info!(mode = %self.config.execution_mode, changes = applied.len(), "Execution mode updated");
        }

        let library_dir = &self.config.device.library_dir;
        tokio::fs::create_dir_all(library_dir)
            .await
            .map_err(|source| Error::Persist {
                path: library_dir.clone(),
                source,
            })?;

        let mut session = MailSession::open(backend, self.config).await?;

        let predicate = SearchPredicate::from_config(self.config);
        let seqs = match session.search(&predicate).await {
            Ok(seqs) => seqs,
            Err(e) => {
                session.release().await;
                return Err(e);
            }
        };

        let mut tally = RunTally {
            messages_found: seqs.len(),
            ..RunTally::default()
        };

        if seqs.is_empty() {
            info!("No messages matched");
            session.release().await;
            return Ok(tally);
        }

        self.sink.announce_progress(seqs.len()).await;

        let mut stream = session.fetch(seqs);
        let consumed = self.consume(&mut stream, &mut tally).await;
        let (session, produced) = stream.finish().await;
        if let Some(session) = session {
            session.release().await;
        }

        // A consumer error usually causes the producer's, so it is reported first.
        consumed?;
        produced?;

        Ok(tally)
    }

    async fn consume<B: MailBackend>(&self, stream: &mut MessageStream<B>, tally: &mut RunTally) -> Result<()> {
        while let Some(message) = stream.next().await {
            let written =
                extract::process_message(&message, &self.config.filetypes, &self.config.device.library_dir).await?;
            tally.persisted.extend(written);
        }
        Ok(())
    }
}

impl std::fmt::Debug for RunController<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunController")
            .field("config", self.config)
            .field("sink", &self.sink.name())
            .finish_non_exhaustive()
    }
}

/// Text shown on the device when a run aborts.
#[must_use]
pub fn fatal_message(error: &Error, config: &Config) -> String {
    match error {
        Error::ConnectRetriesExhausted { attempts, .. } => format!(
            "Tried {} times to login to {} but failed, please check internet connection",
            attempts.saturating_sub(1),
            config.imap_host
        ),
        Error::ImapLogin { .. } | Error::AuthTimeout { .. } => {
            format!("Failed to authenticate: {}", with_cause(error))
        }
        Error::SelectMailbox { .. } | Error::SelectTimeout { .. } => {
            format!("Failed to select {}: {}", config.mailbox, with_cause(error))
        }
        Error::MissingBody { .. } => "Exiting, server didn't return message body".to_string(),
        e if e.category() == ErrorCategory::Configuration => config_failure_message(e),
        e => format!("KoboMail failed: {}", with_cause(e)),
    }
}

/// Text shown on the device when the configuration can't be used.
#[must_use]
pub fn config_failure_message(error: &Error) -> String {
    format!("Couldn't read config: {}", with_cause(error))
}

/// Renders an error followed by its immediate cause, if any.
fn with_cause(error: &Error) -> String {
    match std::error::Error::source(error) {
        Some(cause) => format!("{error}: {cause}"),
        None => error.to_string(),
    }
}
