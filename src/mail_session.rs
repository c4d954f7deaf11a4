//! One authenticated, mailbox-selected IMAP session per run.
//!
//! [`MailSession::open`] connects with retry, logs in and selects the
//! mailbox. [`MailSession::fetch`] hands the backend to a background task that
//! streams messages through a bounded channel, and [`MessageStream::finish`]
//! joins that task and gives the session back so it can be released.
//!
//! # Lifecycle
//!
//! 1. [`open`](MailSession::open)
//! 2. [`search`](MailSession::search)
//! 3. [`fetch`](MailSession::fetch), drain with [`MessageStream::next`], then
//!    [`MessageStream::finish`]
//! 4. [`release`](MailSession::release) on every path, including errors

use crate::backend::{FetchedMessage, MailBackend};
use crate::config::{Config, RetryPolicy};
use crate::connection::Endpoint;
use crate::error::{Error, Result};
use crate::search::SearchPredicate;
use crate::session::MailboxInfo;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Messages buffered between the fetch task and the consumer.
pub const FETCH_CHANNEL_CAPACITY: usize = 4;

/// An authenticated session with a selected mailbox.
pub struct MailSession<B: MailBackend> {
    backend: B,
    mailbox: MailboxInfo,
}

impl<B: MailBackend> MailSession<B> {
    /// Connects, authenticates and selects the configured mailbox.
    ///
    /// Only connection establishment is retried, following `config.retry`.
    /// If login or select fails the connection is released before returning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectRetriesExhausted`] when every attempt failed,
    /// or the login/select error.
    #[instrument(
        name = "MailSession::open",
        skip_all,
        fields(
            imap_host = %config.imap_host,
            user = %config.user(),
            mailbox = %config.mailbox
        )
    )]
    pub async fn open(mut backend: B, config: &Config) -> Result<Self> {
        let endpoint = Endpoint {
            host: config.imap_host.clone(),
            port: config.imap_port,
            tls_server_name: config.tls_server_name.clone(),
        };

        connect_with_retry(&mut backend, &endpoint, &config.retry).await?;
        info!("Connected");

        if let Err(e) = backend.authenticate(config.user(), config.password()).await {
            release_backend(&mut backend).await;
            return Err(e);
        }
        info!("Authenticated");

        match backend.select(&config.mailbox).await {
            Ok(mailbox) => {
                info!(exists = mailbox.exists, "Mailbox selected");
                Ok(Self { backend, mailbox })
            }
            Err(e) => {
                release_backend(&mut backend).await;
                Err(e)
            }
        }
    }

    /// Returns the selected mailbox.
    #[must_use]
    pub fn mailbox(&self) -> &MailboxInfo {
        &self.mailbox
    }

    /// Searches the selected mailbox.
    ///
    /// # Errors
    ///
    /// Returns the backend's search error; searches are not retried.
    #[instrument(name = "MailSession::search", skip_all, fields(query = %predicate))]
    pub async fn search(&mut self, predicate: &SearchPredicate) -> Result<Vec<u32>> {
        let seqs = self.backend.search(&predicate.to_query()).await?;
        info!(message_count = seqs.len(), "Search complete");
        Ok(seqs)
    }

    /// Starts fetching `seqs` on a background task.
    ///
    /// The task owns the backend until [`MessageStream::finish`] joins it.
    #[must_use]
    pub fn fetch(self, seqs: Vec<u32>) -> MessageStream<B> {
        let (sender, receiver) = mpsc::channel(FETCH_CHANNEL_CAPACITY);
        let Self { mut backend, mailbox } = self;

        let producer = tokio::spawn(async move {
            let result = backend.fetch(&seqs, sender).await;
            (backend, result)
        });

        MessageStream {
            receiver,
            producer,
            mailbox,
        }
    }

    /// Logs out. Failures are logged, never returned.
    pub async fn release(mut self) {
        release_backend(&mut self.backend).await;
    }
}

impl<B: MailBackend> std::fmt::Debug for MailSession<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailSession")
            .field("mailbox", &self.mailbox)
            .finish_non_exhaustive()
    }
}

/// Messages arriving from a background fetch.
pub struct MessageStream<B: MailBackend> {
    receiver: mpsc::Receiver<FetchedMessage>,
    producer: JoinHandle<(B, Result<()>)>,
    mailbox: MailboxInfo,
}

impl<B: MailBackend> MessageStream<B> {
    /// Waits for the next message, or `None` once the fetch task is done.
    pub async fn next(&mut self) -> Option<FetchedMessage> {
        self.receiver.recv().await
    }

    /// Stops consuming, joins the fetch task and returns the session.
    ///
    /// Any undelivered messages are discarded. The session is `None` only if
    /// the task panicked, in which case the connection is already gone.
    pub async fn finish(self) -> (Option<MailSession<B>>, Result<()>) {
        let Self {
            receiver,
            producer,
            mailbox,
        } = self;

        // Closing the channel unblocks a producer waiting on a full buffer.
        drop(receiver);

        match producer.await {
            Ok((backend, result)) => (Some(MailSession { backend, mailbox }), result),
            Err(source) => (None, Err(Error::FetchTask { source })),
        }
    }
}

/// Attempts to connect up to `policy.attempts` times with a fixed pause.
///
/// Non-retryable failures end the loop immediately.
#[instrument(name = "mail_session::connect", skip_all, fields(target = %endpoint.address()))]
pub(crate) async fn connect_with_retry<B: MailBackend>(
    backend: &mut B,
    endpoint: &Endpoint,
    policy: &RetryPolicy,
) -> Result<()> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match backend.connect(endpoint).await {
            Ok(()) => return Ok(()),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= attempts => {
                return Err(Error::ConnectRetriesExhausted {
                    target: endpoint.address(),
                    attempts,
                    source: Box::new(e),
                });
            }
            Err(e) => {
                warn!(
                    attempt,
                    error = %e,
                    retry_in_ms = u64::try_from(policy.delay.as_millis()).unwrap_or(u64::MAX),
                    "Could not connect to server, trying again"
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
        }
    }
}

async fn release_backend<B: MailBackend>(backend: &mut B) {
    match backend.logout().await {
        Ok(()) => debug!("Session released"),
        Err(e) => warn!(error = %e, "Logout failed"),
    }
}
