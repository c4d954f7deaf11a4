//! The IMAP collaborator behind [`MailSession`](crate::MailSession).
//!
//! [`MailBackend`] is the smallest set of protocol operations a run needs.
//! [`ImapBackend`] implements it over TLS with async-imap; tests substitute a
//! scripted backend to exercise retry and shutdown paths without a server.

use crate::config::TimeoutConfig;
use crate::connection::{self, Endpoint, TlsStream};
use crate::error::{Error, Result};
use crate::session::{self, ImapSession, MailboxInfo};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, instrument};

/// A message as it came off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    /// Message sequence number.
    pub seq: u32,
    /// Full RFC 822 body, if the server returned one.
    pub body: Option<Vec<u8>>,
}

/// Protocol operations used by a run, in the order they are issued.
///
/// Implementations hold the connection state themselves: `connect` opens it,
/// `authenticate` and `select` advance it and `logout` tears it down.
/// The backend is moved into the fetch task while messages stream, so it must
/// be `Send + 'static`.
#[async_trait]
pub trait MailBackend: Send + 'static {
    /// Opens the transport connection.
    async fn connect(&mut self, endpoint: &Endpoint) -> Result<()>;

    /// Logs in on the open connection.
    async fn authenticate(&mut self, user: &str, password: &str) -> Result<()>;

    /// Selects the mailbox to search.
    async fn select(&mut self, mailbox: &str) -> Result<MailboxInfo>;

    /// Runs a search query, returning sequence numbers.
    async fn search(&mut self, query: &str) -> Result<Vec<u32>>;

    /// Fetches `seqs`, pushing each message into `messages` as it arrives.
    ///
    /// Stops early without error if the receiver is dropped.
    async fn fetch(&mut self, seqs: &[u32], messages: mpsc::Sender<FetchedMessage>) -> Result<()>;

    /// Ends the session. Safe to call in any state.
    async fn logout(&mut self) -> Result<()>;
}

enum State {
    Disconnected,
    Connected(TlsStream),
    Authenticated(Box<ImapSession>),
}

/// [`MailBackend`] over TLS using async-imap.
pub struct ImapBackend {
    timeouts: TimeoutConfig,
    state: State,
}

impl ImapBackend {
    /// Creates a disconnected backend.
    #[must_use]
    pub fn new(timeouts: TimeoutConfig) -> Self {
        Self {
            timeouts,
            state: State::Disconnected,
        }
    }

    fn session_mut(&mut self, operation: &'static str) -> Result<&mut ImapSession> {
        match &mut self.state {
            State::Authenticated(session) => Ok(session),
            _ => Err(Error::SessionState {
                operation,
                required: "authenticated",
            }),
        }
    }
}

impl std::fmt::Debug for ImapBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            State::Disconnected => "disconnected",
            State::Connected(_) => "connected",
            State::Authenticated(_) => "authenticated",
        };
        f.debug_struct("ImapBackend")
            .field("timeouts", &self.timeouts)
            .field("state", &state)
            .finish()
    }
}

#[async_trait]
impl MailBackend for ImapBackend {
    async fn connect(&mut self, endpoint: &Endpoint) -> Result<()> {
        let timeout = self.timeouts.connect;

        let tls_stream = tokio::time::timeout(timeout, connection::establish_tls_connection(endpoint))
            .await
            .map_err(|_| Error::ConnectTimeout {
                target: endpoint.address(),
                timeout,
            })??;

        debug!("TLS connection established");
        self.state = State::Connected(tls_stream);
        Ok(())
    }

    async fn authenticate(&mut self, user: &str, password: &str) -> Result<()> {
        let State::Connected(tls_stream) = std::mem::replace(&mut self.state, State::Disconnected)
        else {
            return Err(Error::SessionState {
                operation: "authenticate",
                required: "connected",
            });
        };
        let timeout = self.timeouts.auth;

        let session = tokio::time::timeout(timeout, session::authenticate(tls_stream, user, password))
            .await
            .map_err(|_| Error::AuthTimeout {
                user: user.to_string(),
                timeout,
            })??;

        debug!("Authenticated");
        self.state = State::Authenticated(Box::new(session));
        Ok(())
    }

    async fn select(&mut self, mailbox: &str) -> Result<MailboxInfo> {
        let timeout = self.timeouts.select;
        let session = self.session_mut("select")?;

        tokio::time::timeout(timeout, session::select_mailbox(session, mailbox))
            .await
            .map_err(|_| Error::SelectTimeout {
                mailbox: mailbox.to_string(),
                timeout,
            })?
    }

    async fn search(&mut self, query: &str) -> Result<Vec<u32>> {
        let timeout = self.timeouts.search;
        let session = self.session_mut("search")?;

        tokio::time::timeout(timeout, session::search(session, query))
            .await
            .map_err(|_| Error::SearchTimeout { timeout })?
    }

    #[instrument(name = "ImapBackend::fetch", skip_all, fields(message_count = seqs.len()))]
    async fn fetch(&mut self, seqs: &[u32], messages: mpsc::Sender<FetchedMessage>) -> Result<()> {
        let timeout = self.timeouts.fetch;
        let sequence_set = session::sequence_set(seqs);
        let session = self.session_mut("fetch")?;

        let mut fetch_result = tokio::time::timeout(
            timeout,
            session::fetch_messages(session, &sequence_set),
        )
        .await
        .map_err(|_| Error::FetchTimeout {
            sequence_set: sequence_set.clone(),
            timeout,
        })??;

        while let Some(message_result) = fetch_result.next().await {
            let fetch = message_result.map_err(|source| Error::FetchMessage { source })?;
            let message = FetchedMessage {
                seq: fetch.message,
                body: fetch.body().map(<[u8]>::to_vec),
            };

            if messages.send(message).await.is_err() {
                debug!("Message consumer went away, abandoning fetch");
                break;
            }
        }

        debug!("Fetch complete");
        Ok(())
    }

    async fn logout(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Disconnected) {
            State::Authenticated(mut session) => {
                let timeout = self.timeouts.logout;
                tokio::time::timeout(timeout, session::logout(&mut session))
                    .await
                    .map_err(|_| Error::LogoutTimeout { timeout })?
            }
            State::Connected(_) => {
                // Never logged in; dropping the stream closes the connection.
                debug!("Closing unauthenticated connection");
                Ok(())
            }
            State::Disconnected => Ok(()),
        }
    }
}
