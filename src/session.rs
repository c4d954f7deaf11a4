//! Internal IMAP session management.
//!
//! This module wraps async-imap operations with proper error handling.

use crate::connection::TlsStream;
use crate::error::{Error, Result};
use async_imap::Session;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{debug, instrument};

/// Type alias for IMAP session over TLS.
pub(crate) type ImapSession = Session<TlsStream>;

/// Items requested for every matched message.
///
/// `BODY[]` rather than `BODY.PEEK[]`: fetching marks the message `\Seen`, so
/// an unseen-only search won't pick it up again on the next run.
const FETCH_ITEMS: &str = "(FLAGS INTERNALDATE BODY[])";

/// Summary of the selected mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxInfo {
    /// Mailbox name.
    pub name: String,
    /// Number of messages in the mailbox.
    pub exists: u32,
}

/// Authenticates to IMAP server and returns a session.
#[instrument(name = "session::authenticate", skip_all, fields(user = %user))]
pub(crate) async fn authenticate(
    tls_stream: TlsStream,
    user: &str,
    password: &str,
) -> Result<ImapSession> {
    let client = async_imap::Client::new(tls_stream);

    debug!("Authenticating to IMAP server");

    client
        .login(user, password)
        .await
        .map_err(|e| Error::ImapLogin {
            user: user.to_string(),
            source: e.0,
        })
}

/// Selects a mailbox (typically "INBOX").
#[instrument(name = "session::select", skip(session), fields(mailbox = %mailbox))]
pub(crate) async fn select_mailbox(session: &mut ImapSession, mailbox: &str) -> Result<MailboxInfo> {
    debug!("Selecting mailbox");

    let selected = session
        .select(mailbox)
        .await
        .map_err(|source| Error::SelectMailbox {
            mailbox: mailbox.to_string(),
            source,
        })?;

    debug!(exists = selected.exists, "Mailbox selected");

    Ok(MailboxInfo {
        name: mailbox.to_string(),
        exists: selected.exists,
    })
}

/// Searches the selected mailbox, returning message sequence numbers in ascending order.
#[instrument(name = "session::search", skip(session), fields(query = %query))]
pub(crate) async fn search(session: &mut ImapSession, query: &str) -> Result<Vec<u32>> {
    let found = session
        .search(query)
        .await
        .map_err(|source| Error::ImapSearch {
            query: query.to_string(),
            source,
        })?;

    let mut seqs: Vec<u32> = found.into_iter().collect();
    seqs.sort_unstable();

    debug!(message_count = seqs.len(), "Search complete");

    Ok(seqs)
}

/// Fetches messages by sequence set.
///
/// Returns a boxed stream of fetch results.
pub(crate) async fn fetch_messages<'a>(
    session: &'a mut ImapSession,
    sequence_set: &str,
) -> Result<BoxStream<'a, std::result::Result<async_imap::types::Fetch, async_imap::error::Error>>>
{
    debug!(sequence_set = %sequence_set, "Fetching messages");

    let stream = session
        .fetch(sequence_set, FETCH_ITEMS)
        .await
        .map_err(|source| Error::ImapFetch {
            sequence_set: sequence_set.to_string(),
            source,
        })?;

    Ok(stream.boxed())
}

/// Logs out from IMAP session.
#[instrument(name = "session::logout", skip(session))]
pub(crate) async fn logout(session: &mut ImapSession) -> Result<()> {
    debug!("Logging out");

    session
        .logout()
        .await
        .map_err(|source| Error::ImapLogout { source })?;

    Ok(())
}

/// Renders sequence numbers as an IMAP sequence set.
pub(crate) fn sequence_set(seqs: &[u32]) -> String {
    seqs.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
