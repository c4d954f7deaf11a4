//! Error types for the kobo-mail crate.
//!
//! All errors implement [`std::error::Error`] and provide context about what went wrong.
//! Only connection establishment is ever retried - see [`Error::is_retryable`].
//! Every other variant is fatal for the run it occurred in.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while syncing the inbox into the library.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration errors (fatal, never retried)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to read the configuration file.
    #[error("failed to read config file {}", path.display())]
    ReadConfig {
        /// Path of the configuration file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML or has the wrong shape.
    #[error("failed to parse config file")]
    ParseConfig {
        /// The underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// Invalid configuration provided.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// The execution mode is neither `auto` nor `manual`.
    #[error("incorrect execution type '{value}', expected 'auto' or 'manual'")]
    InvalidExecutionMode {
        /// The rejected value.
        value: String,
    },

    /// Invalid DNS name for TLS.
    #[error("invalid DNS name for host '{host}'")]
    InvalidDnsName {
        /// The invalid hostname.
        host: String,
        /// The underlying DNS name error.
        #[source]
        source: rustls::client::InvalidDnsNameError,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Device trigger errors (fatal)
    // ─────────────────────────────────────────────────────────────────────────
    /// Manual mode was requested but the menu launcher is not installed.
    #[error("menu launcher not found at {}, can't switch to manual execution", path.display())]
    MenuUnavailable {
        /// Directory whose presence signals the menu launcher.
        path: PathBuf,
    },

    /// Failed to copy a trigger template into place.
    #[error("failed to install {} from {}", destination.display(), template.display())]
    TriggerInstall {
        /// Template that was being copied.
        template: PathBuf,
        /// Where the trigger file should have been written.
        destination: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to delete a trigger file.
    #[error("failed to remove {}", path.display())]
    TriggerRemove {
        /// The trigger file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Network / connection errors (RETRYABLE)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to establish TCP connection.
    #[error("failed to connect to {target}")]
    TcpConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to establish TLS connection.
    #[error("failed to establish TLS connection to {target}")]
    TlsConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Connection timeout.
    #[error("connection timeout to {target} after {timeout:?}")]
    ConnectTimeout {
        /// The target address.
        target: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Every connection attempt failed.
    #[error("gave up connecting to {target} after {attempts} attempts")]
    ConnectRetriesExhausted {
        /// The target address.
        target: String,
        /// How many attempts were made.
        attempts: u32,
        /// The error from the final attempt.
        #[source]
        source: Box<Error>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Authentication / mailbox errors (fatal, credentials won't change mid-run)
    // ─────────────────────────────────────────────────────────────────────────
    /// IMAP login failed.
    #[error("IMAP login failed for {user}")]
    ImapLogin {
        /// The user name used for login.
        user: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Authentication timeout.
    #[error("authentication timeout for {user} after {timeout:?}")]
    AuthTimeout {
        /// The user name used for authentication.
        user: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Failed to select mailbox.
    #[error("failed to select mailbox '{mailbox}'")]
    SelectMailbox {
        /// The mailbox name.
        mailbox: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Mailbox selection timeout.
    #[error("mailbox selection timeout for '{mailbox}' after {timeout:?}")]
    SelectTimeout {
        /// The mailbox name.
        mailbox: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// An IMAP command was issued before the session reached the required state.
    #[error("cannot {operation}: IMAP session is not {required}")]
    SessionState {
        /// The attempted operation.
        operation: &'static str,
        /// The state the session needed to be in.
        required: &'static str,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // IMAP protocol errors
    // ─────────────────────────────────────────────────────────────────────────
    /// IMAP search failed.
    #[error("IMAP search failed for query '{query}'")]
    ImapSearch {
        /// The rendered search query.
        query: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Search timeout.
    #[error("search timeout after {timeout:?}")]
    SearchTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// IMAP fetch failed.
    #[error("IMAP fetch failed for sequence set {sequence_set}")]
    ImapFetch {
        /// The sequence set that failed.
        sequence_set: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Message fetch timeout.
    #[error("message fetch timeout for sequence set {sequence_set} after {timeout:?}")]
    FetchTimeout {
        /// The sequence set being fetched.
        sequence_set: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Failed to fetch message from stream.
    #[error("failed to fetch message from stream")]
    FetchMessage {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// The background fetch task panicked or was cancelled.
    #[error("fetch task did not complete")]
    FetchTask {
        /// The underlying join error.
        #[source]
        source: tokio::task::JoinError,
    },

    /// The server returned a matched message without its body.
    #[error("server didn't return the body of message {seq}")]
    MissingBody {
        /// Sequence number of the message.
        seq: u32,
    },

    /// IMAP logout failed.
    #[error("IMAP logout failed")]
    ImapLogout {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Logout timeout (not critical).
    #[error("logout timeout after {timeout:?}")]
    LogoutTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Email parsing errors (fatal - malformed content won't change)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to parse email message.
    #[error("failed to parse message {seq}")]
    ParseEmail {
        /// Sequence number of the message.
        seq: u32,
        /// The underlying parse error.
        #[source]
        source: mailparse::MailParseError,
    },

    /// Failed to decode an attachment body.
    #[error("failed to decode attachment '{filename}'")]
    DecodeAttachment {
        /// The attachment file name.
        filename: String,
        /// The underlying parse error.
        #[source]
        source: mailparse::MailParseError,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Library write errors (fatal)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to write into the library directory.
    #[error("failed to write {}", path.display())]
    Persist {
        /// The path being written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Notification errors (never escalated past the sink)
    // ─────────────────────────────────────────────────────────────────────────
    /// The automation-control executable could not be run.
    #[error("failed to run {}", program.display())]
    AutomationSpawn {
        /// The executable path.
        program: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The automation-control executable exited unsuccessfully.
    #[error("{} exited with {status}: {output}", program.display())]
    AutomationStatus {
        /// The executable path.
        program: PathBuf,
        /// The exit status.
        status: std::process::ExitStatus,
        /// Combined stdout and stderr.
        output: String,
    },

    /// Failed to write to the device status pipe.
    #[error("failed to write to status pipe {}", path.display())]
    StatusPipe {
        /// The pipe path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Returns `true` if this error represents a transient connection failure
    /// that might succeed on another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TcpConnect { .. } | Error::TlsConnect { .. } | Error::ConnectTimeout { .. }
        )
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::ReadConfig { .. }
            | Error::ParseConfig { .. }
            | Error::InvalidConfig { .. }
            | Error::InvalidExecutionMode { .. }
            | Error::InvalidDnsName { .. } => ErrorCategory::Configuration,

            Error::MenuUnavailable { .. }
            | Error::TriggerInstall { .. }
            | Error::TriggerRemove { .. } => ErrorCategory::Device,

            Error::TcpConnect { .. }
            | Error::TlsConnect { .. }
            | Error::ConnectRetriesExhausted { .. } => ErrorCategory::Network,

            Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::SelectTimeout { .. }
            | Error::SearchTimeout { .. }
            | Error::FetchTimeout { .. }
            | Error::LogoutTimeout { .. } => ErrorCategory::Timeout,

            Error::ImapLogin { .. } => ErrorCategory::Authentication,

            Error::SelectMailbox { .. }
            | Error::SessionState { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. }
            | Error::FetchMessage { .. }
            | Error::FetchTask { .. }
            | Error::MissingBody { .. }
            | Error::ImapLogout { .. } => ErrorCategory::Protocol,

            Error::ParseEmail { .. } | Error::DecodeAttachment { .. } => ErrorCategory::Parse,

            Error::Persist { .. } => ErrorCategory::Persist,

            Error::AutomationSpawn { .. }
            | Error::AutomationStatus { .. }
            | Error::StatusPipe { .. } => ErrorCategory::Notification,
        }
    }
}

/// Error categories for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Configuration or validation errors.
    Configuration,
    /// On-device trigger file errors.
    Device,
    /// Network connectivity errors.
    Network,
    /// Timeout errors.
    Timeout,
    /// Credentials rejected by the server.
    Authentication,
    /// IMAP protocol errors.
    Protocol,
    /// Email parsing errors.
    Parse,
    /// Library directory write errors.
    Persist,
    /// Notification delivery errors.
    Notification,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Device => write!(f, "device"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Authentication => write!(f, "authentication"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Parse => write!(f, "parse"),
            ErrorCategory::Persist => write!(f, "persist"),
            ErrorCategory::Notification => write!(f, "notification"),
        }
    }
}
