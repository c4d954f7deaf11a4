//! # kobo-mail
//!
//! Delivers ebooks sent by email into the library of a Kobo e-reader.
//!
//! One run, typically started by a udev rule when the network comes up or from
//! a menu entry:
//!
//! - Makes sure exactly one trigger (udev rule or menu entry) is installed,
//!   matching the configured execution mode
//! - Logs in to the IMAP server, retrying the connection a few times
//! - Searches for messages addressed to `user+flag@host` or with a flag in the
//!   subject, optionally unseen only
//! - Streams matching messages from a background fetch task and saves every
//!   attachment with an allowed extension into the library directory
//! - Tells the device about new books, either through the NickelDbus
//!   automation service or by simulating a USB reconnect
//!
//! ## Quick Start
//!
//! ```no_run
//! use kobo_mail::{Config, ImapBackend, RunController, SystemDevice};
//! use kobo_mail::notify::select_sink;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> kobo_mail::Result<()> {
//! let config = Config::load(Path::new("/mnt/onboard/.adds/kobomail/kobomail_cfg.toml"))?;
//! let device = Arc::new(SystemDevice);
//! let sink = select_sink(device.clone(), &config.device).await;
//!
//! let tally = RunController::new(&config, device.as_ref(), sink.as_ref())
//!     .run(ImapBackend::new(config.timeouts.clone()))
//!     .await?;
//! println!("{} new ebooks", tally.ebooks_persisted());
//! # Ok(())
//! # }
//! ```
//!
//! ## Building a Configuration in Code
//!
//! ```
//! use kobo_mail::{Config, FlagMatch};
//!
//! let config = Config::builder()
//!     .imap_host("imap.gmail.com")
//!     .user("reader@gmail.com")
//!     .password("app-password")
//!     .flag(FlagMatch::Plus("kobo".into()))
//!     .unseen_only(true)
//!     .execution_mode("manual")
//!     .filetypes(["epub", "kepub", "pdf"])
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.server_address(), "imap.gmail.com:993");
//! ```
//!
//! ## Error Handling
//!
//! Every fatal condition is an [`Error`]. Only connection establishment is
//! retried; [`Error::is_retryable`] tells which failures qualify:
//!
//! ```
//! use kobo_mail::Error;
//!
//! fn handle_error(error: &Error) {
//!     if error.is_retryable() {
//!         println!("Transient error, can retry: {}", error);
//!     } else {
//!         println!("Permanent error ({}): {}", error.category(), error);
//!     }
//! }
//! ```
//!
//! ## Observability
//!
//! The crate uses `tracing` for instrumentation. The binary installs a
//! subscriber writing to the console and appending to a log file, see
//! [`logging`].
//!
//! ### Span Naming Convention
//!
//! - `RunController::run` - One full run
//! - `reconcile` - Trigger file reconciliation
//! - `MailSession::open` - Connect, login and select
//! - `mail_session::connect` - Connection attempts
//! - `MailSession::search` - Search
//! - `ImapBackend::fetch` - Background fetch task
//! - `extract::process_message` - Attachment extraction
//! - `session::authenticate` - IMAP authentication
//! - `connection::establish_tls` - TLS connection

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod backend;
pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod extract;
pub mod logging;
pub mod mail_session;
pub mod notify;
pub mod reconcile;
pub mod run;
pub mod search;

// Internal modules
mod connection;
mod session;

// Re-exports for ergonomic API
pub use backend::{FetchedMessage, ImapBackend, MailBackend};
pub use config::{Config, ConfigBuilder, ExecutionMode, FlagMatch, RetryPolicy, TimeoutConfig};
pub use connection::Endpoint;
pub use device::{DeviceControl, DevicePaths, SystemDevice};
pub use error::{Error, ErrorCategory, Result};
pub use mail_session::{MailSession, MessageStream};
pub use notify::NotificationSink;
pub use run::{RunController, RunTally};
pub use search::SearchPredicate;
pub use session::MailboxInfo;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_accessible() {
        let _ = Config::builder();
        let _ = DevicePaths::default();
        let _ = SearchPredicate::default();
        let _ = RunTally::default();
    }
}
