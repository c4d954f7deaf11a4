//! Configuration for the inbox-to-library sync.
//!
//! A [`Config`] is normally loaded from the TOML file the device ships with:
//!
//! ```
//! use kobo_mail::Config;
//!
//! let config = Config::from_toml_str(r#"
//!     [imap_config]
//!     imap_host = "imap.gmail.com"
//!     imap_port = "993"
//!     imap_user = "reader@gmail.com"
//!     imap_pwd = "app-password"
//!     email_flag_type = "plus"
//!     email_flag = "kobo"
//!     email_unseen = "true"
//!
//!     [execution_type]
//!     type = "auto"
//!
//!     [processing_config]
//!     filetypes = ["epub", "kepub", "pdf"]
//! "#).expect("valid config");
//!
//! assert_eq!(config.imap_port, 993);
//! ```
//!
//! or built programmatically with [`ConfigBuilder`].

use crate::device::DevicePaths;
use crate::error::{Error, Result};
use email_address::EmailAddress;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument};

/// Default IMAPS port.
const DEFAULT_IMAP_PORT: u16 = 993;

/// Mailbox searched when none is configured.
const DEFAULT_MAILBOX: &str = "INBOX";

/// How the pipeline gets triggered on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Triggered by a udev rule whenever the network comes up.
    Auto,
    /// Triggered by the user from a menu entry.
    Manual,
}

impl FromStr for ExecutionMode {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            other => Err(Error::InvalidExecutionMode {
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Auto => write!(f, "auto"),
            ExecutionMode::Manual => write!(f, "manual"),
        }
    }
}

/// Which messages count as "for the device".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagMatch {
    /// Recipient is the user's address with `+token` before the `@`.
    Plus(String),
    /// Subject contains the token.
    Subject(String),
}

impl FlagMatch {
    fn parse(kind: &str, token: String) -> Result<Self> {
        if token.is_empty() {
            return Err(Error::InvalidConfig {
                message: "email_flag must not be empty".into(),
            });
        }
        match kind {
            "plus" => Ok(Self::Plus(token)),
            "subject" => Ok(Self::Subject(token)),
            other => Err(Error::InvalidConfig {
                message: format!("email_flag_type must be 'plus' or 'subject', got '{other}'"),
            }),
        }
    }
}

/// Validated configuration for one run.
///
/// Create using [`Config::load`], [`Config::from_toml_str`] or [`Config::builder()`].
///
/// Note: The `password` field is stored as a [`SecretString`] to prevent
/// accidental logging of sensitive credentials.
#[derive(Clone)]
pub struct Config {
    /// IMAP login name.
    user: String,
    /// IMAP password (protected from accidental logging).
    password: SecretString,
    /// IMAP server hostname.
    pub imap_host: String,
    /// IMAP server port (default: 993 for IMAPS).
    pub imap_port: u16,
    /// TLS server name to verify, when it differs from `imap_host`.
    pub tls_server_name: Option<String>,
    /// Mailbox to search (default: `INBOX`).
    pub mailbox: String,
    /// How device-bound messages are recognised.
    pub flag: FlagMatch,
    /// Only consider messages without the `\Seen` flag.
    pub unseen_only: bool,
    /// Which on-device trigger should be installed.
    pub execution_mode: ExecutionMode,
    /// Attachment extensions that get saved to the library.
    pub filetypes: Vec<String>,
    /// Optional path to a kepub conversion tool.
    pub kepubify: Option<PathBuf>,
    /// Device filesystem layout.
    pub device: DevicePaths,
    /// Timeout configuration.
    pub timeouts: TimeoutConfig,
    /// Connection retry policy.
    pub retry: RetryPolicy,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("imap_host", &self.imap_host)
            .field("imap_port", &self.imap_port)
            .field("tls_server_name", &self.tls_server_name)
            .field("mailbox", &self.mailbox)
            .field("flag", &self.flag)
            .field("unseen_only", &self.unseen_only)
            .field("execution_mode", &self.execution_mode)
            .field("filetypes", &self.filetypes)
            .field("kepubify", &self.kepubify)
            .field("device", &self.device)
            .field("timeouts", &self.timeouts)
            .field("retry", &self.retry)
            .finish()
    }
}

impl Config {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reads and validates the TOML configuration file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadConfig`], [`Error::ParseConfig`] or a validation
    /// error if the file is unreadable, malformed or incomplete.
    #[instrument(name = "config::load", skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        debug!(?config, "Configuration loaded");
        Ok(config)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ParseConfig`] for malformed TOML, or a validation error.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content).map_err(|source| Error::ParseConfig { source })?;
        raw.into_builder()?.build()
    }

    /// Returns the IMAP login name.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Returns the password as a string slice.
    ///
    /// The password is intentionally not directly accessible to prevent accidental logging.
    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// Returns the full IMAP server address as "host:port".
    #[must_use]
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.imap_host, self.imap_port)
    }
}

/// Timeout configuration for the IMAP operations of a run.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Timeout for establishing TCP/TLS connection (per attempt).
    pub connect: Duration,
    /// Timeout for IMAP authentication.
    pub auth: Duration,
    /// Timeout for selecting a mailbox.
    pub select: Duration,
    /// Timeout for the search command.
    pub search: Duration,
    /// Timeout for issuing the fetch command.
    pub fetch: Duration,
    /// Timeout for logout operation.
    pub logout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            auth: Duration::from_secs(30),
            select: Duration::from_secs(10),
            search: Duration::from_secs(10),
            fetch: Duration::from_secs(30),
            logout: Duration::from_secs(5),
        }
    }
}

/// How connection establishment is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total connection attempts, including the first.
    pub attempts: u32,
    /// Fixed pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            delay: Duration::from_secs(1),
        }
    }
}

/// Builder for [`Config`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    imap_host: Option<String>,
    imap_port: Option<u16>,
    tls_server_name: Option<String>,
    user: Option<String>,
    password: Option<String>,
    mailbox: Option<String>,
    flag: Option<FlagMatch>,
    unseen_only: bool,
    execution_mode: Option<String>,
    filetypes: Vec<String>,
    kepubify: Option<PathBuf>,
    device: Option<DevicePaths>,
    timeouts: Option<TimeoutConfig>,
    retry: Option<RetryPolicy>,
}

impl ConfigBuilder {
    /// Sets the IMAP server hostname (required).
    #[must_use]
    pub fn imap_host(mut self, host: impl Into<String>) -> Self {
        self.imap_host = Some(host.into());
        self
    }

    /// Sets the IMAP server port. Default is 993.
    #[must_use]
    pub fn imap_port(mut self, port: u16) -> Self {
        self.imap_port = Some(port);
        self
    }

    /// Overrides the name checked against the server's TLS certificate.
    #[must_use]
    pub fn tls_server_name(mut self, name: impl Into<String>) -> Self {
        self.tls_server_name = Some(name.into());
        self
    }

    /// Sets the login name (required).
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Sets the password (required).
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the mailbox to search. Default is `INBOX`.
    #[must_use]
    pub fn mailbox(mut self, mailbox: impl Into<String>) -> Self {
        self.mailbox = Some(mailbox.into());
        self
    }

    /// Sets the message matching strategy (required).
    #[must_use]
    pub fn flag(mut self, flag: FlagMatch) -> Self {
        self.flag = Some(flag);
        self
    }

    /// Restricts the search to unseen messages.
    #[must_use]
    pub fn unseen_only(mut self, unseen_only: bool) -> Self {
        self.unseen_only = unseen_only;
        self
    }

    /// Sets the execution mode as written in the config file (required).
    ///
    /// Validated in [`build`](Self::build).
    #[must_use]
    pub fn execution_mode(mut self, mode: impl Into<String>) -> Self {
        self.execution_mode = Some(mode.into());
        self
    }

    /// Sets the allowed attachment extensions.
    #[must_use]
    pub fn filetypes<I, S>(mut self, filetypes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filetypes = filetypes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the conversion tool path.
    #[must_use]
    pub fn kepubify(mut self, path: impl Into<PathBuf>) -> Self {
        self.kepubify = Some(path.into());
        self
    }

    /// Sets the device filesystem layout.
    #[must_use]
    pub fn device(mut self, device: DevicePaths) -> Self {
        self.device = Some(device);
        self
    }

    /// Sets timeout configuration.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Sets the connection retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if required fields are missing or invalid.
    pub fn build(self) -> Result<Config> {
        let imap_host = required(self.imap_host, "imap_host")?;
        let user = required(self.user, "imap_user")?;
        let password = required(self.password, "imap_pwd")?;
        let flag = self.flag.ok_or_else(|| Error::InvalidConfig {
            message: "email_flag_type and email_flag are required".into(),
        })?;
        let execution_mode = required(self.execution_mode, "execution_type.type")?.parse()?;

        // Plus-addressing rewrites the user's address, so it has to be one.
        if matches!(flag, FlagMatch::Plus(_)) {
            EmailAddress::parse_with_options(&user, email_address::Options::default()).map_err(
                |_| Error::InvalidConfig {
                    message: format!("imap_user '{user}' must be an email address for plus matching"),
                },
            )?;
        }

        Ok(Config {
            user,
            password: SecretString::from(password),
            imap_host,
            imap_port: self.imap_port.unwrap_or(DEFAULT_IMAP_PORT),
            tls_server_name: self.tls_server_name,
            mailbox: self.mailbox.unwrap_or_else(|| DEFAULT_MAILBOX.to_string()),
            flag,
            unseen_only: self.unseen_only,
            execution_mode,
            filetypes: self.filetypes,
            kepubify: self.kepubify,
            device: self.device.unwrap_or_default(),
            timeouts: self.timeouts.unwrap_or_default(),
            retry: self.retry.unwrap_or_default(),
        })
    }
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::InvalidConfig {
            message: format!("{field} is required"),
        })
}

// ─────────────────────────────────────────────────────────────────────────────
// On-disk layout
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawConfig {
    imap_config: RawImap,
    execution_type: RawExecution,
    #[serde(default)]
    processing_config: RawProcessing,
    #[serde(default)]
    device: DevicePaths,
}

#[derive(Deserialize)]
struct RawImap {
    imap_host: Option<String>,
    imap_port: Option<StringOr<u16>>,
    imap_user: Option<String>,
    imap_pwd: Option<String>,
    email_flag_type: Option<String>,
    email_flag: Option<String>,
    email_unseen: Option<StringOr<bool>>,
    imap_mailbox: Option<String>,
    tls_server_name: Option<String>,
}

#[derive(Deserialize)]
struct RawExecution {
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Deserialize, Default)]
struct RawProcessing {
    #[serde(default)]
    filetypes: Vec<String>,
    kepubify: Option<String>,
}

/// The shipped config writes scalars as strings; accept either form.
#[derive(Deserialize)]
#[serde(untagged)]
enum StringOr<T> {
    Typed(T),
    Text(String),
}

impl RawConfig {
    fn into_builder(self) -> Result<ConfigBuilder> {
        let imap = self.imap_config;

        let mut builder = Config::builder()
            .filetypes(self.processing_config.filetypes)
            .device(self.device);

        if let Some(host) = imap.imap_host {
            builder = builder.imap_host(host);
        }
        if let Some(port) = imap.imap_port {
            builder = builder.imap_port(parse_port(port)?);
        }
        if let Some(user) = imap.imap_user {
            builder = builder.user(user);
        }
        if let Some(password) = imap.imap_pwd {
            builder = builder.password(password);
        }
        if let Some(mailbox) = imap.imap_mailbox {
            builder = builder.mailbox(mailbox);
        }
        if let Some(name) = imap.tls_server_name {
            builder = builder.tls_server_name(name);
        }
        if let Some(unseen) = imap.email_unseen {
            builder = builder.unseen_only(match unseen {
                StringOr::Typed(flag) => flag,
                StringOr::Text(text) => text.trim() == "true",
            });
        }
        if let (Some(kind), Some(token)) = (imap.email_flag_type, imap.email_flag) {
            builder = builder.flag(FlagMatch::parse(kind.trim(), token.trim().to_string())?);
        }
        if let Some(kind) = self.execution_type.kind {
            builder = builder.execution_mode(kind.trim());
        }
        if let Some(tool) = self.processing_config.kepubify.filter(|t| !t.trim().is_empty()) {
            builder = builder.kepubify(tool);
        }

        Ok(builder)
    }
}

fn parse_port(port: StringOr<u16>) -> Result<u16> {
    match port {
        StringOr::Typed(port) => Ok(port),
        StringOr::Text(text) => text.trim().parse().map_err(|_| Error::InvalidConfig {
            message: format!("imap_port '{text}' is not a valid port"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHIPPED: &str = r#"
        [imap_config]
        imap_host = "imap.gmail.com"
        imap_port = "993"
        imap_user = "reader@gmail.com"
        imap_pwd = "super-secret-password"
        email_flag_type = "plus"
        email_flag = "kobo"
        email_unseen = "true"

        [execution_type]
        type = "manual"

        [processing_config]
        filetypes = ["epub", "kepub", "pdf"]
        kepubify = "/usr/local/kobomail/kepubify"
    "#;

    fn minimal_builder() -> ConfigBuilder {
        Config::builder()
            .imap_host("imap.example.com")
            .user("reader@example.com")
            .password("secret")
            .flag(FlagMatch::Subject("kobo".into()))
            .execution_mode("auto")
    }

    #[test]
    fn test_parse_shipped_layout() {
        let config = Config::from_toml_str(SHIPPED).unwrap();

        assert_eq!(config.imap_host, "imap.gmail.com");
        assert_eq!(config.imap_port, 993);
        assert_eq!(config.user(), "reader@gmail.com");
        assert_eq!(config.password(), "super-secret-password");
        assert_eq!(config.flag, FlagMatch::Plus("kobo".into()));
        assert!(config.unseen_only);
        assert_eq!(config.execution_mode, ExecutionMode::Manual);
        assert_eq!(config.filetypes, vec!["epub", "kepub", "pdf"]);
        assert_eq!(config.kepubify, Some(PathBuf::from("/usr/local/kobomail/kepubify")));
        assert_eq!(config.mailbox, "INBOX");
        assert_eq!(config.device, DevicePaths::default());
    }

    #[test]
    fn test_typed_scalars_accepted() {
        let toml = SHIPPED
            .replace(r#"imap_port = "993""#, "imap_port = 1993")
            .replace(r#"email_unseen = "true""#, "email_unseen = false");
        let config = Config::from_toml_str(&toml).unwrap();

        assert_eq!(config.imap_port, 1993);
        assert!(!config.unseen_only);
    }

    #[test]
    fn test_unseen_only_requires_exact_true() {
        let toml = SHIPPED.replace(r#"email_unseen = "true""#, r#"email_unseen = "yes""#);
        let config = Config::from_toml_str(&toml).unwrap();
        assert!(!config.unseen_only);
    }

    #[test]
    fn test_invalid_execution_mode_rejected() {
        let toml = SHIPPED.replace(r#"type = "manual""#, r#"type = "sometimes""#);
        let err = Config::from_toml_str(&toml).unwrap_err();
        assert!(matches!(err, Error::InvalidExecutionMode { value } if value == "sometimes"));
    }

    #[test]
    fn test_invalid_port_rejected() {
        let toml = SHIPPED.replace(r#"imap_port = "993""#, r#"imap_port = "imaps""#);
        assert!(matches!(
            Config::from_toml_str(&toml),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_unknown_flag_type_rejected() {
        let toml = SHIPPED.replace(r#"email_flag_type = "plus""#, r#"email_flag_type = "header""#);
        assert!(matches!(
            Config::from_toml_str(&toml),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        assert!(matches!(
            Config::from_toml_str("[imap_config"),
            Err(Error::ParseConfig { .. })
        ));
    }

    #[test]
    fn test_device_paths_overridable() {
        let toml = format!("{SHIPPED}\n[device]\nlibrary_dir = \"/tmp/library\"\n");
        let config = Config::from_toml_str(&toml).unwrap();

        assert_eq!(config.device.library_dir, PathBuf::from("/tmp/library"));
        assert_eq!(config.device.udev_rule, DevicePaths::default().udev_rule);
    }

    #[test]
    fn test_builder_minimal() {
        let config = minimal_builder().build().unwrap();

        assert_eq!(config.imap_port, 993);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.server_address(), "imap.example.com:993");
        assert!(config.filetypes.is_empty());
    }

    #[test]
    fn test_builder_missing_password() {
        let result = Config::builder()
            .imap_host("imap.example.com")
            .user("reader@example.com")
            .flag(FlagMatch::Subject("kobo".into()))
            .execution_mode("auto")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_plus_matching_requires_email_user() {
        let result = minimal_builder()
            .user("reader")
            .flag(FlagMatch::Plus("kobo".into()))
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));

        // Subject matching works with any login name
        assert!(minimal_builder().user("reader").build().is_ok());
    }

    #[test]
    fn test_password_not_in_debug() {
        let config = Config::from_toml_str(SHIPPED).unwrap();

        let debug_str = format!("{config:?}");
        assert!(!debug_str.contains("super-secret-password"));
        assert!(debug_str.contains("[REDACTED]"));
    }
}
