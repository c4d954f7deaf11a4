//! Shared fixtures: a scripted IMAP backend, a recording sink and a scratch
//! device layout.

#![allow(dead_code)]

use async_trait::async_trait;
use kobo_mail::{
    Config, DevicePaths, Endpoint, Error, FetchedMessage, MailBackend, MailboxInfo, NotificationSink,
    Result, RunTally,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────────────
// Scripted backend
// ─────────────────────────────────────────────────────────────────────────────

/// A protocol call observed by [`ScriptedBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect,
    Authenticate(String),
    Select(String),
    Search(String),
    Fetch(Vec<u32>),
    Logout,
}

/// Shared view of the calls a backend received, usable after it was moved.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }
}

/// In-memory [`MailBackend`] following a fixed script.
#[derive(Debug)]
pub struct ScriptedBackend {
    log: CallLog,
    connect_failures: u32,
    reject_login: bool,
    reject_select: bool,
    fail_fetch_after: Option<usize>,
    found: Vec<u32>,
    messages: Vec<FetchedMessage>,
}

impl ScriptedBackend {
    pub fn new() -> (Self, CallLog) {
        let log = CallLog::default();
        let backend = Self {
            log: log.clone(),
            connect_failures: 0,
            reject_login: false,
            reject_select: false,
            fail_fetch_after: None,
            found: Vec::new(),
            messages: Vec::new(),
        };
        (backend, log)
    }

    /// The first `count` connection attempts fail with a retryable error.
    pub fn failing_connects(mut self, count: u32) -> Self {
        self.connect_failures = count;
        self
    }

    pub fn rejecting_login(mut self) -> Self {
        self.reject_login = true;
        self
    }

    pub fn rejecting_select(mut self) -> Self {
        self.reject_select = true;
        self
    }

    /// Fetch yields the first `delivered` messages, then times out.
    pub fn failing_fetch(mut self, delivered: usize) -> Self {
        self.fail_fetch_after = Some(delivered);
        self
    }

    /// Search returns the sequence numbers of `messages` and fetch yields them.
    pub fn with_messages(mut self, messages: Vec<FetchedMessage>) -> Self {
        self.found = messages.iter().map(|m| m.seq).collect();
        self.messages = messages;
        self
    }
}

#[async_trait]
impl MailBackend for ScriptedBackend {
    async fn connect(&mut self, endpoint: &Endpoint) -> Result<()> {
        self.log.push(Call::Connect);
        if self.connect_failures > 0 {
            self.connect_failures -= 1;
            return Err(Error::TcpConnect {
                target: endpoint.address(),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            });
        }
        Ok(())
    }

    async fn authenticate(&mut self, user: &str, _password: &str) -> Result<()> {
        self.log.push(Call::Authenticate(user.to_string()));
        if self.reject_login {
            return Err(Error::AuthTimeout {
                user: user.to_string(),
                timeout: Duration::from_secs(30),
            });
        }
        Ok(())
    }

    async fn select(&mut self, mailbox: &str) -> Result<MailboxInfo> {
        self.log.push(Call::Select(mailbox.to_string()));
        if self.reject_select {
            return Err(Error::SelectTimeout {
                mailbox: mailbox.to_string(),
                timeout: Duration::from_secs(30),
            });
        }
        Ok(MailboxInfo {
            name: mailbox.to_string(),
            exists: u32::try_from(self.messages.len()).unwrap(),
        })
    }

    async fn search(&mut self, query: &str) -> Result<Vec<u32>> {
        self.log.push(Call::Search(query.to_string()));
        Ok(self.found.clone())
    }

    async fn fetch(&mut self, seqs: &[u32], messages: mpsc::Sender<FetchedMessage>) -> Result<()> {
        self.log.push(Call::Fetch(seqs.to_vec()));
        let limit = self.fail_fetch_after.unwrap_or(usize::MAX);
        for message in self.messages.iter().filter(|m| seqs.contains(&m.seq)).take(limit) {
            if messages.send(message.clone()).await.is_err() {
                return Ok(());
            }
        }
        match self.fail_fetch_after {
            Some(_) => Err(Error::FetchTimeout {
                sequence_set: seqs.iter().map(u32::to_string).collect::<Vec<_>>().join(","),
                timeout: Duration::from_secs(60),
            }),
            None => Ok(()),
        }
    }

    async fn logout(&mut self) -> Result<()> {
        self.log.push(Call::Logout);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Recording sink
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start,
    Progress(usize),
    Done(RunTally),
    Fatal(String),
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn announce_start(&self) {
        self.push(Event::Start);
    }

    async fn announce_progress(&self, messages: usize) {
        self.push(Event::Progress(messages));
    }

    async fn announce_done(&self, tally: &RunTally) {
        self.push(Event::Done(tally.clone()));
    }

    async fn announce_fatal(&self, message: &str) {
        self.push(Event::Fatal(message.to_string()));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Device layout and configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Lays out a scratch device under `root` with both trigger templates and the
/// menu launcher installed.
pub fn scratch_device(root: &Path) -> DevicePaths {
    let paths = DevicePaths::rooted_at(root);
    for dir in [
        paths.menu_dir.as_path(),
        paths.udev_rule.parent().unwrap(),
        paths.menu_template.parent().unwrap(),
    ] {
        std::fs::create_dir_all(dir).unwrap();
    }
    std::fs::write(&paths.menu_template, "menu_item:main:KoboMail:cmd_spawn:quiet:kobomail\n").unwrap();
    std::fs::write(&paths.udev_template, "ACTION==\"add\", RUN+=\"kobomail\"\n").unwrap();
    paths
}

pub fn config(mode: &str, filetypes: &[&str], device: DevicePaths) -> Config {
    Config::builder()
        .imap_host("imap.example.com")
        .user("reader@example.com")
        .password("secret")
        .flag(kobo_mail::FlagMatch::Plus("kobo".into()))
        .unseen_only(true)
        .execution_mode(mode)
        .filetypes(filetypes.iter().copied())
        .device(device)
        .build()
        .unwrap()
}

pub fn library_contents(paths: &DevicePaths) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(&paths.library_dir)
        .map(|entries| {
            entries
                .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

/// Builds a multipart message with base64 attachments given as
/// `(filename, base64 content)`.
pub fn message(seq: u32, to: &str, attachments: &[(&str, &str)]) -> FetchedMessage {
    let mut raw = format!(
        "From: friend@example.com\r\n\
         To: {to}\r\n\
         Subject: Books\r\n\
         Date: Sat, 17 Oct 2026 09:30:00 +0000\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: multipart/mixed; boundary=\"sep\"\r\n\
         \r\n\
         --sep\r\n\
         Content-Type: text/plain\r\n\
         \r\n\
         Enjoy.\r\n"
    );
    for (filename, content) in attachments {
        raw.push_str(&format!(
            "--sep\r\n\
             Content-Type: application/octet-stream; name=\"{filename}\"\r\n\
             Content-Disposition: attachment; filename=\"{filename}\"\r\n\
             Content-Transfer-Encoding: base64\r\n\
             \r\n\
             {content}\r\n"
        ));
    }
    raw.push_str("--sep--\r\n");

    FetchedMessage {
        seq,
        body: Some(raw.into_bytes()),
    }
}
