//! Attachment extraction from fetched messages.
//!
//! A message is parsed with mailparse and walked depth-first. Each leaf part
//! is classified as an [`Attachment`] or inline content, attachments are
//! checked against the allow-list, and accepted ones are written to the
//! library directory under their (possibly renamed) filename.

use crate::backend::FetchedMessage;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use mailparse::{parse_mail, MailHeaderMap, ParsedMail};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Extension of the device's enhanced ebook format.
pub const ENHANCED_EXTENSION: &str = "kepub";

/// Extension appended to enhanced ebooks so the importer recognises them.
pub const ENHANCED_SUFFIX: &str = "epub";

/// A MIME leaf part.
#[derive(Debug)]
pub enum Part<'a> {
    /// A named attachment.
    Attachment(Attachment<'a>),
    /// Body text and any other part without a filename.
    Inline,
}

/// An attachment with a usable filename.
#[derive(Debug)]
pub struct Attachment<'a> {
    /// Final path component of the declared filename.
    pub filename: String,
    /// Text after the last `.` in `filename`, possibly empty.
    pub extension: String,
    part: &'a ParsedMail<'a>,
}

impl Attachment<'_> {
    /// Decodes the attachment body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DecodeAttachment`] if the transfer encoding is broken.
    pub fn content(&self) -> Result<Vec<u8>> {
        self.part
            .get_body_raw()
            .map_err(|source| Error::DecodeAttachment {
                filename: self.filename.clone(),
                source,
            })
    }
}

/// What to do with an attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Save under `stored_name`.
    Accept {
        /// Filename to write into the library.
        stored_name: String,
    },
    /// Extension not allowed; skip.
    Reject,
}

/// Depth-first iterator over the leaf parts of a message.
pub struct Parts<'a> {
    stack: Vec<&'a ParsedMail<'a>>,
}

impl<'a> Iterator for Parts<'a> {
    type Item = Part<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            if node.subparts.is_empty() {
                return Some(classify(node));
            }
            self.stack.extend(node.subparts.iter().rev());
        }
        None
    }
}

/// Walks the leaf parts of `mail` in document order.
#[must_use]
pub fn parts<'a>(mail: &'a ParsedMail<'a>) -> Parts<'a> {
    Parts { stack: vec![mail] }
}

/// Classifies a leaf part.
///
/// Any part with a filename is an attachment, whatever its disposition says:
/// mail clients send books as `inline` or with no disposition at all. The
/// filename comes from the disposition, else the content-type `name`.
#[must_use]
pub fn classify<'a>(part: &'a ParsedMail<'a>) -> Part<'a> {
    let disposition = part.get_content_disposition();
    let declared = disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"));

    match declared.map(|name| base_name(name.as_str())) {
        Some(filename) if !filename.is_empty() => Part::Attachment(Attachment {
            extension: extension(filename).to_string(),
            filename: filename.to_string(),
            part,
        }),
        _ => Part::Inline,
    }
}

/// Decides whether an attachment goes into the library.
///
/// Matching is exact: no case folding beyond stripping the separator.
#[must_use]
pub fn decide(attachment: &Attachment<'_>, allowed: &[String]) -> Decision {
    if !allowed.iter().any(|ext| *ext == attachment.extension) {
        return Decision::Reject;
    }

    let stored_name = if attachment.extension == ENHANCED_EXTENSION {
        format!("{}.{ENHANCED_SUFFIX}", attachment.filename)
    } else {
        attachment.filename.clone()
    };
    Decision::Accept { stored_name }
}

/// Writes `content` to `library_dir/stored_name` in one operation.
///
/// # Errors
///
/// Returns [`Error::Persist`] if the write fails.
pub async fn persist(library_dir: &Path, stored_name: &str, content: &[u8]) -> Result<PathBuf> {
    let path = library_dir.join(stored_name);
    tokio::fs::write(&path, content)
        .await
        .map_err(|source| Error::Persist {
            path: path.clone(),
            source,
        })?;
    Ok(path)
}

/// Extracts every accepted attachment of `message` into `library_dir`.
///
/// Returns the paths written, in document order.
///
/// # Errors
///
/// A missing body, unparsable message, undecodable attachment or failed write
/// is fatal; nothing after it is processed.
#[instrument(name = "extract::process_message", skip_all, fields(seq = message.seq))]
pub async fn process_message(
    message: &FetchedMessage,
    allowed: &[String],
    library_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let accepted = accepted_attachments(message, allowed)?;

    let mut written = Vec::with_capacity(accepted.len());
    for (stored_name, content) in accepted {
        let path = persist(library_dir, &stored_name, &content).await?;
        info!(path = %path.display(), bytes = content.len(), "Saved ebook");
        written.push(path);
    }
    Ok(written)
}

/// Parses `message` and decodes every attachment the allow-list accepts.
fn accepted_attachments(message: &FetchedMessage, allowed: &[String]) -> Result<Vec<(String, Vec<u8>)>> {
    let body = message
        .body
        .as_deref()
        .ok_or(Error::MissingBody { seq: message.seq })?;
    let parsed = parse_mail(body).map_err(|source| Error::ParseEmail {
        seq: message.seq,
        source,
    })?;

    log_envelope(&parsed);

    let mut accepted = Vec::new();
    for part in parts(&parsed) {
        let Part::Attachment(attachment) = part else {
            continue;
        };
        debug!(
            filename = %attachment.filename,
            extension = %attachment.extension,
            "Got attachment"
        );
        match decide(&attachment, allowed) {
            Decision::Accept { stored_name } => {
                accepted.push((stored_name, attachment.content()?));
            }
            Decision::Reject => {
                info!(filename = %attachment.filename, "File type not allowed, ignoring");
            }
        }
    }
    Ok(accepted)
}

fn log_envelope(parsed: &ParsedMail<'_>) {
    let subject = parsed.headers.get_first_value("Subject").unwrap_or_default();
    let date = parsed
        .headers
        .get_first_value("Date")
        .and_then(|raw| mailparse::dateparse(&raw).ok())
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0));

    match date {
        Some(date) => info!(subject = %subject, date = %date.to_rfc3339(), "Processing message"),
        None => info!(subject = %subject, "Processing message"),
    }
}

/// Strips any directory components, whichever separator the sender used.
fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name).trim()
}

/// Text after the last `.`, with stray separators trimmed.
fn extension(filename: &str) -> &str {
    filename
        .rfind('.')
        .map_or("", |i| filename[i..].trim_matches('.'))
}
