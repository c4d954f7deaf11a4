//! IMAP search criteria derived from configuration.

use crate::config::{Config, FlagMatch};
use std::fmt;

/// Which messages a run picks up.
///
/// The unseen filter composes with at most one matching term. If both a
/// recipient and a subject are set, the recipient wins because it is checked
/// first; [`Config`] never produces both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPredicate {
    /// Exclude messages carrying the `\Seen` flag.
    pub unseen_only: bool,
    /// Recipient address that must appear in `To`.
    pub recipient: Option<String>,
    /// Token that must appear in `Subject`.
    pub subject: Option<String>,
}

impl SearchPredicate {
    /// Builds the predicate for a configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let (recipient, subject) = match &config.flag {
            FlagMatch::Plus(token) => (Some(plus_address(config.user(), token)), None),
            FlagMatch::Subject(token) => (None, Some(token.clone())),
        };
        Self {
            unseen_only: config.unseen_only,
            recipient,
            subject,
        }
    }

    /// Renders the predicate as an IMAP `SEARCH` query.
    #[must_use]
    pub fn to_query(&self) -> String {
        let mut terms = Vec::new();
        if self.unseen_only {
            terms.push("UNSEEN".to_string());
        }
        if let Some(recipient) = &self.recipient {
            terms.push(format!("TO {}", quote(recipient)));
        } else if let Some(subject) = &self.subject {
            terms.push(format!("SUBJECT {}", quote(subject)));
        }

        if terms.is_empty() {
            "ALL".to_string()
        } else {
            terms.join(" ")
        }
    }
}

impl fmt::Display for SearchPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query())
    }
}

/// Inserts `+token` before the first `@` of `address`.
#[must_use]
pub fn plus_address(address: &str, token: &str) -> String {
    address.replacen('@', &format!("+{token}@"), 1)
}

/// Renders an IMAP quoted string.
fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}
