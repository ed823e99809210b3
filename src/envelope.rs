//! Message envelopes and mailbox entries
//!
//! An ENVELOPE is a ten-item list (RFC 3501 Section 7.4.2):
//!
//! ```text
//!   (date subject from sender reply-to to cc bcc in-reply-to message-id)
//! ```
//!
//! where every address slot is either `NIL` or a list of four-item
//! address lists `(name adl mailbox host)`.

use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::parser::{Field, get_from_list, parse_line};

/// One address from an envelope address list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub name: Option<String>,
    /// Source route, obsolete.
    pub adl: Option<String>,
    pub mailbox: Option<String>,
    pub host: Option<String>,
}

impl Address {
    fn from_field(field: &Field) -> Option<Self> {
        let items = field.items();
        if items.len() < 4 {
            return None;
        }
        let text = |i: usize| items[i].string().map(Cow::into_owned);
        Some(Self {
            name: text(0),
            adl: text(1),
            mailbox: text(2),
            host: text(3),
        })
    }

    /// `mailbox@host`, or whichever half is present.
    #[must_use]
    pub fn mail_address(&self) -> String {
        match (&self.mailbox, &self.host) {
            (Some(mailbox), Some(host)) => format!("{mailbox}@{host}"),
            (Some(part), None) | (None, Some(part)) => part.clone(),
            (None, None) => String::new(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) if !name.is_empty() => write!(f, "{name} <{}>", self.mail_address()),
            _ => f.write_str(&self.mail_address()),
        }
    }
}

/// Structured message metadata returned by `FETCH ... ENVELOPE`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Parsed `Date` header; `None` when absent or unparsable.
    pub date: Option<DateTime<FixedOffset>>,
    pub raw_date: Option<String>,
    pub subject: Option<String>,
    pub from: Vec<Address>,
    pub sender: Vec<Address>,
    pub reply_to: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub in_reply_to: Option<String>,
    pub message_id: Option<String>,
}

impl Envelope {
    /// Build an envelope from the list following the `ENVELOPE` keyword.
    pub fn parse(field: &Field) -> Result<Self> {
        let Field::List(_) = field else {
            return Err(Error::Parse(format!("ENVELOPE is not a list: {field:?}")));
        };
        let items = field.items();
        let text = |i: usize| items.get(i).and_then(Field::string).map(Cow::into_owned);
        let addresses = |i: usize| -> Vec<Address> {
            items
                .get(i)
                .map(|f| f.items().iter().filter_map(Address::from_field).collect())
                .unwrap_or_default()
        };

        let raw_date = text(0);
        Ok(Self {
            date: raw_date.as_deref().and_then(parse_date),
            raw_date,
            subject: text(1),
            from: addresses(2),
            sender: addresses(3),
            reply_to: addresses(4),
            to: addresses(5),
            cc: addresses(6),
            bcc: addresses(7),
            in_reply_to: text(8),
            message_id: text(9),
        })
    }

    /// First `From` address.
    #[must_use]
    pub fn from_address(&self) -> Option<&Address> {
        self.from.first()
    }
}

/// Parse an RFC 2822 date, tolerating a trailing `(comment)`.
fn parse_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw).ok().or_else(|| {
        let stripped = raw.rsplit_once(" (").map_or(raw, |(head, _)| head);
        DateTime::parse_from_rfc2822(stripped.trim()).ok()
    })
}

/// A message known to the session: its UID and envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailEntry {
    pub uid: u32,
    pub envelope: Envelope,
}

impl MailEntry {
    #[must_use]
    pub const fn new(uid: u32, envelope: Envelope) -> Self {
        Self { uid, envelope }
    }

    /// Build an entry from a `* n FETCH (UID u ENVELOPE (...))` line.
    pub fn from_fetch_line<L: AsRef<[u8]> + ?Sized>(line: &L) -> Result<Self> {
        let line = line.as_ref();
        let fields = parse_line(line);
        let data = fields
            .iter()
            .find(|f| f.has_keyword("ENVELOPE"))
            .ok_or_else(|| parse_error("no ENVELOPE list in", line))?;
        let items = data.items();

        let uid = get_from_list(&items, "UID")
            .and_then(Field::number)
            .ok_or_else(|| parse_error("no UID in", line))?;
        let envelope = get_from_list(&items, "ENVELOPE")
            .ok_or_else(|| parse_error("empty ENVELOPE in", line))
            .and_then(Envelope::parse)?;

        Ok(Self::new(uid, envelope))
    }

    #[must_use]
    pub const fn date(&self) -> Option<DateTime<FixedOffset>> {
        self.envelope.date
    }
}

fn parse_error(what: &str, line: &[u8]) -> Error {
    Error::Parse(format!("{what}: {}", String::from_utf8_lossy(line)))
}
