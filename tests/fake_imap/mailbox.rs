//! Test data model for the fake IMAP server
//!
//! Provides a builder-style API for constructing mailbox state:
//!
//! ```ignore
//! let mailbox = MailboxBuilder::new()
//!     .folder("INBOX")
//!         .email(1, raw_rfc2822_bytes)
//!         .email(2, raw_rfc2822_bytes)
//!     .folder("Sent")
//!         .email(10, raw_rfc2822_bytes)
//!     .build();
//! ```
//!
//! The server answers `FETCH (ENVELOPE UID)` from the headers of each
//! raw message and `UID FETCH BODY[1]` from the text after the blank
//! line.

/// A complete mailbox: a collection of named folders, each holding
/// zero or more test emails.
#[derive(Debug, Clone)]
pub struct TestMailbox {
    pub folders: Vec<Folder>,
}

impl TestMailbox {
    /// Look up a folder by name (case-sensitive, matching real IMAP).
    pub fn get_folder(&self, name: &str) -> Option<&Folder> {
        self.folders.iter().find(|f| f.name == name)
    }
}

/// A single IMAP folder (e.g. "INBOX", "Sent", "Trash").
#[derive(Debug, Clone)]
pub struct Folder {
    pub name: String,
    pub emails: Vec<TestEmail>,
}

/// A test email stored in a folder.
///
/// - `uid`: IMAP UID -- a unique-per-folder number that never changes
///   (unlike sequence numbers which shift on delete).
/// - `raw`: the complete RFC 2822 message (headers + body) as bytes.
#[derive(Debug, Clone)]
pub struct TestEmail {
    pub uid: u32,
    pub raw: Vec<u8>,
}

impl TestEmail {
    fn split(&self) -> (&[u8], &[u8]) {
        self.raw
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map_or((&self.raw[..], &[][..]), |pos| {
                (&self.raw[..pos], &self.raw[pos + 4..])
            })
    }

    /// Value of the first header called `name`.
    pub fn header(&self, name: &str) -> Option<String> {
        let (head, _) = self.split();
        String::from_utf8_lossy(head).split("\r\n").find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }

    /// The first body part; for a single-part message, the whole body.
    pub fn body(&self) -> &[u8] {
        self.split().1
    }

    /// The ENVELOPE list for this message (RFC 3501 Section 7.4.2).
    pub fn envelope(&self) -> String {
        let text = |name: &str| self.header(name).map_or("NIL".to_string(), |v| quoted(&v));
        let address = |name: &str| self.header(name).map_or("NIL".to_string(), |v| address_list(&v));
        let from = address("From");
        format!(
            "({} {} {from} {from} {from} {} {} NIL {} {})",
            text("Date"),
            text("Subject"),
            address("To"),
            address("Cc"),
            text("In-Reply-To"),
            text("Message-ID"),
        )
    }
}

fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// `Name <user@host>` or `user@host` as a one-element address list.
fn address_list(header: &str) -> String {
    let (name, addr) = match header.split_once('<') {
        Some((name, rest)) => (
            Some(name.trim().trim_matches('"')),
            rest.trim_end_matches('>'),
        ),
        None => (None, header.trim()),
    };
    let (mailbox, host) = addr.split_once('@').unwrap_or((addr, ""));
    let name = name
        .filter(|n| !n.is_empty())
        .map_or("NIL".to_string(), quoted);
    format!("(({name} NIL {} {}))", quoted(mailbox), quoted(host))
}

/// Builder for constructing a `TestMailbox` step by step.
///
/// Call `.folder(name)` to start a new folder, then chain
/// `.email(uid, raw)` calls to add messages to it.
/// Finish with `.build()` to get the final `TestMailbox`.
pub struct MailboxBuilder {
    folders: Vec<Folder>,
}

impl MailboxBuilder {
    pub fn new() -> Self {
        Self {
            folders: Vec::new(),
        }
    }

    /// Add a new folder. Subsequent `.email()` calls add to this folder.
    pub fn folder(mut self, name: &str) -> Self {
        self.folders.push(Folder {
            name: name.to_string(),
            emails: Vec::new(),
        });
        self
    }

    /// Add an email to the most recently added folder.
    ///
    /// # Panics
    ///
    /// Panics if called before any `.folder()` call.
    pub fn email(mut self, uid: u32, raw: &[u8]) -> Self {
        self.folders
            .last_mut()
            .expect("call .folder() before .email()")
            .emails
            .push(TestEmail {
                uid,
                raw: raw.to_vec(),
            });
        self
    }

    /// Consume the builder and return the finished `TestMailbox`.
    pub fn build(self) -> TestMailbox {
        TestMailbox {
            folders: self.folders,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> TestEmail {
        TestEmail {
            uid: 7,
            raw: b"From: Alice <alice@example.com>\r\nTo: bob@example.org\r\n\
                   Subject: Say \"hi\"\r\n\r\nBody text"
                .to_vec(),
        }
    }

    #[test]
    fn reads_headers_case_insensitively() {
        assert_eq!(email().header("subject").as_deref(), Some("Say \"hi\""));
        assert_eq!(email().header("Date"), None);
    }

    #[test]
    fn body_follows_blank_line() {
        assert_eq!(email().body(), b"Body text");
    }

    #[test]
    fn envelope_has_ten_items() {
        let env = email().envelope();
        assert!(env.starts_with("(NIL \"Say \\\"hi\\\"\" ((\"Alice\" NIL \"alice\" \"example.com\"))"));
        assert!(env.contains("((NIL NIL \"bob\" \"example.org\"))"));
        assert!(env.ends_with("NIL NIL NIL NIL)"));
    }
}
