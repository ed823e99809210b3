//! Command kinds and their wire formatting
//!
//! Every request carries a [`CommandKind`]; the mailbox session matches
//! on it to decide how the response is interpreted. The formatting side
//! turns a sequence index, a kind and its arguments into the bytes that
//! go on the wire:
//!
//! ```text
//!   A0007 UID FETCH 42 BODY[1]\r\n
//! ```

use std::fmt;

/// Commands that take no arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimpleCommand {
    Capability,
    Noop,
    Check,
    Close,
    Expunge,
    Logout,
}

impl SimpleCommand {
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Capability => "CAPABILITY",
            Self::Noop => "NOOP",
            Self::Check => "CHECK",
            Self::Close => "CLOSE",
            Self::Expunge => "EXPUNGE",
            Self::Logout => "LOGOUT",
        }
    }
}

/// The command a request was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Login,
    Select,
    /// `FETCH <range> (ENVELOPE UID)`
    FetchEnvelope,
    /// `UID FETCH <uid> BODY[1]`
    UidFetch,
    Simple(SimpleCommand),
}

impl CommandKind {
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Login => "LOGIN",
            Self::Select => "SELECT",
            Self::FetchEnvelope => "FETCH",
            Self::UidFetch => "UID FETCH",
            Self::Simple(cmd) => cmd.verb(),
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

impl From<SimpleCommand> for CommandKind {
    fn from(cmd: SimpleCommand) -> Self {
        Self::Simple(cmd)
    }
}

/// Wire tag for a sequence index.
#[must_use]
pub fn tag_for(index: u64) -> String {
    format!("A{index:04}")
}

/// Build `<tag> <verb> <args...>\r\n`.
#[must_use]
pub fn format_request(index: u64, kind: CommandKind, args: &[&str]) -> Vec<u8> {
    let mut line = tag_for(index);
    line.push(' ');
    line.push_str(kind.verb());
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line.push_str("\r\n");
    line.into_bytes()
}

/// Render `s` as an IMAP quoted string.
///
/// CR and LF cannot appear in a quoted string and are dropped.
#[must_use]
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\r' | '\n' => {}
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}
