//! Read-only view over one response unit

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Completion status carried by a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    No,
    Bad,
}

impl Status {
    fn parse(word: &[u8]) -> Option<Self> {
        if word.eq_ignore_ascii_case(b"OK") {
            Some(Self::Ok)
        } else if word.eq_ignore_ascii_case(b"NO") {
            Some(Self::No)
        } else if word.eq_ignore_ascii_case(b"BAD") {
            Some(Self::Bad)
        } else {
            None
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "OK",
            Self::No => "NO",
            Self::Bad => "BAD",
        })
    }
}

/// The lines of one response unit: untagged data followed by the tagged
/// completion line. Lines are kept as received, literals included, so
/// 8-bit payloads survive until a caller decodes them. Cloning is cheap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    lines: Arc<[Vec<u8>]>,
}

impl Message {
    #[must_use]
    pub fn new<L: Into<Vec<u8>>>(lines: impl IntoIterator<Item = L>) -> Self {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn lines(&self) -> &[Vec<u8>] {
        &self.lines
    }

    /// Lines containing `keyword`, ignoring ASCII case.
    #[must_use]
    pub fn filter(&self, keyword: &str) -> Vec<&[u8]> {
        self.lines
            .iter()
            .map(Vec::as_slice)
            .filter(|line| contains_ignore_case(line, keyword.as_bytes()))
            .collect()
    }

    /// Untagged (`*`) lines.
    pub fn untagged(&self) -> impl Iterator<Item = &[u8]> {
        self.lines
            .iter()
            .map(Vec::as_slice)
            .filter(|line| line.starts_with(b"* "))
    }

    /// The tagged completion line, if the unit ends with one.
    #[must_use]
    pub fn completion(&self) -> Option<&[u8]> {
        self.lines
            .last()
            .map(Vec::as_slice)
            .filter(|line| !line.starts_with(b"*") && !line.starts_with(b"+"))
    }

    /// Status of the completion line.
    #[must_use]
    pub fn status(&self) -> Option<Status> {
        status_of(self.completion()?)
    }

    /// Human-readable text after the completion status.
    #[must_use]
    pub fn completion_text(&self) -> Cow<'_, str> {
        self.completion()
            .and_then(|line| line.splitn(3, |&b| b == b' ').nth(2))
            .map_or(Cow::Borrowed(""), String::from_utf8_lossy)
    }

    /// Whether any status line, tagged or untagged, carries `status`.
    #[must_use]
    pub fn has_status(&self, status: Status) -> bool {
        self.lines
            .iter()
            .any(|line| status_of(line) == Some(status))
    }
}

fn status_of(line: &[u8]) -> Option<Status> {
    Status::parse(line.split(|&b| b == b' ').nth(1)?)
}

fn contains_ignore_case(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack
        .windows(needle.len())
        .any(|w| w.eq_ignore_ascii_case(needle))
}
