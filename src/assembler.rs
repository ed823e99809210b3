//! Response unit reassembly
//!
//! IMAP responses carry no length prefix. A command produces any number
//! of untagged lines followed by one tagged completion line, and the
//! bytes arrive split across arbitrary socket reads. The assembler keeps
//! everything it is fed, scans each byte once, and reports a unit as
//! finished when the completion line for the expected tag has arrived.
//!
//! Counted literals (`{n}\r\n` followed by `n` raw bytes) are folded into
//! the logical line that announced them, so a body containing CRLF does
//! not end the line early.

use bytes::{Buf, BytesMut};

use crate::error::{Error, Result};

/// Maximum length of a single line outside of literals.
const MAX_LINE_LENGTH: usize = 1024 * 1024; // 1 MB

/// Maximum literal size accepted from the server.
const MAX_LITERAL_SIZE: usize = 100 * 1024 * 1024; // 100 MB

/// Accumulates raw server bytes into complete response units.
#[derive(Debug, Default)]
pub struct ResponseAssembler {
    buffer: BytesMut,
    /// Completion tag of the request in flight. `None` means any complete
    /// line is a unit on its own (greeting, unsolicited data).
    tag: Option<String>,
    line_start: usize,
    /// Start of the physical line after the last CRLF or literal.
    segment_start: usize,
    /// CRLF search resumes here.
    scan_pos: usize,
    literal_remaining: usize,
    lines: Vec<Vec<u8>>,
    unit_end: Option<usize>,
}

impl ResponseAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the completion tag that ends the next unit and scan whatever
    /// is already buffered against it.
    pub fn expect(&mut self, tag: Option<&str>) -> Result<()> {
        self.tag = tag.map(str::to_owned);
        self.scan()
    }

    /// Append bytes and continue scanning from where the last call stopped.
    pub fn feed(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.buffer.extend_from_slice(data);
        self.scan()
    }

    /// Whether a complete unit is buffered.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.unit_end.is_some()
    }

    /// Lines collected so far for the current unit, without CRLF.
    #[must_use]
    pub fn lines(&self) -> &[Vec<u8>] {
        &self.lines
    }

    /// Number of buffered bytes not yet handed out as a unit.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len() - self.unit_end.unwrap_or(0)
    }

    /// Drop the finished unit (or the partial one) and rewind the scanner.
    ///
    /// Bytes past the end of a finished unit stay buffered; they are
    /// scanned on the next [`expect`](Self::expect).
    pub fn reset(&mut self) {
        match self.unit_end.take() {
            Some(end) => self.buffer.advance(end),
            None => self.buffer.clear(),
        }
        self.tag = None;
        self.line_start = 0;
        self.segment_start = 0;
        self.scan_pos = 0;
        self.literal_remaining = 0;
        self.lines.clear();
    }

    /// Hand out the finished unit's lines and reset for the next one.
    pub fn take_unit(&mut self) -> Option<Vec<Vec<u8>>> {
        if !self.is_finished() {
            return None;
        }
        let lines = std::mem::take(&mut self.lines);
        self.reset();
        Some(lines)
    }

    fn scan(&mut self) -> Result<()> {
        while self.unit_end.is_none() {
            if self.literal_remaining > 0 {
                let available = self.buffer.len() - self.scan_pos;
                if available < self.literal_remaining {
                    self.literal_remaining -= available;
                    self.scan_pos = self.buffer.len();
                    return Ok(());
                }
                self.scan_pos += self.literal_remaining;
                self.literal_remaining = 0;
                self.segment_start = self.scan_pos;
                continue;
            }

            let Some(offset) = find_crlf(&self.buffer[self.scan_pos..]) else {
                if self.buffer.len() - self.segment_start > MAX_LINE_LENGTH {
                    return Err(Error::Protocol("line too long".to_string()));
                }
                // a trailing CR may pair with the next chunk's LF
                self.scan_pos = self.buffer.len().saturating_sub(1).max(self.scan_pos);
                return Ok(());
            };
            let crlf = self.scan_pos + offset;
            let next = crlf + 2;

            if let Some(len) = parse_literal_length(&self.buffer[self.segment_start..crlf]) {
                if len > MAX_LITERAL_SIZE {
                    return Err(Error::Protocol(format!(
                        "literal too large: {len} bytes (max {MAX_LITERAL_SIZE})"
                    )));
                }
                self.literal_remaining = len;
                self.scan_pos = next;
                self.segment_start = next;
                continue;
            }

            let line = self.buffer[self.line_start..crlf].to_vec();
            let complete = self.completes_unit(&line);
            self.lines.push(line);
            self.line_start = next;
            self.segment_start = next;
            self.scan_pos = next;
            if complete {
                self.unit_end = Some(next);
            }
        }
        Ok(())
    }

    fn completes_unit(&self, line: &[u8]) -> bool {
        self.tag.as_deref().is_none_or(|tag| {
            line.strip_prefix(tag.as_bytes())
                .is_some_and(|rest| rest.starts_with(b" "))
        })
    }
}

/// Finds the position of CRLF in a buffer.
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Parses a literal announcement at the end of a line (CRLF stripped).
///
/// Matches `{123}` and the non-synchronizing `{123+}`.
fn parse_literal_length(line: &[u8]) -> Option<usize> {
    let inner = line.strip_suffix(b"}")?;
    let inner = inner.strip_suffix(b"+").unwrap_or(inner);
    let open = inner.iter().rposition(|&b| b == b'{')?;
    let digits = &inner[open + 1..];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}
