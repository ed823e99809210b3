//! Field-level access to IMAP response lines
//!
//! A response line is a sequence of space-separated fields: atoms,
//! quoted strings, counted literals, `NIL`, and parenthesized lists that
//! may nest. Lines are tokenized as bytes; a literal's payload is sliced
//! by its announced length before anything is decoded, so 8-bit bodies
//! keep their exact bytes. Lists are kept raw and split lazily with
//! [`parse_list`], so callers only pay for the depth they walk into.
//!
//! ```
//! use imap_mailbox::parser::{Field, get_from_list, parse_line};
//!
//! let fields = parse_line("* 3 FETCH (UID 42 FLAGS (\\Seen))");
//! assert_eq!(fields[2], Field::Atom("FETCH".into()));
//!
//! let items = fields[3].items();
//! assert_eq!(get_from_list(&items, "uid"), Some(&Field::Atom("42".into())));
//! ```

use std::borrow::Cow;
use std::str::FromStr;

/// One field of a response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Nil,
    Atom(String),
    /// Quoted string, already unescaped.
    Text(String),
    /// Counted literal payload, byte for byte.
    Literal(Vec<u8>),
    /// Parenthesized list, raw bytes including the outer parentheses.
    List(Vec<u8>),
}

impl Field {
    /// Raw bytes of any field but `NIL`.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Nil => None,
            Self::Atom(s) | Self::Text(s) => Some(s.as_bytes()),
            Self::Literal(b) | Self::List(b) => Some(b),
        }
    }

    /// Text of an atom, quoted string or literal; `None` for `NIL` and
    /// lists. Literals that are not UTF-8 are decoded lossily.
    #[must_use]
    pub fn string(&self) -> Option<Cow<'_, str>> {
        match self {
            Self::Atom(s) | Self::Text(s) => Some(Cow::Borrowed(s.as_str())),
            Self::Literal(b) => Some(String::from_utf8_lossy(b)),
            Self::Nil | Self::List(_) => None,
        }
    }

    /// Whether this is an atom equal to `keyword`, ignoring ASCII case.
    #[must_use]
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Self::Atom(s) if s.eq_ignore_ascii_case(keyword))
    }

    /// Whether this is a list with `keyword` among its top-level items.
    #[must_use]
    pub fn has_keyword(&self, keyword: &str) -> bool {
        self.items().iter().any(|f| f.is_keyword(keyword))
    }

    /// Items of a list field; empty for anything else.
    #[must_use]
    pub fn items(&self) -> Vec<Self> {
        match self {
            Self::List(raw) => parse_list(raw),
            _ => Vec::new(),
        }
    }

    /// Parse an atom or string as a number.
    #[must_use]
    pub fn number<T: FromStr>(&self) -> Option<T> {
        self.string()?.trim().parse().ok()
    }
}

/// Split a response line into fields.
#[must_use]
pub fn parse_line<L: AsRef<[u8]> + ?Sized>(line: &L) -> Vec<Field> {
    Tokenizer::new(line.as_ref()).collect()
}

/// Split a parenthesized list into its top-level items.
///
/// Input without surrounding parentheses is split as-is.
#[must_use]
pub fn parse_list<L: AsRef<[u8]> + ?Sized>(list: &L) -> Vec<Field> {
    let trimmed = list.as_ref().trim_ascii();
    let inner = match trimmed.strip_prefix(b"(") {
        Some(rest) => rest.strip_suffix(b")").unwrap_or(rest),
        None => trimmed,
    };
    parse_line(inner)
}

/// The value following `key` in a list of fields (`UID 42` -> `42`).
#[must_use]
pub fn get_from_list<'a>(list: &'a [Field], key: &str) -> Option<&'a Field> {
    let pos = list.iter().position(|f| f.is_keyword(key))?;
    list.get(pos + 1)
}

struct Tokenizer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    const fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn quoted(&mut self) -> Field {
        let mut out = Vec::new();
        let mut i = self.pos + 1;
        while i < self.input.len() {
            match self.input[i] {
                b'\\' if i + 1 < self.input.len() => {
                    out.push(self.input[i + 1]);
                    i += 2;
                }
                b'"' => {
                    i += 1;
                    break;
                }
                b => {
                    out.push(b);
                    i += 1;
                }
            }
        }
        self.pos = i;
        Field::Text(lossy(&out))
    }

    fn list(&mut self) -> Field {
        let end = matching_paren(self.input, self.pos).unwrap_or(self.input.len());
        let raw = self.input[self.pos..end].to_vec();
        self.pos = end;
        Field::List(raw)
    }

    fn atom(&mut self) -> Field {
        let start = self.pos;
        let mut depth = 0usize;
        while self.pos < self.input.len() {
            match self.input[self.pos] {
                b'[' => depth += 1,
                b']' => depth = depth.saturating_sub(1),
                b' ' | b'(' | b')' | b'\r' | b'\n' if depth == 0 => break,
                _ => {}
            }
            self.pos += 1;
        }
        let text = lossy(&self.input[start..self.pos]);
        if text.eq_ignore_ascii_case("NIL") {
            Field::Nil
        } else {
            Field::Atom(text)
        }
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = Field;

    fn next(&mut self) -> Option<Field> {
        loop {
            let &byte = self.input.get(self.pos)?;
            match byte {
                b' ' | b'\r' | b'\n' | b')' => self.pos += 1,
                b'"' => return Some(self.quoted()),
                b'(' => return Some(self.list()),
                b'{' => {
                    if let Some((start, end)) = literal_bounds(self.input, self.pos) {
                        self.pos = end;
                        return Some(Field::Literal(self.input[start..end].to_vec()));
                    }
                    return Some(self.atom());
                }
                _ => return Some(self.atom()),
            }
        }
    }
}

/// Content bounds of a `{n}\r\n` literal starting at `open`.
fn literal_bounds(input: &[u8], open: usize) -> Option<(usize, usize)> {
    let close = open + input[open..].iter().position(|&b| b == b'}')?;
    let digits = &input[open + 1..close];
    let digits = digits.strip_suffix(b"+").unwrap_or(digits);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let len: usize = std::str::from_utf8(digits).ok()?.parse().ok()?;
    if input.get(close + 1..close + 3)? != b"\r\n" {
        return None;
    }
    let start = close + 3;
    Some((start, (start + len).min(input.len())))
}

/// Exclusive end of the list opened at `open`.
fn matching_paren(input: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < input.len() {
        match input[i] {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            b'"' => {
                i += 1;
                while i < input.len() && input[i] != b'"' {
                    if input[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'{' => {
                if let Some((_, end)) = literal_bounds(input, i) {
                    i = end;
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
