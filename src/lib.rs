//! Pipelined IMAPS client engine
//!
//! A [`Mailbox`] session drives one encrypted IMAP connection. Commands
//! are queued and written one at a time; the server's byte stream is
//! reassembled into response units, matched back to the request that
//! caused them, and interpreted in order to keep the session state (the
//! selected folder's message count, known envelopes, fetched bodies)
//! current.
//!
//! Outcomes are reported as [`MailboxEvent`]s from
//! [`Mailbox::next_event`], or pulled per request through a
//! [`ResponseHandle`].

pub mod assembler;
pub mod command;
mod config;
pub mod connection;
pub mod correlator;
pub mod envelope;
mod error;
mod mailbox;
pub mod message;
pub mod parser;
pub mod store;
pub mod tls;

pub use command::{CommandKind, SimpleCommand};
pub use config::ImapConfig;
pub use envelope::{Address, Envelope, MailEntry};
pub use error::{Error, Result};
pub use mailbox::{Identity, Mailbox, MailboxEvent, ResponseHandle};
pub use message::{Message, Status};
