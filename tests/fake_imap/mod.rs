//! Fake IMAPS server for integration testing
//!
//! This module provides an in-process IMAP server that speaks enough
//! of the protocol to test the `Mailbox` session end-to-end:
//!
//! TCP -> TLS handshake -> greeting -> LOGIN -> SELECT -> FETCH -> LOGOUT
//!
//! ## Module layout
//!
//! - `server` -- TCP listener, TLS setup, and connection dispatch
//! - `handlers/` -- one file per IMAP command (SELECT, FETCH, etc.)
//! - `mailbox` -- test data model (folders, emails, builder)
//! - `io` -- shared write helpers

pub mod mailbox;
mod server;

pub use mailbox::MailboxBuilder;
pub use server::FakeImapServer;
