//! UID FETCH command handler (first body part).
//!
//! The body goes out as a **counted literal**, because it may contain
//! CRLF and any other bytes:
//!
//! ```text
//! * <seq> FETCH (UID <uid> BODY[1] {<length>}
//! <exactly length bytes of body text>
//! )
//! ```
//!
//! The client must read exactly `length` bytes before it looks for the
//! closing `)` and the tagged completion.

use crate::fake_imap::io::{write_line, write_literal};
use crate::fake_imap::mailbox::TestMailbox;
use imap_codec::imap_types::sequence::{SeqOrUid, Sequence, SequenceSet};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Extract UIDs from a `SequenceSet`. Only single values are
/// supported; the client fetches one body at a time.
fn extract_uids(seq_set: &SequenceSet) -> Vec<u32> {
    seq_set
        .0
        .as_ref()
        .iter()
        .filter_map(|seq| match seq {
            Sequence::Single(SeqOrUid::Value(v)) => Some(v.get()),
            _ => None,
        })
        .collect()
}

/// Handle `UID FETCH <uid> BODY[1]`.
pub async fn handle_uid_fetch<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    sequence_set: &SequenceSet,
    mailbox: &TestMailbox,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let Some(folder) = selected_folder.and_then(|name| mailbox.get_folder(name)) else {
        let resp = format!("{tag} BAD No folder selected\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    for uid in extract_uids(sequence_set) {
        let Some((idx, email)) = folder.emails.iter().enumerate().find(|(_, e)| e.uid == uid)
        else {
            continue;
        };
        let seq = idx + 1;
        if write_line(stream, &format!("* {seq} FETCH (UID {uid} BODY[1] ")).await.is_err()
            || write_literal(stream, email.body()).await.is_err()
            || write_line(stream, ")\r\n").await.is_err()
        {
            return;
        }
    }

    let resp = format!("{tag} OK FETCH completed\r\n");
    let _ = write_line(stream, &resp).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use std::num::NonZeroU32;
    use tokio::io::BufReader;

    const RAW: &[u8] = b"From: a@b.com\r\nSubject: Test\r\n\r\nLine one\r\nLine two";

    fn uid_set(uid: u32) -> SequenceSet {
        SequenceSet(
            vec![Sequence::Single(SeqOrUid::Value(
                NonZeroU32::new(uid).unwrap(),
            ))]
            .try_into()
            .unwrap(),
        )
    }

    async fn run(
        sequence_set: &SequenceSet,
        mailbox: &TestMailbox,
        selected: Option<&str>,
    ) -> String {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);

        handle_uid_fetch("A1", sequence_set, mailbox, selected, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn sends_body_as_literal() {
        let mailbox = MailboxBuilder::new()
            .folder("INBOX")
            .email(7, b"Subject: x\r\n\r\nfirst")
            .email(42, RAW)
            .build();

        let output = run(&uid_set(42), &mailbox, Some("INBOX")).await;

        assert_eq!(
            output,
            "* 2 FETCH (UID 42 BODY[1] {18}\r\nLine one\r\nLine two)\r\nA1 OK FETCH completed\r\n"
        );
    }

    #[tokio::test]
    async fn missing_uid_returns_only_ok() {
        let mailbox = MailboxBuilder::new().folder("INBOX").build();

        let output = run(&uid_set(99), &mailbox, Some("INBOX")).await;

        assert_eq!(output, "A1 OK FETCH completed\r\n");
    }

    #[tokio::test]
    async fn no_folder_selected_returns_bad() {
        let mailbox = MailboxBuilder::new().folder("INBOX").build();

        let output = run(&uid_set(1), &mailbox, None).await;

        assert!(output.contains("A1 BAD No folder selected"));
    }
}
