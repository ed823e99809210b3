//! In-process fake IMAPS server for integration testing
//!
//! # How IMAPS works (overview)
//!
//! IMAP (RFC 3501) is a line-oriented text protocol. On the IMAPS port
//! (993) the TLS handshake happens first; the server greeting is the
//! first thing sent *inside* the encrypted session:
//!
//! ```text
//!   Client connects via TCP
//!       |
//!   TLS handshake
//!       |
//!   Server sends greeting: "* OK IMAP4rev1 ready\r\n"
//!       |
//!   Client sends LOGIN, SELECT, FETCH, ...
//!       |
//!   Client sends LOGOUT
//! ```
//!
//! ## Tags
//!
//! Every client command starts with a **tag** the client chooses
//! (`A0001`, `A0002`, ...). The server echoes it in the completion
//! line, after any untagged (`*`) data lines:
//!
//! ```text
//!   Client:  A0002 SELECT "INBOX"
//!   Server:  * 3 EXISTS
//!   Server:  A0002 OK [READ-WRITE] SELECT completed
//! ```
//!
//! A client that pipelines commands relies on these tags (or on strict
//! ordering) to pair each completion with its command.

use super::handlers::{
    SessionCommand, handle_fetch, handle_login, handle_select, handle_session, handle_uid_fetch,
};
use super::io::write_line;
use super::mailbox::TestMailbox;
use imap_codec::CommandCodec;
use imap_codec::decode::Decoder;
use imap_codec::imap_types::command::CommandBody;
use imap_codec::imap_types::mailbox::Mailbox as ImapMailbox;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// A fake IMAPS server that runs on localhost with an OS-assigned port.
///
/// The server generates a self-signed TLS certificate at startup using
/// `rcgen`, so no cert files are needed. Clients must accept invalid
/// certificates to talk to it.
pub struct FakeImapServer {
    port: u16,
    /// Every command line received, tag stripped, across connections.
    commands: Arc<Mutex<Vec<String>>>,
    /// Handle to the background task so it lives as long as the server.
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeImapServer {
    /// Start a new fake IMAPS server with the given mailbox state.
    ///
    /// 1. Binds to `127.0.0.1:0` -- the OS picks a free port.
    /// 2. Generates a self-signed TLS certificate via `rcgen`.
    /// 3. Spawns a tokio task that accepts connections and speaks
    ///    IMAP over TLS.
    pub async fn start(mailbox: TestMailbox) -> Self {
        // Multiple tests may race to install the provider; only the
        // first call wins and that is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
            .expect("generate self-signed cert");

        let cert_der = cert.cert.der().clone();
        let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der.into())
            .expect("build server TLS config");

        let acceptor = TlsAcceptor::from(Arc::new(tls_config));
        let mailbox = Arc::new(mailbox);
        let commands = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&commands);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _addr)) = listener.accept().await else {
                    break;
                };
                let acceptor = acceptor.clone();
                let mailbox = Arc::clone(&mailbox);
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    let Ok(tls_stream) = acceptor.accept(stream).await else {
                        return;
                    };
                    handle_imap_session(tls_stream, &mailbox, &log).await;
                });
            }
        });

        Self {
            port,
            commands,
            _handle: handle,
        }
    }

    /// The port the server is listening on.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Commands received so far, in arrival order, without tags.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

/// Extract the folder name from a parsed `imap_types::Mailbox`.
fn mailbox_name(mb: &ImapMailbox<'_>) -> String {
    match mb {
        ImapMailbox::Inbox => "INBOX".to_string(),
        ImapMailbox::Other(other) => {
            let bytes: &[u8] = other.as_ref();
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Run the IMAP command loop over an established TLS stream.
///
/// Uses `imap-codec`'s `CommandCodec` to parse each client command
/// into a strongly-typed `Command`, then dispatches to the matching
/// handler. Anything the handlers don't cover gets `BAD`.
async fn handle_imap_session<S: AsyncRead + AsyncWrite + Unpin>(
    stream: S,
    mailbox: &TestMailbox,
    log: &Mutex<Vec<String>>,
) {
    let mut reader = BufReader::new(stream);
    let mut selected_folder: Option<String> = None;
    let codec = CommandCodec::default();

    // RFC 3501 Section 7.1.1: Server greeting
    if write_line(&mut reader, "* OK IMAP4rev1 Fake server ready\r\n")
        .await
        .is_err()
    {
        return;
    }

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some((_, command)) = trimmed.split_once(' ') {
            log.lock().unwrap().push(command.to_string());
        }

        let Ok((_, command)) = codec.decode(line.as_bytes()) else {
            let tag = trimmed.split_whitespace().next().unwrap_or("*");
            let resp = format!("{tag} BAD Parse error\r\n");
            if write_line(&mut reader, &resp).await.is_err() {
                break;
            }
            continue;
        };

        let tag = command.tag.inner();
        let exists = selected_folder
            .as_deref()
            .and_then(|name| mailbox.get_folder(name))
            .map(|folder| folder.emails.len());

        match command.body {
            CommandBody::Capability => {
                if !handle_session(tag, SessionCommand::Capability, exists, &mut reader).await {
                    break;
                }
            }
            CommandBody::Noop => {
                if !handle_session(tag, SessionCommand::Noop, exists, &mut reader).await {
                    break;
                }
            }
            CommandBody::Close => {
                if !handle_session(tag, SessionCommand::Close, exists, &mut reader).await {
                    break;
                }
                selected_folder = None;
            }
            CommandBody::Login { password, .. } => {
                let password: &[u8] = password.declassify().as_ref();
                if !handle_login(tag, password, &mut reader).await {
                    break;
                }
            }
            CommandBody::Select { mailbox: mb, .. } => {
                let name = mailbox_name(&mb);
                selected_folder = handle_select(tag, &name, mailbox, &mut reader).await;
            }
            CommandBody::Fetch {
                sequence_set,
                uid: false,
                ..
            } => {
                handle_fetch(
                    tag,
                    &sequence_set,
                    mailbox,
                    selected_folder.as_deref(),
                    &mut reader,
                )
                .await;
            }
            CommandBody::Fetch {
                sequence_set,
                uid: true,
                ..
            } => {
                handle_uid_fetch(
                    tag,
                    &sequence_set,
                    mailbox,
                    selected_folder.as_deref(),
                    &mut reader,
                )
                .await;
            }
            CommandBody::Logout => {
                handle_session(tag, SessionCommand::Logout, exists, &mut reader).await;
                break;
            }
            _ => {
                let resp = format!("{tag} BAD Unknown command\r\n");
                if write_line(&mut reader, &resp).await.is_err() {
                    break;
                }
            }
        }
    }
}
