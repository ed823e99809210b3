//! Mailbox session
//!
//! Issues commands through a connection worker and interprets every
//! response in the order the requests were sent. The session owns all of
//! its state (message count, known entries, cached bodies, pending
//! callbacks, deferred commands) and only mutates it from
//! [`Mailbox::next_event`] and the issuing methods, both of which take
//! `&mut self`, so interpretation is never concurrent.
//!
//! `SELECT` and envelope fetches are gated: while a selection is
//! outstanding the session is unsafe, and gated commands wait in a FIFO
//! until the selection has been interpreted.
//!
//! ```no_run
//! # async fn demo() -> imap_mailbox::Result<()> {
//! use imap_mailbox::{ImapConfig, Mailbox, MailboxEvent};
//!
//! let config = ImapConfig::from_env()?;
//! let mut mailbox = Mailbox::new();
//! mailbox.open(&config);
//! mailbox.login(&config.username, &config.password);
//! mailbox.select("INBOX");
//! mailbox.fetch_envelopes(10, 0);
//!
//! while let Some(event) = mailbox.next_event().await {
//!     if let MailboxEvent::FetchReady(_) = event {
//!         break;
//!     }
//! }
//! for entry in mailbox.get_latest(10, 0) {
//!     println!("{}", entry.envelope.subject.unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::error::SendError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::command::{CommandKind, SimpleCommand, format_request, quote};
use crate::config::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_RESPONSE_TIMEOUT, ImapConfig};
use crate::connection::{ConnCommand, ConnEvent, connect_and_serve, serve};
use crate::correlator::{Request, ResultSlot};
use crate::envelope::MailEntry;
use crate::error::{Error, Result};
use crate::message::{Message, Status};
use crate::parser::{Field, get_from_list, parse_line};
use crate::store::MailStore;

/// Who the session is logged in as, and where.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub server: String,
    pub username: String,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.username, self.server)
    }
}

/// Everything the session reports to its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailboxEvent {
    /// A response arrived and has been interpreted.
    ResponseReady(u64),
    /// A response carried a `BAD` status line.
    SyntaxError(u64),
    LoggedIn(Identity),
    LoginFailed(Identity),
    /// Envelopes from this fetch are now in the store.
    FetchReady(u64),
    /// A command other than LOGIN completed with `NO`.
    CommandFailed {
        index: u64,
        command: CommandKind,
        text: String,
    },
    ConnectionError(String),
    /// The worker stopped. Unanswered requests were abandoned.
    ConnectionClosed,
}

type Callback = Box<dyn FnOnce(&Message) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Safe,
    /// A SELECT is outstanding.
    Unsafe,
}

/// A gated command, held back until the gate is safe. The wire bytes are
/// only built when it runs, against the state at that point.
#[derive(Debug)]
enum Deferred {
    Select {
        request: Request,
        folder: String,
    },
    FetchEnvelopes {
        request: Request,
        count: u32,
        skip: u32,
    },
}

impl Deferred {
    fn into_request(self) -> Request {
        match self {
            Self::Select { request, .. } | Self::FetchEnvelopes { request, .. } => request,
        }
    }
}

struct Link {
    commands: UnboundedSender<ConnCommand>,
    events: UnboundedReceiver<ConnEvent>,
}

/// Returned by every issuing method: the request's sequence index, usable
/// to attach a callback or to pull the response later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseHandle {
    index: u64,
}

impl ResponseHandle {
    #[must_use]
    pub const fn index(self) -> u64 {
        self.index
    }

    /// Run `callback` once with the response. See [`Mailbox::on_ready`].
    #[must_use]
    pub fn on_ready<F>(self, mailbox: &mut Mailbox, callback: F) -> Self
    where
        F: FnOnce(&Message) + Send + 'static,
    {
        mailbox.on_ready(self.index, callback);
        self
    }

    /// Wait for the interpreted response. See [`Mailbox::get`].
    pub async fn get(self, mailbox: &mut Mailbox) -> Result<Message> {
        mailbox.get(self.index).await
    }
}

/// An IMAP mailbox session.
pub struct Mailbox {
    identity: Identity,
    message_count: u32,
    gate: Gate,
    store: MailStore,
    pending: HashMap<u64, (CommandKind, ResultSlot)>,
    responses: HashMap<u64, Message>,
    callbacks: HashMap<u64, Callback>,
    deferred: VecDeque<Deferred>,
    outbox: VecDeque<MailboxEvent>,
    redispatch: VecDeque<u64>,
    /// Requests completed without a round trip, awaiting interpretation.
    settled: VecDeque<u64>,
    link: Option<Link>,
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("identity", &self.identity)
            .field("message_count", &self.message_count)
            .field("gate", &self.gate)
            .field("entries", &self.store.entries().len())
            .field("pending", &self.pending.len())
            .field("deferred", &self.deferred.len())
            .field("connected", &self.link.is_some())
            .finish_non_exhaustive()
    }
}

impl Mailbox {
    #[must_use]
    pub fn new() -> Self {
        Self {
            identity: Identity::default(),
            message_count: 0,
            gate: Gate::Safe,
            store: MailStore::new(),
            pending: HashMap::new(),
            responses: HashMap::new(),
            callbacks: HashMap::new(),
            deferred: VecDeque::new(),
            outbox: VecDeque::new(),
            redispatch: VecDeque::new(),
            settled: VecDeque::new(),
            link: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    /// Connect to `config.host` over TLS in a background task.
    ///
    /// Returns immediately; a failure to connect is reported as
    /// [`MailboxEvent::ConnectionError`] followed by
    /// [`MailboxEvent::ConnectionClosed`]. Must be called from within a
    /// Tokio runtime.
    pub fn open(&mut self, config: &ImapConfig) {
        self.identity = Identity {
            server: config.host.clone(),
            username: config.username.clone(),
        };
        self.connect_timeout = config.connect_timeout;
        self.response_timeout = config.response_timeout;

        let (commands_tx, commands_rx) = unbounded_channel();
        let (events_tx, events_rx) = unbounded_channel();
        self.attach(commands_tx, events_rx);
        tokio::spawn(connect_and_serve(config.clone(), commands_rx, events_tx));
    }

    /// Run the session over an already established stream.
    ///
    /// The server greeting is expected within the connect timeout.
    pub fn open_stream<S>(&mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (commands_tx, commands_rx) = unbounded_channel();
        let (events_tx, events_rx) = unbounded_channel();
        self.attach(commands_tx, events_rx);
        let deadline = Instant::now() + self.connect_timeout;
        tokio::spawn(serve(stream, commands_rx, events_tx, deadline));
    }

    fn attach(
        &mut self,
        commands: UnboundedSender<ConnCommand>,
        events: UnboundedReceiver<ConnEvent>,
    ) {
        if self.link.is_some() {
            self.close();
            self.teardown();
        }
        self.link = Some(Link { commands, events });
    }

    /// Ask the worker to log out and stop. Dropping the mailbox does the
    /// same.
    pub fn close(&mut self) {
        if let Some(link) = &self.link {
            debug!("Closing connection");
            link.commands.send(ConnCommand::Close).ok();
        }
    }

    /// `LOGIN`, sent immediately.
    pub fn login(&mut self, username: &str, password: &str) -> ResponseHandle {
        self.identity.username = username.to_owned();
        self.issue(CommandKind::Login, &[&quote(username), &quote(password)])
    }

    /// An argument-less command, sent immediately.
    pub fn send(&mut self, command: SimpleCommand) -> ResponseHandle {
        self.issue(command.into(), &[])
    }

    /// `SELECT <folder>`, gated. Makes the session unsafe until the
    /// response has been interpreted.
    pub fn select(&mut self, folder: &str) -> ResponseHandle {
        let request = Request::new(CommandKind::Select);
        let handle = self.register(&request);
        self.defer(Deferred::Select {
            request,
            folder: folder.to_owned(),
        });
        handle
    }

    /// Envelopes of the `count` highest sequence numbers below the
    /// `skip` newest, gated on the selection.
    ///
    /// When that range is empty (nothing selected, an empty folder,
    /// `skip` past the end, or `count == 0`) nothing is sent: the request
    /// completes with an empty response and still raises
    /// [`MailboxEvent::FetchReady`].
    pub fn fetch_envelopes(&mut self, count: u32, skip: u32) -> ResponseHandle {
        let request = Request::new(CommandKind::FetchEnvelope);
        let handle = self.register(&request);
        self.defer(Deferred::FetchEnvelopes {
            request,
            count,
            skip,
        });
        handle
    }

    /// `UID FETCH <uid> BODY[1]`, sent immediately. The body lands in
    /// the cache for [`get_body`](Self::get_body).
    pub fn fetch_body(&mut self, uid: u32) -> ResponseHandle {
        let uid = uid.to_string();
        self.issue(CommandKind::UidFetch, &[&uid, "BODY[1]"])
    }

    fn issue(&mut self, kind: CommandKind, args: &[&str]) -> ResponseHandle {
        let mut request = Request::new(kind);
        request.data = format_request(request.index, kind, args);
        let handle = self.register(&request);
        self.dispatch(request);
        handle
    }

    fn register(&mut self, request: &Request) -> ResponseHandle {
        self.pending
            .insert(request.index, (request.kind, request.slot.clone()));
        ResponseHandle {
            index: request.index,
        }
    }

    fn dispatch(&mut self, request: Request) {
        debug!(index = request.index, command = %request.kind, "Dispatching request");
        let Some(link) = &self.link else {
            self.drop_request(request);
            return;
        };
        if let Err(SendError(ConnCommand::Send(request))) =
            link.commands.send(ConnCommand::Send(request))
        {
            self.drop_request(request);
        }
    }

    fn drop_request(&mut self, request: Request) {
        warn!(index = request.index, command = %request.kind, "Not connected, dropping request");
        request.slot.abandon();
        self.pending.remove(&request.index);
        if request.kind == CommandKind::Select {
            self.gate = Gate::Safe;
        }
    }

    fn defer(&mut self, action: Deferred) {
        self.deferred.push_back(action);
        if self.gate == Gate::Unsafe {
            debug!(deferred = self.deferred.len(), "Session unsafe, deferring");
        }
        self.drain_deferred();
    }

    fn drain_deferred(&mut self) {
        while self.gate == Gate::Safe {
            let Some(action) = self.deferred.pop_front() else {
                break;
            };
            self.execute(action);
        }
    }

    fn execute(&mut self, action: Deferred) {
        match action {
            Deferred::Select {
                mut request,
                folder,
            } => {
                self.gate = Gate::Unsafe;
                request.data = format_request(request.index, request.kind, &[&quote(&folder)]);
                self.dispatch(request);
            }
            Deferred::FetchEnvelopes {
                mut request,
                count,
                skip,
            } => {
                let Some(range) = fetch_range(self.message_count, count, skip) else {
                    debug!(index = request.index, "Nothing to fetch, completing locally");
                    request.slot.fulfill(Message::default());
                    self.settled.push_back(request.index);
                    return;
                };
                request.data =
                    format_request(request.index, request.kind, &[&range, "(ENVELOPE UID)"]);
                self.dispatch(request);
            }
        }
    }

    /// Attach a one-shot callback to `index`, replacing any earlier one.
    ///
    /// If the response has already been interpreted the callback runs on
    /// the next call to [`next_event`](Self::next_event).
    pub fn on_ready<F>(&mut self, index: u64, callback: F)
    where
        F: FnOnce(&Message) + Send + 'static,
    {
        self.callbacks.insert(index, Box::new(callback));
        if self.responses.contains_key(&index) {
            self.redispatch.push_back(index);
        }
    }

    /// Wait for the next event, interpreting responses as they arrive.
    ///
    /// Returns `None` once the connection is gone and every event has
    /// been handed out.
    pub async fn next_event(&mut self) -> Option<MailboxEvent> {
        loop {
            self.run_redispatch();
            if let Some(event) = self.outbox.pop_front() {
                return Some(event);
            }
            if !self.pump().await {
                return None;
            }
        }
    }

    /// The interpreted response for `index`.
    ///
    /// Blocks until the response has arrived and been interpreted,
    /// interpreting any earlier responses on the way; events they raise
    /// stay queued for [`next_event`](Self::next_event). Bounded by the
    /// response timeout.
    pub async fn get(&mut self, index: u64) -> Result<Message> {
        let deadline = Instant::now() + self.response_timeout;
        loop {
            if let Some(message) = self.responses.get(&index) {
                return Ok(message.clone());
            }
            if !self.pending.contains_key(&index) {
                return Err(if self.link.is_none() {
                    Error::ConnectionClosed
                } else {
                    Error::Protocol(format!("no request with index {index}"))
                });
            }
            match timeout_at(deadline, self.pump()).await {
                Ok(true) => {}
                Ok(false) => return Err(Error::ConnectionClosed),
                Err(_) => return Err(Error::Timeout(self.response_timeout)),
            }
        }
    }

    /// Handle one locally settled request or worker event. `false` when
    /// there is nothing left to wait for.
    async fn pump(&mut self) -> bool {
        if let Some(index) = self.settled.pop_front() {
            self.interpret(index);
            return true;
        }
        let event = match self.link.as_mut() {
            Some(link) => link.events.recv().await,
            None => return false,
        };
        match event {
            Some(ConnEvent::ResponseReady(index)) => self.interpret(index),
            Some(ConnEvent::Error(error)) => {
                warn!("Connection error: {error}");
                self.outbox.push_back(MailboxEvent::ConnectionError(error));
            }
            Some(ConnEvent::Closed) | None => {
                info!("Connection closed");
                self.teardown();
                self.outbox.push_back(MailboxEvent::ConnectionClosed);
            }
        }
        true
    }

    /// Forget the worker and everything waiting on it. Callbacks of
    /// requests that will never complete are dropped without running.
    fn teardown(&mut self) {
        self.link = None;
        for action in self.deferred.drain(..) {
            action.into_request().slot.abandon();
        }
        self.pending.clear();
        self.settled.clear();
        let responses = &self.responses;
        self.callbacks.retain(|index, _| responses.contains_key(index));
        self.gate = Gate::Safe;
    }

    fn interpret(&mut self, index: u64) {
        let Some((kind, slot)) = self.pending.remove(&index) else {
            debug!(index, "No pending request, ignoring");
            return;
        };
        let Some(message) = slot.try_get() else {
            warn!(index, "Response slot is empty");
            return;
        };
        debug!(index, command = %kind, "Accepted response");
        self.responses.insert(index, message.clone());
        self.outbox.push_back(MailboxEvent::ResponseReady(index));

        if message.has_status(Status::Bad) {
            warn!(index, command = %kind, "Syntax error: {}", message.completion_text());
            self.outbox.push_back(MailboxEvent::SyntaxError(index));
        }

        match kind {
            CommandKind::Login => self.on_login(&message),
            CommandKind::Select => self.on_select(&message),
            CommandKind::FetchEnvelope => self.on_envelopes(index, &message),
            CommandKind::UidFetch => self.on_body(&message),
            CommandKind::Simple(SimpleCommand::Close) => self.on_close(&message),
            CommandKind::Simple(_) => {}
        }
        if kind != CommandKind::Login && message.status() == Some(Status::No) {
            warn!(index, command = %kind, "Command failed: {}", message.completion_text());
            self.outbox.push_back(MailboxEvent::CommandFailed {
                index,
                command: kind,
                text: message.completion_text().into_owned(),
            });
        }

        self.fire_callback(index, &message);
        self.drain_deferred();
    }

    fn on_login(&mut self, message: &Message) {
        if message.status() == Some(Status::Ok) {
            info!("Logged in as {}", self.identity);
            self.outbox
                .push_back(MailboxEvent::LoggedIn(self.identity.clone()));
        } else {
            warn!("Login failed for {}", self.identity);
            self.outbox
                .push_back(MailboxEvent::LoginFailed(self.identity.clone()));
        }
    }

    fn on_select(&mut self, message: &Message) {
        self.message_count = if message.status() == Some(Status::Ok) {
            message
                .filter("EXISTS")
                .into_iter()
                .filter(|line| line.starts_with(b"*"))
                .find_map(|line| parse_line(line).get(1).and_then(Field::number::<u32>))
                .unwrap_or(0)
        } else {
            0
        };
        debug!(count = self.message_count, "Folder selected");
        self.gate = Gate::Safe;
    }

    /// `CLOSE` leaves the selected state; nothing is selected afterwards.
    fn on_close(&mut self, message: &Message) {
        if message.status() == Some(Status::Ok) {
            debug!("Folder closed");
            self.message_count = 0;
        }
    }

    fn on_envelopes(&mut self, index: u64, message: &Message) {
        let lines = message.filter("ENVELOPE");
        for line in lines.into_iter().filter(|l| l.starts_with(b"* ")) {
            match MailEntry::from_fetch_line(line) {
                Ok(entry) => {
                    let uid = entry.uid;
                    if self.store.insert(entry) {
                        debug!(uid, "Got mail");
                    } else {
                        debug!(uid, "Already known, skipping");
                    }
                }
                Err(e) => warn!("Skipping envelope: {e}"),
            }
        }
        self.outbox.push_back(MailboxEvent::FetchReady(index));
    }

    fn on_body(&mut self, message: &Message) {
        let body = message.untagged().find_map(|line| {
            let fields = parse_line(line);
            let data = fields.iter().find(|f| f.has_keyword("BODY[1]"))?;
            let items = data.items();
            let uid = get_from_list(&items, "UID").and_then(Field::number::<u32>)?;
            let bytes = get_from_list(&items, "BODY[1]")?
                .as_bytes()
                .unwrap_or_default()
                .to_vec();
            Some((uid, bytes))
        });
        match body {
            Some((uid, bytes)) => {
                debug!(uid, bytes = bytes.len(), "Got body");
                self.store.put_body(uid, bytes);
            }
            None => warn!("No body in response"),
        }
    }

    fn fire_callback(&mut self, index: u64, message: &Message) {
        if let Some(callback) = self.callbacks.remove(&index) {
            callback(message);
        }
    }

    fn run_redispatch(&mut self) {
        while let Some(index) = self.redispatch.pop_front() {
            if let Some(message) = self.responses.get(&index).cloned() {
                self.fire_callback(index, &message);
            }
        }
    }

    /// The `count` newest known entries after skipping `skip`.
    #[must_use]
    pub fn get_latest(&self, count: usize, skip: usize) -> Vec<MailEntry> {
        self.store.latest(count, skip)
    }

    /// Take the cached body for `uid`, exactly as the server sent it. A
    /// second call returns `None`.
    pub fn get_body(&mut self, uid: u32) -> Option<Vec<u8>> {
        self.store.take_body(uid)
    }

    /// Entries in the order they were first seen.
    #[must_use]
    pub fn entries(&self) -> &[MailEntry] {
        self.store.entries()
    }

    /// `EXISTS` count of the selected folder.
    #[must_use]
    pub const fn message_count(&self) -> u32 {
        self.message_count
    }

    #[must_use]
    pub fn is_safe(&self) -> bool {
        self.gate == Gate::Safe
    }

    /// Gated commands waiting for the current selection.
    #[must_use]
    pub fn pending_deferred(&self) -> usize {
        self.deferred.len()
    }

    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.link.is_some()
    }
}

/// Sequence range for `count` messages, newest first, skipping `skip`.
/// `None` when no message falls in it.
fn fetch_range(exists: u32, count: u32, skip: u32) -> Option<String> {
    let start = exists.checked_sub(skip).filter(|&start| start > 0)?;
    let end = start.saturating_sub(count.checked_sub(1)?).max(1);
    Some(format!("{start}:{end}"))
}
