//! Connection worker
//!
//! Owns the transport and the FIFO of pending requests. At most one
//! request is on the wire at any time: the head of the queue is written,
//! and the next one only after the head's response unit has been
//! assembled and stored in its result slot. Completions are therefore
//! delivered in exactly the order requests were sent.
//!
//! The worker talks to the mailbox session through two channels:
//! [`ConnCommand`] inbound, [`ConnEvent`] outbound.

use std::collections::VecDeque;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::assembler::ResponseAssembler;
use crate::command::{CommandKind, SimpleCommand, format_request};
use crate::config::ImapConfig;
use crate::correlator::{Request, next_index};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::tls;

/// Default buffer size for reading.
const READ_BUFFER_SIZE: usize = 8192;

/// Instructions for the worker.
#[derive(Debug)]
pub enum ConnCommand {
    Send(Request),
    /// Write LOGOUT without waiting for the reply, then stop.
    Close,
}

/// Notifications from the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnEvent {
    /// The slot of the request with this index has been fulfilled.
    ResponseReady(u64),
    /// Transport or protocol failure; the worker is stopping.
    Error(String),
    /// The worker has stopped and abandoned every unanswered request.
    Closed,
}

/// Request pipeline over one established stream.
pub struct Connection<S> {
    stream: S,
    assembler: ResponseAssembler,
    queue: VecDeque<Request>,
    in_flight: bool,
    events: UnboundedSender<ConnEvent>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, events: UnboundedSender<ConnEvent>) -> Self {
        Self {
            stream,
            assembler: ResponseAssembler::new(),
            queue: VecDeque::new(),
            in_flight: false,
            events,
        }
    }

    /// Read the server greeting (one untagged line).
    pub async fn read_greeting(&mut self) -> Result<Message> {
        self.assembler.expect(None)?;
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            if let Some(lines) = self.assembler.take_unit() {
                let greeting = Message::new(lines);
                let line = greeting.lines().first().map_or(&[][..], Vec::as_slice);
                if !line.starts_with(b"* OK") && !line.starts_with(b"* PREAUTH") {
                    return Err(Error::Protocol(format!(
                        "server refused connection: {}",
                        String::from_utf8_lossy(line)
                    )));
                }
                self.assembler.expect(None)?;
                return Ok(greeting);
            }
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            self.assembler.feed(&buf[..n])?;
        }
    }

    /// Queue a request; dispatch it right away if nothing is in flight.
    pub async fn send(&mut self, request: Request) -> Result<()> {
        debug!(index = request.index, command = %request.kind, "Accepted send request");
        self.queue.push_back(request);
        self.send_next().await?;
        self.deliver_ready().await
    }

    /// Feed bytes read from the transport.
    pub async fn on_data(&mut self, data: &[u8]) -> Result<()> {
        debug!(bytes = data.len(), "Got data");
        self.assembler.feed(data)?;
        self.deliver_ready().await?;
        if self.in_flight && self.assembler.buffered() > 0 {
            debug!("Waiting for more data...");
        }
        Ok(())
    }

    async fn send_next(&mut self) -> Result<()> {
        if self.in_flight {
            return Ok(());
        }
        let Some(head) = self.queue.front() else {
            return self.assembler.expect(None);
        };
        debug!(index = head.index, command = %head.kind, "Sending request");
        self.stream.write_all(&head.data).await?;
        self.stream.flush().await?;
        self.in_flight = true;
        let tag = head.tag();
        self.assembler.expect(Some(tag.as_str()))
    }

    async fn deliver_ready(&mut self) -> Result<()> {
        while let Some(lines) = self.assembler.take_unit() {
            let head = if self.in_flight {
                self.queue.pop_front()
            } else {
                None
            };
            let Some(request) = head else {
                debug!(lines = lines.len(), "Dropping unsolicited data");
                self.send_next().await?;
                continue;
            };

            debug!(index = request.index, lines = lines.len(), "Accepted data");
            request.slot.fulfill(Message::new(lines));
            self.in_flight = false;
            // the receiver is gone only when the session was dropped
            self.events.send(ConnEvent::ResponseReady(request.index)).ok();
            self.send_next().await?;
        }
        Ok(())
    }

    /// Best-effort LOGOUT; the reply is not awaited.
    async fn logout(&mut self) -> Result<()> {
        let data = format_request(
            next_index(),
            CommandKind::Simple(SimpleCommand::Logout),
            &[],
        );
        self.stream.write_all(&data).await?;
        self.stream.flush().await?;
        self.stream.shutdown().await.ok();
        Ok(())
    }

    /// Process commands and server data until closed or broken.
    pub async fn run(mut self, mut commands: UnboundedReceiver<ConnCommand>) {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let outcome = loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(ConnCommand::Send(request)) => {
                        if let Err(e) = self.send(request).await {
                            break Err(e);
                        }
                    }
                    Some(ConnCommand::Close) | None => break self.logout().await,
                },
                read = self.stream.read(&mut buf) => match read {
                    Ok(0) => break Err(Error::ConnectionClosed),
                    Ok(n) => {
                        if let Err(e) = self.on_data(&buf[..n]).await {
                            break Err(e);
                        }
                    }
                    Err(e) => break Err(e.into()),
                },
            }
        };

        match outcome {
            Ok(()) => info!("Connection closed"),
            Err(Error::ConnectionClosed) => info!("Server closed the connection"),
            Err(e) => {
                warn!("Connection failed: {e}");
                self.events.send(ConnEvent::Error(e.to_string())).ok();
            }
        }
        let queue = std::mem::take(&mut self.queue);
        shut_down(queue, commands, &self.events);
    }
}

/// Read the greeting before `deadline`, then run the worker.
pub async fn serve<S>(
    stream: S,
    commands: UnboundedReceiver<ConnCommand>,
    events: UnboundedSender<ConnEvent>,
    deadline: Instant,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = Connection::new(stream, events.clone());
    match timeout_at(deadline, conn.read_greeting()).await {
        Ok(Ok(greeting)) => {
            let line = greeting.lines().first().map_or(&[][..], Vec::as_slice);
            debug!(greeting = %String::from_utf8_lossy(line), "Connected");
            conn.run(commands).await;
        }
        Ok(Err(e)) => fail(e, commands, &events),
        Err(_) => fail(Error::Protocol("no greeting from server".to_string()), commands, &events),
    }
}

/// Establish the TLS transport within `config.connect_timeout` and serve it.
pub async fn connect_and_serve(
    config: ImapConfig,
    commands: UnboundedReceiver<ConnCommand>,
    events: UnboundedSender<ConnEvent>,
) {
    info!("Opening connection to {}:{}", config.host, config.port);
    let deadline = Instant::now() + config.connect_timeout;
    match timeout_at(deadline, tls::connect(&config)).await {
        Ok(Ok(stream)) => serve(stream, commands, events, deadline).await,
        Ok(Err(e)) => fail(e, commands, &events),
        Err(_) => fail(Error::Timeout(config.connect_timeout), commands, &events),
    }
}

fn fail(error: Error, commands: UnboundedReceiver<ConnCommand>, events: &UnboundedSender<ConnEvent>) {
    warn!("Could not connect: {error}");
    events.send(ConnEvent::Error(error.to_string())).ok();
    shut_down(VecDeque::new(), commands, events);
}

/// Abandon everything still waiting and announce the stop.
fn shut_down(
    queue: VecDeque<Request>,
    mut commands: UnboundedReceiver<ConnCommand>,
    events: &UnboundedSender<ConnEvent>,
) {
    commands.close();
    let mut abandoned = 0usize;
    for request in queue {
        abandoned += usize::from(request.slot.abandon());
    }
    while let Ok(command) = commands.try_recv() {
        if let ConnCommand::Send(request) = command {
            abandoned += usize::from(request.slot.abandon());
        }
    }
    if abandoned > 0 {
        debug!(abandoned, "Abandoned unanswered requests");
    }
    events.send(ConnEvent::Closed).ok();
}
