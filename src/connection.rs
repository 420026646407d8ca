//! Connection core: transport ownership, reader task, lifecycle and teardown

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::{
    command::EslCommand,
    completion::Completion,
    constants::{HEADER_CONTENT_DISPOSITION, SOCKET_BUF_SIZE},
    dispatcher::Dispatcher,
    error::{EslError, EslResult},
    event::EslEvent,
    message::{EslMessage, MessageType},
    protocol::EslParser,
    router::{EslEventStream, EventListener, EventRouter, ListenerId},
};

/// Which side opened the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Inbound connection - client connects to FreeSWITCH
    Inbound,
    /// Outbound connection - FreeSWITCH connects to client
    Outbound,
}

/// Lifecycle state of a connection.
///
/// Transitions only move forward: inbound connections go
/// `Connecting → Authenticating → Ready → Closed`, outbound ones
/// `Connecting → Handshaking → Ready → Closed`. `Closed` is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionState {
    /// Transport being opened.
    Connecting,
    /// Inbound: waiting for `auth/request` and the auth reply.
    Authenticating,
    /// Outbound: `connect` exchange and session setup in progress.
    Handshaking,
    /// Commands and events flow.
    Ready,
    /// Connection ended; all outstanding work has been failed.
    Closed(DisconnectReason),
}

impl ConnectionState {
    fn rank(&self) -> u8 {
        match self {
            ConnectionState::Connecting => 0,
            ConnectionState::Authenticating | ConnectionState::Handshaking => 1,
            ConnectionState::Ready => 2,
            ConnectionState::Closed(_) => 3,
        }
    }

    /// `true` for the terminal state.
    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed(_))
    }
}

/// Reason for disconnection
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// Server sent a text/disconnect-notice without `Content-Disposition: linger`
    ServerNotice,
    /// TCP I/O error (io::Error is not Clone, so we store the message)
    IoError(String),
    /// Received bytes could not be framed
    DecodeError(String),
    /// Handshake step received something other than what the protocol requires
    HandshakeFailed(String),
    /// Clean EOF on the TCP connection
    ConnectionClosed,
    /// Client called close()
    ClientRequested,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::ServerNotice => write!(f, "server sent disconnect notice"),
            DisconnectReason::IoError(msg) => write!(f, "I/O error: {}", msg),
            DisconnectReason::DecodeError(msg) => write!(f, "decode error: {}", msg),
            DisconnectReason::HandshakeFailed(msg) => write!(f, "handshake failed: {}", msg),
            DisconnectReason::ConnectionClosed => write!(f, "connection closed"),
            DisconnectReason::ClientRequested => write!(f, "client requested disconnect"),
        }
    }
}

/// Establish a TCP connection with a timeout.
pub(crate) async fn tcp_connect_with_timeout(
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> EslResult<TcpStream> {
    match timeout(connect_timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(s)) => {
            debug!("[CONNECT] TCP connection established");
            Ok(s)
        }
        Ok(Err(e)) => {
            warn!("[CONNECT] TCP connect failed: {}", e);
            Err(EslError::Io(e))
        }
        Err(_) => {
            warn!(
                "[CONNECT] TCP connect timed out after {}ms",
                connect_timeout.as_millis()
            );
            Err(EslError::Timeout {
                timeout_ms: connect_timeout.as_millis() as u64,
            })
        }
    }
}

/// Unsplit stream plus codec, used for handshake steps that happen before
/// the reader task exists.
pub(crate) struct Handshake {
    stream: TcpStream,
    parser: EslParser,
    read_buffer: Vec<u8>,
    step_timeout: Duration,
}

impl Handshake {
    pub(crate) fn new(stream: TcpStream, step_timeout: Duration) -> Self {
        Self {
            stream,
            parser: EslParser::new(),
            read_buffer: vec![0u8; SOCKET_BUF_SIZE],
            step_timeout,
        }
    }

    /// Read a single ESL message from the socket into the parser.
    pub(crate) async fn recv_message(&mut self) -> EslResult<EslMessage> {
        loop {
            if let Some(message) = self
                .parser
                .parse_message()?
            {
                trace!(
                    "[RECV] Parsed handshake message: {:?}",
                    message.message_type()
                );
                return Ok(message);
            }

            let read_result = timeout(
                self.step_timeout,
                self.stream
                    .read(&mut self.read_buffer),
            )
            .await;

            let bytes_read = match read_result {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(EslError::Io(e)),
                Err(_) => {
                    return Err(EslError::Timeout {
                        timeout_ms: self
                            .step_timeout
                            .as_millis() as u64,
                    })
                }
            };

            trace!("[RECV] Read {} bytes from socket", bytes_read);
            if bytes_read == 0 {
                return Err(EslError::ConnectionLost {
                    reason: DisconnectReason::ConnectionClosed,
                });
            }

            self.parser
                .add_data(&self.read_buffer[..bytes_read])?;
        }
    }

    /// Write a command and wait for its reply.
    pub(crate) async fn round_trip(&mut self, command: &EslCommand) -> EslResult<EslMessage> {
        let wire = command.to_wire_format()?;
        debug!("[SEND] {}", command.log_label());
        self.stream
            .write_all(wire.as_bytes())
            .await?;
        loop {
            let message = self
                .recv_message()
                .await?;
            if message
                .message_type()
                .is_reply()
            {
                return Ok(message);
            }
            if *message.message_type() == MessageType::DisconnectNotice {
                return Err(EslError::ConnectionLost {
                    reason: DisconnectReason::ServerNotice,
                });
            }
            debug!(
                "[RECV] Skipping {:?} while awaiting handshake reply",
                message.message_type()
            );
        }
    }

    pub(crate) fn into_client(self, mode: ConnectionMode, state: ConnectionState) -> EslClient {
        EslClient::spawn(self.stream, self.parser, mode, state)
    }
}

/// Shared state between EslClient handles, the reader task and the writer task
struct SharedState {
    dispatcher: Dispatcher,
    /// Complete wire frames for the writer task. Held while enqueueing so
    /// FIFO order equals wire order.
    outgoing: Mutex<mpsc::UnboundedSender<String>>,
    router: Arc<EventRouter>,
    state_tx: watch::Sender<ConnectionState>,
    mode: ConnectionMode,
    peer_addr: Option<SocketAddr>,
}

impl SharedState {
    /// Move to `Closed`, then fail outstanding work and drop listeners.
    /// Returns `false` if the connection was already closed.
    fn shutdown(&self, reason: DisconnectReason) -> bool {
        let mut transitioned = false;
        self.state_tx
            .send_if_modified(|state| {
                if state.is_closed() {
                    return false;
                }
                *state = ConnectionState::Closed(reason.clone());
                transitioned = true;
                true
            });
        if !transitioned {
            return false;
        }

        info!("[CLOSE] Connection closed: {}", reason);
        let drained = self
            .dispatcher
            .drain(&reason);
        if drained > 0 {
            debug!("[CLOSE] Failed {} outstanding commands/jobs", drained);
        }
        self.router
            .clear();
        true
    }
}

/// ESL connection handle (Clone + Send + Sync)
///
/// All clones drive the same socket. A command's dispatcher entry and its
/// complete frame are queued in one step without awaiting, so replies always
/// pair with commands in send order, even when a caller drops its future.
/// A writer task per connection puts frames on the wire; a reader task
/// decodes frames, resolves replies and background jobs, and runs event
/// listeners.
#[derive(Clone)]
pub struct EslClient {
    shared: Arc<SharedState>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl std::fmt::Debug for EslClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EslClient")
            .field("mode", &self.shared.mode)
            .field("peer_addr", &self.shared.peer_addr)
            .field("state", &*self.state_rx.borrow())
            .finish()
    }
}

/// Background reader loop
async fn reader_loop(client: EslClient, reader: OwnedReadHalf, parser: EslParser) {
    let result = std::panic::AssertUnwindSafe(reader_loop_inner(&client, reader, parser));
    let reason = match futures_util::FutureExt::catch_unwind(result).await {
        Ok(reason) => reason,
        Err(_) => {
            tracing::error!("reader task panicked");
            DisconnectReason::IoError("reader task panicked".to_string())
        }
    };
    client
        .close_with(reason)
        .await;
}

/// Background writer loop. Frames are written whole, in queue order, until
/// the connection closes.
async fn writer_loop(
    shared: Arc<SharedState>,
    mut writer: OwnedWriteHalf,
    mut outgoing: mpsc::UnboundedReceiver<String>,
) {
    let mut state_rx = shared
        .state_tx
        .subscribe();

    let failure = loop {
        let frame = tokio::select! {
            frame = outgoing.recv() => frame,
            _ = state_rx.wait_for(ConnectionState::is_closed) => None,
        };
        let Some(frame) = frame else {
            break None;
        };

        tokio::select! {
            result = writer.write_all(frame.as_bytes()) => match result {
                Ok(()) => trace!("[SEND] Wrote {} bytes", frame.len()),
                Err(e) => {
                    warn!("[SEND] Write failed: {}", e);
                    break Some(DisconnectReason::IoError(e.to_string()));
                }
            },
            _ = state_rx.wait_for(ConnectionState::is_closed) => break None,
        }
    };

    if let Some(reason) = failure {
        shared.shutdown(reason);
    }
    if let Err(e) = writer
        .shutdown()
        .await
    {
        debug!("[CLOSE] Write half shutdown: {}", e);
    }
}

async fn reader_loop_inner(
    client: &EslClient,
    mut reader: OwnedReadHalf,
    mut parser: EslParser,
) -> DisconnectReason {
    let mut state_rx = client
        .shared
        .state_tx
        .subscribe();
    let mut read_buffer = vec![0u8; SOCKET_BUF_SIZE];

    loop {
        // Drain every complete message already buffered
        loop {
            match parser.parse_message() {
                Ok(Some(message)) => {
                    if let Some(reason) = client.handle_message(message) {
                        return reason;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("[RECV] Parser error: {}", e);
                    return DisconnectReason::DecodeError(e.to_string());
                }
            }
        }

        tokio::select! {
            read_result = reader.read(&mut read_buffer) => match read_result {
                Ok(0) => {
                    if parser.has_partial_frame() {
                        warn!("[RECV] EOF in the middle of a frame");
                        return DisconnectReason::DecodeError(
                            "connection closed mid-frame".to_string(),
                        );
                    }
                    info!("[RECV] Connection closed (EOF)");
                    return DisconnectReason::ConnectionClosed;
                }
                Ok(n) => {
                    trace!("[RECV] Read {} bytes from socket", n);
                    if let Err(e) = parser.add_data(&read_buffer[..n]) {
                        warn!("[RECV] Buffer error: {}", e);
                        return DisconnectReason::DecodeError(e.to_string());
                    }
                }
                Err(e) => {
                    warn!("[RECV] Read error: {}", e);
                    return DisconnectReason::IoError(e.to_string());
                }
            },
            _ = state_rx.wait_for(ConnectionState::is_closed) => {
                trace!("[RECV] Connection closed locally, reader exiting");
                return DisconnectReason::ClientRequested;
            }
        }
    }
}

impl EslClient {
    fn spawn(
        stream: TcpStream,
        parser: EslParser,
        mode: ConnectionMode,
        initial: ConnectionState,
    ) -> Self {
        let peer_addr = stream
            .peer_addr()
            .ok();
        let (read_half, write_half) = stream.into_split();
        let (state_tx, state_rx) = watch::channel(initial);
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(SharedState {
            dispatcher: Dispatcher::new(),
            outgoing: Mutex::new(outgoing_tx),
            router: Arc::new(EventRouter::new()),
            state_tx,
            mode,
            peer_addr,
        });

        let client = EslClient {
            shared,
            state_rx,
        };

        tokio::spawn(writer_loop(
            Arc::clone(&client.shared),
            write_half,
            outgoing_rx,
        ));
        tokio::spawn(reader_loop(client.clone(), read_half, parser));
        client
    }

    /// Classify one decoded frame. Returns a reason when it ends the connection.
    fn handle_message(&self, message: EslMessage) -> Option<DisconnectReason> {
        match message.message_type() {
            t if t.is_reply() => {
                self.shared
                    .dispatcher
                    .on_reply(message);
            }
            t if t.is_event() => match EslEvent::from_message(&message) {
                Ok(event) => {
                    if let Some(event) = self
                        .shared
                        .dispatcher
                        .on_event(event)
                    {
                        self.shared
                            .router
                            .dispatch(self, &event);
                    }
                }
                Err(e) => warn!("[RECV] Dropping undecodable event: {}", e),
            },
            MessageType::DisconnectNotice => {
                if message.header(HEADER_CONTENT_DISPOSITION) == Some("linger") {
                    debug!("[RECV] Disconnect notice with linger disposition, ignoring");
                    return None;
                }
                info!("[RECV] Received disconnect notice from server");
                return Some(DisconnectReason::ServerNotice);
            }
            other => {
                debug!("[RECV] Ignoring unexpected message: {:?}", other);
            }
        }
        None
    }

    /// Move the state forward. Backward or repeated transitions are ignored.
    pub(crate) fn advance_state(&self, next: ConnectionState) {
        self.shared
            .state_tx
            .send_if_modified(|state| {
                if state.rank() < next.rank() {
                    debug!("[STATE] {:?} -> {:?}", state, next);
                    *state = next;
                    true
                } else {
                    false
                }
            });
    }

    /// Queue `command` for writing together with its reply slot.
    ///
    /// Fails with [`EslError::NotConnected`] unless the connection is
    /// `Ready`. The command is validated before anything is enqueued. Once
    /// this returns `Ok` the frame goes out whole; dropping the returned
    /// completion only discards the reply.
    pub async fn send_command(&self, command: EslCommand) -> EslResult<Completion<EslMessage>> {
        self.send_inner(command, false)
    }

    /// Like [`send_command`](Self::send_command), also accepted while the
    /// outbound handshake is running.
    pub(crate) async fn send_during_handshake(
        &self,
        command: EslCommand,
    ) -> EslResult<Completion<EslMessage>> {
        self.send_inner(command, true)
    }

    fn send_inner(
        &self,
        command: EslCommand,
        allow_handshake: bool,
    ) -> EslResult<Completion<EslMessage>> {
        if command
            .job_uuid()
            .is_some()
        {
            return Err(EslError::invalid_argument(
                "background commands must be sent with bgapi",
            ));
        }
        let wire = command.to_wire_format()?;
        let label = command.log_label();

        self.submit(wire, &label, allow_handshake, |dispatcher| {
            dispatcher.enqueue(label.clone())
        })
    }

    /// Queue a background command, pre-registering its job entry before the
    /// reply can arrive.
    pub(crate) async fn send_background(
        &self,
        command: EslCommand,
        caller_supplied: bool,
    ) -> EslResult<(Completion<EslMessage>, Completion<EslEvent>)> {
        let wire = command.to_wire_format()?;
        let label = command.log_label();
        let Some(job_uuid) = command.job_uuid() else {
            return Err(EslError::invalid_argument(
                "send_background requires a job id",
            ));
        };

        self.submit(wire, &label, false, |dispatcher| {
            dispatcher.enqueue_background(label.clone(), job_uuid, caller_supplied)
        })
    }

    /// Enqueue the dispatcher entry and hand the frame to the writer task
    /// under one lock, with no await in between.
    fn submit<T>(
        &self,
        wire: String,
        label: &str,
        allow_handshake: bool,
        enqueue: impl FnOnce(&Dispatcher) -> EslResult<T>,
    ) -> EslResult<T> {
        let outgoing = self
            .shared
            .outgoing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.ensure_writable(allow_handshake)?;
        let pending = enqueue(&self.shared.dispatcher)?;

        debug!("[SEND] {}", label);
        if outgoing
            .send(wire)
            .is_err()
        {
            // Writer task only exits after shutdown, which already failed
            // the entry just enqueued.
            return Err(EslError::NotConnected);
        }
        Ok(pending)
    }

    fn ensure_writable(&self, allow_handshake: bool) -> EslResult<()> {
        match &*self
            .state_rx
            .borrow()
        {
            ConnectionState::Ready => Ok(()),
            ConnectionState::Handshaking if allow_handshake => Ok(()),
            _ => Err(EslError::NotConnected),
        }
    }

    /// Register a listener for every event not consumed as a background-job
    /// completion. Listeners run in registration order.
    pub fn add_listener<L: EventListener>(&self, listener: L) -> ListenerId {
        self.shared
            .router
            .add(Arc::new(listener))
    }

    pub(crate) fn add_shared_listener(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        self.shared
            .router
            .add(listener)
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared
            .router
            .remove(id)
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.shared
            .router
            .len()
    }

    /// Receive events through a bounded channel instead of a callback.
    ///
    /// When the consumer falls behind, events are dropped and the stream
    /// yields one `Err(EslError::QueueFull)` before the next delivered event.
    pub fn event_stream(&self, capacity: usize) -> EslEventStream {
        EslEventStream::register(&self.shared.router, self.state_rx.clone(), capacity)
    }

    /// Close the connection.
    ///
    /// Every outstanding command and background job fails with
    /// [`EslError::ConnectionLost`] before this returns. Closing an
    /// already-closed connection does nothing.
    pub async fn close(&self) {
        self.close_with(DisconnectReason::ClientRequested)
            .await;
    }

    /// The writer task sees the `Closed` state and shuts the write half.
    pub(crate) async fn close_with(&self, reason: DisconnectReason) {
        self.shared
            .shutdown(reason);
    }

    /// Whether commands can be sent.
    pub fn is_ready(&self) -> bool {
        matches!(
            *self
                .state_rx
                .borrow(),
            ConnectionState::Ready
        )
    }

    /// Whether the connection has reached its terminal state.
    pub fn is_closed(&self) -> bool {
        self.state_rx
            .borrow()
            .is_closed()
    }

    /// Current connection state snapshot.
    pub fn state(&self) -> ConnectionState {
        self.state_rx
            .borrow()
            .clone()
    }

    /// Wait until the connection closes and return why.
    pub async fn closed(&self) -> DisconnectReason {
        let mut state_rx = self
            .state_rx
            .clone();
        let result = state_rx
            .wait_for(ConnectionState::is_closed)
            .await
            .map(|state| state.clone());
        match result {
            Ok(ConnectionState::Closed(reason)) => reason,
            _ => DisconnectReason::ConnectionClosed,
        }
    }

    /// Inbound or outbound.
    pub fn mode(&self) -> ConnectionMode {
        self.shared
            .mode
    }

    /// Remote address of the transport.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared
            .peer_addr
    }

    /// Commands still waiting for their reply.
    pub fn pending_command_count(&self) -> usize {
        self.shared
            .dispatcher
            .pending_count()
    }

    /// Background jobs still waiting for their completion event.
    pub fn pending_job_count(&self) -> usize {
        self.shared
            .dispatcher
            .job_count()
    }
}
