//! Outbound mode: accept connections the `socket` dialplan application opens

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, info, warn, Instrument};

use crate::{
    command::EslCommand,
    connection::{ConnectionMode, ConnectionState, DisconnectReason, EslClient, Handshake},
    constants::DEFAULT_TIMEOUT_MS,
    error::{EslError, EslResult},
    event::{EslEvent, EventFormat},
    message::MessageType,
    router::EventListener,
};

type ConnectCallback = Box<dyn FnOnce(EslClient, EslEvent) -> BoxFuture<'static, ()> + Send>;

/// Per-connection callbacks for one accepted call.
///
/// `on_connect` receives the handle and the channel data from the `connect`
/// reply; its future is spawned once the connection is `Ready`. `on_event`
/// receives every later event on this connection only.
pub struct OutboundHandler {
    on_connect: ConnectCallback,
    on_event: Option<Arc<dyn EventListener>>,
}

impl std::fmt::Debug for OutboundHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundHandler")
            .field("on_event", &self.on_event.is_some())
            .finish()
    }
}

impl OutboundHandler {
    /// Handler with only a connect callback.
    pub fn new<F, Fut>(on_connect: F) -> Self
    where
        F: FnOnce(EslClient, EslEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            on_connect: Box::new(move |client, event| on_connect(client, event).boxed()),
            on_event: None,
        }
    }

    /// Set the event callback.
    pub fn on_event<L: EventListener>(mut self, listener: L) -> Self {
        self.on_event = Some(Arc::new(listener));
        self
    }
}

/// Session setup performed after `connect` and before `Ready`.
#[derive(Debug, Clone)]
pub struct OutboundOptions {
    /// Send `myevents <format>` so only this call's events arrive.
    /// Default: `Some(EventFormat::Plain)`.
    pub myevents: Option<EventFormat>,
    /// Send `linger` (optionally with a timeout in seconds) so events after
    /// hangup are still delivered. Default: off.
    pub linger: Option<Option<u32>>,
    /// Limit for the `connect` exchange and for each session setup reply.
    /// Default: 2 seconds.
    pub handshake_timeout: Duration,
}

impl Default for OutboundOptions {
    fn default() -> Self {
        Self {
            myevents: Some(EventFormat::Plain),
            linger: None,
            handshake_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

/// Listening socket for outbound connections.
///
/// Each accepted connection gets its own [`EslClient`], dispatcher and
/// listeners; nothing is shared between calls.
#[derive(Debug)]
pub struct OutboundListener {
    listener: TcpListener,
    options: OutboundOptions,
}

impl OutboundListener {
    /// Bind with default options.
    pub async fn bind(addr: impl ToSocketAddrs) -> EslResult<Self> {
        Self::bind_with_options(addr, OutboundOptions::default()).await
    }

    /// Bind with explicit session setup options.
    pub async fn bind_with_options(
        addr: impl ToSocketAddrs,
        options: OutboundOptions,
    ) -> EslResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(
            "[OUTBOUND] Listening on {}",
            listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_default()
        );
        Ok(Self { listener, options })
    }

    /// Wrap an already bound listener.
    pub fn from_listener(listener: TcpListener, options: OutboundOptions) -> Self {
        Self { listener, options }
    }

    /// Bound address (useful after binding port 0).
    pub fn local_addr(&self) -> EslResult<SocketAddr> {
        Ok(self
            .listener
            .local_addr()?)
    }

    /// Accept connections forever, handling each on its own task.
    ///
    /// `factory` builds a fresh [`OutboundHandler`] per accepted connection.
    /// Handshake failures close only the affected connection. Returns only
    /// if accepting fails.
    pub async fn serve<F>(self, factory: F) -> EslResult<()>
    where
        F: Fn(SocketAddr) -> OutboundHandler + Send + Sync + 'static,
    {
        loop {
            let (stream, addr) = self
                .listener
                .accept()
                .await?;
            info!("[OUTBOUND] Accepted connection from {}", addr);
            let handler = factory(addr);
            let options = self
                .options
                .clone();
            tokio::spawn(
                async move {
                    if let Err(e) = run_connection(stream, handler, &options).await {
                        warn!("[OUTBOUND] Session setup failed: {}", e);
                    }
                }
                .instrument(tracing::info_span!("outbound", peer = %addr)),
            );
        }
    }

    /// Accept a single connection and run the handshake without callbacks.
    ///
    /// Returns the `Ready` handle and the channel data. Session setup from
    /// [`OutboundOptions`] is applied before returning.
    pub async fn accept(&self) -> EslResult<(EslClient, EslEvent)> {
        let (stream, addr) = self
            .listener
            .accept()
            .await?;
        info!("[OUTBOUND] Accepted connection from {}", addr);
        let (client, channel_data) = handshake(stream, &self.options).await?;
        if let Err(e) = setup_session(&client, &self.options).await {
            client
                .close_with(DisconnectReason::HandshakeFailed(e.to_string()))
                .await;
            return Err(e);
        }
        client.advance_state(ConnectionState::Ready);
        Ok((client, channel_data))
    }
}

/// `connect` exchange on the unsplit stream, then hand off to a reader task
/// in `Handshaking`.
async fn handshake(stream: TcpStream, options: &OutboundOptions) -> EslResult<(EslClient, EslEvent)> {
    let mut handshake = Handshake::new(stream, options.handshake_timeout);
    debug!("[OUTBOUND] Sending connect");
    let reply = handshake
        .round_trip(&EslCommand::Connect)
        .await?;
    if *reply.message_type() != MessageType::CommandReply {
        return Err(EslError::protocol_violation(format!(
            "expected command/reply to connect, got {:?}",
            reply.content_type()
        )));
    }
    let channel_data = EslEvent::from_message(&reply)?;
    debug!(
        "[OUTBOUND] Channel data for {:?} ({:?})",
        channel_data.unique_id(),
        channel_data.channel_name()
    );
    Ok((
        handshake.into_client(ConnectionMode::Outbound, ConnectionState::Handshaking),
        channel_data,
    ))
}

/// Scope the subscription to this call and set linger, per options. Each
/// reply is bounded by the handshake timeout.
async fn setup_session(client: &EslClient, options: &OutboundOptions) -> EslResult<()> {
    if let Some(format) = options.myevents {
        let reply = client
            .send_during_handshake(EslCommand::MyEvents { format, uuid: None })
            .await?
            .wait_timeout(options.handshake_timeout)
            .await?;
        debug!("[OUTBOUND] myevents: {:?}", reply.reply_text());
    }
    if let Some(timeout) = options.linger {
        let reply = client
            .send_during_handshake(EslCommand::Linger { timeout })
            .await?
            .wait_timeout(options.handshake_timeout)
            .await?;
        debug!("[OUTBOUND] linger: {:?}", reply.reply_text());
    }
    Ok(())
}

async fn run_connection(
    stream: TcpStream,
    handler: OutboundHandler,
    options: &OutboundOptions,
) -> EslResult<()> {
    let (client, channel_data) = handshake(stream, options).await?;

    if let Some(on_event) = handler.on_event {
        client.add_shared_listener(on_event);
    }
    let on_connect = (handler.on_connect)(client.clone(), channel_data);

    if let Err(e) = setup_session(&client, options).await {
        client
            .close_with(DisconnectReason::HandshakeFailed(e.to_string()))
            .await;
        return Err(e);
    }
    client.advance_state(ConnectionState::Ready);

    tokio::spawn(on_connect.in_current_span());
    Ok(())
}
