//! Outbound connection
//!
//! Drives a client session through
//! `HandshakeComplete -> Connecting -> Connected -> CreatingStream -> StreamReady`,
//! correlates `_result`/`_error` responses with the commands that started them,
//! and routes inbound messages to the stream they belong to.
//!
//! All mutable state lives behind one lock that is never held while calling
//! into the handler or the transport.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::amf::{Amf0Encoder, AmfValue};
use crate::error::{AmfError, Error, Result};
use crate::protocol::chunk::RawMessage;
use crate::protocol::constants::*;
use crate::protocol::message::Command;

use super::config::{ClientConfig, ParsedUrl};
use super::handler::OutboundHandler;
use super::stream::OutboundStream;
use super::transport::{TcpTransport, Transport};

/// Connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Closed,
    /// Handshake done, `connect` not sent yet
    HandshakeComplete,
    /// `connect` sent, waiting for its result
    Connecting,
    Connected,
    /// `createStream` sent after a successful connect
    CreatingStream,
    /// At least one stream has been created
    StreamReady,
}

impl ConnectionStatus {
    /// Whether moving from `self` to `next` is allowed
    pub fn can_transition_to(self, next: ConnectionStatus) -> bool {
        use ConnectionStatus::*;

        match (self, next) {
            (_, Closed) => true,
            (Closed, _) => false,
            (HandshakeComplete, Connecting) => true,
            (Connecting, Connected) => true,
            (Connected, CreatingStream) => true,
            (Connected | CreatingStream | StreamReady, StreamReady) => true,
            _ => false,
        }
    }

    /// Whether `connect` has succeeded and streams may be requested
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connected
                | ConnectionStatus::CreatingStream
                | ConnectionStatus::StreamReady
        )
    }
}

struct State {
    status: ConnectionStatus,
    /// First command encoding error, until cleared
    last_error: Option<AmfError>,
    /// Pending transaction id -> command name
    transactions: HashMap<u32, String>,
    /// Remote message stream id -> stream
    streams: HashMap<u32, Arc<OutboundStream>>,
    close_requested: bool,
    disconnect_notified: bool,
}

impl State {
    fn latch(&mut self, error: &AmfError) {
        if self.last_error.is_none() {
            self.last_error = Some(error.clone());
        }
    }

    fn transition(&mut self, next: ConnectionStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::debug!(from = ?self.status, to = ?next, "Ignoring status transition");
            return false;
        }
        self.status = next;
        true
    }
}

struct Inner {
    config: ClientConfig,
    parsed_url: ParsedUrl,
    handler: Arc<dyn OutboundHandler>,
    transport: Arc<dyn Transport>,
    state: Mutex<State>,
}

/// Client-side RTMP connection
///
/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct OutboundConnection {
    inner: Arc<Inner>,
}

impl OutboundConnection {
    /// Wrap an already handshaken transport
    ///
    /// The caller is responsible for feeding inbound traffic to
    /// `on_command`, `on_message` and `on_closed`.
    pub fn new(
        config: ClientConfig,
        handler: Arc<dyn OutboundHandler>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let parsed_url = config.parse_url()?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                parsed_url,
                handler,
                transport,
                state: Mutex::new(State {
                    status: ConnectionStatus::HandshakeComplete,
                    last_error: None,
                    transactions: HashMap::new(),
                    streams: HashMap::new(),
                    close_requested: false,
                    disconnect_notified: false,
                }),
            }),
        })
    }

    /// Open a TCP connection to `url` and perform the handshake
    pub async fn dial(
        url: impl Into<String>,
        handler: Arc<dyn OutboundHandler>,
        max_channels: usize,
    ) -> Result<Self> {
        let config = ClientConfig::new(url).max_channels(max_channels);
        Self::dial_with_config(config, handler).await
    }

    /// Like [`dial`](Self::dial) with full control over the configuration
    pub async fn dial_with_config(
        config: ClientConfig,
        handler: Arc<dyn OutboundHandler>,
    ) -> Result<Self> {
        let parsed_url = config.parse_url()?;
        let addr = parsed_url.addr();

        let socket = timeout(config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(Error::Io)?;

        if config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }

        tracing::debug!(addr = %addr, "TCP connected");
        Self::from_socket(socket, config, handler).await
    }

    /// Adopt an open socket: handshake, then start the reader task
    pub async fn from_socket(
        socket: TcpStream,
        config: ClientConfig,
        handler: Arc<dyn OutboundHandler>,
    ) -> Result<Self> {
        // Reject bad URLs before touching the socket
        config.parse_url()?;

        let (transport, reader) = TcpTransport::handshake(socket, &config).await?;
        let conn = Self::new(config, handler, transport)?;
        tokio::spawn(reader.run(conn.clone()));
        Ok(conn)
    }

    /// Connection URL as given
    pub fn url(&self) -> &str {
        &self.inner.config.url
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Current status and the latched encoding error, if any
    pub async fn status(&self) -> (ConnectionStatus, Option<AmfError>) {
        let state = self.inner.state.lock().await;
        (state.status, state.last_error.clone())
    }

    /// Forget the latched encoding error
    pub async fn clear_error(&self) {
        self.inner.state.lock().await.last_error = None;
    }

    /// Stream by remote id
    pub async fn stream(&self, id: u32) -> Option<Arc<OutboundStream>> {
        self.inner.state.lock().await.streams.get(&id).cloned()
    }

    pub async fn streams(&self) -> Vec<Arc<OutboundStream>> {
        self.inner.state.lock().await.streams.values().cloned().collect()
    }

    /// Send `connect` for the application in the URL
    ///
    /// `extra` values are appended after the command object as-is. Returns
    /// once the command is handed to the transport; the result arrives via
    /// the handler.
    pub async fn connect(&self, extra: Vec<AmfValue>) -> Result<()> {
        let (transaction_id, message) = {
            let mut state = self.inner.state.lock().await;
            match state.status {
                ConnectionStatus::HandshakeComplete => {}
                ConnectionStatus::Closed => return Err(Error::ConnectionClosed),
                other => {
                    return Err(Error::InvalidState(format!(
                        "connect not allowed while {:?}",
                        other
                    )))
                }
            }

            let transaction_id = self.inner.transport.next_transaction_id();
            let payload = match self.encode_connect(transaction_id, &extra) {
                Ok(payload) => payload,
                Err(e) => {
                    state.latch(&e);
                    return Err(e.into());
                }
            };

            state
                .transactions
                .insert(transaction_id, CMD_CONNECT.to_string());
            state.transition(ConnectionStatus::Connecting);

            let message = RawMessage::new(CSID_COMMAND, MSG_COMMAND_AMF0, 0, payload);
            (transaction_id, message)
        };

        tracing::debug!(
            transaction_id = transaction_id,
            app = %self.inner.parsed_url.app,
            "Sending connect"
        );
        self.send_registered(transaction_id, message).await
    }

    fn encode_connect(
        &self,
        transaction_id: u32,
        extra: &[AmfValue],
    ) -> std::result::Result<Bytes, AmfError> {
        let config = &self.inner.config;
        let mut encoder = Amf0Encoder::new();

        encoder.encode(&AmfValue::from(CMD_CONNECT))?;
        encoder.encode(&AmfValue::from(transaction_id))?;

        encoder.write_object_start()?;
        encoder.write_property("app", &AmfValue::from(self.inner.parsed_url.app.as_str()))?;
        encoder.write_property("flashVer", &AmfValue::from(config.flash_ver.as_str()))?;
        encoder.write_property("tcUrl", &AmfValue::from(config.url.as_str()))?;
        encoder.write_property("fpad", &AmfValue::Boolean(false))?;
        encoder.write_property("capabilities", &AmfValue::Number(DEFAULT_CAPABILITIES))?;
        encoder.write_property("audioCodecs", &AmfValue::Number(DEFAULT_AUDIO_CODECS))?;
        encoder.write_property("videoCodecs", &AmfValue::Number(DEFAULT_VIDEO_CODECS))?;
        encoder.write_property("videoFunction", &AmfValue::Number(DEFAULT_VIDEO_FUNCTION))?;
        encoder.write_object_end()?;

        encoder.encode_all(extra)?;
        Ok(encoder.finish())
    }

    /// Request a new stream
    ///
    /// Called automatically after a successful connect; call it again for
    /// additional streams. The stream arrives via `on_stream_created`.
    pub async fn create_stream(&self) -> Result<()> {
        self.start_transaction(CMD_CREATE_STREAM, Command::create_stream)
            .await
            .map(|_| ())
    }

    /// Invoke a remote method
    ///
    /// Returns the transaction id; the `_result` is delivered to
    /// `OutboundHandler::on_call_result`.
    pub async fn call(&self, method: &str, arguments: Vec<AmfValue>) -> Result<u32> {
        let mut args = Vec::with_capacity(arguments.len() + 1);
        args.push(AmfValue::Null);
        args.extend(arguments);

        self.start_transaction(method, move |transaction_id| {
            Command::new(method, transaction_id, args)
        })
        .await
    }

    /// Register a transaction for a command built from its id, then send it
    async fn start_transaction<F>(&self, name: &str, build: F) -> Result<u32>
    where
        F: FnOnce(u32) -> Command,
    {
        let (transaction_id, message) = {
            let mut state = self.inner.state.lock().await;
            if state.status == ConnectionStatus::Closed {
                return Err(Error::ConnectionClosed);
            }
            if !state.status.is_connected() {
                return Err(Error::InvalidState(format!(
                    "{} not allowed while {:?}",
                    name, state.status
                )));
            }

            let transaction_id = self.inner.transport.next_transaction_id();
            let message = match build(transaction_id).to_raw(CSID_COMMAND) {
                Ok(message) => message,
                Err(e) => {
                    state.latch(&e);
                    return Err(e.into());
                }
            };

            state.transactions.insert(transaction_id, name.to_string());
            (transaction_id, message)
        };

        tracing::debug!(transaction_id = transaction_id, command = name, "Sending command");
        self.send_registered(transaction_id, message).await?;
        Ok(transaction_id)
    }

    /// Send a message whose transaction is already registered
    async fn send_registered(&self, transaction_id: u32, message: RawMessage) -> Result<()> {
        if let Err(e) = self.inner.transport.send(message).await {
            self.inner
                .state
                .lock()
                .await
                .transactions
                .remove(&transaction_id);
            return Err(e);
        }
        Ok(())
    }

    /// Send a message as-is
    pub async fn send(&self, message: RawMessage) -> Result<()> {
        if self.inner.state.lock().await.status == ConnectionStatus::Closed {
            return Err(Error::ConnectionClosed);
        }
        self.inner.transport.send(message).await
    }

    /// Close a stream and tell the server to delete it
    pub async fn remove_stream(&self, id: u32) -> Result<()> {
        let stream = self
            .inner
            .state
            .lock()
            .await
            .streams
            .remove(&id)
            .ok_or_else(|| Error::InvalidState(format!("no stream with id {}", id)))?;

        stream.close().await?;
        let message = Command::delete_stream(0, id).to_raw(CSID_COMMAND)?;
        self.inner.transport.send(message).await
    }

    /// Close every stream, let queued data drain, then shut the transport
    ///
    /// Only the first call has any effect.
    pub async fn close(&self) {
        let streams: Vec<_> = {
            let mut state = self.inner.state.lock().await;
            if state.close_requested {
                return;
            }
            state.close_requested = true;
            state.streams.values().cloned().collect()
        };

        for stream in &streams {
            if let Err(e) = stream.close().await {
                tracing::debug!(stream_id = stream.id(), error = %e, "Stream close failed");
            }
        }

        let drain_timeout = self.inner.config.close_drain_timeout;
        match timeout(drain_timeout, self.inner.transport.drain()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "Drain failed"),
            Err(_) => tracing::debug!(timeout = ?drain_timeout, "Drain timed out"),
        }

        {
            let mut state = self.inner.state.lock().await;
            state.transition(ConnectionStatus::Closed);
            state.streams.clear();
            state.transactions.clear();
        }

        if let Err(e) = self.inner.transport.close().await {
            tracing::debug!(error = %e, "Transport close failed");
        }
        tracing::info!(url = %self.url(), "Connection closed");
    }

    /// Transport reported the connection gone
    pub async fn on_closed(&self) {
        let notify = {
            let mut state = self.inner.state.lock().await;
            state.transition(ConnectionStatus::Closed);
            state.streams.clear();
            state.transactions.clear();
            !std::mem::replace(&mut state.disconnect_notified, true)
        };

        if notify {
            self.inner.handler.on_status(ConnectionStatus::Closed).await;
        }
    }

    /// Inbound non-command message
    ///
    /// The stream with the message's stream id gets the first chance to
    /// claim it; anything left goes to the handler.
    pub async fn on_message(&self, message: RawMessage) {
        let stream = self
            .inner
            .state
            .lock()
            .await
            .streams
            .get(&message.stream_id)
            .cloned();

        let unclaimed = match stream {
            Some(stream) => match stream.received(message) {
                Ok(()) => return,
                Err(message) => message,
            },
            None => message,
        };

        self.inner.handler.on_message(unclaimed).await;
    }

    /// Inbound command
    pub async fn on_command(&self, command: Command) {
        match command.name.as_str() {
            CMD_RESULT => self.on_result(command).await,
            CMD_ERROR => self.on_error(command).await,
            CMD_ON_BW_CHECK => {}
            name => {
                tracing::debug!(
                    command = name,
                    transaction_id = command.transaction_id,
                    "Ignoring command"
                );
            }
        }
    }

    async fn on_result(&self, command: Command) {
        let method = self
            .inner
            .state
            .lock()
            .await
            .transactions
            .remove(&command.transaction_id);

        let Some(method) = method else {
            tracing::debug!(
                transaction_id = command.transaction_id,
                "Result for unknown transaction"
            );
            return;
        };

        match method.as_str() {
            CMD_CONNECT => self.on_connect_result(&command).await,
            CMD_CREATE_STREAM => self.on_create_stream_result(&command).await,
            _ => self.inner.handler.on_call_result(&method, &command).await,
        }
    }

    async fn on_connect_result(&self, command: &Command) {
        let code = command.info().and_then(|info| info.get_string("code"));
        if code != Some(NC_CONNECT_SUCCESS) {
            tracing::warn!(code = ?code, url = %self.url(), "Connect not accepted");
            return;
        }

        let delay = self.inner.config.connect_settle_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Err(e) = self.inner.transport.set_window_ack_size().await {
            tracing::warn!(error = %e, "Failed to send window ack size");
        }

        if !self.transition(ConnectionStatus::Connected).await {
            return;
        }
        tracing::info!(url = %self.url(), "Connected");
        self.inner.handler.on_status(ConnectionStatus::Connected).await;

        if !self.transition(ConnectionStatus::CreatingStream).await {
            return;
        }
        if let Err(e) = self.create_stream().await {
            tracing::warn!(error = %e, "Failed to request stream");
        }
    }

    async fn on_create_stream_result(&self, command: &Command) {
        let Some(id) = command.info().and_then(|v| v.as_number()) else {
            tracing::warn!(
                transaction_id = command.transaction_id,
                "createStream result without stream id"
            );
            return;
        };
        let Some(id) = stream_id_from_number(id) else {
            tracing::warn!(
                transaction_id = command.transaction_id,
                stream_id = id,
                "createStream result with invalid stream id"
            );
            return;
        };

        // Chunk stream allocation is synchronous; a closed connection gets none
        let (stream, chunk_stream_id) = {
            let mut state = self.inner.state.lock().await;
            if !state.status.can_transition_to(ConnectionStatus::StreamReady) {
                tracing::debug!(stream_id = id, status = ?state.status, "Dropping createStream result");
                return;
            }

            let chunk_stream_id = match self.inner.transport.create_media_chunk_stream() {
                Ok(csid) => csid,
                Err(e) => {
                    tracing::warn!(stream_id = id, error = %e, "No chunk stream for new stream");
                    return;
                }
            };

            let stream = Arc::new(OutboundStream::new(id, chunk_stream_id, &self.inner.transport));
            if state.streams.insert(id, Arc::clone(&stream)).is_some() {
                tracing::warn!(stream_id = id, "Replacing stream with duplicate id");
            }
            state.transition(ConnectionStatus::StreamReady);
            (stream, chunk_stream_id)
        };

        tracing::debug!(stream_id = id, csid = chunk_stream_id, "Stream created");
        self.inner
            .handler
            .on_status(ConnectionStatus::StreamReady)
            .await;
        self.inner.handler.on_stream_created(stream).await;
    }

    async fn on_error(&self, command: Command) {
        let method = self
            .inner
            .state
            .lock()
            .await
            .transactions
            .remove(&command.transaction_id);

        let description = command
            .info()
            .and_then(|info| info.get_string("description"))
            .unwrap_or("");
        match method {
            Some(method) => tracing::warn!(
                transaction_id = command.transaction_id,
                command = %method,
                description = description,
                "Command failed"
            ),
            None => tracing::warn!(
                transaction_id = command.transaction_id,
                "Error for unknown transaction"
            ),
        }
    }

    async fn transition(&self, next: ConnectionStatus) -> bool {
        self.inner.state.lock().await.transition(next)
    }
}

/// Stream ids arrive as AMF numbers; only whole values in `u32` range are valid
fn stream_id_from_number(n: f64) -> Option<u32> {
    (n.fract() == 0.0 && n >= 0.0 && n <= u32::MAX as f64).then_some(n as u32)
}

impl std::fmt::Debug for OutboundConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundConnection")
            .field("url", &self.inner.config.url)
            .finish()
    }
}
