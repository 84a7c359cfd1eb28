//! Client transport
//!
//! [`TcpTransport`] owns the write half of the socket, hands out transaction
//! and chunk stream ids, and frames outbound messages. [`TransportReader`]
//! owns the read half and runs as a single task that handles protocol control
//! itself and forwards everything else to the [`OutboundConnection`].

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf,
};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;

use crate::error::{Error, HandshakeError, ProtocolError, Result};
use crate::protocol::chunk::{ChunkDecoder, ChunkEncoder, RawMessage};
use crate::protocol::constants::*;
use crate::protocol::handshake::Handshake;
use crate::protocol::message::{RtmpMessage, UserControlEvent};

use super::config::ClientConfig;
use super::connection::OutboundConnection;

const IO_BUFFER_SIZE: usize = 64 * 1024;

/// Outbound half of a client session
///
/// Everything an [`OutboundConnection`] needs from the wire.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Allocate the next transaction id (starts at 1)
    fn next_transaction_id(&self) -> u32;

    /// Frame and send a message
    async fn send(&self, message: RawMessage) -> Result<()>;

    /// Send the Window Acknowledgement Size control message
    async fn set_window_ack_size(&self) -> Result<()>;

    /// Allocate a chunk stream id for a media stream
    fn create_media_chunk_stream(&self) -> Result<u32>;

    /// Wait until queued outbound data has been written
    async fn drain(&self) -> Result<()>;

    /// Shut the transport down; the reader task exits afterwards
    async fn close(&self) -> Result<()>;
}

struct WriteState {
    writer: BufWriter<WriteHalf<TcpStream>>,
    encoder: ChunkEncoder,
    buf: BytesMut,
}

/// TCP transport for an RTMP client session
pub struct TcpTransport {
    write: Mutex<WriteState>,
    transaction_id: AtomicU32,
    next_chunk_stream: AtomicU32,
    max_channels: usize,
    window_ack_size: u32,
    closed: AtomicBool,
    shutdown: Notify,
}

impl TcpTransport {
    /// Perform the client handshake on `socket` and split it into a
    /// transport and its reader
    pub async fn handshake(
        socket: TcpStream,
        config: &ClientConfig,
    ) -> Result<(Arc<TcpTransport>, TransportReader)> {
        let (read_half, write_half) = tokio::io::split(socket);
        let mut reader = BufReader::with_capacity(IO_BUFFER_SIZE, read_half);
        let mut writer = BufWriter::with_capacity(IO_BUFFER_SIZE, write_half);
        let mut read_buf = BytesMut::with_capacity(IO_BUFFER_SIZE);

        client_handshake(&mut reader, &mut writer, &mut read_buf, config.connect_timeout).await?;
        tracing::debug!(url = %config.url, "Handshake complete");

        let transport = Arc::new(TcpTransport {
            write: Mutex::new(WriteState {
                writer,
                encoder: ChunkEncoder::new(),
                buf: BytesMut::with_capacity(IO_BUFFER_SIZE),
            }),
            transaction_id: AtomicU32::new(1),
            next_chunk_stream: AtomicU32::new(CSID_FIRST_MEDIA),
            max_channels: config.max_channels,
            window_ack_size: config.window_ack_size,
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
        });

        // Bytes that arrived right behind S2 stay in read_buf
        let reader = TransportReader {
            reader,
            read_buf,
            decoder: ChunkDecoder::new(),
            transport: Arc::clone(&transport),
            bytes_received: 0,
            last_ack: 0,
            ack_window: 0,
        };

        Ok((transport, reader))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn send_control(&self, message: RtmpMessage) -> Result<()> {
        self.send(message.to_control_raw()?).await
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn next_transaction_id(&self) -> u32 {
        self.transaction_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn send(&self, message: RawMessage) -> Result<()> {
        let mut state = self.write.lock().await;
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let WriteState {
            writer,
            encoder,
            buf,
        } = &mut *state;
        buf.clear();
        encoder.encode(&message, buf);
        writer.write_all(&buf[..]).await?;
        writer.flush().await?;

        tracing::trace!(
            csid = message.csid,
            message_type = message.message_type,
            stream_id = message.stream_id,
            len = message.len(),
            "Sent message"
        );
        Ok(())
    }

    async fn set_window_ack_size(&self) -> Result<()> {
        tracing::debug!(size = self.window_ack_size, "Sending window ack size");
        self.send_control(RtmpMessage::WindowAckSize(self.window_ack_size))
            .await
    }

    fn create_media_chunk_stream(&self) -> Result<u32> {
        let limit = self.max_channels.min(CSID_MAX as usize + 1);
        self.next_chunk_stream
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |csid| {
                ((csid as usize) < limit).then_some(csid + 1)
            })
            .map_err(|_| {
                ProtocolError::ChunkStreamsExhausted {
                    max: self.max_channels,
                }
                .into()
            })
    }

    async fn drain(&self) -> Result<()> {
        let mut state = self.write.lock().await;
        state.writer.flush().await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Stored permit: the reader picks it up even if it is busy right now
        self.shutdown.notify_one();

        let mut state = self.write.lock().await;
        if let Err(e) = state.writer.shutdown().await {
            tracing::debug!(error = %e, "Socket shutdown failed");
        }
        Ok(())
    }
}

/// Inbound half of a client session
pub struct TransportReader {
    reader: BufReader<ReadHalf<TcpStream>>,
    read_buf: BytesMut,
    decoder: ChunkDecoder,
    transport: Arc<TcpTransport>,
    bytes_received: u64,
    last_ack: u64,
    /// Window announced by the peer (0 = no acknowledgements)
    ack_window: u32,
}

impl TransportReader {
    /// Read until the socket closes or the transport shuts down, then
    /// report the closure to the connection
    pub async fn run(mut self, conn: OutboundConnection) {
        match self.read_loop(&conn).await {
            Ok(()) => tracing::debug!(url = %conn.url(), "Transport reader stopped"),
            Err(Error::ConnectionClosed) => {
                tracing::debug!(url = %conn.url(), "Connection closed by peer")
            }
            Err(e) => tracing::warn!(url = %conn.url(), error = %e, "Transport read error"),
        }
        conn.on_closed().await;
    }

    async fn read_loop(&mut self, conn: &OutboundConnection) -> Result<()> {
        loop {
            while let Some(raw) = self.decoder.decode(&mut self.read_buf)? {
                self.dispatch(raw, conn).await?;
            }

            let n = tokio::select! {
                res = self.reader.read_buf(&mut self.read_buf) => res?,
                _ = self.transport.shutdown.notified() => return Ok(()),
            };
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }

            self.bytes_received += n as u64;
            self.maybe_acknowledge().await?;
        }
    }

    async fn maybe_acknowledge(&mut self) -> Result<()> {
        if self.ack_window == 0 || self.bytes_received - self.last_ack < self.ack_window as u64 {
            return Ok(());
        }
        self.last_ack = self.bytes_received;
        // Sequence number wraps at 32 bits
        let sequence = self.bytes_received as u32;
        self.transport
            .send_control(RtmpMessage::Acknowledgement { sequence })
            .await
    }

    async fn dispatch(&mut self, raw: RawMessage, conn: &OutboundConnection) -> Result<()> {
        let message = match RtmpMessage::from_raw(&raw) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(
                    message_type = raw.message_type,
                    error = %e,
                    "Dropping unparseable message"
                );
                return Ok(());
            }
        };

        match message {
            RtmpMessage::SetChunkSize(size) => {
                tracing::debug!(size = size, "Peer chunk size");
                self.decoder.set_chunk_size(size);
            }
            RtmpMessage::Abort { csid } => self.decoder.abort(csid),
            RtmpMessage::Acknowledgement { sequence } => {
                tracing::trace!(sequence = sequence, "Peer acknowledgement");
            }
            RtmpMessage::WindowAckSize(size) => {
                tracing::debug!(size = size, "Peer window ack size");
                self.ack_window = size;
            }
            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                tracing::debug!(size = size, limit_type = limit_type, "Peer bandwidth");
                self.transport
                    .send_control(RtmpMessage::WindowAckSize(size))
                    .await?;
            }
            RtmpMessage::UserControl(UserControlEvent::PingRequest(ts)) => {
                self.transport
                    .send_control(RtmpMessage::UserControl(UserControlEvent::PingResponse(ts)))
                    .await?;
            }
            RtmpMessage::UserControl(event) => {
                tracing::debug!(event = ?event, "User control event");
            }
            RtmpMessage::Command(cmd) => conn.on_command(cmd).await,
            RtmpMessage::Other(raw) => conn.on_message(raw).await,
        }
        Ok(())
    }
}

/// Client side of the simple handshake
///
/// Leftover bytes received after S2 remain in `read_buf`.
pub async fn client_handshake<R, W>(
    reader: &mut R,
    writer: &mut W,
    read_buf: &mut BytesMut,
    timeout_duration: Duration,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut handshake = Handshake::new();

    let c0c1 = handshake
        .generate_initial()
        .ok_or(Error::Handshake(HandshakeError::InvalidState))?;
    writer.write_all(&c0c1).await?;
    writer.flush().await?;

    timeout(timeout_duration, async {
        loop {
            let n = reader.read_buf(read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }

            let mut buf = Bytes::copy_from_slice(read_buf);
            if let Some(response) = handshake.process(&mut buf)? {
                let consumed = read_buf.len() - buf.len();
                read_buf.advance(consumed);

                writer.write_all(&response).await?;
                writer.flush().await?;
            }

            if handshake.is_done() {
                break;
            }
        }
        Ok::<_, Error>(())
    })
    .await
    .map_err(|_| Error::Timeout)??;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::AmfValue;
    use crate::client::handler::OutboundHandler;
    use crate::client::stream::OutboundStream;
    use crate::client::ConnectionStatus;
    use crate::protocol::message::Command;
    use bytes::BufMut;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Minimal server: handshake, then answer connect and createStream.
    /// Every command it receives is reported on `seen`.
    async fn fake_server(listener: TcpListener, seen: mpsc::UnboundedSender<RawMessage>) {
        let (mut socket, _) = listener.accept().await.unwrap();

        // S0S1S2 with an all-zero S1, then swallow C2
        let mut c0c1 = vec![0u8; 1 + HANDSHAKE_SIZE];
        socket.read_exact(&mut c0c1).await.unwrap();
        assert_eq!(c0c1[0], RTMP_VERSION);

        let mut s0s1s2 = BytesMut::with_capacity(1 + HANDSHAKE_SIZE * 2);
        s0s1s2.put_u8(RTMP_VERSION);
        s0s1s2.put_bytes(0, HANDSHAKE_SIZE);
        s0s1s2.put_slice(&c0c1[1..]);
        socket.write_all(&s0s1s2).await.unwrap();

        let mut c2 = vec![0u8; HANDSHAKE_SIZE];
        socket.read_exact(&mut c2).await.unwrap();
        let mut read_buf = BytesMut::new();

        let mut decoder = ChunkDecoder::new();
        let mut encoder = ChunkEncoder::new();
        loop {
            while let Some(raw) = decoder.decode(&mut read_buf).unwrap() {
                let _ = seen.send(raw.clone());
                let cmd = match RtmpMessage::from_raw(&raw).unwrap() {
                    RtmpMessage::Command(cmd) => cmd,
                    _ => continue,
                };
                let reply = match cmd.name.as_str() {
                    CMD_CONNECT => Command::new(
                        CMD_RESULT,
                        cmd.transaction_id,
                        vec![
                            AmfValue::Null,
                            AmfValue::object([
                                ("level", "status"),
                                ("code", NC_CONNECT_SUCCESS),
                            ]),
                        ],
                    ),
                    CMD_CREATE_STREAM => Command::new(
                        CMD_RESULT,
                        cmd.transaction_id,
                        vec![AmfValue::Null, AmfValue::Number(1.0)],
                    ),
                    _ => continue,
                };
                let mut out = BytesMut::new();
                encoder.encode(&reply.to_raw(CSID_COMMAND).unwrap(), &mut out);
                socket.write_all(&out).await.unwrap();
            }
            match socket.read_buf(&mut read_buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        }
    }

    struct StreamSignal(mpsc::UnboundedSender<Arc<OutboundStream>>);

    #[async_trait]
    impl OutboundHandler for StreamSignal {
        async fn on_stream_created(&self, stream: Arc<OutboundStream>) {
            let _ = self.0.send(stream);
        }
    }

    fn command_name(raw: &RawMessage) -> Option<String> {
        match RtmpMessage::from_raw(raw).ok()? {
            RtmpMessage::Command(cmd) => Some(cmd.name),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_loopback_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let server = tokio::spawn(fake_server(listener, seen_tx));

        let (stream_tx, mut stream_rx) = mpsc::unbounded_channel();
        let config = ClientConfig::new(format!("rtmp://127.0.0.1:{}/live", port))
            .connect_settle_delay(Duration::ZERO);
        let conn = OutboundConnection::dial_with_config(config, Arc::new(StreamSignal(stream_tx)))
            .await
            .unwrap();
        assert_eq!(conn.status().await.0, ConnectionStatus::HandshakeComplete);

        conn.connect(vec![]).await.unwrap();

        let stream = timeout(Duration::from_secs(5), stream_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stream.id(), 1);
        assert_eq!(stream.chunk_stream_id(), CSID_FIRST_MEDIA);
        assert_eq!(conn.status().await.0, ConnectionStatus::StreamReady);

        conn.close().await;
        assert_eq!(conn.status().await.0, ConnectionStatus::Closed);
        server.await.unwrap();

        let mut received = Vec::new();
        while let Ok(raw) = seen_rx.try_recv() {
            received.push(raw);
        }
        let commands: Vec<_> = received.iter().filter_map(command_name).collect();
        assert_eq!(commands, vec![CMD_CONNECT, CMD_CREATE_STREAM, CMD_CLOSE_STREAM]);
        assert!(received
            .iter()
            .any(|raw| raw.message_type == MSG_WINDOW_ACK_SIZE));

        let close = received
            .iter()
            .find(|raw| command_name(raw).as_deref() == Some(CMD_CLOSE_STREAM))
            .unwrap();
        assert_eq!(close.stream_id, 1);
        assert_eq!(close.csid, CSID_FIRST_MEDIA);
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and stay silent
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let socket = TcpStream::connect(addr).await.unwrap();
        let config = ClientConfig::new(format!("rtmp://{}/live", addr))
            .connect_timeout(Duration::from_millis(100));
        let result = TcpTransport::handshake(socket, &config).await;
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn test_dial_rejects_other_schemes() {
        let result = OutboundConnection::dial(
            "rtmps://127.0.0.1/live",
            Arc::new(StreamSignal(mpsc::unbounded_channel().0)),
            DEFAULT_MAX_CHANNELS,
        )
        .await;
        assert!(matches!(result, Err(Error::UnsupportedProtocol(_))));
    }
}
