//! Outbound stream
//!
//! One logical media stream created on a connection with `createStream`.
//! A stream only keeps a weak reference to the connection's transport, so
//! holding a stream never keeps a closed session alive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, Mutex};

use crate::error::{Error, Result};
use crate::protocol::chunk::RawMessage;
use crate::protocol::message::Command;

use super::transport::Transport;

/// Capacity of a stream's inbound queue
const INBOX_CAPACITY: usize = 1024;

/// A stream created on an [`OutboundConnection`](super::OutboundConnection)
pub struct OutboundStream {
    id: u32,
    chunk_stream_id: u32,
    transport: Weak<dyn Transport>,
    closed: AtomicBool,
    inbox: mpsc::Sender<RawMessage>,
    messages: Mutex<Option<mpsc::Receiver<RawMessage>>>,
}

impl OutboundStream {
    pub(crate) fn new(id: u32, chunk_stream_id: u32, transport: &Arc<dyn Transport>) -> Self {
        let (inbox, messages) = mpsc::channel(INBOX_CAPACITY);
        Self {
            id,
            chunk_stream_id,
            transport: Arc::downgrade(transport),
            closed: AtomicBool::new(false),
            inbox,
            messages: Mutex::new(Some(messages)),
        }
    }

    /// Message stream id assigned by the server
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Chunk stream this stream sends on
    pub fn chunk_stream_id(&self) -> u32 {
        self.chunk_stream_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Take the receiver for messages this stream claims
    ///
    /// Messages claimed before this call are buffered in the inbox. Returns
    /// `None` after the first call.
    pub async fn take_messages(&self) -> Option<mpsc::Receiver<RawMessage>> {
        self.messages.lock().await.take()
    }

    /// Offer an inbound message to this stream
    ///
    /// Hands the message back when it is not for this stream, the stream is
    /// closed, the inbox is full, or the receiver has been dropped.
    pub fn received(&self, message: RawMessage) -> std::result::Result<(), RawMessage> {
        if message.stream_id != self.id || self.is_closed() {
            return Err(message);
        }

        self.inbox.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(m) => {
                tracing::debug!(stream_id = self.id, "Stream inbox full");
                m
            }
            mpsc::error::TrySendError::Closed(m) => m,
        })
    }

    /// Send `closeStream` on this stream's chunk stream
    ///
    /// Does not wait for a reply. Only the first call sends anything.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let transport = self.transport.upgrade().ok_or(Error::ConnectionClosed)?;
        let message = Command::close_stream(self.id).to_raw(self.chunk_stream_id)?;
        tracing::debug!(stream_id = self.id, csid = self.chunk_stream_id, "Closing stream");
        transport.send(message).await
    }
}

impl std::fmt::Debug for OutboundStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundStream")
            .field("id", &self.id)
            .field("chunk_stream_id", &self.chunk_stream_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
