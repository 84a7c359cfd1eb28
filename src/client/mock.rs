//! Recording transport for unit tests

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, ProtocolError, Result};
use crate::protocol::chunk::RawMessage;
use crate::protocol::constants::CSID_FIRST_MEDIA;
use crate::protocol::message::{Command, RtmpMessage};

use super::transport::Transport;

/// Transport calls in the order they happened
#[derive(Debug, Clone)]
pub(crate) enum MockEvent {
    Sent(RawMessage),
    Drain,
    Close,
}

pub(crate) struct MockTransport {
    events: Mutex<Vec<MockEvent>>,
    next_transaction: AtomicU32,
    next_chunk_stream: AtomicU32,
    max_chunk_stream: u32,
    pub fail_sends: AtomicBool,
    pub window_acks: AtomicUsize,
    pub drains: AtomicUsize,
    pub closes: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_max_chunk_stream(u32::MAX)
    }

    pub fn with_max_chunk_stream(max: u32) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            next_transaction: AtomicU32::new(1),
            next_chunk_stream: AtomicU32::new(CSID_FIRST_MEDIA),
            max_chunk_stream: max,
            fail_sends: AtomicBool::new(false),
            window_acks: AtomicUsize::new(0),
            drains: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<RawMessage> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                MockEvent::Sent(raw) => Some(raw),
                _ => None,
            })
            .collect()
    }

    /// Media chunk stream ids handed out so far, including failed attempts
    pub fn chunk_streams_allocated(&self) -> u32 {
        self.next_chunk_stream.load(Ordering::SeqCst) - CSID_FIRST_MEDIA
    }

    pub fn commands(&self) -> Vec<Command> {
        self.sent()
            .iter()
            .filter_map(|raw| match RtmpMessage::from_raw(raw) {
                Ok(RtmpMessage::Command(cmd)) => Some(cmd),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn next_transaction_id(&self) -> u32 {
        self.next_transaction.fetch_add(1, Ordering::SeqCst)
    }

    async fn send(&self, message: RawMessage) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        self.events.lock().unwrap().push(MockEvent::Sent(message));
        Ok(())
    }

    async fn set_window_ack_size(&self) -> Result<()> {
        self.window_acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn create_media_chunk_stream(&self) -> Result<u32> {
        let csid = self.next_chunk_stream.fetch_add(1, Ordering::SeqCst);
        if csid > self.max_chunk_stream {
            return Err(ProtocolError::ChunkStreamsExhausted {
                max: self.max_chunk_stream as usize,
            }
            .into());
        }
        Ok(csid)
    }

    async fn drain(&self) -> Result<()> {
        self.drains.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().push(MockEvent::Drain);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().push(MockEvent::Close);
        Ok(())
    }
}
