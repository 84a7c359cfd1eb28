//! Outbound connection handler trait
//!
//! The consumer's view of a client session. Callbacks are invoked from the
//! transport reader task, one at a time and in arrival order.

use std::sync::Arc;

use async_trait::async_trait;

use crate::protocol::chunk::RawMessage;
use crate::protocol::message::Command;

use super::connection::ConnectionStatus;
use super::stream::OutboundStream;

/// Handler trait for outbound connections
///
/// All methods have default no-op implementations.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use rtmp_outbound::{ConnectionStatus, OutboundHandler, OutboundStream};
///
/// struct MyHandler;
///
/// #[async_trait::async_trait]
/// impl OutboundHandler for MyHandler {
///     async fn on_status(&self, status: ConnectionStatus) {
///         println!("status: {:?}", status);
///     }
///
///     async fn on_stream_created(&self, stream: Arc<OutboundStream>) {
///         println!("stream {} ready", stream.id());
///     }
/// }
/// ```
#[async_trait]
pub trait OutboundHandler: Send + Sync + 'static {
    /// Connection status changed
    async fn on_status(&self, _status: ConnectionStatus) {}

    /// A stream requested with `create_stream` is ready
    async fn on_stream_created(&self, _stream: Arc<OutboundStream>) {}

    /// A message no stream claimed
    async fn on_message(&self, _message: RawMessage) {}

    /// `_result` for a transaction started with `call`
    async fn on_call_result(&self, _method: &str, _result: &Command) {}
}

/// Handler that only logs what it sees
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

#[async_trait]
impl OutboundHandler for LoggingHandler {
    async fn on_status(&self, status: ConnectionStatus) {
        tracing::info!(status = ?status, "Connection status");
    }

    async fn on_stream_created(&self, stream: Arc<OutboundStream>) {
        tracing::info!(
            stream_id = stream.id(),
            csid = stream.chunk_stream_id(),
            "Stream created"
        );
    }

    async fn on_message(&self, message: RawMessage) {
        tracing::debug!(
            message_type = message.message_type,
            stream_id = message.stream_id,
            timestamp = message.timestamp,
            len = message.len(),
            "Message"
        );
    }

    async fn on_call_result(&self, method: &str, result: &Command) {
        tracing::info!(
            method = method,
            transaction_id = result.transaction_id,
            "Call result"
        );
    }
}
