//! rtmp-outbound: client-side RTMP connection engine
//!
//! Dials an RTMP server, performs the handshake, negotiates `connect`,
//! creates streams and correlates command responses:
//! - Transaction tracking for `_result` / `_error` responses
//! - Automatic `createStream` after a successful connect
//! - Demultiplexing of inbound messages to their stream
//! - Protocol control (chunk size, acknowledgements, pings) handled internally
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rtmp_outbound::{OutboundConnection, OutboundHandler, OutboundStream};
//!
//! struct MyHandler;
//!
//! #[async_trait::async_trait]
//! impl OutboundHandler for MyHandler {
//!     async fn on_stream_created(&self, stream: Arc<OutboundStream>) {
//!         println!("Stream ready: {}", stream.id());
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let conn = OutboundConnection::dial("rtmp://localhost/live", Arc::new(MyHandler), 64).await?;
//!     conn.connect(vec![]).await?;
//!     Ok(())
//! }
//! ```

pub mod amf;
pub mod client;
pub mod error;
pub mod protocol;

// Re-export main types for convenience
pub use amf::AmfValue;
pub use client::{
    ClientConfig, ConnectionStatus, LoggingHandler, OutboundConnection, OutboundHandler,
    OutboundStream,
};
pub use error::{Error, Result};
pub use protocol::chunk::RawMessage;
