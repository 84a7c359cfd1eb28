//! RTMP client implementation
//!
//! An [`OutboundConnection`] dials a server, sends `connect`, creates streams
//! automatically once connected, and hands inbound traffic to the
//! [`OutboundStream`] it belongs to or to the [`OutboundHandler`].

pub mod config;
pub mod connection;
pub mod handler;
pub mod stream;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use config::{ClientConfig, ParsedUrl};
pub use connection::{ConnectionStatus, OutboundConnection};
pub use handler::{LoggingHandler, OutboundHandler};
pub use stream::OutboundStream;
pub use transport::{TcpTransport, Transport, TransportReader};
