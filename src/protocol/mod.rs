//! RTMP wire protocol implementation
//!
//! This module handles the low-level protocol details:
//! - Client handshake (C0C1/S0S1S2/C2 exchange)
//! - Chunk stream multiplexing and demultiplexing
//! - Message framing and command parsing

pub mod chunk;
pub mod constants;
pub mod handshake;
pub mod message;

pub use chunk::{ChunkDecoder, ChunkEncoder, RawMessage};
pub use handshake::Handshake;
pub use message::{Command, RtmpMessage, UserControlEvent};
