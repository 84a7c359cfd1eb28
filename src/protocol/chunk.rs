//! RTMP chunk stream codec
//!
//! RTMP messages are split into chunks for multiplexing. Each chunk has a header
//! that identifies the chunk stream and message being sent.
//!
//! ```text
//! Chunk Format:
//! +-------------+----------------+-------------------+
//! | Basic Header| Message Header | Chunk Data        |
//! | (1-3 bytes) | (0,3,7,11 bytes)| (variable)       |
//! +-------------+----------------+-------------------+
//!
//! Basic Header formats:
//! - 1 byte:  fmt(2) + csid(6)        for csid 2-63
//! - 2 bytes: fmt(2) + 0 + csid(8)    for csid 64-319
//! - 3 bytes: fmt(2) + 1 + csid(16)   for csid 64-65599
//!
//! Message Header formats (based on fmt):
//! - Type 0 (11 bytes): timestamp(3) + length(3) + type(1) + stream_id(4)
//! - Type 1 (7 bytes):  timestamp_delta(3) + length(3) + type(1)
//! - Type 2 (3 bytes):  timestamp_delta(3)
//! - Type 3 (0 bytes):  (use previous chunk's values)
//!
//! Extended timestamp (4 bytes) is appended when timestamp >= 0xFFFFFF
//! ```
//!
//! Reference: RTMP Specification Section 5.3

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::*;

/// A complete RTMP message (reassembled from chunks)
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    /// Chunk stream ID the message travelled on
    pub csid: u32,
    /// Message timestamp (milliseconds)
    pub timestamp: u32,
    /// Message type ID
    pub message_type: u8,
    /// Message stream ID (0 for connection-level traffic)
    pub stream_id: u32,
    /// Message payload
    pub payload: Bytes,
}

impl RawMessage {
    /// Create a message with a zero timestamp
    pub fn new(csid: u32, message_type: u8, stream_id: u32, payload: Bytes) -> Self {
        Self {
            csid,
            timestamp: 0,
            message_type,
            stream_id,
            payload,
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Per-chunk-stream header state, shared by both directions
#[derive(Debug, Clone, Default)]
struct ChunkStreamState {
    /// Set once a full (type 0) header has been seen or sent
    initialized: bool,
    /// Absolute timestamp of the current message
    timestamp: u32,
    /// Last timestamp delta
    timestamp_delta: u32,
    message_length: u32,
    message_type: u8,
    stream_id: u32,
    /// Whether the last header carried an extended timestamp
    has_extended_timestamp: bool,
    /// Buffer for partial message reassembly
    partial_message: BytesMut,
}

/// Header fields of one chunk, parsed without consuming the buffer
#[derive(Debug)]
struct ChunkHeader {
    fmt: u8,
    csid: u32,
    /// Total header length including any extended timestamp
    len: usize,
    timestamp: u32,
    message_length: Option<u32>,
    message_type: Option<u8>,
    stream_id: Option<u32>,
    extended: bool,
}

/// Chunk stream decoder
///
/// Handles chunk demultiplexing and message reassembly. Bytes are only
/// consumed once a whole chunk (header and data) is available.
pub struct ChunkDecoder {
    /// Maximum incoming chunk size
    chunk_size: u32,
    streams: HashMap<u32, ChunkStreamState>,
    max_message_size: u32,
}

impl ChunkDecoder {
    /// Create a new decoder with default chunk size
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    /// Set the chunk size (called when receiving SetChunkSize message)
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    /// Get current chunk size
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Lower the largest message accepted before reassembly
    pub fn set_max_message_size(&mut self, max: u32) {
        self.max_message_size = max;
    }

    /// Try to decode a complete message from the buffer
    ///
    /// Consumes as many whole chunks as are buffered. Returns `Ok(Some)` when
    /// a message completes, `Ok(None)` when more data is needed.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RawMessage>> {
        loop {
            let header = match self.peek_header(buf)? {
                Some(h) => h,
                None => return Ok(None),
            };

            let chunk_size = self.chunk_size;
            let max_message_size = self.max_message_size;
            let state = self.streams.entry(header.csid).or_default();

            let starts_message = header.fmt != 3 || state.partial_message.is_empty();
            let message_length = header.message_length.unwrap_or(state.message_length);

            if starts_message && message_length > max_message_size {
                return Err(ProtocolError::MessageTooLarge {
                    size: message_length,
                    max: max_message_size,
                }
                .into());
            }

            let received = if starts_message {
                0
            } else {
                state.partial_message.len() as u32
            };
            let data_len = (message_length - received).min(chunk_size) as usize;

            if buf.len() < header.len + data_len {
                return Ok(None);
            }

            // Whole chunk is buffered: commit header state, then data
            buf.advance(header.len);

            if starts_message {
                if !state.partial_message.is_empty() {
                    tracing::debug!(csid = header.csid, "Discarding interrupted message");
                    state.partial_message.clear();
                }

                match header.fmt {
                    0 => {
                        state.timestamp = header.timestamp;
                        state.timestamp_delta = header.timestamp;
                    }
                    1 | 2 => {
                        state.timestamp_delta = header.timestamp;
                        state.timestamp = state.timestamp.wrapping_add(header.timestamp);
                    }
                    _ => {
                        state.timestamp = state.timestamp.wrapping_add(state.timestamp_delta);
                    }
                }

                state.initialized = true;
                state.message_length = message_length;
                if let Some(t) = header.message_type {
                    state.message_type = t;
                }
                if let Some(sid) = header.stream_id {
                    state.stream_id = sid;
                }
                state.partial_message.reserve(message_length as usize);
            }
            state.has_extended_timestamp = header.extended;

            state.partial_message.put_slice(&buf[..data_len]);
            buf.advance(data_len);

            if state.partial_message.len() as u32 >= state.message_length {
                return Ok(Some(RawMessage {
                    csid: header.csid,
                    timestamp: state.timestamp,
                    message_type: state.message_type,
                    stream_id: state.stream_id,
                    payload: state.partial_message.split().freeze(),
                }));
            }
        }
    }

    /// Parse the next chunk header, or `None` if it is not fully buffered
    fn peek_header(&self, buf: &[u8]) -> Result<Option<ChunkHeader>> {
        let (fmt, csid, basic_len) = match self.parse_basic_header(buf)? {
            Some(v) => v,
            None => return Ok(None),
        };

        let msg_header_len = match fmt {
            0 => 11,
            1 => 7,
            2 => 3,
            _ => 0,
        };

        if buf.len() < basic_len + msg_header_len {
            return Ok(None);
        }

        let previous = self.streams.get(&csid);
        if fmt != 0 && !previous.map(|s| s.initialized).unwrap_or(false) {
            return Err(ProtocolError::InvalidChunkHeader.into());
        }

        let mut fields = &buf[basic_len..basic_len + msg_header_len];
        let (timestamp_field, message_length, message_type, stream_id) = match fmt {
            0 => {
                let ts = fields.get_uint(3) as u32;
                let len = fields.get_uint(3) as u32;
                let typ = fields.get_u8();
                // Stream ID is the one little-endian field in RTMP
                let sid = fields.get_u32_le();
                (ts, Some(len), Some(typ), Some(sid))
            }
            1 => {
                let ts = fields.get_uint(3) as u32;
                let len = fields.get_uint(3) as u32;
                let typ = fields.get_u8();
                (ts, Some(len), Some(typ), None)
            }
            2 => (fields.get_uint(3) as u32, None, None, None),
            _ => (0, None, None, None),
        };

        let extended = if fmt == 3 {
            previous.map(|s| s.has_extended_timestamp).unwrap_or(false)
        } else {
            timestamp_field >= EXTENDED_TIMESTAMP_THRESHOLD
        };

        let mut len = basic_len + msg_header_len;
        let timestamp = if extended {
            if buf.len() < len + 4 {
                return Ok(None);
            }
            let mut ext = &buf[len..len + 4];
            len += 4;
            ext.get_u32()
        } else {
            timestamp_field
        };

        Ok(Some(ChunkHeader {
            fmt,
            csid,
            len,
            timestamp,
            message_length,
            message_type,
            stream_id,
            extended,
        }))
    }

    /// Parse basic header and return (fmt, csid, header_length)
    fn parse_basic_header(&self, buf: &[u8]) -> Result<Option<(u8, u32, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        let first = buf[0];
        let fmt = (first >> 6) & 0x03;

        match first & 0x3F {
            0 => {
                if buf.len() < 2 {
                    return Ok(None);
                }
                Ok(Some((fmt, 64 + buf[1] as u32, 2)))
            }
            1 => {
                if buf.len() < 3 {
                    return Ok(None);
                }
                let csid = 64 + buf[1] as u32 + (buf[2] as u32) * 256;
                Ok(Some((fmt, csid, 3)))
            }
            low => Ok(Some((fmt, low as u32, 1))),
        }
    }

    /// Abort a message on a chunk stream (when receiving Abort message)
    pub fn abort(&mut self, csid: u32) {
        if let Some(state) = self.streams.get_mut(&csid) {
            state.partial_message.clear();
        }
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Chunk stream encoder
///
/// Encodes messages into chunks for transmission, compressing headers
/// against the previous message on the same chunk stream.
pub struct ChunkEncoder {
    /// Outgoing chunk size
    chunk_size: u32,
    streams: HashMap<u32, ChunkStreamState>,
}

impl ChunkEncoder {
    /// Create a new encoder with default chunk size
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    /// Set the chunk size (announce it to the peer before encoding with it)
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    /// Get current chunk size
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Encode a message into chunks
    pub fn encode(&mut self, message: &RawMessage, buf: &mut BytesMut) {
        let csid = message.csid;
        let chunk_size = self.chunk_size as usize;
        let state = self.streams.entry(csid).or_default();

        let fmt = select_format(message, state);
        let timestamp_delta = message.timestamp.wrapping_sub(state.timestamp);
        let header_timestamp = if fmt == 0 {
            message.timestamp
        } else {
            timestamp_delta
        };
        let extended = header_timestamp >= EXTENDED_TIMESTAMP_THRESHOLD;
        let timestamp_field = header_timestamp.min(EXTENDED_TIMESTAMP_THRESHOLD);

        state.initialized = true;
        state.timestamp = message.timestamp;
        state.timestamp_delta = timestamp_delta;
        state.message_length = message.payload.len() as u32;
        state.message_type = message.message_type;
        state.stream_id = message.stream_id;
        state.has_extended_timestamp = extended;

        let payload = &message.payload[..];
        let mut offset = 0;
        loop {
            let first_chunk = offset == 0;
            let chunk_data_len = (payload.len() - offset).min(chunk_size);

            write_basic_header(csid, if first_chunk { fmt } else { 3 }, buf);

            if first_chunk {
                match fmt {
                    0 => {
                        write_u24(timestamp_field, buf);
                        write_u24(payload.len() as u32, buf);
                        buf.put_u8(message.message_type);
                        buf.put_u32_le(message.stream_id);
                    }
                    1 => {
                        write_u24(timestamp_field, buf);
                        write_u24(payload.len() as u32, buf);
                        buf.put_u8(message.message_type);
                    }
                    2 => write_u24(timestamp_field, buf),
                    _ => {}
                }
            }

            // Continuation chunks repeat the extended timestamp
            if extended {
                buf.put_u32(header_timestamp);
            }

            buf.put_slice(&payload[offset..offset + chunk_data_len]);
            offset += chunk_data_len;

            if offset >= payload.len() {
                break;
            }
        }
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Select the most compact header format for a message
fn select_format(message: &RawMessage, state: &ChunkStreamState) -> u8 {
    if !state.initialized || message.stream_id != state.stream_id {
        return 0;
    }

    // Timestamps never go backwards within a chunk stream
    if message.timestamp < state.timestamp {
        return 0;
    }

    if message.message_type != state.message_type
        || message.payload.len() as u32 != state.message_length
    {
        return 1;
    }

    if message.timestamp.wrapping_sub(state.timestamp) == state.timestamp_delta {
        return 3;
    }

    2
}

/// Write basic header
fn write_basic_header(csid: u32, fmt: u8, buf: &mut BytesMut) {
    if csid >= 64 + 256 {
        buf.put_u8((fmt << 6) | 1);
        let offset = csid - 64;
        buf.put_u8((offset & 0xFF) as u8);
        buf.put_u8(((offset >> 8) & 0xFF) as u8);
    } else if csid >= 64 {
        buf.put_u8(fmt << 6);
        buf.put_u8((csid - 64) as u8);
    } else {
        buf.put_u8((fmt << 6) | (csid as u8));
    }
}

/// Write 24-bit big-endian value
fn write_u24(value: u32, buf: &mut BytesMut) {
    buf.put_uint(value as u64, 3);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_header_parsing() {
        let decoder = ChunkDecoder::new();

        let result = decoder.parse_basic_header(&[0x03]).unwrap().unwrap();
        assert_eq!(result, (0, 3, 1));

        let result = decoder.parse_basic_header(&[0x00, 0x00]).unwrap().unwrap();
        assert_eq!(result, (0, 64, 2));

        let result = decoder.parse_basic_header(&[0x01, 0x00, 0x01]).unwrap().unwrap();
        assert_eq!(result, (0, 320, 3));

        assert!(decoder.parse_basic_header(&[0x01, 0x00]).unwrap().is_none());
    }

    #[test]
    fn test_message_spanning_chunks() {
        let original = RawMessage {
            csid: CSID_FIRST_MEDIA,
            timestamp: 40,
            message_type: MSG_VIDEO,
            stream_id: 1,
            payload: Bytes::from(vec![7u8; 500]),
        };

        let mut encoder = ChunkEncoder::new();
        let mut decoder = ChunkDecoder::new();

        let mut encoded = BytesMut::new();
        encoder.encode(&original, &mut encoded);
        // 500 bytes at 128 per chunk: four chunks, three type-3 headers
        assert_eq!(encoded.len(), 12 + 3 + 500);

        let decoded = decoder.decode(&mut encoded).unwrap().unwrap();
        assert_eq!(decoded, original);
        assert!(encoded.is_empty());
    }

    #[test]
    fn test_partial_chunk_is_not_consumed() {
        let message = RawMessage::new(
            CSID_COMMAND,
            MSG_COMMAND_AMF0,
            0,
            Bytes::from_static(b"payload"),
        );
        let mut encoder = ChunkEncoder::new();
        let mut full = BytesMut::new();
        encoder.encode(&message, &mut full);

        let mut decoder = ChunkDecoder::new();
        let mut partial = BytesMut::from(&full[..full.len() - 2]);
        assert!(decoder.decode(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), full.len() - 2);

        partial.extend_from_slice(&full[full.len() - 2..]);
        let decoded = decoder.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded.payload, message.payload);
    }

    #[test]
    fn test_header_compression_and_timestamps() {
        let mut encoder = ChunkEncoder::new();
        let mut decoder = ChunkDecoder::new();
        let mut wire = BytesMut::new();

        let frames = [0u32, 33, 66, 100];
        for ts in frames {
            let mut message =
                RawMessage::new(CSID_FIRST_MEDIA, MSG_AUDIO, 1, Bytes::from_static(&[0xAF, 1]));
            message.timestamp = ts;
            encoder.encode(&message, &mut wire);
        }

        for ts in frames {
            let decoded = decoder.decode(&mut wire).unwrap().unwrap();
            assert_eq!(decoded.timestamp, ts);
            assert_eq!(decoded.stream_id, 1);
            assert_eq!(decoded.message_type, MSG_AUDIO);
        }
        assert!(wire.is_empty());
    }

    #[test]
    fn test_extended_timestamp() {
        let mut message = RawMessage::new(
            CSID_FIRST_MEDIA,
            MSG_VIDEO,
            1,
            Bytes::from(vec![1u8; 300]),
        );
        message.timestamp = 0x0100_0000;

        let mut encoder = ChunkEncoder::new();
        let mut decoder = ChunkDecoder::new();
        let mut wire = BytesMut::new();
        encoder.encode(&message, &mut wire);

        let decoded = decoder.decode(&mut wire).unwrap().unwrap();
        assert_eq!(decoded.timestamp, 0x0100_0000);
        assert_eq!(decoded.payload.len(), 300);
    }

    #[test]
    fn test_empty_payload_message() {
        let message = RawMessage::new(CSID_COMMAND, MSG_COMMAND_AMF0, 0, Bytes::new());
        let mut encoder = ChunkEncoder::new();
        let mut wire = BytesMut::new();
        encoder.encode(&message, &mut wire);
        assert_eq!(wire.len(), 12);

        let mut decoder = ChunkDecoder::new();
        let decoded = decoder.decode(&mut wire).unwrap().unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_oversized_message_rejected() {
        // fmt 0 header announcing a 128 KB message
        let mut wire = BytesMut::from(
            &[0x03, 0, 0, 0, 0x02, 0x00, 0x00, MSG_VIDEO, 1, 0, 0, 0][..],
        );
        let mut decoder = ChunkDecoder::new();
        decoder.set_max_message_size(64 * 1024);
        assert!(decoder.decode(&mut wire).is_err());
    }

    #[test]
    fn test_compressed_header_without_context_is_rejected() {
        let mut wire = BytesMut::from(&[0xC3u8, 0x00][..]);
        let mut decoder = ChunkDecoder::new();
        assert!(decoder.decode(&mut wire).is_err());
    }
}
