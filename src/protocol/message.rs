//! RTMP message types and parsing
//!
//! The outbound client only interprets two families of messages:
//! - Protocol Control Messages (types 1-6): chunk and flow control
//! - Command Messages (types 17, 20): AMF-encoded commands
//!
//! Everything else (media, data, aggregates) is passed through untouched as
//! a [`RawMessage`].
//!
//! Reference: RTMP Specification Section 5.4

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::amf::{Amf0Decoder, Amf0Encoder, AmfValue};
use crate::error::{AmfError, ProtocolError, Result};
use crate::protocol::chunk::RawMessage;
use crate::protocol::constants::*;

/// Parsed RTMP message
#[derive(Debug, Clone)]
pub enum RtmpMessage {
    /// Set Chunk Size (type 1)
    SetChunkSize(u32),

    /// Abort Message (type 2)
    Abort { csid: u32 },

    /// Acknowledgement (type 3)
    Acknowledgement { sequence: u32 },

    /// User Control Message (type 4)
    UserControl(UserControlEvent),

    /// Window Acknowledgement Size (type 5)
    WindowAckSize(u32),

    /// Set Peer Bandwidth (type 6)
    SetPeerBandwidth { size: u32, limit_type: u8 },

    /// AMF0 or AMF3 command (types 20, 17)
    Command(Command),

    /// Any other message, left as received
    Other(RawMessage),
}

/// User Control Event
#[derive(Debug, Clone, PartialEq)]
pub enum UserControlEvent {
    StreamBegin(u32),
    StreamEof(u32),
    StreamDry(u32),
    SetBufferLength { stream_id: u32, buffer_ms: u32 },
    StreamIsRecorded(u32),
    PingRequest(u32),
    PingResponse(u32),
    Unknown { event_type: u16, data: Bytes },
}

/// RTMP command (connect, createStream, _result, ...)
///
/// `arguments[0]` is the command object (usually `Null` outside of
/// `connect`); responses carry their payload in `arguments[1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Command name
    pub name: String,
    /// Transaction ID (0 when no response is expected)
    pub transaction_id: u32,
    /// Command object followed by any additional arguments
    pub arguments: Vec<AmfValue>,
    /// Message stream ID (from chunk)
    pub stream_id: u32,
    /// Received as an AMF3 command message (type 17)
    pub amf3: bool,
}

impl Command {
    /// Create a connection-level AMF0 command
    pub fn new(name: impl Into<String>, transaction_id: u32, arguments: Vec<AmfValue>) -> Self {
        Self {
            name: name.into(),
            transaction_id,
            arguments,
            stream_id: 0,
            amf3: false,
        }
    }

    /// `createStream` request
    pub fn create_stream(transaction_id: u32) -> Self {
        Self::new(CMD_CREATE_STREAM, transaction_id, vec![AmfValue::Null])
    }

    /// `deleteStream` request for a message stream
    pub fn delete_stream(transaction_id: u32, stream_id: u32) -> Self {
        Self::new(
            CMD_DELETE_STREAM,
            transaction_id,
            vec![AmfValue::Null, AmfValue::from(stream_id)],
        )
    }

    /// `closeStream`, sent on the stream being closed
    pub fn close_stream(stream_id: u32) -> Self {
        let mut cmd = Self::new(CMD_CLOSE_STREAM, 0, vec![AmfValue::Null]);
        cmd.stream_id = stream_id;
        cmd
    }

    /// Command object (first argument)
    pub fn command_object(&self) -> Option<&AmfValue> {
        self.arguments.first()
    }

    /// Response payload: the info object or created stream id
    pub fn info(&self) -> Option<&AmfValue> {
        self.arguments.get(1)
    }

    /// Encode the command body as AMF0
    pub fn encode_payload(&self) -> std::result::Result<Bytes, AmfError> {
        let mut encoder = Amf0Encoder::new();
        encoder.encode(&AmfValue::String(self.name.clone()))?;
        encoder.encode(&AmfValue::Number(self.transaction_id as f64))?;
        encoder.encode_all(&self.arguments)?;
        Ok(encoder.finish())
    }

    /// Encode into a message on the given chunk stream
    pub fn to_raw(&self, csid: u32) -> std::result::Result<RawMessage, AmfError> {
        let body = self.encode_payload()?;
        let (message_type, payload) = if self.amf3 {
            let mut buf = BytesMut::with_capacity(body.len() + 1);
            buf.put_u8(0x00);
            buf.put_slice(&body);
            (MSG_COMMAND_AMF3, buf.freeze())
        } else {
            (MSG_COMMAND_AMF0, body)
        };
        Ok(RawMessage::new(csid, message_type, self.stream_id, payload))
    }
}

impl RtmpMessage {
    /// Parse a reassembled message
    pub fn from_raw(raw: &RawMessage) -> Result<Self> {
        let mut payload = raw.payload.clone();

        match raw.message_type {
            MSG_SET_CHUNK_SIZE => {
                let size = read_u32(&mut payload)? & 0x7FFF_FFFF; // Ignore MSB
                Ok(RtmpMessage::SetChunkSize(size))
            }

            MSG_ABORT => Ok(RtmpMessage::Abort {
                csid: read_u32(&mut payload)?,
            }),

            MSG_ACKNOWLEDGEMENT => Ok(RtmpMessage::Acknowledgement {
                sequence: read_u32(&mut payload)?,
            }),

            MSG_USER_CONTROL => Self::parse_user_control(&mut payload),

            MSG_WINDOW_ACK_SIZE => Ok(RtmpMessage::WindowAckSize(read_u32(&mut payload)?)),

            MSG_SET_PEER_BANDWIDTH => {
                if payload.len() < 5 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                let size = payload.get_u32();
                let limit_type = payload.get_u8();
                Ok(RtmpMessage::SetPeerBandwidth { size, limit_type })
            }

            MSG_COMMAND_AMF0 => {
                let cmd = Self::parse_command(&mut payload, raw.stream_id, false)?;
                Ok(RtmpMessage::Command(cmd))
            }

            MSG_COMMAND_AMF3 => {
                // Skip AMF3 marker byte if present
                if !payload.is_empty() && payload[0] == 0x00 {
                    payload.advance(1);
                }
                let cmd = Self::parse_command(&mut payload, raw.stream_id, true)?;
                Ok(RtmpMessage::Command(cmd))
            }

            _ => Ok(RtmpMessage::Other(raw.clone())),
        }
    }

    /// Parse User Control message
    fn parse_user_control(payload: &mut Bytes) -> Result<Self> {
        if payload.len() < 6 {
            return Err(ProtocolError::InvalidChunkHeader.into());
        }

        let event_type = payload.get_u16();
        let event = match event_type {
            UC_STREAM_BEGIN => UserControlEvent::StreamBegin(payload.get_u32()),
            UC_STREAM_EOF => UserControlEvent::StreamEof(payload.get_u32()),
            UC_STREAM_DRY => UserControlEvent::StreamDry(payload.get_u32()),
            UC_SET_BUFFER_LENGTH => {
                if payload.len() < 8 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                let stream_id = payload.get_u32();
                let buffer_ms = payload.get_u32();
                UserControlEvent::SetBufferLength { stream_id, buffer_ms }
            }
            UC_STREAM_IS_RECORDED => UserControlEvent::StreamIsRecorded(payload.get_u32()),
            UC_PING_REQUEST => UserControlEvent::PingRequest(payload.get_u32()),
            UC_PING_RESPONSE => UserControlEvent::PingResponse(payload.get_u32()),
            _ => UserControlEvent::Unknown {
                event_type,
                data: payload.clone(),
            },
        };

        Ok(RtmpMessage::UserControl(event))
    }

    /// Parse command name, transaction id and arguments
    fn parse_command(payload: &mut Bytes, stream_id: u32, amf3: bool) -> Result<Command> {
        let mut decoder = Amf0Decoder::new();

        let name = match decoder.decode(payload)? {
            AmfValue::String(s) => s,
            _ => return Err(ProtocolError::InvalidCommand("Expected command name".into()).into()),
        };

        // Lenient: anything but a non-negative number counts as 0
        let transaction_id = match decoder.decode(payload) {
            Ok(AmfValue::Number(n)) if n >= 0.0 && n <= u32::MAX as f64 => n as u32,
            Ok(_) | Err(AmfError::UnexpectedEof) => 0,
            Err(e) => return Err(e.into()),
        };

        let mut arguments = Vec::new();
        while payload.has_remaining() {
            match decoder.decode(payload) {
                Ok(v) => arguments.push(v),
                Err(AmfError::UnexpectedEof) => break,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Command {
            name,
            transaction_id,
            arguments,
            stream_id,
            amf3,
        })
    }

    /// Encode message to (type id, payload)
    pub fn encode(&self) -> std::result::Result<(u8, Bytes), AmfError> {
        let encoded = match self {
            RtmpMessage::SetChunkSize(size) => (MSG_SET_CHUNK_SIZE, u32_payload(*size)),

            RtmpMessage::Abort { csid } => (MSG_ABORT, u32_payload(*csid)),

            RtmpMessage::Acknowledgement { sequence } => {
                (MSG_ACKNOWLEDGEMENT, u32_payload(*sequence))
            }

            RtmpMessage::WindowAckSize(size) => (MSG_WINDOW_ACK_SIZE, u32_payload(*size)),

            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                let mut buf = BytesMut::with_capacity(5);
                buf.put_u32(*size);
                buf.put_u8(*limit_type);
                (MSG_SET_PEER_BANDWIDTH, buf.freeze())
            }

            RtmpMessage::UserControl(event) => (MSG_USER_CONTROL, encode_user_control(event)),

            RtmpMessage::Command(cmd) => {
                let raw = cmd.to_raw(CSID_COMMAND)?;
                (raw.message_type, raw.payload)
            }

            RtmpMessage::Other(raw) => (raw.message_type, raw.payload.clone()),
        };
        Ok(encoded)
    }

    /// Encode as a protocol control message (chunk stream 2, message stream 0)
    pub fn to_control_raw(&self) -> std::result::Result<RawMessage, AmfError> {
        let (message_type, payload) = self.encode()?;
        Ok(RawMessage::new(CSID_PROTOCOL_CONTROL, message_type, 0, payload))
    }
}

fn read_u32(payload: &mut Bytes) -> Result<u32> {
    if payload.len() < 4 {
        return Err(ProtocolError::InvalidChunkHeader.into());
    }
    Ok(payload.get_u32())
}

fn u32_payload(value: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32(value);
    buf.freeze()
}

fn encode_user_control(event: &UserControlEvent) -> Bytes {
    let mut buf = BytesMut::with_capacity(10);
    let (event_type, value) = match event {
        UserControlEvent::StreamBegin(id) => (UC_STREAM_BEGIN, *id),
        UserControlEvent::StreamEof(id) => (UC_STREAM_EOF, *id),
        UserControlEvent::StreamDry(id) => (UC_STREAM_DRY, *id),
        UserControlEvent::SetBufferLength { stream_id, buffer_ms } => {
            buf.put_u16(UC_SET_BUFFER_LENGTH);
            buf.put_u32(*stream_id);
            buf.put_u32(*buffer_ms);
            return buf.freeze();
        }
        UserControlEvent::StreamIsRecorded(id) => (UC_STREAM_IS_RECORDED, *id),
        UserControlEvent::PingRequest(ts) => (UC_PING_REQUEST, *ts),
        UserControlEvent::PingResponse(ts) => (UC_PING_RESPONSE, *ts),
        UserControlEvent::Unknown { event_type, data } => {
            buf.put_u16(*event_type);
            buf.put_slice(data);
            return buf.freeze();
        }
    };
    buf.put_u16(event_type);
    buf.put_u32(value);
    buf.freeze()
}
