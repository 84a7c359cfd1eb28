//! RTMP protocol constants
//!
//! Reference: Adobe RTMP Specification (December 2012)
//! Reference: RFC 7425 - Adobe's RTMP (Informational)

/// RTMP version number (always 3 for standard RTMP)
pub const RTMP_VERSION: u8 = 3;

/// URL scheme accepted by the client
pub const RTMP_SCHEME: &str = "rtmp";

/// Default RTMP port
pub const RTMP_PORT: u16 = 1935;

/// Handshake packet sizes
pub const HANDSHAKE_SIZE: usize = 1536;

/// Default chunk size (per RTMP spec)
pub const DEFAULT_CHUNK_SIZE: u32 = 128;

/// Maximum chunk size allowed
pub const MAX_CHUNK_SIZE: u32 = 0xFFFFFF;

/// Maximum message size (sanity limit)
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Timestamps >= this value require the extended timestamp field
pub const EXTENDED_TIMESTAMP_THRESHOLD: u32 = 0xFFFFFF;

// ============================================================================
// Chunk Stream IDs (CSID)
// RTMP spec section 5.3.1.1
// ============================================================================

/// Protocol control messages (Set Chunk Size, Window Ack Size, ...)
pub const CSID_PROTOCOL_CONTROL: u32 = 2;

/// Command messages (connect, createStream, etc.)
pub const CSID_COMMAND: u32 = 3;

/// First chunk stream handed out for media streams
pub const CSID_FIRST_MEDIA: u32 = 8;

/// Largest chunk stream id expressible in a 3-byte basic header
pub const CSID_MAX: u32 = 65599;

// ============================================================================
// Message Type IDs
// RTMP spec section 5.4
// ============================================================================

/// Set Chunk Size (1) - protocol control
pub const MSG_SET_CHUNK_SIZE: u8 = 1;

/// Abort Message (2) - protocol control
pub const MSG_ABORT: u8 = 2;

/// Acknowledgement (3) - protocol control
pub const MSG_ACKNOWLEDGEMENT: u8 = 3;

/// User Control Message (4) - protocol control
pub const MSG_USER_CONTROL: u8 = 4;

/// Window Acknowledgement Size (5) - protocol control
pub const MSG_WINDOW_ACK_SIZE: u8 = 5;

/// Set Peer Bandwidth (6) - protocol control
pub const MSG_SET_PEER_BANDWIDTH: u8 = 6;

/// Audio Message (8)
pub const MSG_AUDIO: u8 = 8;

/// Video Message (9)
pub const MSG_VIDEO: u8 = 9;

/// AMF3 Command Message (17)
pub const MSG_COMMAND_AMF3: u8 = 17;

/// AMF0 Data Message (18) - onMetaData etc.
pub const MSG_DATA_AMF0: u8 = 18;

/// AMF0 Command Message (20)
pub const MSG_COMMAND_AMF0: u8 = 20;

// ============================================================================
// User Control Event Types
// RTMP spec section 5.4.1
// ============================================================================

pub const UC_STREAM_BEGIN: u16 = 0;
pub const UC_STREAM_EOF: u16 = 1;
pub const UC_STREAM_DRY: u16 = 2;
pub const UC_SET_BUFFER_LENGTH: u16 = 3;
pub const UC_STREAM_IS_RECORDED: u16 = 4;
pub const UC_PING_REQUEST: u16 = 6;
pub const UC_PING_RESPONSE: u16 = 7;

// ============================================================================
// Command Names
// ============================================================================

pub const CMD_CONNECT: &str = "connect";
pub const CMD_CREATE_STREAM: &str = "createStream";
pub const CMD_DELETE_STREAM: &str = "deleteStream";
pub const CMD_CLOSE_STREAM: &str = "closeStream";

/// Response commands
pub const CMD_RESULT: &str = "_result";
pub const CMD_ERROR: &str = "_error";

/// Bandwidth probe sent by some servers after connect; no reply is expected
pub const CMD_ON_BW_CHECK: &str = "onBWCheck";

/// Status notification
pub const CMD_ON_STATUS: &str = "onStatus";

// ============================================================================
// NetConnection Status Codes
// ============================================================================

pub const NC_CONNECT_SUCCESS: &str = "NetConnection.Connect.Success";
pub const NC_CONNECT_REJECTED: &str = "NetConnection.Connect.Rejected";

// ============================================================================
// connect command object defaults
// ============================================================================

/// Flash version string sent as `flashVer`
pub const DEFAULT_FLASH_VER: &str = "LNX 9,0,124,2";

/// `capabilities` bitmask
pub const DEFAULT_CAPABILITIES: f64 = 15.0;

/// `audioCodecs` bitmask (all classic Flash audio codecs)
pub const DEFAULT_AUDIO_CODECS: f64 = 3191.0;

/// `videoCodecs` bitmask (all classic Flash video codecs)
pub const DEFAULT_VIDEO_CODECS: f64 = 252.0;

/// `videoFunction` flag (seek to frame supported)
pub const DEFAULT_VIDEO_FUNCTION: f64 = 1.0;

// ============================================================================
// Flow control defaults
// ============================================================================

/// Default window acknowledgement size (2.5 MB)
pub const DEFAULT_WINDOW_ACK_SIZE: u32 = 2_500_000;

/// Default number of chunk streams a client may open
pub const DEFAULT_MAX_CHANNELS: usize = 64;
