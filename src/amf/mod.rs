//! AMF (Action Message Format) implementation
//!
//! AMF0 is the binary serialization used for RTMP command arguments. Only the
//! AMF0 subset needed by the command channel is implemented; AMF3 payloads
//! embedded via the avmplus marker decode as `Null`.

pub mod amf0;
pub mod value;

pub use amf0::{Amf0Decoder, Amf0Encoder};
pub use value::{AmfObject, AmfValue};
