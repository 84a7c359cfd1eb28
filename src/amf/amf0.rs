//! AMF0 encoder and decoder
//!
//! Reference: AMF0 File Format Specification (amf0-file-format-specification.pdf)
//!
//! Type Markers:
//! ```text
//! 0x00 - Number (IEEE 754 double)
//! 0x01 - Boolean
//! 0x02 - String (UTF-8, 16-bit length prefix)
//! 0x03 - Object (key-value pairs until 0x000009)
//! 0x05 - Null
//! 0x06 - Undefined
//! 0x07 - Reference (16-bit index)
//! 0x08 - ECMA Array (associative array)
//! 0x09 - Object End (0x000009 sequence)
//! 0x0A - Strict Array (dense array)
//! 0x0B - Date (double + timezone)
//! 0x0C - Long String (UTF-8, 32-bit length prefix)
//! 0x0D - Unsupported
//! 0x0F - XML Document
//! 0x10 - Typed Object (class name + properties)
//! 0x11 - AVM+ (switch to AMF3)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::value::{AmfObject, AmfValue};
use crate::error::AmfError;

// AMF0 type markers
const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_REFERENCE: u8 = 0x07;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_STRICT_ARRAY: u8 = 0x0A;
const MARKER_DATE: u8 = 0x0B;
const MARKER_LONG_STRING: u8 = 0x0C;
const MARKER_UNSUPPORTED: u8 = 0x0D;
const MARKER_XML_DOCUMENT: u8 = 0x0F;
const MARKER_TYPED_OBJECT: u8 = 0x10;
const MARKER_AVMPLUS: u8 = 0x11;

/// Maximum nesting depth for objects/arrays (prevent stack overflow)
const MAX_NESTING_DEPTH: usize = 64;

/// AMF0 decoder with lenient parsing mode
pub struct Amf0Decoder {
    /// Reference table for object references
    references: Vec<AmfValue>,
    /// Tolerate unknown markers and missing object terminators
    lenient: bool,
    /// Current nesting depth
    depth: usize,
}

impl Amf0Decoder {
    /// Create a new decoder with default settings
    pub fn new() -> Self {
        Self {
            references: Vec::new(),
            lenient: true,
            depth: 0,
        }
    }

    /// Create decoder with explicit lenient mode setting
    pub fn with_lenient(lenient: bool) -> Self {
        Self {
            references: Vec::new(),
            lenient,
            depth: 0,
        }
    }

    /// Reset decoder state (call between messages)
    pub fn reset(&mut self) {
        self.references.clear();
        self.depth = 0;
    }

    /// Decode a single AMF0 value from the buffer
    pub fn decode(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if buf.is_empty() {
            return Err(AmfError::UnexpectedEof);
        }

        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.depth -= 1;
            return Err(AmfError::NestingTooDeep);
        }

        let marker = buf.get_u8();
        let result = self.decode_value(marker, buf);
        self.depth -= 1;
        result
    }

    /// Decode all values from buffer until exhausted
    pub fn decode_all(&mut self, buf: &mut Bytes) -> Result<Vec<AmfValue>, AmfError> {
        let mut values = Vec::new();
        while buf.has_remaining() {
            values.push(self.decode(buf)?);
        }
        Ok(values)
    }

    fn decode_value(&mut self, marker: u8, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        match marker {
            MARKER_NUMBER => self.decode_number(buf),
            MARKER_BOOLEAN => self.decode_boolean(buf),
            MARKER_STRING => Ok(AmfValue::String(self.read_utf8(buf)?)),
            MARKER_OBJECT => self.decode_object(buf),
            MARKER_NULL => Ok(AmfValue::Null),
            MARKER_UNDEFINED | MARKER_UNSUPPORTED => Ok(AmfValue::Undefined),
            MARKER_REFERENCE => self.decode_reference(buf),
            MARKER_ECMA_ARRAY => self.decode_ecma_array(buf),
            MARKER_STRICT_ARRAY => self.decode_strict_array(buf),
            MARKER_DATE => self.decode_date(buf),
            MARKER_LONG_STRING => Ok(AmfValue::String(self.read_utf8_long(buf)?)),
            MARKER_XML_DOCUMENT => Ok(AmfValue::Xml(self.read_utf8_long(buf)?)),
            MARKER_TYPED_OBJECT => self.decode_typed_object(buf),
            // AMF3 payloads are not interpreted by the command channel
            MARKER_AVMPLUS => Ok(AmfValue::Null),
            _ if self.lenient => Ok(AmfValue::Undefined),
            _ => Err(AmfError::UnknownMarker(marker)),
        }
    }

    fn decode_number(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if buf.remaining() < 8 {
            return Err(AmfError::UnexpectedEof);
        }
        Ok(AmfValue::Number(buf.get_f64()))
    }

    fn decode_boolean(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if buf.is_empty() {
            return Err(AmfError::UnexpectedEof);
        }
        Ok(AmfValue::Boolean(buf.get_u8() != 0))
    }

    fn decode_object(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        let index = self.reserve_reference();
        let obj = AmfValue::Object(self.read_properties(buf)?);
        self.references[index] = obj.clone();
        Ok(obj)
    }

    fn decode_ecma_array(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if buf.remaining() < 4 {
            return Err(AmfError::UnexpectedEof);
        }
        // Count hint, not reliable across encoders
        let _count = buf.get_u32();

        let index = self.reserve_reference();
        let arr = AmfValue::EcmaArray(self.read_properties(buf)?);
        self.references[index] = arr.clone();
        Ok(arr)
    }

    fn decode_typed_object(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        let class_name = self.read_utf8(buf)?;

        let index = self.reserve_reference();
        let properties = self.read_properties(buf)?;
        let obj = AmfValue::TypedObject {
            class_name,
            properties,
        };
        self.references[index] = obj.clone();
        Ok(obj)
    }

    fn decode_strict_array(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if buf.remaining() < 4 {
            return Err(AmfError::UnexpectedEof);
        }

        let count = buf.get_u32() as usize;
        let index = self.reserve_reference();

        let mut elements = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            elements.push(self.decode(buf)?);
        }

        let arr = AmfValue::Array(elements);
        self.references[index] = arr.clone();
        Ok(arr)
    }

    fn decode_date(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if buf.remaining() < 10 {
            return Err(AmfError::UnexpectedEof);
        }

        let timestamp = buf.get_f64();
        let _timezone = buf.get_i16();

        Ok(AmfValue::Date(timestamp))
    }

    fn decode_reference(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if buf.remaining() < 2 {
            return Err(AmfError::UnexpectedEof);
        }

        let index = buf.get_u16();
        self.references
            .get(index as usize)
            .cloned()
            .ok_or(AmfError::InvalidReference(index))
    }

    fn reserve_reference(&mut self) -> usize {
        self.references.push(AmfValue::Null);
        self.references.len() - 1
    }

    /// Read `key, value` pairs up to the empty-key end marker
    fn read_properties(&mut self, buf: &mut Bytes) -> Result<AmfObject, AmfError> {
        let mut properties = AmfObject::new();

        loop {
            let key = self.read_utf8(buf)?;

            if key.is_empty() {
                if buf.is_empty() {
                    // Some encoders omit the trailing end marker
                    if self.lenient {
                        break;
                    }
                    return Err(AmfError::UnexpectedEof);
                }
                let end_marker = buf.get_u8();
                if end_marker == MARKER_OBJECT_END || self.lenient {
                    break;
                }
                return Err(AmfError::InvalidObjectEnd);
            }

            let value = self.decode(buf)?;
            properties.insert(key, value);
        }

        Ok(properties)
    }

    /// Read UTF-8 string with 16-bit length prefix
    fn read_utf8(&mut self, buf: &mut Bytes) -> Result<String, AmfError> {
        if buf.remaining() < 2 {
            return Err(AmfError::UnexpectedEof);
        }

        let len = buf.get_u16() as usize;
        if buf.remaining() < len {
            return Err(AmfError::UnexpectedEof);
        }

        let bytes = buf.copy_to_bytes(len);
        String::from_utf8(bytes.to_vec()).map_err(|_| AmfError::InvalidUtf8)
    }

    /// Read UTF-8 string with 32-bit length prefix
    fn read_utf8_long(&mut self, buf: &mut Bytes) -> Result<String, AmfError> {
        if buf.remaining() < 4 {
            return Err(AmfError::UnexpectedEof);
        }

        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Err(AmfError::UnexpectedEof);
        }

        let bytes = buf.copy_to_bytes(len);
        String::from_utf8(bytes.to_vec()).map_err(|_| AmfError::InvalidUtf8)
    }
}

impl Default for Amf0Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// AMF0 encoder
///
/// Every write is fallible; callers building a command field by field stop
/// at the first error and discard the partial buffer.
pub struct Amf0Encoder {
    buf: BytesMut,
    depth: usize,
}

impl Amf0Encoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create encoder with specific capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            depth: 0,
        }
    }

    /// Get the encoded bytes and reset encoder
    pub fn finish(&mut self) -> Bytes {
        self.depth = 0;
        self.buf.split().freeze()
    }

    /// Get current encoded length
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if encoder is empty
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Encode a single AMF0 value
    pub fn encode(&mut self, value: &AmfValue) -> Result<(), AmfError> {
        self.depth += 1;
        let result = if self.depth > MAX_NESTING_DEPTH {
            Err(AmfError::NestingTooDeep)
        } else {
            self.encode_value(value)
        };
        self.depth -= 1;
        result
    }

    /// Encode multiple values
    pub fn encode_all(&mut self, values: &[AmfValue]) -> Result<(), AmfError> {
        for value in values {
            self.encode(value)?;
        }
        Ok(())
    }

    /// Open an anonymous object; follow with properties and `write_object_end`
    pub fn write_object_start(&mut self) -> Result<(), AmfError> {
        self.buf.put_u8(MARKER_OBJECT);
        Ok(())
    }

    /// Write one `key, value` pair inside an open object
    pub fn write_property(&mut self, key: &str, value: &AmfValue) -> Result<(), AmfError> {
        self.write_utf8(key)?;
        self.encode(value)
    }

    /// Close an object opened with `write_object_start`
    pub fn write_object_end(&mut self) -> Result<(), AmfError> {
        self.buf.put_u16(0);
        self.buf.put_u8(MARKER_OBJECT_END);
        Ok(())
    }

    fn encode_value(&mut self, value: &AmfValue) -> Result<(), AmfError> {
        match value {
            AmfValue::Null => self.buf.put_u8(MARKER_NULL),
            AmfValue::Undefined => self.buf.put_u8(MARKER_UNDEFINED),
            AmfValue::Boolean(b) => {
                self.buf.put_u8(MARKER_BOOLEAN);
                self.buf.put_u8(u8::from(*b));
            }
            AmfValue::Number(n) => {
                self.buf.put_u8(MARKER_NUMBER);
                self.buf.put_f64(*n);
            }
            AmfValue::String(s) => {
                if s.len() > 0xFFFF {
                    self.buf.put_u8(MARKER_LONG_STRING);
                    self.buf.put_u32(s.len() as u32);
                } else {
                    self.buf.put_u8(MARKER_STRING);
                    self.buf.put_u16(s.len() as u16);
                }
                self.buf.put_slice(s.as_bytes());
            }
            AmfValue::Object(props) => {
                self.write_object_start()?;
                self.write_properties(props)?;
                self.write_object_end()?;
            }
            AmfValue::EcmaArray(props) => {
                self.buf.put_u8(MARKER_ECMA_ARRAY);
                self.buf.put_u32(props.len() as u32);
                self.write_properties(props)?;
                self.write_object_end()?;
            }
            AmfValue::TypedObject {
                class_name,
                properties,
            } => {
                self.buf.put_u8(MARKER_TYPED_OBJECT);
                self.write_utf8(class_name)?;
                self.write_properties(properties)?;
                self.write_object_end()?;
            }
            AmfValue::Array(elements) => {
                self.buf.put_u8(MARKER_STRICT_ARRAY);
                self.buf.put_u32(elements.len() as u32);
                for elem in elements {
                    self.encode(elem)?;
                }
            }
            AmfValue::Date(timestamp) => {
                self.buf.put_u8(MARKER_DATE);
                self.buf.put_f64(*timestamp);
                self.buf.put_i16(0);
            }
            AmfValue::Xml(s) => {
                self.buf.put_u8(MARKER_XML_DOCUMENT);
                self.buf.put_u32(s.len() as u32);
                self.buf.put_slice(s.as_bytes());
            }
        }
        Ok(())
    }

    fn write_properties(&mut self, props: &AmfObject) -> Result<(), AmfError> {
        for (key, val) in props {
            self.write_property(key, val)?;
        }
        Ok(())
    }

    /// Write UTF-8 string with 16-bit length prefix (no type marker)
    fn write_utf8(&mut self, s: &str) -> Result<(), AmfError> {
        if s.len() > 0xFFFF {
            return Err(AmfError::KeyTooLong(s.len()));
        }
        self.buf.put_u16(s.len() as u16);
        self.buf.put_slice(s.as_bytes());
        Ok(())
    }
}

impl Default for Amf0Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience function to encode a single value
pub fn encode(value: &AmfValue) -> Result<Bytes, AmfError> {
    let mut encoder = Amf0Encoder::new();
    encoder.encode(value)?;
    Ok(encoder.finish())
}

/// Convenience function to encode multiple values
pub fn encode_all(values: &[AmfValue]) -> Result<Bytes, AmfError> {
    let mut encoder = Amf0Encoder::new();
    encoder.encode_all(values)?;
    Ok(encoder.finish())
}

/// Convenience function to decode a single value
pub fn decode(data: &[u8]) -> Result<AmfValue, AmfError> {
    let mut decoder = Amf0Decoder::new();
    let mut buf = Bytes::copy_from_slice(data);
    decoder.decode(&mut buf)
}

/// Convenience function to decode all values
pub fn decode_all(data: &[u8]) -> Result<Vec<AmfValue>, AmfError> {
    let mut decoder = Amf0Decoder::new();
    let mut buf = Bytes::copy_from_slice(data);
    decoder.decode_all(&mut buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_roundtrip_preserves_order() {
        let value = AmfValue::object([
            ("app", AmfValue::String("live".into())),
            ("fpad", AmfValue::Boolean(false)),
            ("capabilities", AmfValue::Number(15.0)),
        ]);

        let encoded = encode(&value).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, value);

        let keys: Vec<&String> = decoded.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["app", "fpad", "capabilities"]);
    }

    #[test]
    fn test_command_sequence() {
        let values = vec![
            AmfValue::String("createStream".into()),
            AmfValue::Number(2.0),
            AmfValue::Null,
        ];

        let encoded = encode_all(&values).unwrap();
        assert_eq!(
            &encoded[..],
            &[
                0x02, 0x00, 0x0C, b'c', b'r', b'e', b'a', b't', b'e', b'S', b't', b'r', b'e',
                b'a', b'm', 0x00, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05,
            ]
        );
        assert_eq!(decode_all(&encoded).unwrap(), values);
    }

    #[test]
    fn test_incremental_object_matches_value_encoding() {
        let mut encoder = Amf0Encoder::new();
        encoder.write_object_start().unwrap();
        encoder
            .write_property("code", &AmfValue::String("ok".into()))
            .unwrap();
        encoder.write_object_end().unwrap();
        let incremental = encoder.finish();

        let whole = encode(&AmfValue::object([("code", "ok")])).unwrap();
        assert_eq!(incremental, whole);
    }

    #[test]
    fn test_oversized_key_is_rejected() {
        let key = "k".repeat(0x1_0000);
        let value = AmfValue::object([(key, AmfValue::Null)]);
        assert_eq!(encode(&value), Err(AmfError::KeyTooLong(0x1_0000)));
    }

    #[test]
    fn test_nesting_limit_on_encode() {
        let mut value = AmfValue::Null;
        for _ in 0..(MAX_NESTING_DEPTH + 1) {
            value = AmfValue::Array(vec![value]);
        }
        assert_eq!(encode(&value), Err(AmfError::NestingTooDeep));
    }

    #[test]
    fn test_long_string() {
        let long_str = "x".repeat(70000);
        let value = AmfValue::String(long_str.clone());
        let encoded = encode(&value).unwrap();
        assert_eq!(encoded[0], MARKER_LONG_STRING);
        assert_eq!(decode(&encoded).unwrap(), AmfValue::String(long_str));
    }

    #[test]
    fn test_strict_decoder_rejects_unknown_marker() {
        let mut decoder = Amf0Decoder::with_lenient(false);
        let mut buf = Bytes::from_static(&[0x42]);
        assert_eq!(decoder.decode(&mut buf), Err(AmfError::UnknownMarker(0x42)));

        let mut lenient = Amf0Decoder::new();
        let mut buf = Bytes::from_static(&[0x42]);
        assert_eq!(lenient.decode(&mut buf), Ok(AmfValue::Undefined));
    }

    #[test]
    fn test_lenient_object_without_end_marker() {
        // {"a": null} followed by an empty key and no 0x09
        let data = [0x03, 0x00, 0x01, b'a', 0x05, 0x00, 0x00];
        let decoded = decode(&data).unwrap();
        assert_eq!(decoded, AmfValue::object([("a", AmfValue::Null)]));
    }

    #[test]
    fn test_reference_resolves_earlier_object() {
        // [ {"a": true}, ref(1) ] : array occupies slot 0, object slot 1
        let data = [
            0x0A, 0x00, 0x00, 0x00, 0x02, 0x03, 0x00, 0x01, b'a', 0x01, 0x01, 0x00, 0x00, 0x09,
            0x07, 0x00, 0x01,
        ];
        let decoded = decode(&data).unwrap();
        let items = decoded.as_array().unwrap();
        assert_eq!(items[0], items[1]);
    }
}
