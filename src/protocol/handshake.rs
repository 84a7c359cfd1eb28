//! RTMP handshake implementation
//!
//! ```text
//! Client                                   Server
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes: time+random) ->|
//!   |<------ S0 (1 byte: version) ----------|
//!   |<------ S1 (1536 bytes: time+random) --|
//!   |<------ S2 (1536 bytes: echo C1) ------|
//!   |------- C2 (1536 bytes: echo S1) ----->|
//! ```
//!
//! Only the "simple" handshake is implemented. Echo packets are not
//! verified, since a number of servers do not echo faithfully.
//!
//! Reference: RTMP Specification Section 5.2

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{HandshakeError, Result};
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// C0C1 not sent yet
    Start,
    /// Waiting for S0S1S2
    AwaitServer,
    Done,
}

/// Client side of the handshake
///
/// Feed received bytes to [`Handshake::process`]; any returned bytes must be
/// written to the server. Input is only consumed once S0S1S2 is complete.
#[derive(Debug)]
pub struct Handshake {
    phase: Phase,
    peer_version: Option<u8>,
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            phase: Phase::Start,
            peer_version: None,
        }
    }

    /// Check if handshake is complete
    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Version byte announced by the server, once received
    pub fn peer_version(&self) -> Option<u8> {
        self.peer_version
    }

    /// Bytes the next call to `process` needs before it can make progress
    pub fn bytes_needed(&self) -> usize {
        match self.phase {
            Phase::AwaitServer => 1 + HANDSHAKE_SIZE * 2,
            _ => 0,
        }
    }

    /// Start the handshake and get C0C1 to send
    ///
    /// Returns `None` once started.
    pub fn generate_initial(&mut self) -> Option<Bytes> {
        if self.phase != Phase::Start {
            return None;
        }
        self.phase = Phase::AwaitServer;

        let mut buf = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
        buf.put_u8(RTMP_VERSION);
        buf.put_slice(&generate_packet());
        Some(buf.freeze())
    }

    /// Process S0S1S2 and return C2
    ///
    /// Returns `None` while S0S1S2 is incomplete and after completion.
    pub fn process(&mut self, data: &mut Bytes) -> Result<Option<Bytes>> {
        match self.phase {
            Phase::Start => Err(HandshakeError::InvalidState.into()),
            Phase::Done => Ok(None),
            Phase::AwaitServer if data.remaining() < self.bytes_needed() => Ok(None),
            Phase::AwaitServer => {
                self.read_version(data)?;
                let s1 = take_packet(data);
                // S2 is an echo of C1 and is not checked
                data.advance(HANDSHAKE_SIZE);

                self.phase = Phase::Done;
                Ok(Some(Bytes::copy_from_slice(&generate_echo(&s1))))
            }
        }
    }

    fn read_version(&mut self, data: &mut Bytes) -> Result<()> {
        let version = data.get_u8();
        // Versions above 3 are seen in the wild and tolerated
        if version < RTMP_VERSION {
            return Err(HandshakeError::InvalidVersion(version).into());
        }
        self.peer_version = Some(version);
        Ok(())
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

fn take_packet(data: &mut Bytes) -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];
    data.copy_to_slice(&mut packet);
    packet
}

fn now_millis() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0)
}

/// Generate a C1/S1 packet
///
/// time(4) + zero(4) + 1528 pseudo-random bytes
fn generate_packet() -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];
    let timestamp = now_millis();
    packet[0..4].copy_from_slice(&timestamp.to_be_bytes());

    // Filler does not need to be cryptographically random
    let mut seed = (timestamp as u64) | 1;
    for chunk in packet[8..].chunks_mut(8) {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        let bytes = seed.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }

    packet
}

/// Generate a C2/S2 packet: the peer's packet with our time in bytes 4-7
fn generate_echo(peer_packet: &[u8; HANDSHAKE_SIZE]) -> [u8; HANDSHAKE_SIZE] {
    let mut echo = *peer_packet;
    echo[4..8].copy_from_slice(&now_millis().to_be_bytes());
    echo
}

#[cfg(test)]
mod tests {
    use super::*;

    /// S0S1S2 as a server would answer `c0c1`
    fn server_reply(version: u8, c0c1: &[u8]) -> Bytes {
        let mut c1 = [0u8; HANDSHAKE_SIZE];
        c1.copy_from_slice(&c0c1[1..]);

        let mut reply = BytesMut::with_capacity(1 + HANDSHAKE_SIZE * 2);
        reply.put_u8(version);
        reply.put_slice(&generate_packet());
        reply.put_slice(&generate_echo(&c1));
        reply.freeze()
    }

    #[test]
    fn test_client_handshake() {
        let mut client = Handshake::new();

        let c0c1 = client.generate_initial().expect("client sends C0C1");
        assert_eq!(c0c1.len(), 1 + HANDSHAKE_SIZE);
        assert_eq!(c0c1[0], RTMP_VERSION);
        assert!(client.generate_initial().is_none());

        let mut s0s1s2 = server_reply(RTMP_VERSION, &c0c1);
        let s1 = s0s1s2.slice(1..1 + HANDSHAKE_SIZE);

        let c2 = client.process(&mut s0s1s2).unwrap().expect("client sends C2");
        assert_eq!(c2.len(), HANDSHAKE_SIZE);
        assert_eq!(&c2[0..4], &s1[0..4]);
        assert_eq!(&c2[8..], &s1[8..]);
        assert!(s0s1s2.is_empty());
        assert!(client.is_done());
        assert_eq!(client.peer_version(), Some(RTMP_VERSION));

        assert!(client.process(&mut Bytes::new()).unwrap().is_none());
    }

    #[test]
    fn test_trailing_bytes_are_left() {
        let mut client = Handshake::new();
        let c0c1 = client.generate_initial().unwrap();

        let mut input = BytesMut::from(&server_reply(RTMP_VERSION, &c0c1)[..]);
        input.put_slice(&[0xAA, 0xBB]);
        let mut input = input.freeze();

        assert!(client.process(&mut input).unwrap().is_some());
        assert_eq!(&input[..], &[0xAA, 0xBB]);
    }

    #[test]
    fn test_partial_input_is_not_consumed() {
        let mut client = Handshake::new();
        client.generate_initial();

        let mut partial = Bytes::from(vec![RTMP_VERSION; 100]);
        assert!(client.process(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), 100);
        assert!(!client.is_done());
    }

    #[test]
    fn test_rejects_old_version() {
        let mut client = Handshake::new();
        let c0c1 = client.generate_initial().unwrap();

        let mut s0s1s2 = server_reply(1, &c0c1);
        assert!(client.process(&mut s0s1s2).is_err());
        assert!(!client.is_done());
    }

    #[test]
    fn test_process_before_start() {
        let mut client = Handshake::new();
        assert!(client.process(&mut Bytes::new()).is_err());
    }

    #[test]
    fn test_packet_generation() {
        let packet = generate_packet();
        assert_eq!(&packet[4..8], &[0, 0, 0, 0]);

        let echo = generate_echo(&packet);
        assert_eq!(&echo[0..4], &packet[0..4]);
        assert_eq!(&echo[8..], &packet[8..]);
    }
}
