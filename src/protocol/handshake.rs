//! RTMP handshake implementation
//!
//! The RTMP handshake consists of three phases:
//!
//! ```text
//! Client                                   Server
//!   |                                        |
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes: time+random) ->|
//!   |                                        |
//!   |<------ S0 (1 byte: version) ----------|
//!   |<------ S1 (1536 bytes: time+random) --|
//!   |<------ S2 (1536 bytes: echo C1) ------|
//!   |                                        |
//!   |------- C2 (1536 bytes: echo S1) ----->|
//!   |                                        |
//!   |          [Handshake Complete]          |
//! ```
//!
//! Progress is a bitmask with one bit per packet, set when the packet is sent
//! (own role) or received (peer role). Each step either completes one packet
//! or fails with [`Error::Incomplete`] leaving every bit and buffer as it was.
//!
//! This is the "simple" handshake (no HMAC digest).
//!
//! Reference: RTMP Specification Section 5.2

use bytes::{Buf, BufMut, BytesMut};
use rand::RngCore;

use crate::buffer::RingBuffer;
use crate::error::{Error, HandshakeError, Result};
use crate::log::{chunk_log, Logger};
use crate::protocol::constants::{HANDSHAKE_NONCE_SIZE, HANDSHAKE_SIZE, RTMP_VERSION};

/// Handshake role (client or server)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    Client,
    Server,
}

/// Handshake progress bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandshakeStatus(u8);

impl HandshakeStatus {
    pub const C0: u8 = 1 << 0;
    pub const C1: u8 = 1 << 1;
    pub const C2: u8 = 1 << 2;
    pub const S0: u8 = 1 << 3;
    pub const S1: u8 = 1 << 4;
    pub const S2: u8 = 1 << 5;
    pub const CLIENT: u8 = 1 << 6;
    const ALL: u8 = 0x3F;

    fn new(role: HandshakeRole) -> Self {
        match role {
            HandshakeRole::Client => Self(Self::CLIENT),
            HandshakeRole::Server => Self(0),
        }
    }

    pub fn has(&self, bit: u8) -> bool {
        self.0 & bit == bit
    }

    fn set(&mut self, bit: u8) {
        self.0 |= bit;
    }

    pub fn is_client(&self) -> bool {
        self.has(Self::CLIENT)
    }

    /// All six packets sent or received
    pub fn is_done(&self) -> bool {
        self.has(Self::ALL)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }
}

/// Handshake verification toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeVerify {
    /// Reject a C2/S2 whose first time field differs from our C1/S1 time
    pub time: bool,
    /// Reject a C2/S2 whose nonce differs from our C1/S1 nonce
    pub nonce: bool,
}

type Nonce = Box<[u8; HANDSHAKE_NONCE_SIZE]>;

/// One step of the handshake, in the order a role performs them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    SendVersion(u8),
    SendPacket(u8),
    SendEcho(u8),
    RecvVersion(u8),
    RecvPacket(u8),
    RecvEcho(u8),
}

const CLIENT_ACTIONS: [Action; 6] = [
    Action::SendVersion(HandshakeStatus::C0),
    Action::SendPacket(HandshakeStatus::C1),
    Action::RecvVersion(HandshakeStatus::S0),
    Action::RecvPacket(HandshakeStatus::S1),
    Action::SendEcho(HandshakeStatus::C2),
    Action::RecvEcho(HandshakeStatus::S2),
];

const SERVER_ACTIONS: [Action; 6] = [
    Action::RecvVersion(HandshakeStatus::C0),
    Action::SendVersion(HandshakeStatus::S0),
    Action::SendPacket(HandshakeStatus::S1),
    Action::RecvPacket(HandshakeStatus::C1),
    Action::SendEcho(HandshakeStatus::S2),
    Action::RecvEcho(HandshakeStatus::C2),
];

impl Action {
    fn bit(&self) -> u8 {
        match *self {
            Action::SendVersion(b)
            | Action::SendPacket(b)
            | Action::SendEcho(b)
            | Action::RecvVersion(b)
            | Action::RecvPacket(b)
            | Action::RecvEcho(b) => b,
        }
    }
}

/// Handshake state machine
#[derive(Debug)]
pub struct Handshake {
    status: HandshakeStatus,
    verify: HandshakeVerify,
    /// Time field of our C1/S1
    our_time: u32,
    /// Time field of the peer's C1/S1
    peer_time: u32,
    /// Nonce of our C1/S1, kept to check the echo
    our_nonce: Option<Nonce>,
    /// Nonce of the peer's C1/S1, kept to echo it
    peer_nonce: Option<Nonce>,
    /// Round trip from sending our C1/S1 to reading its echo (ms)
    lag: u32,
}

impl Handshake {
    /// Create a new handshake state machine
    pub fn new(role: HandshakeRole, verify: HandshakeVerify) -> Self {
        Self {
            status: HandshakeStatus::new(role),
            verify,
            our_time: 0,
            peer_time: 0,
            our_nonce: None,
            peer_nonce: None,
            lag: 0,
        }
    }

    pub fn role(&self) -> HandshakeRole {
        if self.status.is_client() {
            HandshakeRole::Client
        } else {
            HandshakeRole::Server
        }
    }

    pub fn status(&self) -> HandshakeStatus {
        self.status
    }

    /// Check if handshake is complete
    pub fn is_done(&self) -> bool {
        self.status.is_done()
    }

    /// Round-trip lag measured by the handshake (informational)
    pub fn lag(&self) -> u32 {
        self.lag
    }

    /// Whether the nonce buffers are still held
    pub fn holds_nonces(&self) -> bool {
        self.our_nonce.is_some() || self.peer_nonce.is_some()
    }

    /// Perform the next handshake step.
    ///
    /// `now` is the local clock in milliseconds. Returns `Ok(true)` once the
    /// step completed the handshake, `Ok(false)` if it made progress without
    /// completing it, and [`Error::Incomplete`] when input bytes or output
    /// space are missing.
    pub fn step(
        &mut self,
        input: &mut RingBuffer,
        output: &mut RingBuffer,
        now: u32,
        log: &mut Logger,
    ) -> Result<bool> {
        let actions = match self.role() {
            HandshakeRole::Client => &CLIENT_ACTIONS,
            HandshakeRole::Server => &SERVER_ACTIONS,
        };
        let action = match actions.iter().find(|a| !self.status.has(a.bit())) {
            Some(action) => *action,
            None => return Err(HandshakeError::InvalidState.into()),
        };

        match action {
            Action::SendVersion(bit) => {
                output.push(&[RTMP_VERSION])?;
                self.status.set(bit);
            }
            Action::SendPacket(bit) => {
                let mut nonce: Nonce = Box::new([0u8; HANDSHAKE_NONCE_SIZE]);
                rand::thread_rng().fill_bytes(&mut nonce[..]);
                let mut packet = BytesMut::with_capacity(HANDSHAKE_SIZE);
                write_packet(now, 0, &nonce[..], &mut packet);
                output.push(&packet)?;
                self.our_time = now;
                self.our_nonce = Some(nonce);
                self.status.set(bit);
            }
            Action::SendEcho(bit) => {
                let nonce = self
                    .peer_nonce
                    .as_ref()
                    .ok_or(HandshakeError::InvalidState)?;
                let mut packet = BytesMut::with_capacity(HANDSHAKE_SIZE);
                write_packet(self.peer_time, now, &nonce[..], &mut packet);
                output.push(&packet)?;
                self.status.set(bit);
            }
            Action::RecvVersion(bit) => {
                if input.is_empty() {
                    return Err(Error::Incomplete);
                }
                let version = input.get_u8();
                if version < RTMP_VERSION {
                    return Err(HandshakeError::InvalidVersion(version).into());
                }
                if version != RTMP_VERSION {
                    // Be lenient - some encoders send values above 3
                    chunk_log!(log, Warning, Warning, "peer sent RTMP version {}, continuing", version);
                }
                self.status.set(bit);
            }
            Action::RecvPacket(bit) => {
                let (time, _, nonce) = read_packet(input)?;
                self.peer_time = time;
                self.peer_nonce = Some(nonce);
                self.status.set(bit);
            }
            Action::RecvEcho(bit) => {
                let mut tx = input.begin();
                let (echo_time, _peer_read_time, echo_nonce) = read_packet(&mut *tx)?;
                if self.verify.time && echo_time != self.our_time {
                    return Err(HandshakeError::TimestampMismatch {
                        expected: self.our_time,
                        actual: echo_time,
                    }
                    .into());
                }
                if self.verify.nonce {
                    let ours = self.our_nonce.as_ref().ok_or(HandshakeError::InvalidState)?;
                    if ours[..] != echo_nonce[..] {
                        return Err(HandshakeError::NonceMismatch.into());
                    }
                }
                tx.commit();
                self.lag = now.wrapping_sub(self.our_time);
                self.status.set(bit);
            }
        }

        if self.status.is_done() {
            self.our_nonce = None;
            self.peer_nonce = None;
            return Ok(true);
        }
        Ok(false)
    }
}

/// Write a C1/S1 (`time2` zero) or C2/S2 packet
///
/// Format (1536 bytes):
/// - Bytes 0-3: Timestamp (32-bit, big-endian)
/// - Bytes 4-7: Zero (C1/S1) or the echoing side's read time (C2/S2)
/// - Bytes 8-1535: Random data (C1/S1) or the echoed random data (C2/S2)
pub fn write_packet(time: u32, time2: u32, nonce: &[u8], buf: &mut BytesMut) {
    buf.put_u32(time);
    buf.put_u32(time2);
    buf.put_slice(&nonce[..HANDSHAKE_NONCE_SIZE]);
}

/// Read a full 1536-byte packet: (time, time2, nonce)
pub fn read_packet<B: Buf>(buf: &mut B) -> Result<(u32, u32, Nonce)> {
    if buf.remaining() < HANDSHAKE_SIZE {
        return Err(Error::Incomplete);
    }
    let time = buf.get_u32();
    let time2 = buf.get_u32();
    let mut nonce: Nonce = Box::new([0u8; HANDSHAKE_NONCE_SIZE]);
    buf.copy_to_slice(&mut nonce[..]);
    Ok((time, time2, nonce))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERIFY_ALL: HandshakeVerify = HandshakeVerify {
        time: true,
        nonce: true,
    };

    struct Side {
        hs: Handshake,
        input: RingBuffer,
        output: RingBuffer,
    }

    impl Side {
        fn new(role: HandshakeRole) -> Self {
            Self {
                hs: Handshake::new(role, VERIFY_ALL),
                input: RingBuffer::new(4 * HANDSHAKE_SIZE),
                output: RingBuffer::new(4 * HANDSHAKE_SIZE),
            }
        }

        /// Run steps until blocked; returns Ok(true) when completed.
        fn run(&mut self, now: u32, log: &mut Logger) -> Result<bool> {
            loop {
                match self.hs.step(&mut self.input, &mut self.output, now, log) {
                    Ok(true) => return Ok(true),
                    Ok(false) => continue,
                    Err(Error::Incomplete) => return Ok(false),
                    Err(e) => return Err(e),
                }
            }
        }
    }

    fn transfer(from: &mut RingBuffer, to: &mut RingBuffer, corrupt_at: Option<usize>) {
        let mut bytes = vec![0u8; from.len()];
        assert!(from.copy_out(0, &mut bytes));
        from.consume(bytes.len());
        if let Some(at) = corrupt_at {
            if at < bytes.len() {
                bytes[at] ^= 0xFF;
            }
        }
        to.push(&bytes).unwrap();
    }

    #[test]
    fn test_client_server_handshake() {
        let mut log = Logger::default();
        let mut client = Side::new(HandshakeRole::Client);
        let mut server = Side::new(HandshakeRole::Server);

        // server can do nothing before C0
        assert!(!server.run(5, &mut log).unwrap());
        assert!(server.output.is_empty());

        assert!(!client.run(10, &mut log).unwrap());
        assert_eq!(client.output.len(), 1 + HANDSHAKE_SIZE);
        transfer(&mut client.output, &mut server.input, None);

        assert!(!server.run(20, &mut log).unwrap());
        assert_eq!(server.output.len(), 1 + 2 * HANDSHAKE_SIZE);
        transfer(&mut server.output, &mut client.input, None);

        assert!(client.run(30, &mut log).unwrap());
        assert!(client.hs.is_done());
        assert!(!client.hs.holds_nonces());
        assert_eq!(client.hs.lag(), 20);
        transfer(&mut client.output, &mut server.input, None);

        assert!(server.run(40, &mut log).unwrap());
        assert!(server.hs.is_done());
        assert_eq!(server.hs.lag(), 20);
    }

    #[test]
    fn test_client_waits_for_s0_s1_before_c2() {
        let mut log = Logger::default();
        let mut client = Side::new(HandshakeRole::Client);
        client.run(0, &mut log).unwrap();
        let status = client.hs.status();
        assert!(status.has(HandshakeStatus::C0 | HandshakeStatus::C1));
        assert!(!status.has(HandshakeStatus::C2));

        // S0 alone is not enough for C2
        client.input.push(&[RTMP_VERSION]).unwrap();
        client.run(0, &mut log).unwrap();
        assert!(client.hs.status().has(HandshakeStatus::S0));
        assert!(!client.hs.status().has(HandshakeStatus::C2));
        assert_eq!(client.output.len(), 1 + HANDSHAKE_SIZE);
    }

    #[test]
    fn test_partial_packet_leaves_state_unchanged() {
        let mut log = Logger::default();
        let mut server = Side::new(HandshakeRole::Server);
        server.input.push(&[RTMP_VERSION]).unwrap();
        server.input.push(&[7u8; 100]).unwrap();
        server.run(0, &mut log).unwrap();
        let before = server.hs.status();
        assert!(!before.has(HandshakeStatus::C1));
        assert_eq!(server.input.len(), 100);
    }

    #[test]
    fn test_corrupted_nonce_fails() {
        let mut log = Logger::default();
        let mut client = Side::new(HandshakeRole::Client);
        let mut server = Side::new(HandshakeRole::Server);

        client.run(1, &mut log).unwrap();
        transfer(&mut client.output, &mut server.input, None);
        server.run(2, &mut log).unwrap();
        // flip one byte of the S2 nonce
        let s2_nonce_byte = 1 + HANDSHAKE_SIZE + 8 + 100;
        transfer(&mut server.output, &mut client.input, Some(s2_nonce_byte));

        let err = client.run(3, &mut log).unwrap_err();
        assert!(matches!(err, Error::Handshake(HandshakeError::NonceMismatch)));
        assert!(!client.hs.is_done());
    }

    #[test]
    fn test_corrupted_time_fails_only_when_verified() {
        let mut log = Logger::default();
        for verify_time in [true, false] {
            let mut client = Side::new(HandshakeRole::Client);
            client.hs.verify.time = verify_time;
            let mut server = Side::new(HandshakeRole::Server);

            client.run(1, &mut log).unwrap();
            transfer(&mut client.output, &mut server.input, None);
            server.run(2, &mut log).unwrap();
            let s2_time_byte = 1 + HANDSHAKE_SIZE + 3;
            transfer(&mut server.output, &mut client.input, Some(s2_time_byte));

            let result = client.run(3, &mut log);
            if verify_time {
                assert!(matches!(
                    result,
                    Err(Error::Handshake(HandshakeError::TimestampMismatch { .. }))
                ));
            } else {
                assert!(result.unwrap());
            }
        }
    }

    #[test]
    fn test_old_version_rejected() {
        let mut log = Logger::default();
        let mut server = Side::new(HandshakeRole::Server);
        server.input.push(&[2]).unwrap();
        assert!(matches!(
            server.run(0, &mut log),
            Err(Error::Handshake(HandshakeError::InvalidVersion(2)))
        ));
    }

    #[test]
    fn test_packet_layout() {
        let nonce = [0xABu8; HANDSHAKE_NONCE_SIZE];
        let mut buf = BytesMut::new();
        write_packet(0x01020304, 0, &nonce, &mut buf);
        assert_eq!(buf.len(), HANDSHAKE_SIZE);
        assert_eq!(&buf[0..8], &[1, 2, 3, 4, 0, 0, 0, 0]);
        let (time, time2, read) = read_packet(&mut buf).unwrap();
        assert_eq!((time, time2), (0x01020304, 0));
        assert_eq!(read[..], nonce[..]);
    }
}
