//! Statistics for chunk stream connections

use std::time::Duration;

/// Connection-level statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Total bytes accepted into the input buffer
    pub bytes_received: u64,
    /// Total bytes taken from the output buffer
    pub bytes_sent: u64,
    /// Bytes sent and not yet acknowledged by the peer
    pub unacknowledged: u64,
    /// Chunk headers decoded
    pub chunks_received: u64,
    /// Chunks encoded
    pub chunks_sent: u64,
    /// Messages fully received (control messages included)
    pub messages_received: u64,
    /// Messages fully encoded (control messages included)
    pub messages_sent: u64,
    /// Acknowledgements sent
    pub acks_sent: u64,
    /// Round-trip lag measured by the handshake (ms)
    pub lag: u32,
    /// Time since the connection was created
    pub duration: Duration,
}

impl ConnectionStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Average receive rate in bits per second
    pub fn receive_bitrate(&self) -> u64 {
        let secs = self.duration.as_secs();
        if secs > 0 {
            (self.bytes_received * 8) / secs
        } else {
            0
        }
    }

    /// Average send rate in bits per second
    pub fn send_bitrate(&self) -> u64 {
        let secs = self.duration.as_secs();
        if secs > 0 {
            (self.bytes_sent * 8) / secs
        } else {
            0
        }
    }
}
