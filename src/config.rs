//! Connection and assembler configuration

use crate::error::{Error, Result};
use crate::log::Severity;
use crate::protocol::constants::*;

/// Chunk connection configuration options
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Outbound chunk size announced once the handshake completes
    pub chunk_size: u32,

    /// Smallest chunk size accepted from SetChunkSize
    pub min_chunk_size: u32,

    /// Largest chunk size accepted from SetChunkSize
    pub max_chunk_size: u32,

    /// Initial window acknowledgement size, both directions
    pub window_ack_size: u32,

    /// Chunk stream ids below this are array-indexed in the header caches
    pub static_cache_size: usize,

    /// Initial capacity of the dynamic header cache table
    pub dynamic_cache_size: usize,

    /// Most chunk stream ids the dynamic table may track
    pub max_cache_size: usize,

    /// Largest protocol control message body accepted
    pub control_buffer_size: usize,

    /// Input ring size
    pub in_buffer_size: usize,

    /// Output ring size (grows for messages that could never fit)
    pub out_buffer_size: usize,

    /// Reject a handshake echo carrying the wrong timestamp
    pub verify_handshake_time: bool,

    /// Reject a handshake echo carrying the wrong random data
    pub verify_handshake_nonce: bool,

    /// Most verbose severity passed to the log sink
    pub log_level: Severity,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            chunk_size: RECOMMENDED_CHUNK_SIZE,
            min_chunk_size: MIN_CHUNK_SIZE,
            max_chunk_size: MAX_CHUNK_SIZE,
            window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
            static_cache_size: DEFAULT_STATIC_CACHE_SIZE,
            dynamic_cache_size: DEFAULT_DYNAMIC_CACHE_SIZE,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            control_buffer_size: DEFAULT_CONTROL_BUFFER_SIZE,
            in_buffer_size: 64 * 1024, // 64KB
            out_buffer_size: 64 * 1024,
            verify_handshake_time: true,
            verify_handshake_nonce: true,
            log_level: Severity::Notice,
        }
    }
}

impl ConnectionConfig {
    /// Set outbound chunk size
    pub fn chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        self
    }

    /// Set the range accepted from the peer's SetChunkSize
    pub fn chunk_size_range(mut self, min: u32, max: u32) -> Self {
        self.min_chunk_size = min;
        self.max_chunk_size = max;
        self
    }

    /// Set window acknowledgement size
    pub fn window_ack_size(mut self, size: u32) -> Self {
        self.window_ack_size = size;
        self
    }

    /// Set header cache sizes
    pub fn cache_sizes(mut self, static_size: usize, dynamic_size: usize, max_size: usize) -> Self {
        self.static_cache_size = static_size;
        self.dynamic_cache_size = dynamic_size;
        self.max_cache_size = max_size;
        self
    }

    /// Set the control message buffer size
    pub fn control_buffer_size(mut self, size: usize) -> Self {
        self.control_buffer_size = size;
        self
    }

    /// Set ring buffer sizes
    pub fn buffer_sizes(mut self, in_size: usize, out_size: usize) -> Self {
        self.in_buffer_size = in_size;
        self.out_buffer_size = out_size;
        self
    }

    /// Enable or disable handshake echo checks
    pub fn verify_handshake(mut self, time: bool, nonce: bool) -> Self {
        self.verify_handshake_time = time;
        self.verify_handshake_nonce = nonce;
        self
    }

    /// Set log verbosity
    pub fn log_level(mut self, level: Severity) -> Self {
        self.log_level = level;
        self
    }

    /// Check the options are mutually consistent
    pub fn validate(&self) -> Result<()> {
        if self.min_chunk_size < MIN_CHUNK_SIZE
            || self.max_chunk_size > MAX_CHUNK_SIZE
            || self.min_chunk_size > self.max_chunk_size
        {
            return Err(Error::Config(format!(
                "invalid chunk size range {}..={}",
                self.min_chunk_size, self.max_chunk_size
            )));
        }
        if !(self.min_chunk_size..=self.max_chunk_size).contains(&self.chunk_size) {
            return Err(Error::Config(format!(
                "chunk size {} outside {}..={}",
                self.chunk_size, self.min_chunk_size, self.max_chunk_size
            )));
        }
        if self.static_cache_size <= CSID_PROTOCOL_CONTROL as usize {
            return Err(Error::Config(
                "static cache must cover the protocol control chunk stream".into(),
            ));
        }
        if self.control_buffer_size < 8 {
            return Err(Error::Config("control buffer too small".into()));
        }
        // a whole handshake packet must fit either ring
        if self.in_buffer_size < HANDSHAKE_SIZE || self.out_buffer_size < HANDSHAKE_SIZE {
            return Err(Error::Config(format!(
                "ring buffers must hold at least {} bytes",
                HANDSHAKE_SIZE
            )));
        }
        Ok(())
    }
}

/// Chunk assembler pool options
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Slots kept allocated while idle
    pub soft_pool_size: usize,

    /// Most messages reassembled at once; a further new message takes over
    /// the slot filled least recently
    pub hard_pool_size: usize,

    /// Largest message accepted for reassembly
    pub max_message_size: u32,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            soft_pool_size: 4,
            hard_pool_size: 64,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl AssemblerConfig {
    /// Set pool limits
    pub fn pool_size(mut self, soft: usize, hard: usize) -> Self {
        self.soft_pool_size = soft;
        self.hard_pool_size = hard.max(soft);
        self
    }

    /// Set maximum message size
    pub fn max_message_size(mut self, size: u32) -> Self {
        self.max_message_size = size.min(MAX_MESSAGE_SIZE);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = ConnectionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_size, RECOMMENDED_CHUNK_SIZE);
        assert!(config.verify_handshake_time && config.verify_handshake_nonce);
    }

    #[test]
    fn test_builder_clamps_chunk_size() {
        assert_eq!(ConnectionConfig::default().chunk_size(0).chunk_size, MIN_CHUNK_SIZE);
        assert_eq!(
            ConnectionConfig::default().chunk_size(u32::MAX).chunk_size,
            MAX_CHUNK_SIZE
        );
    }

    #[test]
    fn test_invalid_configs() {
        let inverted = ConnectionConfig::default().chunk_size_range(500, 100);
        assert!(matches!(inverted.validate(), Err(Error::Config(_))));

        let outside = ConnectionConfig::default()
            .chunk_size(64)
            .chunk_size_range(128, 4096);
        assert!(outside.validate().is_err());

        let tiny_cache = ConnectionConfig::default().cache_sizes(2, 0, 0);
        assert!(tiny_cache.validate().is_err());

        let tiny_ring = ConnectionConfig::default().buffer_sizes(1024, 1 << 16);
        assert!(tiny_ring.validate().is_err());
    }

    #[test]
    fn test_assembler_pool_size() {
        let config = AssemblerConfig::default().pool_size(8, 2);
        assert_eq!(config.soft_pool_size, 8);
        assert_eq!(config.hard_pool_size, 8);
    }
}
