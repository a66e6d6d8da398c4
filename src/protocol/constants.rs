//! RTMP chunk stream constants
//!
//! Reference: Adobe RTMP Specification (December 2012)
//! Reference: RFC 7425 - Adobe's RTMP (Informational)

/// RTMP version number (always 3 for plain RTMP)
pub const RTMP_VERSION: u8 = 3;

/// C1/S1/C2/S2 packet size
pub const HANDSHAKE_SIZE: usize = 1536;

/// Random nonce carried after the two 4-byte time fields
pub const HANDSHAKE_NONCE_SIZE: usize = HANDSHAKE_SIZE - 8;

/// Chunk size both directions start with (per RTMP spec)
pub const DEFAULT_CHUNK_SIZE: u32 = 128;

/// Recommended chunk size for efficiency (reduces header overhead)
pub const RECOMMENDED_CHUNK_SIZE: u32 = 4096;

/// Smallest chunk size accepted from SetChunkSize
pub const MIN_CHUNK_SIZE: u32 = 1;

/// Largest chunk size accepted (a chunk never exceeds the 24-bit message length)
pub const MAX_CHUNK_SIZE: u32 = 0xFFFFFF;

/// Largest message length expressible in the 3-byte length field
pub const MAX_MESSAGE_SIZE: u32 = 0xFFFFFF;

/// Extended timestamp threshold.
/// Values >= this are written as the escape followed by a 4-byte field
pub const EXTENDED_TIMESTAMP_THRESHOLD: u32 = 0xFFFFFF;

/// Largest possible chunk header: 3-byte basic + 11-byte type 0 + 4-byte extended timestamp
pub const MAX_CHUNK_HEADER_SIZE: usize = 18;

// ============================================================================
// Chunk Stream IDs (CSID)
// RTMP spec section 5.3.1.1
// ============================================================================

/// Lowest chunk stream id a basic header can carry
pub const MIN_CSID: u32 = 2;

/// Highest chunk stream id a basic header can carry (3-byte form)
pub const MAX_CSID: u32 = 65599;

/// Highest id in the 1-byte basic header form
pub const MAX_CSID_1_BYTE: u32 = 63;

/// Highest id in the 2-byte basic header form
pub const MAX_CSID_2_BYTE: u32 = 319;

/// Protocol control messages (Set Chunk Size, Abort, etc.)
pub const CSID_PROTOCOL_CONTROL: u32 = 2;

/// First chunk stream id available to application streams
pub const CSID_FIRST_USER: u32 = 3;

/// Message stream reserved for control traffic
pub const MSID_CONTROL: u32 = 0;

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

/// AMF0 Data Message (18) - @setDataFrame, onMetaData
pub const MSG_DATA_AMF0: u8 = 18;

/// AMF0 Command Message (20) - connect, play, publish, etc.
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
// Peer Bandwidth Limit Types
// RTMP spec section 5.4.5
// ============================================================================

/// Hard limit - peer should limit output to this bandwidth
pub const BANDWIDTH_LIMIT_HARD: u8 = 0;

/// Soft limit - peer can exceed if it has excess bandwidth
pub const BANDWIDTH_LIMIT_SOFT: u8 = 1;

/// Dynamic - can be hard or soft depending on prior state
pub const BANDWIDTH_LIMIT_DYNAMIC: u8 = 2;

// ============================================================================
// Defaults
// ============================================================================

/// Default window acknowledgement size (2.5 MB)
pub const DEFAULT_WINDOW_ACK_SIZE: u32 = 2_500_000;

/// Chunk stream ids below this live in the fixed header cache table
pub const DEFAULT_STATIC_CACHE_SIZE: usize = 16;

/// Initial capacity of the dynamic header cache table
pub const DEFAULT_DYNAMIC_CACHE_SIZE: usize = 8;

/// Most chunk stream ids the dynamic header cache will track
pub const DEFAULT_MAX_CACHE_SIZE: usize = 256;

/// Room for the largest protocol control body (user control SetBufferLength)
pub const DEFAULT_CONTROL_BUFFER_SIZE: usize = 64;

// ============================================================================
// Chunk Header Format Types (fmt field)
// RTMP spec section 5.3.1.2
// ============================================================================

/// Type 0: Full header (11 bytes) - timestamp, length, type, stream ID
pub const CHUNK_FMT_0: u8 = 0;

/// Type 1: No stream ID (7 bytes) - timestamp delta, length, type
pub const CHUNK_FMT_1: u8 = 1;

/// Type 2: No stream ID, length, type (3 bytes) - timestamp delta only
pub const CHUNK_FMT_2: u8 = 2;

/// Type 3: No header (0 bytes) - use previous chunk's values
pub const CHUNK_FMT_3: u8 = 3;
