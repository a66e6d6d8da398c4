//! RTMP chunk header codec
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
//! - 3 bytes: fmt(2) + 1 + csid(16)   for csid 320-65599
//!
//! Message Header formats (based on fmt):
//! - Type 0 (11 bytes): timestamp(3) + length(3) + type(1) + stream_id(4, little-endian)
//! - Type 1 (7 bytes):  timestamp_delta(3) + length(3) + type(1)
//! - Type 2 (3 bytes):  timestamp_delta(3)
//! - Type 3 (0 bytes):  (use previous chunk's values)
//!
//! Extended timestamp (4 bytes) is appended when the 3-byte field holds 0xFFFFFF
//! ```
//!
//! Reference: RTMP Specification Section 5.3

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, ProtocolError, Result};
use crate::protocol::cache::{CacheEntry, HeaderCache};
use crate::protocol::constants::*;

/// Header of one logical message, as carried (possibly compressed) by its chunks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageHeader {
    /// Chunk stream ID (for multiplexing)
    pub chunk_stream_id: u32,
    /// Message stream ID
    pub message_stream_id: u32,
    /// Total payload length in bytes
    pub message_length: u32,
    /// Message type ID
    pub message_type: u8,
    /// Absolute timestamp (milliseconds, wrapping)
    pub timestamp: u32,
}

impl MessageHeader {
    pub fn new(
        chunk_stream_id: u32,
        message_stream_id: u32,
        message_type: u8,
        timestamp: u32,
        message_length: u32,
    ) -> Self {
        Self {
            chunk_stream_id,
            message_stream_id,
            message_length,
            message_type,
            timestamp,
        }
    }

    /// Whether this header belongs to the reserved protocol control lane
    pub fn is_control(&self) -> bool {
        self.chunk_stream_id == CSID_PROTOCOL_CONTROL && self.message_stream_id == MSID_CONTROL
    }
}

/// Message header fields exactly as read off the wire, before the cache fills gaps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawHeader {
    pub fmt: u8,
    pub chunk_stream_id: u32,
    /// Absolute timestamp (fmt 0) or delta (fmt 1, 2), extension already resolved
    pub timestamp: u32,
    pub message_length: u32,
    pub message_type: u8,
    pub message_stream_id: u32,
    /// The 3-byte field held the 0xFFFFFF escape
    pub extended: bool,
}

/// Check that a chunk stream id is representable in a basic header
pub fn validate_csid(csid: u32) -> Result<()> {
    if (MIN_CSID..=MAX_CSID).contains(&csid) {
        Ok(())
    } else {
        Err(ProtocolError::InvalidChunkStreamId(csid).into())
    }
}

/// Size of the basic header for `csid`
pub fn basic_header_len(csid: u32) -> usize {
    if csid > MAX_CSID_2_BYTE {
        3
    } else if csid > MAX_CSID_1_BYTE {
        2
    } else {
        1
    }
}

/// Size of the message header for `fmt`
pub fn message_header_len(fmt: u8) -> usize {
    match fmt {
        CHUNK_FMT_0 => 11,
        CHUNK_FMT_1 => 7,
        CHUNK_FMT_2 => 3,
        _ => 0,
    }
}

/// Write basic header
pub fn write_basic_header(fmt: u8, csid: u32, buf: &mut BytesMut) -> Result<()> {
    validate_csid(csid)?;
    if fmt > CHUNK_FMT_3 {
        return Err(ProtocolError::InvalidChunkHeader.into());
    }
    if csid > MAX_CSID_2_BYTE {
        // 3-byte header, id - 64 big-endian
        let offset = csid - 64;
        buf.put_u8((fmt << 6) | 1);
        buf.put_u16(offset as u16);
    } else if csid > MAX_CSID_1_BYTE {
        buf.put_u8(fmt << 6);
        buf.put_u8((csid - 64) as u8);
    } else {
        buf.put_u8((fmt << 6) | csid as u8);
    }
    Ok(())
}

/// Read basic header and return (fmt, csid).
///
/// Fails with [`Error::Incomplete`] when the header is not fully buffered.
pub fn read_basic_header<B: Buf>(buf: &mut B) -> Result<(u8, u32)> {
    if !buf.has_remaining() {
        return Err(Error::Incomplete);
    }
    let first = buf.chunk()[0];
    let fmt = (first >> 6) & 0x03;
    match first & 0x3F {
        0 => {
            if buf.remaining() < 2 {
                return Err(Error::Incomplete);
            }
            buf.advance(1);
            Ok((fmt, 64 + buf.get_u8() as u32))
        }
        1 => {
            if buf.remaining() < 3 {
                return Err(Error::Incomplete);
            }
            buf.advance(1);
            Ok((fmt, 64 + buf.get_u16() as u32))
        }
        csid => {
            buf.advance(1);
            Ok((fmt, csid as u32))
        }
    }
}

/// Read the message header that follows a basic header.
///
/// `carry_extended` is the cached state of the chunk stream: when its last
/// explicit timestamp field was the 0xFFFFFF escape, a type 3 header still
/// carries the 4-byte extension.
pub fn read_message_header<B: Buf>(
    buf: &mut B,
    fmt: u8,
    csid: u32,
    carry_extended: bool,
) -> Result<RawHeader> {
    if buf.remaining() < message_header_len(fmt) {
        return Err(Error::Incomplete);
    }

    let mut raw = RawHeader {
        fmt,
        chunk_stream_id: csid,
        ..RawHeader::default()
    };

    let field = match fmt {
        CHUNK_FMT_0 => {
            let ts = buf.get_uint(3) as u32;
            raw.message_length = buf.get_uint(3) as u32;
            raw.message_type = buf.get_u8();
            raw.message_stream_id = buf.get_u32_le(); // Stream ID is little-endian!
            Some(ts)
        }
        CHUNK_FMT_1 => {
            let ts = buf.get_uint(3) as u32;
            raw.message_length = buf.get_uint(3) as u32;
            raw.message_type = buf.get_u8();
            Some(ts)
        }
        CHUNK_FMT_2 => Some(buf.get_uint(3) as u32),
        _ => None,
    };

    let needs_extended = match field {
        Some(ts) => ts == EXTENDED_TIMESTAMP_THRESHOLD,
        None => carry_extended,
    };

    if needs_extended {
        if buf.remaining() < 4 {
            return Err(Error::Incomplete);
        }
        raw.timestamp = buf.get_u32();
    } else {
        raw.timestamp = field.unwrap_or(0);
    }
    raw.extended = field.is_some() && needs_extended;

    Ok(raw)
}

/// Write a message header for `fmt`; `value` is the absolute timestamp (fmt 0)
/// or the delta (fmt 1, 2).
pub fn write_message_header(fmt: u8, header: &MessageHeader, value: u32, buf: &mut BytesMut) {
    let field = value.min(EXTENDED_TIMESTAMP_THRESHOLD);
    match fmt {
        CHUNK_FMT_0 => {
            write_u24(field, buf);
            write_u24(header.message_length, buf);
            buf.put_u8(header.message_type);
            buf.put_u32_le(header.message_stream_id);
        }
        CHUNK_FMT_1 => {
            write_u24(field, buf);
            write_u24(header.message_length, buf);
            buf.put_u8(header.message_type);
        }
        CHUNK_FMT_2 => write_u24(field, buf),
        _ => {}
    }
    if fmt != CHUNK_FMT_3 && value >= EXTENDED_TIMESTAMP_THRESHOLD {
        buf.put_u32(value);
    }
}

/// Encode the header of the first chunk of `header`'s message, choosing the
/// cheapest format the outgoing cache allows. Returns the format used.
pub fn encode_header(cache: &mut HeaderCache, header: &MessageHeader, buf: &mut BytesMut) -> Result<u8> {
    validate_csid(header.chunk_stream_id)?;
    if header.message_length > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: header.message_length,
            max: MAX_MESSAGE_SIZE,
        }
        .into());
    }

    let entry = cache.get(header.chunk_stream_id)?;
    let fmt = entry.select_format(header);
    entry.record_outgoing(fmt, header);

    write_basic_header(fmt, header.chunk_stream_id, buf)?;
    // after recording, the delta of a type 0 header is its absolute timestamp
    write_message_header(fmt, header, entry.time_delta, buf);
    if fmt == CHUNK_FMT_3 && entry.extended {
        buf.put_u32(entry.time_delta);
    }
    Ok(fmt)
}

/// Encode a type 3 header continuing the message last encoded on `csid`.
pub fn encode_continuation(cache: &mut HeaderCache, csid: u32, buf: &mut BytesMut) -> Result<()> {
    let entry = cache.get(csid)?;
    let (extended, delta) = (entry.extended, entry.time_delta);
    write_basic_header(CHUNK_FMT_3, csid, buf)?;
    if extended {
        buf.put_u32(delta);
    }
    Ok(())
}

/// A chunk header decoded against the incoming cache
#[derive(Debug, Clone, Copy)]
pub struct DecodedHeader {
    /// Wire format of the header
    pub fmt: u8,
    /// Header with omitted fields filled in from the cache
    pub header: MessageHeader,
    /// Cache entry of the chunk stream before this header was applied
    pub previous: CacheEntry,
}

/// Decode one chunk header, reconstructing omitted fields from the incoming
/// cache.
///
/// Nothing but the cache entry is updated on success; on
/// [`Error::Incomplete`] the cache is untouched apart from a possible empty
/// entry for a new id.
pub fn decode_header<B: Buf>(cache: &mut HeaderCache, buf: &mut B) -> Result<DecodedHeader> {
    let (fmt, csid) = read_basic_header(buf)?;
    let entry = cache.get(csid)?;
    let previous = *entry;
    let raw = read_message_header(buf, fmt, csid, entry.extended)?;
    entry.apply_incoming(&raw)?;
    Ok(DecodedHeader {
        fmt,
        header: entry.header,
        previous,
    })
}

/// Write 24-bit big-endian value
fn write_u24(value: u32, buf: &mut BytesMut) {
    buf.put_u8(((value >> 16) & 0xFF) as u8);
    buf.put_u8(((value >> 8) & 0xFF) as u8);
    buf.put_u8((value & 0xFF) as u8);
}
