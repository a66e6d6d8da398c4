//! Per chunk stream header memory
//!
//! Both directions keep the last header seen on every chunk stream: the
//! outgoing side to pick the cheapest header format, the incoming side to
//! rebuild the fields a compressed header omits.
//!
//! Low ids (the common case: control, command, audio, video) index straight
//! into a fixed table. Everything else lives in a Vec kept sorted by id and
//! searched by binary search; it refuses to grow past its configured maximum.

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::*;
use crate::protocol::header::{MessageHeader, RawHeader};

/// Cached state of one chunk stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheEntry {
    /// Last header sent/received, timestamp absolute
    pub header: MessageHeader,
    /// Last timestamp delta (the absolute timestamp after a type 0 header)
    pub time_delta: u32,
    /// Bytes of the in-flight message not yet delivered
    pub processed: u32,
    /// A type 0 header has been seen
    pub initialized: bool,
    /// The last explicit timestamp field was the 0xFFFFFF escape
    pub extended: bool,
}

impl CacheEntry {
    /// Whether a message is partially delivered on this chunk stream
    pub fn in_flight(&self) -> bool {
        self.processed > 0
    }

    /// Cheapest header format able to carry `header` given this entry
    pub fn select_format(&self, header: &MessageHeader) -> u8 {
        if !self.initialized || header.message_stream_id != self.header.message_stream_id {
            return CHUNK_FMT_0;
        }

        if header.message_type != self.header.message_type
            || header.message_length != self.header.message_length
        {
            return CHUNK_FMT_1;
        }

        let delta = header.timestamp.wrapping_sub(self.header.timestamp);
        if delta == self.time_delta {
            CHUNK_FMT_3
        } else {
            CHUNK_FMT_2
        }
    }

    /// Remember an outgoing header encoded with `fmt`
    pub fn record_outgoing(&mut self, fmt: u8, header: &MessageHeader) {
        match fmt {
            CHUNK_FMT_0 => {
                self.time_delta = header.timestamp;
                self.extended = header.timestamp >= EXTENDED_TIMESTAMP_THRESHOLD;
            }
            CHUNK_FMT_1 | CHUNK_FMT_2 => {
                self.time_delta = header.timestamp.wrapping_sub(self.header.timestamp);
                self.extended = self.time_delta >= EXTENDED_TIMESTAMP_THRESHOLD;
            }
            _ => {}
        }
        self.header = *header;
        self.initialized = true;
    }

    /// Fold an incoming header into this entry, filling omitted fields.
    ///
    /// A type 3 header while a message is in flight is a continuation chunk
    /// and leaves the header unchanged.
    pub fn apply_incoming(&mut self, raw: &RawHeader) -> Result<()> {
        if raw.fmt != CHUNK_FMT_0 && !self.initialized {
            return Err(ProtocolError::UnknownChunkStream(raw.chunk_stream_id).into());
        }

        match raw.fmt {
            CHUNK_FMT_0 => {
                self.header = MessageHeader {
                    chunk_stream_id: raw.chunk_stream_id,
                    message_stream_id: raw.message_stream_id,
                    message_length: raw.message_length,
                    message_type: raw.message_type,
                    timestamp: raw.timestamp,
                };
                self.time_delta = raw.timestamp;
            }
            CHUNK_FMT_1 => {
                self.header.message_length = raw.message_length;
                self.header.message_type = raw.message_type;
                self.time_delta = raw.timestamp;
                self.header.timestamp = self.header.timestamp.wrapping_add(raw.timestamp);
            }
            CHUNK_FMT_2 => {
                self.time_delta = raw.timestamp;
                self.header.timestamp = self.header.timestamp.wrapping_add(raw.timestamp);
            }
            _ => {
                if !self.in_flight() {
                    self.header.timestamp = self.header.timestamp.wrapping_add(self.time_delta);
                }
            }
        }

        if raw.fmt != CHUNK_FMT_3 {
            self.extended = raw.extended;
        }
        self.initialized = true;
        Ok(())
    }
}

/// Header cache for one direction of a connection
#[derive(Debug)]
pub struct HeaderCache {
    /// Indexed directly by chunk stream id
    fixed: Vec<CacheEntry>,
    /// Sorted by chunk stream id
    dynamic: Vec<(u32, CacheEntry)>,
    max_dynamic: usize,
}

impl HeaderCache {
    /// `static_size` ids are array-indexed; at most `max_dynamic` others are tracked.
    pub fn new(static_size: usize, dynamic_size: usize, max_dynamic: usize) -> Self {
        Self {
            fixed: vec![CacheEntry::default(); static_size],
            dynamic: Vec::with_capacity(dynamic_size.min(max_dynamic)),
            max_dynamic,
        }
    }

    /// Entry for `csid`, created empty on first use.
    ///
    /// Fails with `CacheExhausted` when a new id would exceed the dynamic maximum;
    /// existing entries are left untouched.
    pub fn get(&mut self, csid: u32) -> Result<&mut CacheEntry> {
        let index = csid as usize;
        if index < self.fixed.len() {
            return Ok(&mut self.fixed[index]);
        }

        match self.dynamic.binary_search_by_key(&csid, |(id, _)| *id) {
            Ok(pos) => Ok(&mut self.dynamic[pos].1),
            Err(pos) => {
                if self.dynamic.len() >= self.max_dynamic {
                    return Err(ProtocolError::CacheExhausted {
                        max: self.max_dynamic,
                    }
                    .into());
                }
                self.dynamic.insert(pos, (csid, CacheEntry::default()));
                Ok(&mut self.dynamic[pos].1)
            }
        }
    }

    /// Entry for `csid` without creating one
    pub fn peek(&self, csid: u32) -> Option<&CacheEntry> {
        let index = csid as usize;
        if index < self.fixed.len() {
            return Some(&self.fixed[index]);
        }
        self.dynamic
            .binary_search_by_key(&csid, |(id, _)| *id)
            .ok()
            .map(|pos| &self.dynamic[pos].1)
    }

    /// Number of ids tracked in the dynamic table
    pub fn dynamic_len(&self) -> usize {
        self.dynamic.len()
    }

    /// Forget every chunk stream
    pub fn reset(&mut self) {
        self.fixed.iter_mut().for_each(|e| *e = CacheEntry::default());
        self.dynamic.clear();
    }

    fn entries(&self) -> impl Iterator<Item = (u32, &CacheEntry)> + '_ {
        self.fixed
            .iter()
            .enumerate()
            .map(|(id, e)| (id as u32, e))
            .chain(self.dynamic.iter().map(|(id, e)| (*id, e)))
    }

    /// Pick a chunk stream for a new outbound message so that as much of its
    /// header as possible can be omitted.
    ///
    /// Idle application streams score one point for a matching message stream,
    /// a second for matching type and length, a third for a matching delta.
    /// The highest score wins (lowest id on ties). With no match, the lowest
    /// unused id is returned.
    pub fn best_match(&self, header: &MessageHeader) -> u32 {
        let mut best: Option<(u8, u32)> = None;

        for (csid, entry) in self.entries() {
            if csid < CSID_FIRST_USER || !entry.initialized || entry.in_flight() {
                continue;
            }
            let score = score(entry, header);
            if score == 0 {
                continue;
            }
            if best.map_or(true, |(s, _)| score > s) {
                best = Some((score, csid));
            }
        }

        match best {
            Some((_, csid)) => csid,
            None => self.first_unused(),
        }
    }

    fn first_unused(&self) -> u32 {
        let mut csid = CSID_FIRST_USER;
        while csid < MAX_CSID {
            match self.peek(csid) {
                Some(entry) if entry.initialized => csid += 1,
                _ => return csid,
            }
        }
        MAX_CSID
    }
}

fn score(entry: &CacheEntry, header: &MessageHeader) -> u8 {
    if entry.header.message_stream_id != header.message_stream_id {
        return 0;
    }
    if entry.header.message_type != header.message_type
        || entry.header.message_length != header.message_length
    {
        return 1;
    }
    if header.timestamp.wrapping_sub(entry.header.timestamp) != entry.time_delta {
        return 2;
    }
    3
}
