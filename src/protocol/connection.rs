//! Chunk stream connection
//!
//! A [`Connection`] owns everything one side of an RTMP chunk stream needs:
//! input and output rings, a header cache per direction, handshake progress,
//! negotiated chunk sizes and the window/ack counters. It never touches a
//! socket. The surrounding loop copies bytes into [`Connection::get_in_buffer`]
//! and out of [`Connection::get_out_buffer`], then calls
//! [`Connection::service`] to advance the state machine as far as the
//! buffered bytes allow.
//!
//! ```text
//!  transport --commit_in--> [ in ring ] --service--> ChunkHandler
//!  transport <-commit_out-- [ out ring ] <--send_message-- application
//! ```
//!
//! Messages on chunk stream 2, message stream 0 are protocol control messages
//! and are consumed here; every other chunk is handed to the chunk handler as
//! it arrives, possibly in several pieces.

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use bytes::BytesMut;

use crate::buffer::RingBuffer;
use crate::config::ConnectionConfig;
use crate::error::{Error, ProtocolError, Result};
use crate::log::{chunk_log, LogSink, Logger, Severity, TracingSink};
use crate::protocol::cache::HeaderCache;
use crate::protocol::constants::*;
use crate::protocol::control::{is_control_type, BandwidthLimit, ControlMessage, UserControlEvent};
use crate::protocol::handshake::{Handshake, HandshakeRole, HandshakeStatus, HandshakeVerify};
use crate::protocol::header::{
    decode_header, encode_continuation, encode_header, validate_csid, MessageHeader,
};
use crate::stats::ConnectionStats;

/// What the connection should do after a chunk was delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep processing
    Continue,
    /// Fail the connection with [`Error::Rejected`]
    Error,
    /// Fail the connection with [`Error::Aborted`]
    Abort,
}

/// Connection lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Handshake completed
    ConnectSuccess,
    /// Handshake failed
    ConnectFail,
    /// [`Connection::close`] was called
    Closed,
    /// The transport lost the peer
    Interrupted,
    /// A fatal error after the handshake
    Failed,
    /// The input ring has no free space left
    BufferFilled,
    /// The output ring was fully drained
    BufferEmptied,
}

/// Receives application chunks
pub trait ChunkHandler: Send {
    /// `payload` is the next piece of the message described by `header` and
    /// `remaining` counts the bytes still to come. An empty payload with
    /// nothing remaining for a message that was in flight means the message
    /// was aborted and its pieces must be discarded.
    fn on_chunk(&mut self, header: &MessageHeader, payload: &[u8], remaining: u32) -> Flow;
}

impl<F> ChunkHandler for F
where
    F: FnMut(&MessageHeader, &[u8], u32) -> Flow + Send,
{
    fn on_chunk(&mut self, header: &MessageHeader, payload: &[u8], remaining: u32) -> Flow {
        self(header, payload, remaining)
    }
}

/// Receives lifecycle events
pub trait EventHandler: Send {
    fn on_event(&mut self, event: Event);
}

impl<F> EventHandler for F
where
    F: FnMut(Event) + Send,
{
    fn on_event(&mut self, event: Event) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Handshaking,
    Open,
    Closed,
    Failed,
}

/// Chunk whose header was read but whose payload is still arriving
#[derive(Debug, Clone, Copy)]
struct Partial {
    header: MessageHeader,
    /// Payload bytes of this chunk not read yet
    chunk_left: u32,
}

/// One side of an RTMP chunk stream
pub struct Connection {
    config: ConnectionConfig,
    state: State,
    handshake: Handshake,

    in_buf: RingBuffer,
    out_buf: RingBuffer,
    in_cache: HeaderCache,
    out_cache: HeaderCache,

    self_chunk_size: u32,
    peer_chunk_size: u32,
    /// Window we asked the peer to acknowledge within
    self_window: u32,
    /// Window the peer asked us to acknowledge within
    peer_window: u32,
    bandwidth_limit: Option<BandwidthLimit>,

    /// Total bytes received
    bytes_in: u64,
    /// Bytes sent and not yet acknowledged
    bytes_out: u64,
    /// `bytes_in` when the last Ack was queued
    acked_in: u64,
    /// Sequence number of the peer's last Ack
    peer_acked: u32,

    partial: Option<Partial>,
    /// Body of the control message being received
    control: BytesMut,
    /// Control messages waiting for output space
    pending: VecDeque<ControlMessage>,

    stats: ConnectionStats,
    started: Instant,

    chunk_handler: Option<Box<dyn ChunkHandler>>,
    event_handler: Option<Box<dyn EventHandler>>,
    log: Logger,
}

impl Connection {
    /// Create the client side of a connection
    pub fn client(config: ConnectionConfig) -> Result<Self> {
        Self::new(HandshakeRole::Client, config)
    }

    /// Create the server side of a connection
    pub fn server(config: ConnectionConfig) -> Result<Self> {
        Self::new(HandshakeRole::Server, config)
    }

    fn new(role: HandshakeRole, config: ConnectionConfig) -> Result<Self> {
        config.validate()?;
        let verify = HandshakeVerify {
            time: config.verify_handshake_time,
            nonce: config.verify_handshake_nonce,
        };
        let cache = || {
            HeaderCache::new(
                config.static_cache_size,
                config.dynamic_cache_size,
                config.max_cache_size,
            )
        };

        Ok(Self {
            state: State::Handshaking,
            handshake: Handshake::new(role, verify),
            in_buf: RingBuffer::new(config.in_buffer_size),
            out_buf: RingBuffer::new(config.out_buffer_size),
            in_cache: cache(),
            out_cache: cache(),
            self_chunk_size: DEFAULT_CHUNK_SIZE,
            peer_chunk_size: DEFAULT_CHUNK_SIZE,
            self_window: config.window_ack_size,
            peer_window: config.window_ack_size,
            bandwidth_limit: None,
            bytes_in: 0,
            bytes_out: 0,
            acked_in: 0,
            peer_acked: 0,
            partial: None,
            control: BytesMut::with_capacity(config.control_buffer_size),
            pending: VecDeque::new(),
            stats: ConnectionStats::new(),
            started: Instant::now(),
            chunk_handler: None,
            event_handler: None,
            log: Logger::new(Box::new(TracingSink), config.log_level),
            config,
        })
    }

    /// Set the handler receiving application chunks
    pub fn with_chunk_handler(mut self, handler: impl ChunkHandler + 'static) -> Self {
        self.chunk_handler = Some(Box::new(handler));
        self
    }

    /// Set the handler receiving lifecycle events
    pub fn with_event_handler(mut self, handler: impl EventHandler + 'static) -> Self {
        self.event_handler = Some(Box::new(handler));
        self
    }

    /// Replace the default `tracing` log sink
    pub fn with_log_sink(mut self, sink: impl LogSink + 'static) -> Self {
        self.log = Logger::new(Box::new(sink), self.config.log_level);
        self
    }

    pub fn set_log_level(&mut self, level: Severity) {
        self.log.set_level(level);
    }

    // === Transport side ===

    /// Free input space to read socket bytes into
    pub fn get_in_buffer(&mut self) -> &mut [u8] {
        self.in_buf.write_window()
    }

    /// Mark `n` bytes of the input window as received. Returns the number accepted.
    pub fn commit_in(&mut self, n: usize) -> usize {
        let n = self.in_buf.commit_write(n);
        self.bytes_in += n as u64;
        self.stats.bytes_received += n as u64;
        if n > 0 && self.in_buf.is_full() {
            self.notify(Event::BufferFilled);
        }
        n
    }

    /// Copy as much of `data` as fits into the input ring
    pub fn feed(&mut self, mut data: &[u8]) -> usize {
        let mut total = 0;
        while !data.is_empty() {
            let window = self.in_buf.write_window();
            let n = window.len().min(data.len());
            if n == 0 {
                break;
            }
            window[..n].copy_from_slice(&data[..n]);
            self.commit_in(n);
            data = &data[n..];
            total += n;
        }
        total
    }

    /// Pending output bytes to write to the socket
    pub fn get_out_buffer(&self) -> &[u8] {
        self.out_buf.read_window()
    }

    /// Mark `n` bytes of the output window as written. Returns the number taken.
    pub fn commit_out(&mut self, n: usize) -> usize {
        let n = self.out_buf.consume(n);
        self.bytes_out += n as u64;
        self.stats.bytes_sent += n as u64;
        if n > 0 && self.out_buf.is_empty() {
            self.notify(Event::BufferEmptied);
        }
        n
    }

    /// Bytes waiting in the output ring
    pub fn pending_output(&self) -> usize {
        self.out_buf.len()
    }

    // === State machine ===

    /// Process buffered input and queued output until no step makes progress.
    ///
    /// Running out of input bytes or output space is not an error. The first
    /// fatal error fails the connection; every later call then returns
    /// [`Error::ConnectionClosed`].
    pub fn service(&mut self) -> Result<()> {
        self.ensure_open()?;
        loop {
            match self.step() {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(e) if e.is_retryable() => return Ok(()),
                Err(e) => return Err(self.fail(e)),
            }
        }
    }

    fn step(&mut self) -> Result<bool> {
        if self.state == State::Handshaking {
            let now = self.clock();
            if self
                .handshake
                .step(&mut self.in_buf, &mut self.out_buf, now, &mut self.log)?
            {
                self.on_connected();
            }
            return Ok(true);
        }

        let mut progress = self.flush_pending()?;
        progress |= self.read_chunk()?;
        progress |= self.check_ack_window();
        Ok(progress)
    }

    fn on_connected(&mut self) {
        self.state = State::Open;
        self.stats.lag = self.handshake.lag();
        chunk_log!(
            self.log,
            Notice,
            Info,
            "handshake complete, lag {}ms",
            self.handshake.lag()
        );
        if self.config.chunk_size != DEFAULT_CHUNK_SIZE {
            self.pending
                .push_back(ControlMessage::SetChunkSize(self.config.chunk_size));
        }
        self.notify(Event::ConnectSuccess);
    }

    fn fail(&mut self, error: Error) -> Error {
        let handshaking = self.state == State::Handshaking;
        self.state = State::Failed;
        self.log.emit(
            Severity::Fatal,
            error.kind(),
            concat!(module_path!(), ":", line!()),
            format_args!("{}", error),
        );
        self.notify(if handshaking {
            Event::ConnectFail
        } else {
            Event::Failed
        });
        error
    }

    /// Close the connection. Further calls return [`Error::ConnectionClosed`].
    pub fn close(&mut self) {
        if self.ensure_open().is_ok() {
            self.state = State::Closed;
            self.notify(Event::Closed);
        }
    }

    /// Report that the transport lost the peer
    pub fn interrupted(&mut self) {
        if self.ensure_open().is_ok() {
            self.state = State::Closed;
            self.notify(Event::Interrupted);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            State::Closed | State::Failed => Err(Error::ConnectionClosed),
            _ => Ok(()),
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        self.ensure_open()?;
        if self.state == State::Handshaking {
            return Err(Error::Incomplete);
        }
        Ok(())
    }

    fn notify(&mut self, event: Event) {
        if let Some(handler) = self.event_handler.as_mut() {
            handler.on_event(event);
        }
    }

    fn clock(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    // === Receive path ===

    fn read_chunk(&mut self) -> Result<bool> {
        let mut progress = false;
        if self.partial.is_none() {
            if !self.read_header()? {
                return Ok(false);
            }
            progress = true;
        }
        Ok(self.read_payload()? || progress)
    }

    /// Decode the next chunk header. Returns false, consuming nothing, when
    /// the header is not fully buffered.
    fn read_header(&mut self) -> Result<bool> {
        let mut tx = self.in_buf.begin();
        let decoded = match decode_header(&mut self.in_cache, &mut *tx) {
            Ok(decoded) => decoded,
            Err(Error::Incomplete) => return Ok(false),
            Err(e) => return Err(e),
        };
        tx.commit();

        let (fmt, previous) = (decoded.fmt, decoded.previous);
        let csid = decoded.header.chunk_stream_id;
        let entry = self.in_cache.get(csid)?;
        let interrupted = fmt != CHUNK_FMT_3 && previous.in_flight();
        if interrupted {
            entry.processed = 0;
        }
        let starts_message = entry.processed == 0;
        if starts_message {
            entry.processed = entry.header.message_length;
        }
        let header = entry.header;
        let chunk_left = entry.processed.min(self.peer_chunk_size);
        self.stats.chunks_received += 1;

        if interrupted {
            chunk_log!(
                self.log,
                Warning,
                Warning,
                "chunk stream {} interrupted with {} bytes outstanding",
                csid,
                previous.processed
            );
            if !previous.header.is_control() {
                dispatch(&mut self.chunk_handler, &previous.header, &[], 0)?;
            }
        }

        if starts_message && header.is_control() {
            if header.message_length as usize > self.config.control_buffer_size {
                return Err(ProtocolError::ControlTooLarge {
                    size: header.message_length,
                    max: self.config.control_buffer_size,
                }
                .into());
            }
            self.control.clear();
        }

        self.partial = Some(Partial { header, chunk_left });
        Ok(true)
    }

    /// Hand on as much of the current chunk's payload as is buffered
    fn read_payload(&mut self) -> Result<bool> {
        let Some(mut partial) = self.partial else {
            return Ok(false);
        };
        let header = partial.header;

        let window = self.in_buf.read_window();
        let n = window.len().min(partial.chunk_left as usize);
        if n == 0 && partial.chunk_left > 0 {
            return Ok(false);
        }

        let entry = self.in_cache.get(header.chunk_stream_id)?;
        entry.processed -= n as u32;
        let remaining = entry.processed;

        let payload = &window[..n];
        if header.is_control() {
            self.control.extend_from_slice(payload);
        } else {
            dispatch(&mut self.chunk_handler, &header, payload, remaining)?;
        }
        self.in_buf.consume(n);

        partial.chunk_left -= n as u32;
        self.partial = if partial.chunk_left == 0 {
            None
        } else {
            Some(partial)
        };

        if remaining == 0 {
            self.stats.messages_received += 1;
            if header.is_control() {
                self.handle_control(&header)?;
            }
        }
        Ok(true)
    }

    fn handle_control(&mut self, header: &MessageHeader) -> Result<()> {
        let body = self.control.split();
        if !is_control_type(header.message_type) {
            let error = ProtocolError::UnexpectedMessage(format!(
                "type {} on the control stream",
                header.message_type
            ));
            chunk_log!(self.log, Warning, Warning, "{}, ignored", error);
            return Ok(());
        }

        let message = ControlMessage::decode(header.message_type, &body)?;
        chunk_log!(self.log, Debug, Info, "received {:?}", message);

        match message {
            ControlMessage::SetChunkSize(size) => {
                let clamped = size.clamp(self.config.min_chunk_size, self.config.max_chunk_size);
                if clamped != size {
                    chunk_log!(
                        self.log,
                        Warning,
                        Warning,
                        "peer chunk size {} clamped to {}",
                        size,
                        clamped
                    );
                }
                self.peer_chunk_size = clamped;
            }

            ControlMessage::Abort { csid } => self.abort_incoming(csid)?,

            ControlMessage::Acknowledgement { sequence } => {
                let delta = sequence.wrapping_sub(self.peer_acked) as u64;
                self.peer_acked = sequence;
                if delta > self.bytes_out {
                    chunk_log!(
                        self.log,
                        Warning,
                        Warning,
                        "peer acknowledged {} bytes with only {} outstanding",
                        delta,
                        self.bytes_out
                    );
                    self.bytes_out = 0;
                } else {
                    self.bytes_out -= delta;
                }
            }

            ControlMessage::WindowAckSize(size) => {
                self.peer_window = size;
                self.queue_ack();
            }

            ControlMessage::SetPeerBandwidth { size, limit } => {
                self.apply_peer_bandwidth(size, limit)
            }

            ControlMessage::UserControl(UserControlEvent::PingRequest(timestamp)) => {
                self.pending.push_back(ControlMessage::UserControl(
                    UserControlEvent::PingResponse(timestamp),
                ));
            }

            ControlMessage::UserControl(event) => {
                chunk_log!(self.log, Notice, Info, "user control {:?}", event);
            }
        }
        Ok(())
    }

    fn abort_incoming(&mut self, csid: u32) -> Result<()> {
        let in_flight = self.in_cache.peek(csid).map_or(false, |e| e.in_flight());
        if !in_flight {
            chunk_log!(self.log, Notice, Info, "abort for idle chunk stream {}", csid);
            return Ok(());
        }
        let entry = self.in_cache.get(csid)?;
        entry.processed = 0;
        let header = entry.header;
        chunk_log!(self.log, Notice, Info, "peer aborted chunk stream {}", csid);
        dispatch(&mut self.chunk_handler, &header, &[], 0)
    }

    fn apply_peer_bandwidth(&mut self, size: u32, limit: BandwidthLimit) {
        let applied = match limit {
            BandwidthLimit::Hard => Some(BandwidthLimit::Hard),
            BandwidthLimit::Soft if size < self.self_window => Some(BandwidthLimit::Soft),
            BandwidthLimit::Dynamic if self.bandwidth_limit == Some(BandwidthLimit::Hard) => {
                Some(BandwidthLimit::Hard)
            }
            _ => None,
        };
        let Some(applied) = applied else {
            chunk_log!(
                self.log,
                Debug,
                Info,
                "ignoring {:?} peer bandwidth {}",
                limit,
                size
            );
            return;
        };

        self.bandwidth_limit = Some(applied);
        if size != self.self_window {
            self.self_window = size;
            self.pending.push_back(ControlMessage::WindowAckSize(size));
        }
    }

    fn queue_ack(&mut self) {
        self.acked_in = self.bytes_in;
        self.pending.push_back(ControlMessage::Acknowledgement {
            sequence: self.bytes_in as u32,
        });
    }

    fn check_ack_window(&mut self) -> bool {
        if self.peer_window > 0 && self.bytes_in - self.acked_in >= self.peer_window as u64 {
            self.queue_ack();
            return true;
        }
        false
    }

    // === Send path ===

    fn flush_pending(&mut self) -> Result<bool> {
        let mut progress = false;
        while let Some(message) = self.pending.front().cloned() {
            match self.send_control(&message) {
                Ok(()) => {
                    self.pending.pop_front();
                    progress = true;
                }
                Err(Error::Incomplete) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(progress)
    }

    fn send_control(&mut self, message: &ControlMessage) -> Result<()> {
        let (message_type, body) = message.encode();
        let header = MessageHeader::new(
            CSID_PROTOCOL_CONTROL,
            MSID_CONTROL,
            message_type,
            0,
            body.len() as u32,
        );
        self.write_message(header, &body)?;

        match *message {
            ControlMessage::SetChunkSize(size) => self.self_chunk_size = size,
            ControlMessage::WindowAckSize(size) => self.self_window = size,
            ControlMessage::Acknowledgement { .. } => self.stats.acks_sent += 1,
            _ => {}
        }
        Ok(())
    }

    /// Fragment `data` into chunks and append them to the output ring.
    ///
    /// All or nothing: without room for every chunk nothing is written and
    /// [`Error::Incomplete`] is returned; retry once output was drained.
    /// Errors here concern the message, not the connection.
    pub fn send_message(
        &mut self,
        message_type: u8,
        chunk_stream_id: u32,
        message_stream_id: u32,
        timestamp: u32,
        data: &[u8],
    ) -> Result<()> {
        self.ensure_connected()?;
        if data.len() > MAX_MESSAGE_SIZE as usize {
            return Err(ProtocolError::MessageTooLarge {
                size: u32::try_from(data.len()).unwrap_or(u32::MAX),
                max: MAX_MESSAGE_SIZE,
            }
            .into());
        }
        let header = MessageHeader::new(
            chunk_stream_id,
            message_stream_id,
            message_type,
            timestamp,
            data.len() as u32,
        );
        self.write_message(header, data)
    }

    /// Like [`send_message`](Self::send_message) but picks the chunk stream
    /// whose cached header lets the most header bytes be omitted. Returns it.
    pub fn send_message_auto(
        &mut self,
        message_type: u8,
        message_stream_id: u32,
        timestamp: u32,
        data: &[u8],
    ) -> Result<u32> {
        let probe = MessageHeader::new(
            0,
            message_stream_id,
            message_type,
            timestamp,
            data.len() as u32,
        );
        let csid = self.out_cache.best_match(&probe);
        self.send_message(message_type, csid, message_stream_id, timestamp, data)?;
        Ok(csid)
    }

    fn write_message(&mut self, header: MessageHeader, data: &[u8]) -> Result<()> {
        validate_csid(header.chunk_stream_id)?;
        let chunk_size = self.self_chunk_size as usize;
        let chunks = data.len().div_ceil(chunk_size).max(1);

        let worst = data.len() + chunks * MAX_CHUNK_HEADER_SIZE;
        if worst > self.out_buf.capacity() {
            let size = self.out_buf.len() + worst;
            chunk_log!(
                self.log,
                Notice,
                Info,
                "growing output buffer to {} bytes",
                size
            );
            self.out_buf.resize(size)?;
        }

        let saved = *self.out_cache.get(header.chunk_stream_id)?;
        match write_chunks(
            &mut self.out_buf,
            &mut self.out_cache,
            &header,
            data,
            chunk_size,
        ) {
            Ok(()) => {
                self.stats.chunks_sent += chunks as u64;
                self.stats.messages_sent += 1;
                Ok(())
            }
            Err(e) => {
                *self.out_cache.get(header.chunk_stream_id)? = saved;
                Err(e)
            }
        }
    }

    /// Change the outbound chunk size, announcing it to the peer
    pub fn set_chunk_size(&mut self, size: u32) -> Result<()> {
        self.ensure_connected()?;
        let size = size.clamp(self.config.min_chunk_size, self.config.max_chunk_size);
        // a still queued announcement would override this one
        self.pending
            .retain(|m| !matches!(m, ControlMessage::SetChunkSize(_)));
        self.send_control(&ControlMessage::SetChunkSize(size))
    }

    /// Tell the peer to drop the partial message on `csid`
    pub fn send_abort(&mut self, csid: u32) -> Result<()> {
        self.ensure_connected()?;
        validate_csid(csid)?;
        self.send_control(&ControlMessage::Abort { csid })
    }

    /// Acknowledge every byte received so far
    pub fn send_ack(&mut self) -> Result<()> {
        self.ensure_connected()?;
        let sequence = self.bytes_in as u32;
        self.send_control(&ControlMessage::Acknowledgement { sequence })?;
        self.acked_in = self.bytes_in;
        Ok(())
    }

    /// Ask the peer to acknowledge every `size` bytes
    pub fn send_window_ack_size(&mut self, size: u32) -> Result<()> {
        self.ensure_connected()?;
        self.send_control(&ControlMessage::WindowAckSize(size))
    }

    /// Limit the peer's output window
    pub fn set_peer_bandwidth(&mut self, size: u32, limit: BandwidthLimit) -> Result<()> {
        self.ensure_connected()?;
        self.send_control(&ControlMessage::SetPeerBandwidth { size, limit })
    }

    pub fn send_user_control(&mut self, event: UserControlEvent) -> Result<()> {
        self.ensure_connected()?;
        self.send_control(&ControlMessage::UserControl(event))
    }

    /// Forget every cached chunk stream header in both directions
    pub fn reset_caches(&mut self) {
        self.in_cache.reset();
        self.out_cache.reset();
        self.partial = None;
        self.control.clear();
    }

    // === Accessors ===

    pub fn role(&self) -> HandshakeRole {
        self.handshake.role()
    }

    pub fn handshake_status(&self) -> HandshakeStatus {
        self.handshake.status()
    }

    /// Handshake done and not closed or failed
    pub fn is_connected(&self) -> bool {
        self.state == State::Open
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed | State::Failed)
    }

    pub fn self_chunk_size(&self) -> u32 {
        self.self_chunk_size
    }

    pub fn peer_chunk_size(&self) -> u32 {
        self.peer_chunk_size
    }

    pub fn self_window(&self) -> u32 {
        self.self_window
    }

    pub fn peer_window(&self) -> u32 {
        self.peer_window
    }

    /// Limit kind of the last peer bandwidth message applied
    pub fn bandwidth_limit(&self) -> Option<BandwidthLimit> {
        self.bandwidth_limit
    }

    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Bytes sent and not yet acknowledged
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    /// Round-trip lag measured by the handshake (ms)
    pub fn lag(&self) -> u32 {
        self.handshake.lag()
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            unacknowledged: self.bytes_out,
            lag: self.handshake.lag(),
            duration: self.started.elapsed(),
            ..self.stats.clone()
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role())
            .field("state", &self.state)
            .field("self_chunk_size", &self.self_chunk_size)
            .field("peer_chunk_size", &self.peer_chunk_size)
            .field("bytes_in", &self.bytes_in)
            .field("bytes_out", &self.bytes_out)
            .finish()
    }
}

fn dispatch(
    handler: &mut Option<Box<dyn ChunkHandler>>,
    header: &MessageHeader,
    payload: &[u8],
    remaining: u32,
) -> Result<()> {
    let Some(handler) = handler.as_mut() else {
        return Ok(());
    };
    match handler.on_chunk(header, payload, remaining) {
        Flow::Continue => Ok(()),
        Flow::Error => Err(Error::Rejected(format!(
            "message type {} on chunk stream {}",
            header.message_type, header.chunk_stream_id
        ))),
        Flow::Abort => Err(Error::Aborted),
    }
}

fn write_chunks(
    out: &mut RingBuffer,
    cache: &mut HeaderCache,
    header: &MessageHeader,
    data: &[u8],
    chunk_size: usize,
) -> Result<()> {
    let mut tx = out.begin();
    let mut head = BytesMut::with_capacity(MAX_CHUNK_HEADER_SIZE);
    let mut pieces = data.chunks(chunk_size);

    encode_header(cache, header, &mut head)?;
    tx.push(&head)?;
    tx.push(pieces.next().unwrap_or(&[]))?;

    for piece in pieces {
        head.clear();
        encode_continuation(cache, header.chunk_stream_id, &mut head)?;
        tx.push(&head)?;
        tx.push(piece)?;
    }

    tx.commit();
    Ok(())
}
