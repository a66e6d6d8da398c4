//! RTMP chunk stream protocol
//!
//! This module handles the wire-level details:
//! - Handshake (C0C1C2/S0S1S2 exchange)
//! - Chunk header compression and the per-stream header caches
//! - Protocol control messages and acknowledgement windows
//! - Chunk stream multiplexing and demultiplexing
//! - Optional reassembly of chunk pieces into whole messages

pub mod assembler;
pub mod cache;
pub mod connection;
pub mod constants;
pub mod control;
pub mod handshake;
pub mod header;

pub use assembler::{ChunkAssembler, MessageHandler};
pub use cache::HeaderCache;
pub use connection::{ChunkHandler, Connection, Event, EventHandler, Flow};
pub use control::{BandwidthLimit, ControlMessage, UserControlEvent};
pub use handshake::{Handshake, HandshakeRole, HandshakeStatus};
pub use header::MessageHeader;
