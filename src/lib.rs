//! rtmp-chunk: RTMP chunk stream engine
//!
//! This library implements the transport layer underneath RTMP:
//! - Client and server handshake with optional echo verification
//! - Chunk fragmentation and header compression on send
//! - Chunk demultiplexing with streaming payload delivery on receive
//! - Protocol control messages (chunk size, abort, acknowledgement windows,
//!   peer bandwidth, ping)
//! - Pooled reassembly of whole messages for handlers that want them
//!
//! The [`Connection`] never touches a socket. The caller moves bytes in and
//! out of its buffers and calls [`Connection::service`]; [`Transport`] does
//! that over any tokio stream.
//!
//! # Example: Echo message sizes
//!
//! ```no_run
//! use rtmp_chunk::{ChunkAssembler, Connection, ConnectionConfig, Flow, MessageHeader, Transport};
//! use rtmp_chunk::config::AssemblerConfig;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = TcpListener::bind("0.0.0.0:1935").await?;
//!     let (socket, _) = listener.accept().await?;
//!
//!     let assembler = ChunkAssembler::new(
//!         AssemblerConfig::default(),
//!         |header: &MessageHeader, payload: &[u8]| {
//!             println!("message type {} with {} bytes", header.message_type, payload.len());
//!             Flow::Continue
//!         },
//!     );
//!     let conn = Connection::server(ConnectionConfig::default())?.with_chunk_handler(assembler);
//!
//!     let mut transport = Transport::new(socket, conn);
//!     transport.handshake().await?;
//!     transport.run().await?;
//!     Ok(())
//! }
//! ```

pub mod log;

pub mod buffer;
pub mod config;
pub mod error;
pub mod protocol;
pub mod stats;
pub mod transport;

// Re-export main types for convenience
pub use config::{AssemblerConfig, ConnectionConfig};
pub use error::{Error, ErrorKind, Result};
pub use log::{LogSink, Severity, TracingSink};
pub use protocol::{
    ChunkAssembler, ChunkHandler, Connection, Event, EventHandler, Flow, MessageHandler,
    MessageHeader,
};
pub use stats::ConnectionStats;
pub use transport::Transport;
