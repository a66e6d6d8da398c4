//! Byte buffers shared by the connection and the assembler

pub mod ring;

pub use ring::{RingBuffer, Transaction};
