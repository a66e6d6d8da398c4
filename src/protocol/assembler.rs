//! Message reassembly on top of the chunk handler
//!
//! A [`Connection`](crate::protocol::Connection) delivers payload as it
//! arrives, one chunk piece at a time, with chunks of different messages
//! interleaved. [`ChunkAssembler`] collects the pieces of each
//! (chunk stream, message stream) pair in a pooled ring and hands whole
//! messages to a [`MessageHandler`].
//!
//! The pool keeps `soft_pool_size` slots warm. It grows on demand up to
//! `hard_pool_size`; a message starting while every slot is busy takes over
//! the slot filled least recently, and the message it held is dropped.

use crate::buffer::RingBuffer;
use crate::config::AssemblerConfig;
use crate::protocol::connection::{ChunkHandler, Flow};
use crate::protocol::header::MessageHeader;

/// Receives whole messages
pub trait MessageHandler: Send {
    fn on_message(&mut self, header: &MessageHeader, payload: &[u8]) -> Flow;
}

impl<F> MessageHandler for F
where
    F: FnMut(&MessageHeader, &[u8]) -> Flow + Send,
{
    fn on_message(&mut self, header: &MessageHeader, payload: &[u8]) -> Flow {
        self(header, payload)
    }
}

/// Reassembly buffer for one message. Chunk stream 0 marks a free slot.
#[derive(Debug)]
struct Slot {
    chunk_stream_id: u32,
    message_stream_id: u32,
    buffer: RingBuffer,
    /// Assembler tick of the last piece stored
    filled_at: u64,
}

impl Slot {
    fn is_free(&self) -> bool {
        self.chunk_stream_id == 0
    }

    fn release(&mut self) {
        self.chunk_stream_id = 0;
        self.message_stream_id = 0;
        self.buffer.clear();
    }
}

/// Chunk handler rebuilding whole messages
#[derive(Debug)]
pub struct ChunkAssembler<H> {
    config: AssemblerConfig,
    slots: Vec<Slot>,
    ticks: u64,
    handler: H,
}

impl<H: MessageHandler> ChunkAssembler<H> {
    pub fn new(config: AssemblerConfig, handler: H) -> Self {
        Self {
            slots: Vec::with_capacity(config.soft_pool_size),
            ticks: 0,
            config,
            handler,
        }
    }

    /// Slots currently allocated, busy or free
    pub fn pool_len(&self) -> usize {
        self.slots.len()
    }

    /// Messages currently being reassembled
    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_free()).count()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    fn find(&self, header: &MessageHeader) -> Option<usize> {
        self.slots.iter().position(|s| {
            s.chunk_stream_id == header.chunk_stream_id
                && s.message_stream_id == header.message_stream_id
        })
    }

    /// Grant a slot able to hold `header`'s message, taking over the least
    /// recently filled one when the pool is at its hard limit
    fn acquire(&mut self, header: &MessageHeader) -> Option<usize> {
        let size = header.message_length as usize;
        let index = match self.slots.iter().position(Slot::is_free) {
            Some(index) => index,
            None if self.slots.len() < self.config.hard_pool_size => {
                self.slots.push(Slot {
                    chunk_stream_id: 0,
                    message_stream_id: 0,
                    buffer: RingBuffer::new(size),
                    filled_at: 0,
                });
                self.slots.len() - 1
            }
            None => {
                let index = self
                    .slots
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, s)| s.filled_at)
                    .map(|(index, _)| index)?;
                let victim = &mut self.slots[index];
                tracing::warn!(
                    csid = victim.chunk_stream_id,
                    msid = victim.message_stream_id,
                    dropped = victim.buffer.len(),
                    new_csid = header.chunk_stream_id,
                    "Reassembly pool full, dropping the least recently filled message"
                );
                victim.release();
                index
            }
        };

        let slot = &mut self.slots[index];
        if slot.buffer.capacity() < size {
            if let Err(e) = slot.buffer.resize(size) {
                tracing::warn!(error = %e, size, "Cannot grow reassembly buffer");
                return None;
            }
        }
        slot.chunk_stream_id = header.chunk_stream_id;
        slot.message_stream_id = header.message_stream_id;
        Some(index)
    }

    /// Free a slot, shrinking the pool back towards its warm size
    fn release(&mut self, index: usize) {
        if self.slots.len() > self.config.soft_pool_size {
            self.slots.swap_remove(index);
        } else {
            self.slots[index].release();
        }
    }
}

impl<H: MessageHandler> ChunkHandler for ChunkAssembler<H> {
    fn on_chunk(&mut self, header: &MessageHeader, payload: &[u8], remaining: u32) -> Flow {
        let first_piece = payload.len() as u64 + remaining as u64 == header.message_length as u64;

        let index = match self.find(header) {
            Some(index) if payload.is_empty() && remaining == 0 => {
                tracing::debug!(
                    csid = header.chunk_stream_id,
                    msid = header.message_stream_id,
                    "Discarding aborted message"
                );
                self.release(index);
                return Flow::Continue;
            }
            Some(index) if first_piece && !self.slots[index].buffer.is_empty() => {
                // stale partial message on the same pair
                tracing::warn!(
                    csid = header.chunk_stream_id,
                    msid = header.message_stream_id,
                    dropped = self.slots[index].buffer.len(),
                    "Reclaiming reassembly slot of an unfinished message"
                );
                self.slots[index].buffer.clear();
                index
            }
            Some(index) => index,
            None if !first_piece => {
                // the rest of a message whose slot was taken over
                tracing::debug!(
                    csid = header.chunk_stream_id,
                    msid = header.message_stream_id,
                    remaining,
                    "Dropping piece of a discarded message"
                );
                return Flow::Continue;
            }
            None if remaining == 0 => {
                // arrived complete in one piece
                return self.handler.on_message(header, payload);
            }
            None => {
                if header.message_length > self.config.max_message_size {
                    tracing::warn!(
                        size = header.message_length,
                        max = self.config.max_message_size,
                        "Message too large to reassemble"
                    );
                    return Flow::Error;
                }
                match self.acquire(header) {
                    Some(index) => index,
                    None => {
                        tracing::warn!(
                            csid = header.chunk_stream_id,
                            pool = self.slots.len(),
                            "No reassembly slot available"
                        );
                        return Flow::Error;
                    }
                }
            }
        };

        self.ticks += 1;
        let slot = &mut self.slots[index];
        slot.filled_at = self.ticks;
        if slot.buffer.push(payload).is_err() {
            tracing::warn!(
                csid = header.chunk_stream_id,
                size = header.message_length,
                "Chunk overruns its message length"
            );
            self.release(index);
            return Flow::Error;
        }
        if remaining > 0 {
            return Flow::Continue;
        }

        let flow = {
            let slot = &self.slots[index];
            let body = slot.buffer.read_window();
            debug_assert_eq!(body.len(), slot.buffer.len());
            self.handler.on_message(header, body)
        };
        self.release(index);
        flow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::*;

    type Received = Vec<(MessageHeader, Vec<u8>)>;

    fn assembler(soft: usize, hard: usize) -> ChunkAssembler<impl MessageHandler> {
        let mut received: Received = Vec::new();
        ChunkAssembler::new(
            AssemblerConfig::default().pool_size(soft, hard),
            move |h: &MessageHeader, p: &[u8]| {
                received.push((*h, p.to_vec()));
                Flow::Continue
            },
        )
    }

    struct Collect(Received);

    impl MessageHandler for Collect {
        fn on_message(&mut self, header: &MessageHeader, payload: &[u8]) -> Flow {
            self.0.push((*header, payload.to_vec()));
            Flow::Continue
        }
    }

    fn collecting(soft: usize, hard: usize) -> ChunkAssembler<Collect> {
        ChunkAssembler::new(AssemblerConfig::default().pool_size(soft, hard), Collect(Vec::new()))
    }

    #[test]
    fn test_interleaved_messages() {
        let mut asm = collecting(2, 4);
        let video = MessageHeader::new(6, 1, MSG_VIDEO, 0, 6);
        let audio = MessageHeader::new(4, 1, MSG_AUDIO, 0, 4);

        assert_eq!(asm.on_chunk(&video, b"abc", 3), Flow::Continue);
        assert_eq!(asm.on_chunk(&audio, b"wx", 2), Flow::Continue);
        assert_eq!(asm.in_use(), 2);
        assert_eq!(asm.on_chunk(&video, b"def", 0), Flow::Continue);
        assert_eq!(asm.on_chunk(&audio, b"yz", 0), Flow::Continue);

        let received = &asm.handler().0;
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].1, b"abcdef");
        assert_eq!(received[1].1, b"wxyz");
        assert_eq!(asm.in_use(), 0);
        assert_eq!(asm.pool_len(), 2);
    }

    #[test]
    fn test_single_piece_bypasses_pool() {
        let mut asm = collecting(1, 1);
        let h = MessageHeader::new(3, 0, MSG_COMMAND_AMF0, 0, 5);
        assert_eq!(asm.on_chunk(&h, b"hello", 0), Flow::Continue);
        let empty = MessageHeader::new(3, 0, MSG_DATA_AMF0, 0, 0);
        assert_eq!(asm.on_chunk(&empty, &[], 0), Flow::Continue);

        assert_eq!(asm.pool_len(), 0);
        assert_eq!(asm.handler().0.len(), 2);
        assert!(asm.handler().0[1].1.is_empty());
    }

    #[test]
    fn test_discard_notice_releases_slot() {
        let mut asm = collecting(1, 2);
        let h = MessageHeader::new(5, 1, MSG_VIDEO, 0, 10);
        asm.on_chunk(&h, b"12345", 5);
        assert_eq!(asm.in_use(), 1);

        assert_eq!(asm.on_chunk(&h, &[], 0), Flow::Continue);
        assert_eq!(asm.in_use(), 0);
        assert!(asm.handler().0.is_empty());
    }

    #[test]
    fn test_hard_limit_takes_over_least_recent_slot() {
        let mut asm = collecting(1, 2);
        for csid in [3, 4] {
            let h = MessageHeader::new(csid, 1, MSG_VIDEO, 0, 10);
            assert_eq!(asm.on_chunk(&h, b"12345", 5), Flow::Continue);
        }
        // csid 4 was filled after csid 3, so 3 is dropped for 5
        let third = MessageHeader::new(5, 1, MSG_VIDEO, 0, 10);
        assert_eq!(asm.on_chunk(&third, b"abcde", 5), Flow::Continue);
        assert_eq!(asm.pool_len(), 2);
        assert_eq!(asm.in_use(), 2);

        // the rest of the dropped message is ignored, not delivered truncated
        let first = MessageHeader::new(3, 1, MSG_VIDEO, 0, 10);
        assert_eq!(asm.on_chunk(&first, b"67890", 0), Flow::Continue);
        assert!(asm.handler().0.is_empty());

        assert_eq!(asm.on_chunk(&third, b"fghij", 0), Flow::Continue);
        let second = MessageHeader::new(4, 1, MSG_VIDEO, 0, 10);
        assert_eq!(asm.on_chunk(&second, b"67890", 0), Flow::Continue);

        let received = &asm.handler().0;
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].0.chunk_stream_id, 5);
        assert_eq!(received[0].1, b"abcdefghij");
        assert_eq!(received[1].0.chunk_stream_id, 4);
        assert_eq!(received[1].1, b"1234567890");
        assert_eq!(asm.pool_len(), 1);
    }

    #[test]
    fn test_empty_pool_rejects_split_messages() {
        let mut asm = collecting(0, 0);
        let h = MessageHeader::new(3, 1, MSG_VIDEO, 0, 10);
        assert_eq!(asm.on_chunk(&h, b"12345", 5), Flow::Error);

        // whole messages still bypass the pool
        let whole = MessageHeader::new(4, 1, MSG_AUDIO, 0, 2);
        assert_eq!(asm.on_chunk(&whole, b"ok", 0), Flow::Continue);
        assert_eq!(asm.handler().0.len(), 1);
    }

    #[test]
    fn test_stale_slot_is_reclaimed() {
        let mut asm = collecting(1, 1);
        let h = MessageHeader::new(3, 1, MSG_VIDEO, 0, 6);
        asm.on_chunk(&h, b"old", 3);

        let fresh = MessageHeader::new(3, 1, MSG_VIDEO, 40, 6);
        asm.on_chunk(&fresh, b"new", 3);
        asm.on_chunk(&fresh, b"abc", 0);

        let received = &asm.handler().0;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0.timestamp, 40);
        assert_eq!(received[0].1, b"newabc");
    }

    #[test]
    fn test_oversized_message_rejected() {
        let mut asm = ChunkAssembler::new(
            AssemblerConfig::default().max_message_size(8),
            Collect(Vec::new()),
        );
        let h = MessageHeader::new(3, 1, MSG_VIDEO, 0, 9);
        assert_eq!(asm.on_chunk(&h, b"1234", 5), Flow::Error);
    }

    #[test]
    fn test_overrun_rejected() {
        let mut asm = collecting(1, 1);
        let h = MessageHeader::new(3, 1, MSG_VIDEO, 0, 4);
        asm.on_chunk(&h, b"12", 2);
        assert_eq!(asm.on_chunk(&h, b"345", 0), Flow::Error);
        assert_eq!(asm.in_use(), 0);
    }

    #[test]
    fn test_closure_handler() {
        let mut asm = assembler(1, 1);
        let h = MessageHeader::new(3, 1, MSG_AUDIO, 0, 2);
        assert_eq!(asm.on_chunk(&h, b"a", 1), Flow::Continue);
        assert_eq!(asm.on_chunk(&h, b"b", 0), Flow::Continue);
    }
}
