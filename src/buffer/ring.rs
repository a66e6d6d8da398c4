//! Bounded circular byte FIFO
//!
//! The ring exposes its free space and its readable bytes as contiguous
//! windows so a transport can `read()` straight into it and `write()` straight
//! out of it without an intermediate copy:
//!
//! ```text
//!            head        start               tail
//!   +---------+-----------+-------------------+---------------+
//!   |  free   | consumed  |     readable      |     free      |
//!   |         | (in tx)   |                   |               |
//!   +---------+-----------+-------------------+---------------+
//! ```
//!
//! A [`Transaction`] freezes the ring: bytes consumed while it is open stay
//! protected from writes until it commits, so dropping the guard can restore
//! the exact pre-transaction framing.

use std::ops::{Deref, DerefMut};

use bytes::Buf;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
struct Snapshot {
    start: usize,
    len: usize,
    consumed: usize,
}

/// Circular byte buffer with zero-copy windows and transactional rollback
#[derive(Debug)]
pub struct RingBuffer {
    data: Vec<u8>,
    start: usize,
    len: usize,
    /// Bytes consumed inside the open transaction(s)
    consumed: usize,
    /// Open transaction nesting depth
    depth: usize,
}

impl RingBuffer {
    /// Create a ring holding at most `size` bytes
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size],
            start: 0,
            len: 0,
            consumed: 0,
            depth: 0,
        }
    }

    /// Total capacity in bytes
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Readable bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.free() == 0
    }

    /// Bytes that can be written right now
    pub fn free(&self) -> usize {
        self.capacity() - self.len - self.consumed
    }

    /// Whether a transaction is open
    pub fn is_frozen(&self) -> bool {
        self.depth > 0
    }

    /// Index of the first byte still owned by the ring (protected or readable)
    fn head(&self) -> usize {
        let size = self.capacity();
        if size == 0 {
            return 0;
        }
        (self.start + size - self.consumed) % size
    }

    fn tail(&self) -> usize {
        let size = self.capacity();
        if size == 0 {
            return 0;
        }
        (self.start + self.len) % size
    }

    /// Contiguous readable bytes starting at the read position
    pub fn read_window(&self) -> &[u8] {
        if self.len == 0 {
            return &[];
        }
        let end = (self.start + self.len).min(self.capacity());
        &self.data[self.start..end]
    }

    /// Contiguous free region starting at the write position
    pub fn write_window(&mut self) -> &mut [u8] {
        if self.free() == 0 {
            return &mut [];
        }
        let head = self.head();
        let tail = self.tail();
        if tail >= head {
            let size = self.capacity();
            &mut self.data[tail..size]
        } else {
            &mut self.data[tail..head]
        }
    }

    /// Mark `n` bytes of the write window as filled. Returns the number accepted.
    pub fn commit_write(&mut self, n: usize) -> usize {
        let n = n.min(self.free());
        self.len += n;
        n
    }

    /// Drop `n` readable bytes. Returns the number dropped.
    pub fn consume(&mut self, n: usize) -> usize {
        let n = n.min(self.len);
        if n == 0 {
            return 0;
        }
        self.start = (self.start + n) % self.capacity();
        self.len -= n;
        if self.depth > 0 {
            self.consumed += n;
        } else if self.len == 0 {
            self.start = 0;
        }
        n
    }

    /// Append all of `bytes` or nothing.
    pub fn push(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.free() {
            return Err(Error::Incomplete);
        }
        let mut written = 0;
        while written < bytes.len() {
            let window = self.write_window();
            let n = window.len().min(bytes.len() - written);
            window[..n].copy_from_slice(&bytes[written..written + n]);
            self.commit_write(n);
            written += n;
        }
        Ok(())
    }

    /// Readable byte at `offset` from the read position
    pub fn peek(&self, offset: usize) -> Option<u8> {
        if offset >= self.len {
            return None;
        }
        Some(self.data[(self.start + offset) % self.capacity()])
    }

    /// Copy readable bytes starting at `offset` into `dst` without consuming.
    /// Returns false when fewer than `offset + dst.len()` bytes are readable.
    pub fn copy_out(&self, offset: usize, dst: &mut [u8]) -> bool {
        if offset + dst.len() > self.len {
            return false;
        }
        if dst.is_empty() {
            return true;
        }
        let size = self.capacity();
        let from = (self.start + offset) % size;
        let first = dst.len().min(size - from);
        dst[..first].copy_from_slice(&self.data[from..from + first]);
        let rest = dst.len() - first;
        dst[first..].copy_from_slice(&self.data[..rest]);
        true
    }

    /// Discard all content
    pub fn clear(&mut self) {
        self.start = 0;
        self.len = 0;
        self.consumed = 0;
    }

    /// Grow (or shrink) the ring, keeping readable bytes in order.
    ///
    /// Fails while a transaction is open or if `size` cannot hold the content.
    pub fn resize(&mut self, size: usize) -> Result<()> {
        if self.depth > 0 {
            return Err(Error::Resource("ring buffer resized inside a transaction".into()));
        }
        if size < self.len {
            return Err(Error::Resource(format!(
                "ring buffer of {} bytes cannot hold {} buffered bytes",
                size, self.len
            )));
        }
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|e| Error::Resource(format!("ring buffer allocation failed: {}", e)))?;
        data.resize(size, 0);
        self.copy_out(0, &mut data[..self.len]);
        self.data = data;
        self.start = 0;
        Ok(())
    }

    /// Open a transaction. Changes made through the guard are kept only if
    /// [`Transaction::commit`] is called.
    pub fn begin(&mut self) -> Transaction<'_> {
        let snapshot = Snapshot {
            start: self.start,
            len: self.len,
            consumed: self.consumed,
        };
        self.depth += 1;
        Transaction {
            ring: self,
            snapshot,
            committed: false,
        }
    }

    fn end(&mut self, snapshot: Snapshot, committed: bool) {
        if !committed {
            self.start = snapshot.start;
            self.len = snapshot.len;
            self.consumed = snapshot.consumed;
        }
        self.depth -= 1;
        if self.depth == 0 {
            self.consumed = 0;
            if self.len == 0 {
                self.start = 0;
            }
        }
    }
}

impl Buf for RingBuffer {
    fn remaining(&self) -> usize {
        self.len
    }

    fn chunk(&self) -> &[u8] {
        self.read_window()
    }

    fn advance(&mut self, cnt: usize) {
        self.consume(cnt);
    }
}

/// All-or-nothing view over a [`RingBuffer`]
///
/// Dropping the guard without calling [`commit`](Transaction::commit) restores
/// the ring to its state at [`RingBuffer::begin`].
#[derive(Debug)]
pub struct Transaction<'a> {
    ring: &'a mut RingBuffer,
    snapshot: Snapshot,
    committed: bool,
}

impl Transaction<'_> {
    /// Keep every change made through this guard
    pub fn commit(mut self) {
        self.committed = true;
    }

    /// Discard every change made through this guard
    pub fn rollback(self) {}

    /// Bytes written since the transaction was opened
    pub fn written(&self) -> usize {
        (self.ring.len + self.ring.consumed).saturating_sub(self.snapshot.len + self.snapshot.consumed)
    }
}

impl Deref for Transaction<'_> {
    type Target = RingBuffer;

    fn deref(&self) -> &RingBuffer {
        self.ring
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut RingBuffer {
        self.ring
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.ring.end(self.snapshot, self.committed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(ring: &mut RingBuffer) -> Vec<u8> {
        let mut out = vec![0u8; ring.len()];
        assert!(ring.copy_out(0, &mut out));
        ring.consume(out.len());
        out
    }

    #[test]
    fn test_push_and_read() {
        let mut ring = RingBuffer::new(8);
        ring.push(b"hello").unwrap();
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.free(), 3);
        assert_eq!(ring.read_window(), b"hello");
        assert_eq!(drain(&mut ring), b"hello");
        assert!(ring.is_empty());
    }

    #[test]
    fn test_push_is_all_or_nothing() {
        let mut ring = RingBuffer::new(4);
        ring.push(b"abc").unwrap();
        assert!(matches!(ring.push(b"de"), Err(Error::Incomplete)));
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_wraparound_windows() {
        let mut ring = RingBuffer::new(8);
        ring.push(b"123456").unwrap();
        ring.consume(4);
        // tail at 6, head at 4: window runs to the end of storage first
        assert_eq!(ring.write_window().len(), 2);
        ring.push(b"abcd").unwrap();
        assert_eq!(ring.len(), 6);
        // readable bytes straddle the end of storage
        assert_eq!(ring.read_window(), b"56ab");
        assert_eq!(drain(&mut ring), b"56abcd");
    }

    #[test]
    fn test_buf_reads_across_wrap() {
        let mut ring = RingBuffer::new(6);
        ring.push(b"xxxxx").unwrap();
        ring.consume(4);
        ring.push(&[0x00, 0x00, 0x01, 0x02]).unwrap();
        ring.consume(1);
        assert_eq!(ring.read_window().len(), 1);
        assert_eq!(ring.get_u32(), 0x0102);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_transaction_rollback_restores_reads() {
        let mut ring = RingBuffer::new(8);
        ring.push(b"abcdef").unwrap();
        {
            let mut tx = ring.begin();
            tx.consume(4);
            assert_eq!(tx.len(), 2);
        }
        assert_eq!(ring.len(), 6);
        assert_eq!(ring.read_window(), b"abcdef");
    }

    #[test]
    fn test_transaction_rollback_restores_writes() {
        let mut ring = RingBuffer::new(8);
        ring.push(b"ab").unwrap();
        let mut tx = ring.begin();
        tx.push(b"cde").unwrap();
        assert_eq!(tx.written(), 3);
        tx.rollback();
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.free(), 6);
    }

    #[test]
    fn test_transaction_protects_consumed_bytes() {
        let mut ring = RingBuffer::new(4);
        ring.push(b"abcd").unwrap();
        let mut tx = ring.begin();
        tx.consume(4);
        // consumed bytes must survive a rollback, so nothing is writable yet
        assert_eq!(tx.free(), 0);
        assert!(tx.push(b"z").is_err());
        drop(tx);
        assert_eq!(drain(&mut ring), b"abcd");
    }

    #[test]
    fn test_transaction_commit() {
        let mut ring = RingBuffer::new(4);
        ring.push(b"abcd").unwrap();
        let mut tx = ring.begin();
        tx.consume(3);
        tx.commit();
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.free(), 3);
    }

    #[test]
    fn test_nested_transaction() {
        let mut ring = RingBuffer::new(8);
        ring.push(b"abcdef").unwrap();
        let mut outer = ring.begin();
        outer.consume(1);
        {
            let mut inner = outer.begin();
            inner.consume(2);
        }
        assert_eq!(outer.len(), 5);
        outer.commit();
        assert_eq!(ring.read_window(), b"bcdef");
    }

    #[test]
    fn test_resize_keeps_order() {
        let mut ring = RingBuffer::new(4);
        ring.push(b"abc").unwrap();
        ring.consume(2);
        ring.push(b"def").unwrap();
        ring.resize(16).unwrap();
        assert_eq!(ring.capacity(), 16);
        assert_eq!(ring.read_window(), b"cdef");
        assert!(ring.resize(2).is_err());
    }

    #[test]
    fn test_resize_refused_in_transaction() {
        let mut ring = RingBuffer::new(4);
        let mut tx = ring.begin();
        assert!(tx.resize(8).is_err());
    }
}
