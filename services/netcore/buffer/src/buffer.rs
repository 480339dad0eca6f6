//! Contiguous byte area with amortized O(1) front consumption.

use bytes::buf::Limit;
use bytes::{Buf, BufMut, Bytes};
use std::fmt;

/// Minimum dead prefix (in bytes) before `consume` bothers to compact
pub const COMPACT_THRESHOLD: usize = 4096;

/// Growable byte buffer.
///
/// Bytes are appended at the tail and consumed from the head. Consuming only
/// advances a head offset; the dead prefix is reclaimed lazily, either when
/// the buffer drains completely, when it grows to at least half of the stored
/// bytes, or when `reserve` needs room at the tail.
#[derive(Clone, Default)]
pub struct ByteBuffer {
    data: Vec<u8>,
    head: usize,
}

impl ByteBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer with room for `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            head: 0,
        }
    }

    /// Number of unconsumed bytes
    pub fn len(&self) -> usize {
        self.data.len() - self.head
    }

    /// Whether there are no unconsumed bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total allocated storage, including the dead prefix
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Unconsumed bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.head..]
    }

    /// Alias of [`ByteBuffer::as_slice`]
    pub fn data(&self) -> &[u8] {
        self.as_slice()
    }

    /// Append bytes at the tail
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Drop up to `count` bytes from the head, returning how many were dropped
    pub fn consume(&mut self, count: usize) -> usize {
        let count = count.min(self.len());
        self.head += count;

        if self.head == self.data.len() {
            self.data.clear();
            self.head = 0;
        } else if self.head >= COMPACT_THRESHOLD && self.head * 2 >= self.data.len() {
            self.compact();
        }

        count
    }

    /// Make sure at least `additional` bytes are free after the tail
    pub fn reserve(&mut self, additional: usize) {
        if self.data.capacity() - self.data.len() >= additional {
            return;
        }
        self.compact();
        self.data.reserve(additional);
    }

    /// Drop every byte and reset the head offset
    pub fn clear(&mut self) {
        self.data.clear();
        self.head = 0;
    }

    /// Writable view over at most `max` bytes of free tail.
    ///
    /// Bytes written through the view become part of the unconsumed region.
    /// Call [`ByteBuffer::reserve`] first so the view does not need to grow.
    pub fn writable(&mut self, max: usize) -> Limit<&mut Vec<u8>> {
        (&mut self.data).limit(max)
    }

    /// Owned copy of the unconsumed bytes
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_slice())
    }

    fn compact(&mut self) {
        if self.head > 0 {
            self.data.drain(..self.head);
            self.head = 0;
        }
    }
}

impl Buf for ByteBuffer {
    fn remaining(&self) -> usize {
        self.len()
    }

    fn chunk(&self) -> &[u8] {
        self.as_slice()
    }

    fn advance(&mut self, cnt: usize) {
        assert!(
            cnt <= self.len(),
            "cannot advance past remaining: {} > {}",
            cnt,
            self.len()
        );
        self.consume(cnt);
    }
}

impl From<&[u8]> for ByteBuffer {
    fn from(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec(),
            head: 0,
        }
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("len", &self.len())
            .field("head", &self.head)
            .field("capacity", &self.capacity())
            .finish()
    }
}
