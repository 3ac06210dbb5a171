use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::allocator::BufferAllocator;

/// A reference-counted, contiguous byte region with a `(read_index,
/// write_index)` cursor pair.
///
/// `ChunkBuffer` is move-only: it releases its charge against its owning
/// [`BufferAllocator`] on drop. Call [`ChunkBuffer::share`] to obtain a
/// second handle over the same underlying bytes (a zero-copy `Bytes` clone)
/// when a stage genuinely needs to retain a reference while forwarding
/// another downstream.
#[derive(Debug)]
pub struct ChunkBuffer {
    data: BytesMut,
    read_index: usize,
    charged: usize,
    allocator: Arc<BufferAllocator>,
}

impl ChunkBuffer {
    pub(crate) fn new(capacity: usize, allocator: Arc<BufferAllocator>) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            read_index: 0,
            charged: capacity,
            allocator,
        }
    }

    /// Wraps pre-existing bytes as a single chunk, charging the allocator
    /// for their length. Used by storage reads and upload adapters that
    /// receive bytes from outside the pipeline's own allocator.
    pub fn from_bytes(bytes: Bytes, allocator: Arc<BufferAllocator>) -> Self {
        let len = bytes.len();
        allocator.charge(len);
        Self {
            data: BytesMut::from(&bytes[..]),
            read_index: 0,
            charged: len,
            allocator,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn write_index(&self) -> usize {
        self.data.len()
    }

    pub fn read_index(&self) -> usize {
        self.read_index
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.data.len() >= self.data.capacity()
    }

    pub fn has_unread(&self) -> bool {
        self.read_index < self.data.len()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.data.capacity() - self.data.len()
    }

    /// Appends as many bytes from `src` as fit in the remaining capacity,
    /// returning the count actually written.
    pub fn push_slice(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.remaining_capacity());
        self.data.extend_from_slice(&src[..n]);
        n
    }

    /// The unread portion of the buffer, from `read_index` to `write_index`.
    pub fn readable(&self) -> &[u8] {
        &self.data[self.read_index..]
    }

    pub fn advance_read(&mut self, n: usize) {
        self.read_index = (self.read_index + n).min(self.data.len());
    }

    /// Consumes this buffer into an immutable, cheaply-cloneable `Bytes`,
    /// covering only the unread portion.
    pub fn into_bytes(mut self) -> Bytes {
        let frozen = self.data.split_off(self.read_index).freeze();
        // Our own charge is released on drop below; the returned `Bytes` is
        // not tracked by this allocator since ownership has left the pipeline.
        frozen
    }

    /// A second handle over the same bytes, charging the allocator again:
    /// use only where the buffer is genuinely retained in two places at once.
    pub fn share(&self) -> ChunkBuffer {
        let frozen = Bytes::copy_from_slice(&self.data[..]);
        self.allocator.charge(frozen.len());
        ChunkBuffer {
            data: BytesMut::from(&frozen[..]),
            read_index: self.read_index,
            charged: frozen.len(),
            allocator: Arc::clone(&self.allocator),
        }
    }

    pub fn allocator(&self) -> &Arc<BufferAllocator> {
        &self.allocator
    }
}

impl Drop for ChunkBuffer {
    fn drop(&mut self) {
        self.allocator.release(self.charged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_slice_stops_at_capacity() {
        let allocator = BufferAllocator::new("REQ-test");
        let mut buf = allocator.allocate(4);
        let written = buf.push_slice(b"hello");
        assert_eq!(written, 4);
        assert!(buf.is_full());
        assert_eq!(buf.readable(), b"hell");
    }

    #[test]
    fn advance_read_tracks_unread_bytes() {
        let allocator = BufferAllocator::new("REQ-test");
        let mut buf = allocator.allocate(8);
        buf.push_slice(b"abcdefgh");
        assert!(buf.has_unread());
        buf.advance_read(8);
        assert!(!buf.has_unread());
    }

    #[test]
    fn drop_releases_the_full_charge() {
        let allocator = BufferAllocator::new("REQ-test");
        {
            let _buf = allocator.allocate(16);
            assert_eq!(allocator.retained(), 16);
        }
        assert_eq!(allocator.retained(), 0);
    }
}
