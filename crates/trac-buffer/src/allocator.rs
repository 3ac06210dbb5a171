use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::buffer::ChunkBuffer;

/// Tracks peak and retained byte counts for one request's buffer pipeline.
///
/// Every [`ChunkBuffer`] charged against an allocator must eventually be
/// released (dropped) exactly once; `retained()` reading non-zero at stream
/// close is a leak, and callers are expected to assert on it in tests rather
/// than rely on a runtime detector.
#[derive(Debug)]
pub struct BufferAllocator {
    name: String,
    retained: AtomicUsize,
    peak: AtomicUsize,
}

impl BufferAllocator {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            retained: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    /// Allocates a fresh, empty chunk of the given capacity, charged against
    /// this allocator.
    pub fn allocate(self: &Arc<Self>, capacity: usize) -> ChunkBuffer {
        self.charge(capacity);
        ChunkBuffer::new(capacity, Arc::clone(self))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn retained(&self) -> usize {
        self.retained.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub(crate) fn charge(&self, n: usize) {
        let now = self.retained.fetch_add(n, Ordering::SeqCst) + n;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub(crate) fn release(&self, n: usize) {
        self.retained.fetch_sub(n, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_tracks_the_high_water_mark_even_after_release() {
        let allocator = BufferAllocator::new("REQ-test");
        let a = allocator.allocate(64);
        let b = allocator.allocate(64);
        assert_eq!(allocator.retained(), 128);
        assert_eq!(allocator.peak(), 128);
        drop(a);
        assert_eq!(allocator.retained(), 64);
        assert_eq!(allocator.peak(), 128);
        drop(b);
        assert_eq!(allocator.retained(), 0);
    }
}
