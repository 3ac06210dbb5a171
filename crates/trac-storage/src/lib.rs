//! Asynchronous chunked read/write against a local-filesystem storage
//! backend, with bounded buffers, partial-failure cleanup, and advisory
//! file locking.

mod backend;
mod local;
mod lock;

pub use backend::{StorageBackend, WriteOutcome};
pub use local::LocalStorageBackend;
pub use lock::{acquire, acquire_blocking, FileLockGuard, LockMode};

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use futures::stream;

    use trac_buffer::BufferAllocator;

    use super::*;

    fn backend(dir: &std::path::Path) -> LocalStorageBackend {
        let mut buckets = HashMap::new();
        buckets.insert("default".to_string(), dir.to_path_buf());
        LocalStorageBackend::new(buckets)
    }

    #[tokio::test]
    async fn write_then_read_round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());

        let allocator = BufferAllocator::new("REQ-test");
        let mut chunk = allocator.allocate(5);
        chunk.push_slice(b"hello");
        let input: trac_buffer::ChunkStream = Box::pin(stream::iter(vec![Ok(chunk)]));

        let outcome = backend.write("default", "data/1/1.bin", input).await.unwrap();
        assert_eq!(outcome.bytes_written, 5);

        let mut read_stream = backend.read("default", "data/1/1.bin").await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = futures::StreamExt::next(&mut read_stream).await {
            collected.extend_from_slice(chunk.unwrap().readable());
        }
        assert_eq!(collected, b"hello");
    }

    #[tokio::test]
    async fn write_fails_if_the_path_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());

        let allocator = BufferAllocator::new("REQ-test");
        let mut chunk = allocator.allocate(1);
        chunk.push_slice(b"a");
        let input: trac_buffer::ChunkStream = Box::pin(stream::iter(vec![Ok(chunk)]));
        backend.write("default", "x.bin", input).await.unwrap();

        let allocator2 = BufferAllocator::new("REQ-test-2");
        let mut chunk2 = allocator2.allocate(1);
        chunk2.push_slice(b"b");
        let input2: trac_buffer::ChunkStream = Box::pin(stream::iter(vec![Ok(chunk2)]));
        let err = backend.write("default", "x.bin", input2).await.unwrap_err();
        assert!(matches!(err, trac_error::TracError::DataConstraint(_)));
    }

    #[tokio::test]
    async fn a_failed_write_leaves_no_partial_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());

        let allocator = BufferAllocator::new("REQ-test");
        let mut good = allocator.allocate(1);
        good.push_slice(b"a");
        let failing = Box::pin(stream::iter(vec![
            Ok(good),
            Err(trac_error::TracError::Cancelled),
        ]));

        let err = backend.write("default", "partial.bin", failing).await.unwrap_err();
        assert!(matches!(err, trac_error::TracError::Cancelled));
        assert!(!dir.path().join("partial.bin").exists());
    }
}
