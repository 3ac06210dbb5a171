use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;

use trac_error::{Result, TracError};

use crate::allocator::BufferAllocator;
use crate::buffer::ChunkBuffer;

/// A lazy, finite sequence of [`ChunkBuffer`] values, produced and consumed
/// cooperatively by a codec, storage driver, or gRPC adapter.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChunkBuffer>> + Send>>;

/// Appends bytes from `src` into `target` (allocating one from `allocator`
/// if `target` is `None`). Each time `target` fills, it is delivered to
/// `sink` and a fresh chunk of `chunk_size` bytes is allocated in its place.
///
/// Returns the still-partial buffer, or `None` if `src` was empty and no
/// buffer was ever allocated. `write_to_stream` is semantically equivalent
/// to byte-for-byte concatenation of every delivered chunk followed by the
/// returned partial buffer. On error from `sink`, the in-flight buffer has
/// already been moved into `sink` and is `sink`'s responsibility; no buffer
/// held by this function is ever leaked.
pub async fn write_to_stream<S, Fut>(
    allocator: &Arc<BufferAllocator>,
    src: &[u8],
    target: Option<ChunkBuffer>,
    chunk_size: usize,
    mut sink: S,
) -> Result<Option<ChunkBuffer>>
where
    S: FnMut(ChunkBuffer) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut target = match target {
        Some(t) => t,
        None => allocator.allocate(chunk_size),
    };

    let mut offset = 0;
    while offset < src.len() {
        let written = target.push_slice(&src[offset..]);
        offset += written;

        if target.is_full() {
            sink(target).await?;
            target = allocator.allocate(chunk_size);
        }
    }

    Ok(Some(target))
}

/// Delivers `buffer` to `sink` if it has unread bytes; otherwise releases it.
/// Returns `None` in both cases: the buffer either now belongs to `sink` or
/// has been dropped.
pub async fn flush_stream<S, Fut>(buffer: Option<ChunkBuffer>, mut sink: S) -> Result<()>
where
    S: FnMut(ChunkBuffer) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    match buffer {
        Some(buf) if buf.has_unread() => sink(buf).await,
        Some(_buf) => Ok(()), // empty: release by dropping
        None => Ok(()),
    }
}

/// Releases `buffer` without delivering it anywhere.
pub fn close_stream(buffer: Option<ChunkBuffer>) {
    drop(buffer);
}

/// Consumes `src` fully, forwarding each chunk to `sink` in order and
/// releasing pipeline resources as it goes. On the first error from either
/// `src` or `sink`, remaining buffers already read from `src` are released
/// and the error propagates; no chunk is delivered twice.
pub async fn read_from_stream<S, Fut>(mut src: ChunkStream, mut sink: S) -> Result<()>
where
    S: FnMut(ChunkBuffer) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    use futures::StreamExt;

    while let Some(next) = src.next().await {
        let chunk = next.map_err(|err| match err {
            TracError::Cancelled => TracError::Cancelled,
            other => other,
        })?;
        sink(chunk).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::ready;

    #[tokio::test]
    async fn write_to_stream_is_byte_for_byte_concatenation() {
        let allocator = BufferAllocator::new("REQ-test");
        let delivered = std::sync::Mutex::new(Vec::new());

        let partial = write_to_stream(
            &allocator,
            b"hello world, this spans multiple chunks",
            None,
            8,
            |chunk| {
                delivered.lock().unwrap().extend_from_slice(chunk.readable());
                ready(Ok(()))
            },
        )
        .await
        .unwrap();

        let mut reconstructed = delivered.into_inner().unwrap();
        if let Some(partial) = partial {
            reconstructed.extend_from_slice(partial.readable());
        }
        assert_eq!(reconstructed, b"hello world, this spans multiple chunks");
    }

    #[tokio::test]
    async fn flush_then_close_never_leaks_or_double_releases() {
        let allocator = BufferAllocator::new("REQ-test");
        let mut buf = allocator.allocate(16);
        buf.push_slice(b"partial");

        flush_stream(Some(buf), |chunk| {
            assert_eq!(chunk.readable(), b"partial");
            ready(Ok(()))
        })
        .await
        .unwrap();

        assert_eq!(allocator.retained(), 0);

        let empty = allocator.allocate(16);
        flush_stream(Some(empty), |_| ready(Ok(()))).await.unwrap();
        assert_eq!(allocator.retained(), 0);

        close_stream(None);
    }
}
