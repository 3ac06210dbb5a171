use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tonic::Streaming;

use trac_buffer::{BufferAllocator, ChunkStream};
use trac_error::{Result, TracError};

/// A write-request message whose `content` bytes this adapter needs to pull
/// out into the data stream; every `*WriteRequest` proto message implements
/// this the same way.
pub trait WriteChunk {
    fn content(&self) -> &[u8];
}

impl WriteChunk for trac_proto::DataWriteRequest {
    fn content(&self) -> &[u8] {
        &self.content
    }
}

impl WriteChunk for trac_proto::FileWriteRequest {
    fn content(&self) -> &[u8] {
        &self.content
    }
}

/// Adapts a client-streaming gRPC request into a metadata message plus a
/// lazily-pulled [`ChunkStream`] of content (spec §4.6 `UploadSource`).
///
/// Unlike the Java source this is modelled on, `tonic::Streaming` is itself
/// pull-based end to end (polling it is the credit request), so there is no
/// separate "request N messages" step to replicate — awaiting the first
/// message in [`UploadSource::new`] and not touching `rest` again until the
/// returned stream is polled is what gives the same "first message is
/// emitted only once the data subscriber asks for it" behaviour.
pub struct UploadSource<T> {
    first: T,
    rest: Streaming<T>,
}

impl<T> UploadSource<T>
where
    T: WriteChunk + Send + 'static,
{
    /// Awaits the first message of the stream — spec §4.6's `firstMessage()`.
    pub async fn new(mut stream: Streaming<T>) -> Result<Self> {
        let first = stream
            .message()
            .await
            .map_err(TracError::from)?
            .ok_or_else(|| TracError::InputValidation("upload stream closed before any message".into()))?;
        Ok(Self { first, rest: stream })
    }

    /// The first message, carrying request metadata (and possibly the
    /// leading content chunk, still present in its `content` field).
    pub fn first_message(&self) -> &T {
        &self.first
    }

    /// Splits this source into its metadata message and the full content
    /// stream (the first message's own content chunk, if any, followed by
    /// each subsequent message's content). `cancel` is observed between
    /// chunks: on cancellation no further messages are requested, buffered
    /// chunks already produced are simply dropped by the caller, and the
    /// stream ends with [`TracError::Cancelled`] (spec §5 cancellation
    /// steps 1-2).
    pub fn into_parts(self, allocator: Arc<BufferAllocator>, cancel: CancellationToken) -> (T, ChunkStream) {
        let first_content = self.first.content().to_vec();
        let metadata = self.first;
        let mut rest = self.rest;

        let body = async_stream::try_stream! {
            if !first_content.is_empty() {
                let mut buf = allocator.allocate(first_content.len());
                buf.push_slice(&first_content);
                yield buf;
            }

            enum Next<T> {
                Cancelled,
                EndOfStream,
                Message(T),
            }

            loop {
                let cancelled = cancel.cancelled();
                tokio::pin!(cancelled);

                let next = tokio::select! {
                    biased;
                    _ = &mut cancelled => Next::Cancelled,
                    msg = rest.message() => match msg.map_err(TracError::from)? {
                        Some(m) => Next::Message(m),
                        None => Next::EndOfStream,
                    },
                };

                let msg = match next {
                    Next::Cancelled => Err(TracError::Cancelled)?,
                    Next::EndOfStream => break,
                    Next::Message(m) => m,
                };
                let bytes = msg.content();
                if bytes.is_empty() {
                    continue;
                }
                let mut buf = allocator.allocate(bytes.len());
                buf.push_slice(bytes);
                yield buf;
            }
        };

        (metadata, Box::pin(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake(Vec<u8>);
    impl WriteChunk for Fake {
        fn content(&self) -> &[u8] {
            &self.0
        }
    }

    #[test]
    fn write_chunk_exposes_the_raw_content_bytes() {
        let fake = Fake(b"hello".to_vec());
        assert_eq!(fake.content(), b"hello");
    }
}
