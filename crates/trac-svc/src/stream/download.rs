use std::pin::Pin;

use futures::{Stream, StreamExt};
use tonic::Status;

use trac_buffer::ChunkStream;
use trac_error::TracError;

/// Server-streaming response shapes (spec §4.6 `DownloadSink`).
#[derive(Debug, Clone, Copy)]
pub enum SinkMode {
    /// First response carries the header, each subsequent response one
    /// content chunk.
    Streaming,
    /// The whole payload is assembled in memory and sent as a single
    /// response at end-of-stream, bounded by `max_bytes`.
    Aggregated { max_bytes: usize },
}

/// Builds the gRPC response stream for one download, wrapping `header` and
/// each content chunk with `wrap_content`/`wrap_header` into the caller's
/// response message type. Grounded on spec §4.6: `STREAMING` interleaves a
/// header message with per-chunk content messages; `AGGREGATED` buffers
/// everything and raises `DataSize` on overflow rather than ever emitting
/// a partial aggregated response.
pub fn build_response_stream<R, H, WrapHeader, WrapContent>(
    mode: SinkMode,
    header: H,
    mut content: ChunkStream,
    wrap_header: WrapHeader,
    wrap_content: WrapContent,
) -> Pin<Box<dyn Stream<Item = Result<R, Status>> + Send>>
where
    R: Send + 'static,
    H: Send + 'static,
    WrapHeader: Fn(H) -> R + Send + 'static,
    WrapContent: Fn(Vec<u8>) -> R + Send + 'static,
{
    match mode {
        SinkMode::Streaming => {
            let s = async_stream::stream! {
                yield Ok(wrap_header(header));
                while let Some(chunk) = content.next().await {
                    match chunk {
                        Ok(buf) => yield Ok(wrap_content(buf.readable().to_vec())),
                        Err(err) => {
                            yield Err(Status::from(err));
                            return;
                        }
                    }
                }
            };
            Box::pin(s)
        }
        SinkMode::Aggregated { max_bytes } => {
            let s = async_stream::stream! {
                let mut buf = Vec::new();
                while let Some(chunk) = content.next().await {
                    match chunk {
                        Ok(c) => {
                            buf.extend_from_slice(c.readable());
                            if buf.len() > max_bytes {
                                let err = TracError::DataSize(format!(
                                    "aggregated response exceeded {max_bytes} bytes"
                                ));
                                yield Err(Status::from(err));
                                return;
                            }
                        }
                        Err(err) => {
                            yield Err(Status::from(err));
                            return;
                        }
                    }
                }
                yield Ok(wrap_header(header));
                yield Ok(wrap_content(buf));
            };
            Box::pin(s)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use trac_buffer::BufferAllocator;

    fn chunk_stream(bytes: &[&[u8]]) -> ChunkStream {
        let allocator = BufferAllocator::new("REQ-test");
        let chunks: Vec<_> = bytes
            .iter()
            .map(|b| {
                let mut c = allocator.allocate(b.len());
                c.push_slice(b);
                Ok(c)
            })
            .collect();
        Box::pin(stream::iter(chunks))
    }

    #[tokio::test]
    async fn streaming_mode_emits_header_first_then_each_chunk() {
        let content = chunk_stream(&[b"ab", b"cd"]);
        let mut out = build_response_stream(
            SinkMode::Streaming,
            "header".to_string(),
            content,
            |h| h,
            |bytes| String::from_utf8(bytes).unwrap(),
        );

        let first = out.next().await.unwrap().unwrap();
        assert_eq!(first, "header");
        let second = out.next().await.unwrap().unwrap();
        assert_eq!(second, "ab");
        let third = out.next().await.unwrap().unwrap();
        assert_eq!(third, "cd");
        assert!(out.next().await.is_none());
    }

    #[tokio::test]
    async fn aggregated_mode_over_the_limit_raises_data_size_exceeded() {
        let content = chunk_stream(&[b"abcdef"]);
        let mut out = build_response_stream(
            SinkMode::Aggregated { max_bytes: 3 },
            "header".to_string(),
            content,
            |h| h,
            |bytes| String::from_utf8(bytes).unwrap(),
        );

        let err = out.next().await.unwrap().unwrap_err();
        assert_eq!(err.code(), tonic::Code::ResourceExhausted);
    }

    #[tokio::test]
    async fn aggregated_mode_under_the_limit_emits_one_combined_message() {
        let content = chunk_stream(&[b"ab", b"cd"]);
        let mut out = build_response_stream(
            SinkMode::Aggregated { max_bytes: 16 },
            "header:".to_string(),
            content,
            |h| h,
            |bytes| String::from_utf8(bytes).unwrap(),
        );

        let header = out.next().await.unwrap().unwrap();
        assert_eq!(header, "header:");
        let content = out.next().await.unwrap().unwrap();
        assert_eq!(content, "abcd");
        assert!(out.next().await.is_none());
    }
}
