//! Bridges a raw [`ChunkStream`] of wire bytes through a [`trac_codec`]
//! decoder/encoder pair, producing a fresh `ChunkStream` of the re-encoded
//! bytes (spec §4.5: "pipe `data_stream` through C2's decoder... and
//! encoder").

use std::sync::Arc;

use futures::StreamExt;

use trac_buffer::{BufferAllocator, ChunkStream};
use trac_codec::{CodecFormat, Decoder, Encoder, RecordBatch, TableSchema};
use trac_error::{Result, TracError};

/// Decodes `input` as `from_format`, re-encodes each batch as `to_format`,
/// and yields the re-encoded bytes as a fresh chunk stream. `on_batch` is
/// called with every decoded batch before it is re-encoded, so callers can
/// run schema validation (not-null, etc.) without a second decode pass.
pub fn transcode<F>(
    allocator: Arc<BufferAllocator>,
    mut input: ChunkStream,
    from_format: CodecFormat,
    to_format: CodecFormat,
    schema: Option<TableSchema>,
    batch_size: usize,
    mut on_batch: F,
) -> Result<ChunkStream>
where
    F: FnMut(&RecordBatch) -> Result<()> + Send + 'static,
{
    let mut decoder = Decoder::new(from_format, schema, batch_size)?;
    let mut encoder = Encoder::new(to_format);

    let stream = async_stream::try_stream! {
        let mut saw_any_bytes = false;

        while let Some(chunk) = input.next().await {
            let chunk = chunk?;
            let bytes = chunk.readable();
            if bytes.is_empty() {
                continue;
            }
            saw_any_bytes = true;

            let batches = decoder.decode_chunk(bytes)?;
            for batch in &batches {
                on_batch(batch)?;
            }

            let mut out = Vec::new();
            for batch in &batches {
                encoder.encode_batch(batch, &mut out)?;
            }
            if !out.is_empty() {
                let mut buf = allocator.allocate(out.len());
                buf.push_slice(&out);
                yield buf;
            }
        }

        if !saw_any_bytes {
            Err(TracError::DataCorruption("data is empty".to_string()))?;
        }

        let tail_batches = decoder.finish()?;
        for batch in &tail_batches {
            on_batch(batch)?;
        }
        let mut out = Vec::new();
        for batch in &tail_batches {
            encoder.encode_batch(batch, &mut out)?;
        }
        encoder.finish(&mut out)?;
        if !out.is_empty() {
            let mut buf = allocator.allocate(out.len());
            buf.push_slice(&out);
            yield buf;
        }
    };

    Ok(Box::pin(stream))
}
