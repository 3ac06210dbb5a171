//! Reference-counted chunk buffers and the stream adapters that pass them
//! between the codec engine, the storage driver, and the gRPC streaming
//! adapter without copying.

mod allocator;
mod buffer;
mod stream;

pub use allocator::BufferAllocator;
pub use buffer::ChunkBuffer;
pub use stream::{close_stream, flush_stream, read_from_stream, write_to_stream, ChunkStream};
