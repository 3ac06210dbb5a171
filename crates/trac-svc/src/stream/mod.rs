//! Adapters bridging tonic's client/server streaming RPCs to the
//! allocator-backed [`trac_buffer::ChunkStream`] pipeline (spec §4.6).

mod download;
mod upload;

pub use download::{build_response_stream, SinkMode};
pub use upload::{UploadSource, WriteChunk};
