use async_trait::async_trait;

use trac_buffer::ChunkStream;
use trac_error::Result;

/// Outcome of a successful chunked write.
#[derive(Debug, Clone, Copy)]
pub struct WriteOutcome {
    pub bytes_written: u64,
}

/// Abstract storage interface the data-plane service writes/reads through.
/// Spec §1 scopes storage plugin backends beyond a local-filesystem
/// reference out of this core; this trait is the seam a future S3/GCS
/// backend would implement, grounded on the teacher's
/// `BuildsRootService` trait (one abstract interface, one local impl).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Writes `stream` to `relative_path` within `bucket`, failing if the
    /// path already exists. On any error, partially written content is
    /// removed before the error propagates.
    async fn write(
        &self,
        bucket: &str,
        relative_path: &str,
        stream: ChunkStream,
    ) -> Result<WriteOutcome>;

    /// Opens `relative_path` within `bucket` for streamed reading.
    async fn read(&self, bucket: &str, relative_path: &str) -> Result<ChunkStream>;

    async fn exists(&self, bucket: &str, relative_path: &str) -> Result<bool>;

    async fn delete(&self, bucket: &str, relative_path: &str) -> Result<()>;
}
