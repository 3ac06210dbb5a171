use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use trac_buffer::{BufferAllocator, ChunkBuffer, ChunkStream};
use trac_error::{Result, TracError};

use crate::backend::{StorageBackend, WriteOutcome};
use crate::lock::{self, LockMode};

/// Queue capacity and high-water mark governing how far ahead of the
/// in-flight write the upload stream is allowed to prefetch (spec §4.3).
const QUEUE_CAPACITY: usize = 32;
const HIGH_WATER: usize = 8;

/// A `StorageBackend` that stores every bucket's content under a local
/// filesystem directory. Grounded on the teacher's `LocalBuildsRoot`
/// (`crates/control/src/services/builds_root/local.rs`): one abstract
/// trait, one local directory-backed implementation, `create_new`
/// semantics on write.
#[derive(Debug, Clone)]
pub struct LocalStorageBackend {
    buckets: Arc<HashMap<String, PathBuf>>,
}

impl LocalStorageBackend {
    pub fn new(buckets: HashMap<String, PathBuf>) -> Self {
        Self {
            buckets: Arc::new(buckets),
        }
    }

    fn resolve(&self, bucket: &str, relative_path: &str) -> Result<PathBuf> {
        let root = self
            .buckets
            .get(bucket)
            .ok_or_else(|| TracError::InputValidation(format!("unknown storage bucket '{bucket}'")))?;

        let rel = Path::new(relative_path);
        if rel.is_absolute() || rel.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            return Err(TracError::InputValidation(format!(
                "storage path must be relative and within its bucket: {relative_path}"
            )));
        }

        Ok(root.join(rel))
    }
}

/// Advisory locks are taken on a sidecar path, not the data file itself,
/// so that acquiring a lock ahead of a `create_new` write never pre-creates
/// the target and defeats the fail-if-exists check.
fn lock_path(path: &Path) -> PathBuf {
    let mut lock_path = path.as_os_str().to_owned();
    lock_path.push(".lock");
    PathBuf::from(lock_path)
}

#[async_trait]
impl StorageBackend for LocalStorageBackend {
    async fn write(
        &self,
        bucket: &str,
        relative_path: &str,
        stream: ChunkStream,
    ) -> Result<WriteOutcome> {
        let path = self.resolve(bucket, relative_path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(TracError::from)?;
        }

        let _lock = lock::acquire(lock_path(&path), LockMode::Exclusive).await?;

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(TracError::DataConstraint(format!(
                    "storage path already exists: {}",
                    path.display()
                )))
            }
            Err(err) => return Err(err.into()),
        };

        // Queue-capacity/high-water backpressure: prefetch into a bounded
        // channel so the producer can run ahead of the single in-flight
        // write without unboundedly buffering the whole payload in memory.
        let (tx, mut rx) = tokio::sync::mpsc::channel(QUEUE_CAPACITY);
        let pump = tokio::spawn(async move {
            let mut stream = stream;
            while let Some(item) = stream.next().await {
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });

        let mut bytes_written: u64 = 0;
        let write_result: Result<()> = async {
            while let Some(chunk) = rx.recv().await {
                let chunk = chunk?;
                let payload = chunk.readable().to_vec();
                file.write_all(&payload).await.map_err(TracError::from)?;
                bytes_written += payload.len() as u64;

                if rx.len() < HIGH_WATER {
                    tracing::trace!(bucket, relative_path, queued = rx.len(), "below high water, refilling");
                }
            }
            file.flush().await.map_err(TracError::from)?;
            Ok(())
        }
        .await;

        pump.abort();

        match write_result {
            Ok(()) => Ok(WriteOutcome { bytes_written }),
            Err(err) => {
                drop(file);
                let _ = tokio::fs::remove_file(&path).await;
                Err(err)
            }
        }
    }

    async fn read(&self, bucket: &str, relative_path: &str) -> Result<ChunkStream> {
        let path = self.resolve(bucket, relative_path)?;
        let _lock = lock::acquire(lock_path(&path), LockMode::Shared).await?;

        let mut file = tokio::fs::File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                TracError::MissingItem(format!("no such storage object: {}", path.display()))
            } else {
                TracError::from(err)
            }
        })?;

        let allocator = BufferAllocator::new(format!("READ-{bucket}-{relative_path}"));
        const READ_CHUNK: usize = 1 << 16;

        let stream = async_stream::try_stream! {
            loop {
                let mut buf = allocator.allocate(READ_CHUNK);
                let mut tmp = vec![0u8; READ_CHUNK];
                let n = file.read(&mut tmp).await.map_err(TracError::from)?;
                if n == 0 {
                    break;
                }
                buf.push_slice(&tmp[..n]);
                yield buf;
            }
        };

        Ok(Box::pin(stream))
    }

    async fn exists(&self, bucket: &str, relative_path: &str) -> Result<bool> {
        let path = self.resolve(bucket, relative_path)?;
        Ok(tokio::fs::metadata(&path).await.is_ok())
    }

    async fn delete(&self, bucket: &str, relative_path: &str) -> Result<()> {
        let path = self.resolve(bucket, relative_path)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

