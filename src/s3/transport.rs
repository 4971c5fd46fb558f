use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use tracing::debug;

use super::error::TransportError;

/// Bytes transferred so far in a managed upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub loaded: u64,
    /// Total body size, when the body reports an exact length
    pub total: Option<u64>,
}

impl UploadProgress {
    /// Percentage complete, or `None` while the total is unknown
    pub fn percent(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(100.0),
            Some(total) => Some(self.loaded as f64 / total as f64 * 100.0),
            None => None,
        }
    }
}

/// Receives progress events from a managed upload.
///
/// Called from inside the transfer loop, so implementations must return quickly.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, key: &str, progress: UploadProgress);
}

impl<F> ProgressObserver for F
where
    F: Fn(&str, UploadProgress) + Send + Sync,
{
    fn on_progress(&self, key: &str, progress: UploadProgress) {
        self(key, progress)
    }
}

/// Default observer: logs the percentage at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_progress(&self, key: &str, progress: UploadProgress) {
        match progress.percent() {
            Some(percent) => debug!("Upload progress for {}: {:.1}%", key, percent),
            None => debug!("Upload progress for {}: {} bytes", key, progress.loaded),
        }
    }
}

/// Parameters for a managed multipart upload
pub struct ManagedUpload {
    pub bucket: String,
    pub key: String,
    pub body: ByteStream,
    pub part_size: u64,
    /// Maximum number of parts in flight at once
    pub queue_size: usize,
    pub observer: Arc<dyn ProgressObserver>,
}

impl std::fmt::Debug for ManagedUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedUpload")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("part_size", &self.part_size)
            .field("queue_size", &self.queue_size)
            .finish_non_exhaustive()
    }
}

/// Raw storage calls the client is built on.
///
/// Implementations report service faults as [`TransportError::Service`] with the
/// service's error code, and everything else as [`TransportError::Local`].
#[async_trait]
pub trait ObjectTransport: Send + Sync {
    /// Existence check. A missing bucket is a fault with code `NotFound`.
    async fn head_bucket(&self, bucket: &str) -> Result<(), TransportError>;

    async fn create_bucket(&self, bucket: &str) -> Result<(), TransportError>;

    async fn delete_bucket(&self, bucket: &str) -> Result<(), TransportError>;

    async fn put_object(&self, bucket: &str, key: &str, body: ByteStream)
    -> Result<(), TransportError>;

    /// Fetch an object. `Ok(None)` means the call succeeded without a body.
    async fn get_object(&self, bucket: &str, key: &str)
    -> Result<Option<ByteStream>, TransportError>;

    async fn upload_multipart(&self, upload: ManagedUpload) -> Result<(), TransportError>;
}
