use std::sync::Arc;

use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info, warn};

use super::client::S3Transport;
use super::error::{EMPTY_BODY, Operation, StorageError};
use super::transport::ObjectTransport;
use crate::config::StorageConfig;

/// Error code returned by HeadBucket for a missing bucket
pub const BUCKET_NOT_FOUND: &str = "NotFound";

/// Error code returned when deleting a bucket that does not exist
pub const NO_SUCH_BUCKET: &str = "NoSuchBucket";

/// Bucket and object operations over a single storage connection.
///
/// Nothing is cached between calls: every operation checks live state on the
/// remote service. The client is cheap to clone and safe to share across tasks.
#[derive(Debug)]
pub struct StorageClient<T = S3Transport> {
    pub(super) transport: Arc<T>,
    pub(super) part_size: u64,
    pub(super) max_concurrency: usize,
}

impl<T> Clone for StorageClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            part_size: self.part_size,
            max_concurrency: self.max_concurrency,
        }
    }
}

impl StorageClient<S3Transport> {
    /// Connect to the configured endpoint with the configured credentials
    pub fn new(config: &StorageConfig) -> Self {
        info!(
            "Storage client for {} (region {}, part size {} bytes, max concurrency {})",
            config.endpoint, config.region, config.part_size, config.max_concurrency
        );
        Self::with_transport(S3Transport::new(config), config)
    }
}

impl<T: ObjectTransport> StorageClient<T> {
    /// Use an existing transport; transfer tuning still comes from `config`
    pub fn with_transport(transport: T, config: &StorageConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            part_size: config.part_size,
            max_concurrency: config.max_concurrency,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Make sure a bucket exists, creating it when HeadBucket reports it missing
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] tagged `ensureBucket` when HeadBucket fails for
    /// any reason other than the bucket not existing, or when creation fails
    pub async fn ensure_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        match self.transport.head_bucket(bucket).await {
            Ok(()) => {
                debug!("Bucket {} already exists", bucket);
                Ok(())
            }
            Err(e) if e.is_fault(BUCKET_NOT_FOUND) => {
                info!("Bucket {} not found, creating it", bucket);
                self.transport
                    .create_bucket(bucket)
                    .await
                    .map_err(|e| StorageError::for_bucket(Operation::EnsureBucket, e.to_string(), bucket))
            }
            Err(e) => Err(StorageError::for_bucket(
                Operation::EnsureBucket,
                e.to_string(),
                bucket,
            )),
        }
    }

    /// Delete a bucket; deleting a bucket that does not exist succeeds
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] tagged `deleteBucket` for any failure other
    /// than the bucket not existing
    pub async fn delete_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        match self.transport.delete_bucket(bucket).await {
            Ok(()) => {
                info!("Deleted bucket {}", bucket);
                Ok(())
            }
            Err(e) if e.is_fault(NO_SUCH_BUCKET) => {
                debug!("Bucket {} does not exist, nothing to delete", bucket);
                Ok(())
            }
            Err(e) => Err(StorageError::for_bucket(
                Operation::DeleteBucket,
                e.to_string(),
                bucket,
            )),
        }
    }

    /// Download an object as a single-pass byte stream
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] tagged `downloadObject` when the request fails
    /// or the response carries no body
    pub async fn download_object(&self, bucket: &str, key: &str) -> Result<ByteStream, StorageError> {
        match self.transport.get_object(bucket, key).await {
            Ok(Some(body)) => {
                debug!("Downloading s3://{}/{}", bucket, key);
                Ok(body)
            }
            Ok(None) => {
                warn!("s3://{}/{} returned no body", bucket, key);
                Err(StorageError::for_object(
                    Operation::DownloadObject,
                    EMPTY_BODY,
                    bucket,
                    key,
                ))
            }
            Err(e) => Err(StorageError::for_object(
                Operation::DownloadObject,
                e.to_string(),
                bucket,
                key,
            )),
        }
    }
}
