use std::sync::Arc;

use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info};

use super::error::{Operation, StorageError, TransportError, UploadError};
use super::storage::StorageClient;
use super::transport::{LogProgress, ManagedUpload, ObjectTransport, ProgressObserver};

/// Per-call switches for [`StorageClient::upload_object`]
#[derive(Clone, Default)]
pub struct UploadOptions {
    /// Create the bucket first if it does not exist
    pub ensure_bucket: bool,
    /// Use the managed multipart upload instead of a single PutObject
    pub multipart_upload: bool,
    /// Receives multipart progress; defaults to debug logging
    pub progress: Option<Arc<dyn ProgressObserver>>,
}

impl UploadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_bucket(mut self, ensure_bucket: bool) -> Self {
        self.ensure_bucket = ensure_bucket;
        self
    }

    pub fn multipart(mut self, multipart_upload: bool) -> Self {
        self.multipart_upload = multipart_upload;
        self
    }

    pub fn with_progress(mut self, observer: impl ProgressObserver + 'static) -> Self {
        self.progress = Some(Arc::new(observer));
        self
    }
}

impl std::fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadOptions")
            .field("ensure_bucket", &self.ensure_bucket)
            .field("multipart_upload", &self.multipart_upload)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl<T: ObjectTransport> StorageClient<T> {
    /// Upload an object, optionally creating its bucket first
    ///
    /// A single PutObject reads the whole body into memory first. Multipart
    /// uploads use the client's part size and run at most `max_concurrency`
    /// part uploads at once.
    ///
    /// # Errors
    ///
    /// - [`UploadError::Storage`] tagged `uploadObject` for storage-service faults,
    ///   or the unchanged `ensureBucket` error when bucket creation fails
    /// - [`UploadError::Unrecognized`] for failures that did not come from the
    ///   storage service, such as the body stream failing to read
    pub async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        options: UploadOptions,
    ) -> Result<(), UploadError> {
        if options.ensure_bucket {
            self.ensure_bucket(bucket).await?;
        }

        let result = if options.multipart_upload {
            let observer = options
                .progress
                .unwrap_or_else(|| Arc::new(LogProgress) as Arc<dyn ProgressObserver>);
            self.transport
                .upload_multipart(ManagedUpload {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    body,
                    part_size: self.part_size,
                    queue_size: self.max_concurrency,
                    observer,
                })
                .await
        } else {
            debug!("Uploading s3://{}/{} with a single PutObject", bucket, key);
            self.transport.put_object(bucket, key, body).await
        };

        match result {
            Ok(()) => {
                info!("Uploaded s3://{}/{}", bucket, key);
                Ok(())
            }
            Err(TransportError::Service(fault)) => Err(UploadError::Storage(
                StorageError::for_object(Operation::UploadObject, fault.message(), bucket, key),
            )),
            Err(TransportError::Local(e)) => Err(UploadError::Unrecognized(e)),
        }
    }
}
