pub mod client;
pub mod error;
pub mod multipart;
pub mod storage;
pub mod transport;
pub mod upload;

pub use client::S3Transport;
pub use error::{EMPTY_BODY, Operation, ServiceFault, StorageError, TransportError, UploadError};
pub use storage::{BUCKET_NOT_FOUND, NO_SUCH_BUCKET, StorageClient};
pub use transport::{LogProgress, ManagedUpload, ObjectTransport, ProgressObserver, UploadProgress};
pub use upload::UploadOptions;
