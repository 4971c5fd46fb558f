//! storekeeper
//!
//! Bucket and object operations over S3-compatible storage. Thin wrapper around
//! the AWS S3 SDK that normalizes service errors and drives multipart uploads.
//!
//! ```no_run
//! use storekeeper::{StorageClient, StorageConfig, UploadOptions};
//! use aws_sdk_s3::primitives::ByteStream;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = StorageConfig::from_env()?;
//! let client = StorageClient::new(&config);
//!
//! let options = UploadOptions::new().ensure_bucket(true).multipart(true);
//! client
//!     .upload_object("reports", "2024/q1.pdf", ByteStream::from_static(b"%PDF"), options)
//!     .await?;
//!
//! let body = client.download_object("reports", "2024/q1.pdf").await?;
//! let bytes = body.collect().await?.into_bytes();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod s3;

pub use config::{Credentials, StorageConfig, ValidationError};
pub use s3::{
    ObjectTransport, Operation, ProgressObserver, S3Transport, StorageClient, StorageError,
    TransportError, UploadError, UploadOptions, UploadProgress,
};
