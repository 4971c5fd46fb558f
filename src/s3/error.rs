use std::fmt;

use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};
use thiserror::Error;

/// Cause reported when a download succeeds but carries no body
pub const EMPTY_BODY: &str = "Received empty body";

/// Bucket operation that produced a [`StorageError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    EnsureBucket,
    DeleteBucket,
    UploadObject,
    DownloadObject,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnsureBucket => "ensureBucket",
            Self::DeleteBucket => "deleteBucket",
            Self::UploadObject => "uploadObject",
            Self::DownloadObject => "downloadObject",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure reported by the storage service, normalized at the client boundary.
///
/// Renders as `Storage error: {"operation":..,"error":..,..context}` where the
/// context fields keep the order they were supplied in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageError {
    operation: Operation,
    cause: String,
    context: Vec<(&'static str, String)>,
}

impl StorageError {
    pub(crate) fn new(operation: Operation, cause: impl Into<String>) -> Self {
        Self {
            operation,
            cause: cause.into(),
            context: Vec::new(),
        }
    }

    pub(crate) fn with(mut self, field: &'static str, value: impl Into<String>) -> Self {
        self.context.push((field, value.into()));
        self
    }

    pub(crate) fn for_bucket(operation: Operation, cause: impl Into<String>, bucket: &str) -> Self {
        Self::new(operation, cause).with("bucketName", bucket)
    }

    pub(crate) fn for_object(
        operation: Operation,
        cause: impl Into<String>,
        bucket: &str,
        key: &str,
    ) -> Self {
        Self::for_bucket(operation, cause, bucket).with("objectKey", key)
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn cause(&self) -> &str {
        &self.cause
    }

    /// Contextual fields such as `bucketName` and `objectKey`, in call order
    pub fn context(&self) -> &[(&'static str, String)] {
        &self.context
    }

    pub fn context_value(&self, field: &str) -> Option<&str> {
        self.context
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, value)| value.as_str())
    }

    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"operation\":\"{}\",\"error\":{:?}}}",
                self.operation, self.cause
            )
        })
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Storage error: {}", self.to_json())
    }
}

impl std::error::Error for StorageError {}

impl Serialize for StorageError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.context.len() + 2))?;
        map.serialize_entry("operation", &self.operation)?;
        map.serialize_entry("error", &self.cause)?;
        for (field, value) in &self.context {
            map.serialize_entry(field, value)?;
        }
        map.end()
    }
}

/// Errors returned by [`StorageClient::upload_object`](super::StorageClient::upload_object)
#[derive(Error, Debug)]
pub enum UploadError {
    /// A storage-service fault, normalized like every other operation
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A failure that did not come from the storage service, passed through untouched
    #[error(transparent)]
    Unrecognized(anyhow::Error),
}

impl UploadError {
    pub fn as_storage(&self) -> Option<&StorageError> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Unrecognized(_) => None,
        }
    }
}

/// A fault raised by the storage service or its SDK
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceFault {
    code: Option<String>,
    message: String,
}

impl ServiceFault {
    pub fn new(code: Option<impl Into<String>>, message: impl Into<String>) -> Self {
        Self {
            code: code.map(Into::into),
            message: message.into(),
        }
    }

    /// Service error code, e.g. `NotFound` or `NoSuchBucket`
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is(&self, code: &str) -> bool {
        self.code() == Some(code)
    }
}

impl fmt::Display for ServiceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Errors produced by an [`ObjectTransport`](super::ObjectTransport)
#[derive(Error, Debug)]
pub enum TransportError {
    /// Recognized fault from the storage service's own error family
    #[error("{0}")]
    Service(ServiceFault),

    /// Anything else, e.g. the caller's body stream failing mid-read
    #[error(transparent)]
    Local(#[from] anyhow::Error),
}

impl TransportError {
    pub fn service(code: Option<impl Into<String>>, message: impl Into<String>) -> Self {
        Self::Service(ServiceFault::new(code, message))
    }

    pub fn fault(&self) -> Option<&ServiceFault> {
        match self {
            Self::Service(fault) => Some(fault),
            Self::Local(_) => None,
        }
    }

    /// True when the service reported exactly this error code
    pub fn is_fault(&self, code: &str) -> bool {
        self.fault().is_some_and(|f| f.is(code))
    }
}

impl<E> From<SdkError<E, HttpResponse>> for TransportError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    fn from(err: SdkError<E, HttpResponse>) -> Self {
        match err {
            SdkError::ServiceError(ctx) => {
                // Bodiless responses (HEAD, some 403s) carry neither code nor message
                let status = ctx.raw().status().as_u16();
                let err = ctx.into_err();
                let code = err.code().map(str::to_string);
                let message = err
                    .message()
                    .map(str::to_string)
                    .or_else(|| code.clone())
                    .unwrap_or_else(|| format!("HTTP {}", status));
                Self::service(code, message)
            }
            // Timeouts, dispatch and response failures still come from the SDK
            other => Self::service(None::<String>, DisplayErrorContext(&other).to_string()),
        }
    }
}
