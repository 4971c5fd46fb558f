use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Builder, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use tracing::debug;

use super::error::TransportError;
use super::multipart::upload_multipart;
use super::transport::{ManagedUpload, ObjectTransport};
use crate::config::{DEFAULT_REGION, StorageConfig};

const CREDENTIALS_PROVIDER: &str = "storekeeper-static";

/// [`ObjectTransport`] backed by the AWS S3 SDK.
///
/// Cloning is cheap and every clone shares the same connection pool.
#[derive(Debug, Clone)]
pub struct S3Transport {
    client: Client,
    region: String,
}

impl S3Transport {
    /// Build an S3 client from explicit settings only; nothing is read from the
    /// environment or shared AWS config files.
    pub fn new(config: &StorageConfig) -> Self {
        let credentials = Credentials::new(
            config.credentials.access_key_id.clone(),
            config.credentials.secret_access_key.clone(),
            None,
            None,
            CREDENTIALS_PROVIDER,
        );

        let s3_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(config.endpoint.clone())
            .credentials_provider(credentials)
            .force_path_style(config.force_path_style)
            .build();

        Self {
            client: Client::from_conf(s3_config),
            region: config.region.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn from_client(client: Client, region: &str) -> Self {
        Self {
            client,
            region: region.to_string(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

#[async_trait]
impl ObjectTransport for S3Transport {
    async fn head_bucket(&self, bucket: &str) -> Result<(), TransportError> {
        self.client.head_bucket().bucket(bucket).send().await?;
        Ok(())
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), TransportError> {
        let mut request = self.client.create_bucket().bucket(bucket);

        // us-east-1 rejects an explicit location constraint
        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        request.send().await?;
        debug!("Created bucket {} in {}", bucket, self.region);
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), TransportError> {
        self.client.delete_bucket().bucket(bucket).send().await?;
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
    ) -> Result<(), TransportError> {
        // Read the caller's stream up front: a failing body is a local error, and
        // an in-memory body can be replayed on retry
        let bytes = body
            .collect()
            .await
            .map_err(|e| TransportError::Local(e.into()))?
            .into_bytes();

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(bytes.len() as i64)
            .body(ByteStream::from(bytes))
            .send()
            .await?;
        Ok(())
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ByteStream>, TransportError> {
        let response = self.client.get_object().bucket(bucket).key(key).send().await?;

        // The SDK always hands back a stream, possibly of zero bytes
        Ok(Some(response.body))
    }

    async fn upload_multipart(&self, upload: ManagedUpload) -> Result<(), TransportError> {
        upload_multipart(&self.client, upload).await
    }
}
