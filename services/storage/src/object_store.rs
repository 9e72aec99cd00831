use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Failure talking to the durable object store
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object not found: s3://{bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("access denied: s3://{bucket}/{key}")]
    AccessDenied { bucket: String, key: String },

    #[error("object s3://{bucket}/{key} is {size} bytes, over the {limit} byte limit")]
    TooLarge {
        bucket: String,
        key: String,
        size: u64,
        limit: u64,
    },

    #[error("object store request failed: {0}")]
    Other(String),
}

/// Origin and archive store for artifacts.
///
/// Implementations are created once per process and shared by every request.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object's full content.
    ///
    /// Objects larger than `limit` bytes fail with [`ObjectStoreError::TooLarge`];
    /// implementations reject them before transferring the body when the
    /// size is known up front.
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        limit: u64,
    ) -> Result<Bytes, ObjectStoreError>;

    /// Store `body` under `key`
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), ObjectStoreError>;
}

/// Amazon S3 (or S3-compatible) object store
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    /// Create a new S3 client from configuration
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = ?config.bucket,
            region = %config.region,
            "S3 client initialized"
        );

        Self { client }
    }

    pub fn client(&self) -> &S3Client {
        &self.client
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self))]
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        limit: u64,
    ) -> Result<Bytes, ObjectStoreError> {
        debug!("Downloading from S3");

        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, bucket, key))?;

        // Dropping the response here closes the stream unread
        let declared = response.content_length().map(|len| len.max(0) as u64);
        check_size(declared, limit, bucket, key)?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| ObjectStoreError::Other(format!("failed to read object body: {e}")))?
            .into_bytes();

        // Servers may omit the length; the transferred size is authoritative
        check_size(Some(data.len() as u64), limit, bucket, key)?;

        info!(size_bytes = data.len(), "Downloaded object from S3");
        Ok(data)
    }

    #[instrument(skip(self, body), fields(size_bytes = body.len()))]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| classify(e, bucket, key))?;

        debug!("Object stored in S3");
        Ok(())
    }
}

fn check_size(size: Option<u64>, limit: u64, bucket: &str, key: &str) -> Result<(), ObjectStoreError> {
    match size {
        Some(size) if size > limit => Err(ObjectStoreError::TooLarge {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size,
            limit,
        }),
        _ => Ok(()),
    }
}

/// Map S3 error codes onto the store's error taxonomy
fn classify<E, R>(err: SdkError<E, R>, bucket: &str, key: &str) -> ObjectStoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let code = err.as_service_error().and_then(|e| e.code()).map(str::to_owned);
    from_error_code(code.as_deref(), bucket, key)
        .unwrap_or_else(|| ObjectStoreError::Other(DisplayErrorContext(&err).to_string()))
}

fn from_error_code(code: Option<&str>, bucket: &str, key: &str) -> Option<ObjectStoreError> {
    let (bucket, key) = (bucket.to_string(), key.to_string());
    match code? {
        "NoSuchKey" | "NotFound" => Some(ObjectStoreError::NotFound { bucket, key }),
        "AccessDenied" | "Forbidden" => Some(ObjectStoreError::AccessDenied { bucket, key }),
        _ => None,
    }
}
