//! S3 object store client.

use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::store::ObjectStore;

/// S3 client bound to a single bucket. Credentials and region come from
/// the usual AWS environment; `endpoint` overrides the AWS default for
/// local setups such as MinIO.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    pub async fn connect(bucket: &str, endpoint: Option<String>) -> Self {
        let region_provider = RegionProviderChain::default_provider().or_else("us-east-1");
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;

        S3Store {
            client: Client::new(&config),
            bucket: bucket.to_string(),
        }
    }

    fn public_url(&self, key: &str) -> String {
        format!("https://{}.s3.amazonaws.com/{}", self.bucket, key)
    }
}

fn storage_err(err: impl std::fmt::Display) -> PipelineError {
    PipelineError::Storage(err.to_string())
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get(&self, key: &str) -> Result<Bytes> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(storage_err)?;

        let body = response.body.collect().await.map_err(storage_err)?;

        Ok(body.into_bytes())
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<String> {
        debug!(key, size = body.len(), "Uploading object");

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(storage_err)?;

        Ok(self.public_url(key))
    }
}
