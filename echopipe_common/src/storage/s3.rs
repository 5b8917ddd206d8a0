//! S3-compatible backend built on the native AWS SDK.
//!
//! Credentials and endpoint are read from the environment via the standard
//! AWS credential chain: `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
//! `AWS_REGION`, and optionally `AWS_ENDPOINT_URL` for S3-compatible
//! services such as MinIO.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{primitives::ByteStream, Client};

use super::{BucketBackend, ObjectStat};
use crate::prelude::*;

/// A [`BucketBackend`] where every logical bucket is a *prefix* inside a
/// single underlying S3 bucket named by `AWS_S3_BUCKET`. This keeps bucket
/// creation out of band (buckets themselves are rarely provisioned by an
/// application) while still giving each role its own flat namespace.
pub struct S3Backend {
    client: Client,
    bucket: String,
}

impl S3Backend {
    /// Build a new backend, reading credentials and the underlying S3
    /// bucket name from the environment.
    #[instrument(level = "debug")]
    pub async fn new(bucket: impl Into<String>) -> Result<Self> {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let client = Client::new(&config);
        Ok(S3Backend {
            client,
            bucket: bucket.into(),
        })
    }

    fn key(&self, bucket: &str, name: &str) -> String {
        format!("{bucket}/{name}")
    }
}

impl fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .finish()
    }
}

#[async_trait]
impl BucketBackend for S3Backend {
    #[instrument(skip(self), level = "trace")]
    async fn create_bucket_if_absent(&self, _bucket: &str) -> Result<()> {
        // Logical buckets are prefixes inside one real S3 bucket; there is
        // nothing to provision.
        Ok(())
    }

    #[instrument(skip(self), level = "trace")]
    async fn list(&self, bucket: &str) -> Result<Vec<String>> {
        let prefix = format!("{bucket}/");
        let mut names = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .delimiter("/");
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .with_context(|| format!("failed to list s3://{}/{prefix}", self.bucket))?;

            if let Some(contents) = response.contents {
                for obj in contents {
                    if let Some(obj_key) = obj.key {
                        if let Some(name) = obj_key.strip_prefix(&prefix) {
                            if !name.is_empty() {
                                names.push(name.to_owned());
                            }
                        }
                    }
                }
            }

            if response.is_truncated.unwrap_or(false) {
                continuation_token = response.next_continuation_token;
                if continuation_token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        Ok(names)
    }

    #[instrument(skip(self), level = "trace")]
    async fn stat(&self, bucket: &str, name: &str) -> Result<Option<ObjectStat>> {
        let key = self.key(bucket, name);
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(resp) => Ok(Some(ObjectStat {
                size_bytes: resp.content_length().unwrap_or(0).max(0) as u64,
            })),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("failed to stat s3://{}/{key}", self.bucket))
            }
        }
    }

    #[instrument(skip(self), level = "trace")]
    async fn read_bytes(&self, bucket: &str, name: &str) -> Result<Vec<u8>> {
        let key = self.key(bucket, name);
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .with_context(|| format!("failed to get s3://{}/{key}", self.bucket))?;
        let data = response
            .body
            .collect()
            .await
            .with_context(|| format!("failed to read body of s3://{}/{key}", self.bucket))?;
        Ok(data.into_bytes().to_vec())
    }

    #[instrument(skip(self, data), level = "trace")]
    async fn write_bytes(&self, bucket: &str, name: &str, data: &[u8]) -> Result<()> {
        let key = self.key(bucket, name);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .with_context(|| format!("failed to put s3://{}/{key}", self.bucket))?;
        Ok(())
    }

    #[instrument(skip(self), level = "trace")]
    async fn delete(&self, bucket: &str, name: &str) -> Result<()> {
        let key = self.key(bucket, name);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .with_context(|| format!("failed to delete s3://{}/{key}", self.bucket))?;
        Ok(())
    }
}

fn is_not_found<E>(err: &aws_sdk_s3::error::SdkError<E>) -> bool {
    matches!(
        err,
        aws_sdk_s3::error::SdkError::ServiceError(service_err)
            if service_err.raw().status().as_u16() == 404
    )
}

#[test]
fn key_joins_role_and_name() {
    // `S3Backend::new` requires network/credential setup, so this test only
    // exercises the pure key-construction logic.
    let backend = S3Backend {
        client: {
            // A client requires an `SdkConfig`; build the cheapest one
            // possible purely for this unit test's `Debug`/key math, which
            // never touches the network.
            let config = aws_sdk_s3::Config::builder()
                .behavior_version(aws_config::BehaviorVersion::latest())
                .region(aws_sdk_s3::config::Region::new("us-east-1"))
                .credentials_provider(aws_sdk_s3::config::Credentials::new(
                    "test", "test", None, None, "test",
                ))
                .build();
            aws_sdk_s3::Client::from_conf(config)
        },
        bucket: "example-bucket".to_owned(),
    };
    assert_eq!(backend.key("uploads", "a.mp3"), "uploads/a.mp3");
}
