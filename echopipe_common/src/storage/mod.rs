//! Storage backends for the four logical buckets.
//!
//! Objects here are whole small audio/JSON files, so the interface is
//! byte-buffer oriented rather than streaming: every pipeline step needs the
//! full file in memory anyway (for multipart upload, or for JSON parsing).

use async_trait::async_trait;

use crate::prelude::*;

pub mod local;
pub mod s3;

/// Metadata about a single stored object, as returned by [`BucketBackend::stat`].
#[derive(Clone, Copy, Debug)]
pub struct ObjectStat {
    /// Size of the object, in bytes.
    pub size_bytes: u64,
}

/// Capability interface implemented by both the S3-compatible backend and
/// the local-filesystem backend. The [`crate::file_manager::FileManager`] is
/// the only caller; it layers logical bucket *roles* on top of whatever
/// physical bucket names this trait operates on.
#[async_trait]
pub trait BucketBackend: Send + Sync + fmt::Debug {
    /// Create `bucket` if it does not already exist. Idempotent.
    async fn create_bucket_if_absent(&self, bucket: &str) -> Result<()>;

    /// List the names of every object directly inside `bucket` (no
    /// recursion: buckets are flat in this system).
    async fn list(&self, bucket: &str) -> Result<Vec<String>>;

    /// Whether `name` exists in `bucket`, and if so, its size.
    async fn stat(&self, bucket: &str, name: &str) -> Result<Option<ObjectStat>>;

    /// Read the full contents of `name` in `bucket`.
    async fn read_bytes(&self, bucket: &str, name: &str) -> Result<Vec<u8>>;

    /// Write `data` as `name` in `bucket`, overwriting any existing object.
    async fn write_bytes(&self, bucket: &str, name: &str, data: &[u8]) -> Result<()>;

    /// Delete `name` from `bucket`. Not an error if it's already gone.
    async fn delete(&self, bucket: &str, name: &str) -> Result<()>;
}

/// Move `name` from `src_bucket` to `dst_bucket` using the capabilities
/// above: read the source, write the destination, delete the source.
///
/// Per §4.1, a second call for a name already present at the destination
/// (and absent at the source) is a no-op success — this is what makes the
/// watcher's recovery pass safe to run more than once.
#[instrument(skip(backend), level = "debug")]
pub async fn move_object(
    backend: &dyn BucketBackend,
    src_bucket: &str,
    dst_bucket: &str,
    name: &str,
) -> Result<()> {
    let src_exists = backend.stat(src_bucket, name).await?.is_some();
    if !src_exists {
        if backend.stat(dst_bucket, name).await?.is_some() {
            debug!(name, "move is a no-op; object already at destination");
            return Ok(());
        }
        return Err(format_err!(
            "cannot move {name}: not found in {src_bucket} or {dst_bucket}"
        ));
    }

    let data = backend.read_bytes(src_bucket, name).await?;
    backend.write_bytes(dst_bucket, name, &data).await?;
    backend.delete(src_bucket, name).await?;
    Ok(())
}

/// Serialize `document` as pretty-printed UTF-8 JSON and write it as `name`
/// in `bucket`.
#[instrument(skip(backend, document), level = "debug")]
pub async fn write_document(
    backend: &dyn BucketBackend,
    bucket: &str,
    name: &str,
    document: &serde_json::Value,
) -> Result<()> {
    let body = serde_json::to_vec_pretty(document)
        .context("failed to serialize result document")?;
    backend.write_bytes(bucket, name, &body).await
}
