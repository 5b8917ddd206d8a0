//! Local-filesystem backend: every "bucket" is a directory under a common
//! root, every object a file directly inside it.

use async_trait::async_trait;
use tokio::fs;

use super::{BucketBackend, ObjectStat};
use crate::prelude::*;

/// A [`BucketBackend`] backed by directories on local disk.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a backend rooted at `root`. `root` itself is not created here;
    /// buckets are created lazily via `create_bucket_if_absent`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalBackend { root: root.into() }
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    fn object_path(&self, bucket: &str, name: &str) -> PathBuf {
        self.bucket_dir(bucket).join(name)
    }
}

impl fmt::Debug for LocalBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalBackend")
            .field("root", &self.root)
            .finish()
    }
}

#[async_trait]
impl BucketBackend for LocalBackend {
    #[instrument(skip(self), level = "trace")]
    async fn create_bucket_if_absent(&self, bucket: &str) -> Result<()> {
        let dir = self.bucket_dir(bucket);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("could not create bucket directory {}", dir.display()))?;
        Ok(())
    }

    #[instrument(skip(self), level = "trace")]
    async fn list(&self, bucket: &str) -> Result<Vec<String>> {
        let dir = self.bucket_dir(bucket);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => {
                return Err(e).with_context(|| format!("could not list {}", dir.display()))
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("could not read entry in {}", dir.display()))?
        {
            if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_owned());
                }
            }
        }
        Ok(names)
    }

    #[instrument(skip(self), level = "trace")]
    async fn stat(&self, bucket: &str, name: &str) -> Result<Option<ObjectStat>> {
        let path = self.object_path(bucket, name);
        match fs::metadata(&path).await {
            Ok(meta) => Ok(Some(ObjectStat {
                size_bytes: meta.len(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("could not stat {}", path.display())),
        }
    }

    #[instrument(skip(self), level = "trace")]
    async fn read_bytes(&self, bucket: &str, name: &str) -> Result<Vec<u8>> {
        let path = self.object_path(bucket, name);
        fs::read(&path)
            .await
            .with_context(|| format!("could not read {}", path.display()))
    }

    #[instrument(skip(self, data), level = "trace")]
    async fn write_bytes(&self, bucket: &str, name: &str, data: &[u8]) -> Result<()> {
        self.create_bucket_if_absent(bucket).await?;
        let path = self.object_path(bucket, name);
        fs::write(&path, data)
            .await
            .with_context(|| format!("could not write {}", path.display()))
    }

    #[instrument(skip(self), level = "trace")]
    async fn delete(&self, bucket: &str, name: &str) -> Result<()> {
        let path = self.object_path(bucket, name);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("could not delete {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn round_trips_bytes() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());
        backend.write_bytes("uploads", "a.mp3", b"hi").await.unwrap();
        assert_eq!(backend.read_bytes("uploads", "a.mp3").await.unwrap(), b"hi");
        let stat = backend.stat("uploads", "a.mp3").await.unwrap().unwrap();
        assert_eq!(stat.size_bytes, 2);
    }

    #[tokio::test]
    async fn missing_bucket_lists_empty() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());
        assert_eq!(backend.list("nonexistent").await.unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn delete_missing_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());
        backend.create_bucket_if_absent("uploads").await.unwrap();
        backend.delete("uploads", "nope.mp3").await.unwrap();
    }

    #[tokio::test]
    async fn list_ignores_subdirectories() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());
        backend.write_bytes("uploads", "a.mp3", b"hi").await.unwrap();
        fs::create_dir_all(dir.path().join("uploads").join("subdir"))
            .await
            .unwrap();
        let names = backend.list("uploads").await.unwrap();
        assert_eq!(names, vec!["a.mp3".to_owned()]);
    }
}
