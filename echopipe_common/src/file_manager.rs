//! Layers the four logical bucket roles over a physical [`BucketBackend`].

use std::sync::atomic::{AtomicU64, Ordering};

use crate::{
    prelude::*,
    settings::Settings,
    storage::{self, BucketBackend},
};

/// The bucket/file manager described in §4.1: the only place in the crate
/// that knows how logical roles map onto physical bucket names.
pub struct FileManager {
    backend: Box<dyn BucketBackend>,
    roles: HashMap<BucketRole, String>,
    max_file_size_bytes: AtomicU64,
    extensions: HashSet<&'static str>,
}

impl FileManager {
    /// Build a file manager from a concrete backend and the bucket names
    /// configured in `settings`. Creates all four buckets if absent.
    #[instrument(skip(backend, settings), level = "debug")]
    pub async fn new(backend: Box<dyn BucketBackend>, settings: &Settings) -> Result<Self> {
        let mut roles = HashMap::new();
        roles.insert(BucketRole::Uploads, settings.upload_bucket.clone());
        roles.insert(BucketRole::Processing, settings.processing_bucket.clone());
        roles.insert(BucketRole::Json, settings.json_bucket.clone());
        roles.insert(BucketRole::Processed, settings.processed_bucket.clone());

        for role in BucketRole::all() {
            let bucket = &roles[&role];
            backend
                .create_bucket_if_absent(bucket)
                .await
                .with_context(|| format!("could not create bucket for role {role}"))?;
        }

        Ok(FileManager {
            backend,
            roles,
            max_file_size_bytes: AtomicU64::new(settings.max_file_size_bytes),
            extensions: settings.supported_extensions(),
        })
    }

    /// Apply a new size cap, taking effect on the next [`FileManager::validate`]
    /// call without rebuilding the file manager (§4.8).
    pub fn apply_settings(&self, settings: &Settings) {
        self.max_file_size_bytes
            .store(settings.max_file_size_bytes, Ordering::SeqCst);
    }

    fn bucket(&self, role: BucketRole) -> &str {
        &self.roles[&role]
    }

    /// List every object in `role` whose extension is in the supported set.
    #[instrument(skip(self), level = "debug")]
    pub async fn list_audio(&self, role: BucketRole) -> Result<Vec<String>> {
        let names = self.backend.list(self.bucket(role)).await?;
        Ok(names
            .into_iter()
            .filter(|name| self.has_supported_extension(name))
            .collect())
    }

    fn has_supported_extension(&self, name: &str) -> bool {
        self.extensions
            .iter()
            .any(|ext| name.to_ascii_lowercase().ends_with(ext))
    }

    /// Validate `name` in `role`: supported extension, exists, non-empty,
    /// within the configured size cap.
    #[instrument(skip(self), level = "debug")]
    pub async fn validate(&self, role: BucketRole, name: &str) -> Result<bool> {
        if !self.has_supported_extension(name) {
            return Ok(false);
        }
        let stat = self.backend.stat(self.bucket(role), name).await?;
        let max_size = self.max_file_size_bytes.load(Ordering::SeqCst);
        match stat {
            Some(stat) => Ok(stat.size_bytes > 0 && stat.size_bytes <= max_size),
            None => Ok(false),
        }
    }

    /// Move `name` from `src` to `dst`. See [`storage::move_object`] for the
    /// idempotence guarantee this relies on.
    #[instrument(skip(self), level = "debug")]
    pub async fn move_object(&self, src: BucketRole, dst: BucketRole, name: &str) -> Result<()> {
        storage::move_object(
            self.backend.as_ref(),
            self.bucket(src),
            self.bucket(dst),
            name,
        )
        .await
    }

    /// Read the full bytes of `name` from `role`.
    #[instrument(skip(self), level = "debug")]
    pub async fn read_bytes(&self, role: BucketRole, name: &str) -> Result<Vec<u8>> {
        self.backend.read_bytes(self.bucket(role), name).await
    }

    /// Serialize `document` as pretty JSON and write it as `name` in `role`.
    #[instrument(skip(self, document), level = "debug")]
    pub async fn write_document(
        &self,
        role: BucketRole,
        name: &str,
        document: &ResultDocument,
    ) -> Result<()> {
        storage::write_document(self.backend.as_ref(), self.bucket(role), name, document).await
    }

    /// Given an object name, the `<stem>.json` name its result document is
    /// stored under.
    pub fn result_document_name(name: &str) -> String {
        match name.rsplit_once('.') {
            Some((stem, _ext)) => format!("{stem}.json"),
            None => format!("{name}.json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::local::LocalBackend;
    use tempfile::TempDir;

    fn test_settings() -> Settings {
        Settings {
            upload_bucket: "uploads".into(),
            processing_bucket: "processing".into(),
            json_bucket: "json".into(),
            processed_bucket: "processed".into(),
            api_endpoint: "http://localhost/api".into(),
            transcription_service_url: "http://localhost/submit".into(),
            transcription_result_url: "http://localhost/result".into(),
            authorization_service_url: "http://localhost/auth".into(),
            use_authorization: false,
            login: None,
            password: None,
            transcription_access_token: None,
            max_concurrent_tasks: 3,
            max_transcription_calls: 3,
            max_api_calls: 5,
            task_queue_max_size: 100,
            queue_check_interval_sec: 2,
            transcription_timeout_sec: 300,
            api_timeout_sec: 30,
            api_max_retries: 3,
            auth_max_retries: 5,
            max_polling_attempts: 300,
            polling_interval_sec: 2,
            pool_stop_timeout_sec: 15,
            max_file_size_bytes: 1024,
            recognition_params: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn validate_rejects_unsupported_extension() {
        let dir = TempDir::new().unwrap();
        let backend = Box::new(LocalBackend::new(dir.path()));
        let fm = FileManager::new(backend, &test_settings()).await.unwrap();
        fm.backend.write_bytes("uploads", "a.txt", b"hi").await.unwrap();
        assert!(!fm.validate(BucketRole::Uploads, "a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn validate_rejects_empty_file() {
        let dir = TempDir::new().unwrap();
        let backend = Box::new(LocalBackend::new(dir.path()));
        let fm = FileManager::new(backend, &test_settings()).await.unwrap();
        fm.backend.write_bytes("uploads", "a.mp3", b"").await.unwrap();
        assert!(!fm.validate(BucketRole::Uploads, "a.mp3").await.unwrap());
    }

    #[tokio::test]
    async fn validate_rejects_oversize_file() {
        let dir = TempDir::new().unwrap();
        let backend = Box::new(LocalBackend::new(dir.path()));
        let fm = FileManager::new(backend, &test_settings()).await.unwrap();
        let big = vec![0u8; 2048];
        fm.backend.write_bytes("uploads", "a.mp3", &big).await.unwrap();
        assert!(!fm.validate(BucketRole::Uploads, "a.mp3").await.unwrap());
    }

    #[tokio::test]
    async fn validate_accepts_good_file() {
        let dir = TempDir::new().unwrap();
        let backend = Box::new(LocalBackend::new(dir.path()));
        let fm = FileManager::new(backend, &test_settings()).await.unwrap();
        fm.backend.write_bytes("uploads", "a.mp3", b"hello").await.unwrap();
        assert!(fm.validate(BucketRole::Uploads, "a.mp3").await.unwrap());
    }

    #[tokio::test]
    async fn list_audio_filters_by_extension() {
        let dir = TempDir::new().unwrap();
        let backend = Box::new(LocalBackend::new(dir.path()));
        let fm = FileManager::new(backend, &test_settings()).await.unwrap();
        fm.backend.write_bytes("uploads", "a.mp3", b"hi").await.unwrap();
        fm.backend.write_bytes("uploads", "readme.txt", b"hi").await.unwrap();
        let names = fm.list_audio(BucketRole::Uploads).await.unwrap();
        assert_eq!(names, vec!["a.mp3".to_owned()]);
    }

    #[test]
    fn result_document_name_strips_extension() {
        assert_eq!(FileManager::result_document_name("a.mp3"), "a.json");
        assert_eq!(FileManager::result_document_name("noext"), "noext.json");
    }
}
