//! The watcher described in §4.2: discovers new objects in *uploads* and
//! enqueues them, without re-processing an object already seen this
//! process lifetime.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::Mutex;

use crate::{
    file_manager::FileManager,
    models::BucketRole,
    pause::PauseGate,
    prelude::*,
    queue::TaskQueue,
    settings::Settings,
};

/// Scans *uploads* on a fixed interval and feeds the task queue.
pub struct Watcher {
    file_manager: std::sync::Arc<FileManager>,
    queue: std::sync::Arc<TaskQueue>,
    pause_gate: std::sync::Arc<PauseGate>,
    scan_interval_sec: AtomicU64,
    running: AtomicBool,
    seen: Mutex<HashSet<String>>,
}

impl Watcher {
    /// Build a watcher over `file_manager` and `queue`, scanning every
    /// `scan_interval`.
    pub fn new(
        file_manager: std::sync::Arc<FileManager>,
        queue: std::sync::Arc<TaskQueue>,
        pause_gate: std::sync::Arc<PauseGate>,
        scan_interval: std::time::Duration,
    ) -> Self {
        Watcher {
            file_manager,
            queue,
            pause_gate,
            scan_interval_sec: AtomicU64::new(scan_interval.as_secs()),
            running: AtomicBool::new(false),
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Apply a new scan cadence, taking effect on the next tick without
    /// restarting the scan loop (§4.8).
    pub fn apply_settings(&self, settings: &Settings) {
        self.scan_interval_sec
            .store(settings.queue_check_interval_sec as u64, Ordering::SeqCst);
    }

    fn scan_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.scan_interval_sec.load(Ordering::SeqCst))
    }

    /// Whether the scan loop is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// How many names have been recorded as seen (enqueued or filtered as
    /// invalid) this process lifetime.
    pub async fn seen_count(&self) -> usize {
        self.seen.lock().await.len()
    }

    /// Clear the seen set. Called on worker-pool reconfiguration so objects
    /// recovered back into *uploads* can re-enter the queue (§4.2 "Reset
    /// semantics").
    #[instrument(skip(self), level = "info")]
    pub async fn reset_seen(&self) {
        self.seen.lock().await.clear();
    }

    /// Move every object in *processing* back to *uploads*. Run once before
    /// the scan loop starts, and again after every worker-pool restart, so
    /// objects whose worker died mid-pipeline are retried (§4.2 "Recovery on
    /// start").
    #[instrument(skip(self), level = "info")]
    pub async fn recover_in_flight_objects(&self) -> Result<usize> {
        let stranded = self.file_manager.list_audio(BucketRole::Processing).await?;
        let mut recovered = 0;
        for name in stranded {
            self.file_manager
                .move_object(BucketRole::Processing, BucketRole::Uploads, &name)
                .await
                .with_context(|| format!("could not recover {name} back to uploads"))?;
            recovered += 1;
        }
        if recovered > 0 {
            info!(recovered, "recovered stranded objects to uploads");
        }
        Ok(recovered)
    }

    /// Run the scan loop until `running` is cleared by [`Watcher::stop`].
    /// Intended to be spawned as its own task; logs and continues on a
    /// per-scan error rather than exiting, matching the teacher's babysitter
    /// retry discipline.
    #[instrument(skip(self), level = "trace")]
    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        while self.running.load(Ordering::SeqCst) {
            self.pause_gate.wait_if_paused().await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            if let Err(err) = self.scan_once().await {
                error!("watcher scan failed (will retry next tick): {:?}", err);
            }
            tokio::time::sleep(self.scan_interval()).await;
        }
    }

    /// Stop the scan loop after the current iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    #[instrument(skip(self), level = "debug")]
    async fn scan_once(&self) -> Result<()> {
        let candidates = self.file_manager.list_audio(BucketRole::Uploads).await?;
        for name in candidates {
            if self.seen.lock().await.contains(&name) {
                continue;
            }

            let valid = self
                .file_manager
                .validate(BucketRole::Uploads, &name)
                .await
                .with_context(|| format!("could not validate {name}"))?;
            if !valid {
                warn!(file = %name, "rejecting invalid object during scan");
                self.seen.lock().await.insert(name);
                continue;
            }

            if self.queue.try_enqueue(Task::new(&name)) {
                self.seen.lock().await.insert(name);
            }
            // Else: the queue is saturated. Leave `name` out of the seen set
            // so it is retried on the next tick, per §4.2 — do not drop it.
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use crate::storage::local::LocalBackend;
    use std::sync::Arc;
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
            max_file_size_bytes: 1_000_000,
            recognition_params: serde_json::json!({}),
        }
    }

    async fn fixture() -> (TempDir, Arc<FileManager>, Arc<TaskQueue>, Arc<PauseGate>) {
        let dir = TempDir::new().unwrap();
        let backend = Box::new(LocalBackend::new(dir.path()));
        let fm = Arc::new(FileManager::new(backend, &test_settings()).await.unwrap());
        let queue = Arc::new(TaskQueue::new(10));
        let gate = Arc::new(PauseGate::new());
        (dir, fm, queue, gate)
    }

    #[tokio::test]
    async fn scan_enqueues_new_valid_objects_once() {
        let (dir, fm, queue, gate) = fixture().await;
        tokio::fs::create_dir_all(dir.path().join("uploads")).await.unwrap();
        tokio::fs::write(dir.path().join("uploads").join("a.mp3"), b"some audio bytes")
            .await
            .unwrap();

        let watcher = Watcher::new(fm, queue.clone(), gate, std::time::Duration::from_millis(10));
        watcher.scan_once().await.unwrap();
        assert_eq!(watcher.seen_count().await, 1);
        match queue.recv().await.unwrap() {
            crate::queue::QueueEntry::Task(t) => assert_eq!(t.name, "a.mp3"),
            crate::queue::QueueEntry::Shutdown => panic!("expected task"),
        }

        // A second scan must not re-enqueue the already-seen object.
        watcher.scan_once().await.unwrap();
        assert_eq!(watcher.seen_count().await, 1);
        assert!(queue.try_enqueue(Task::new("sentinel")));
        match queue.recv().await.unwrap() {
            crate::queue::QueueEntry::Task(t) => assert_eq!(t.name, "sentinel"),
            crate::queue::QueueEntry::Shutdown => panic!("expected sentinel, not a.mp3 again"),
        }
    }

    #[tokio::test]
    async fn scan_records_invalid_objects_as_seen_without_enqueuing() {
        let (dir, fm, queue, gate) = fixture().await;
        tokio::fs::create_dir_all(dir.path().join("uploads")).await.unwrap();
        tokio::fs::write(dir.path().join("uploads").join("empty.mp3"), b"")
            .await
            .unwrap();

        let watcher = Watcher::new(fm, queue.clone(), gate, std::time::Duration::from_millis(10));
        watcher.scan_once().await.unwrap();
        assert_eq!(watcher.seen_count().await, 1);
        assert!(queue.try_enqueue(Task::new("sentinel")));
        match queue.recv().await.unwrap() {
            crate::queue::QueueEntry::Task(t) => assert_eq!(t.name, "sentinel"),
            crate::queue::QueueEntry::Shutdown => panic!("expected sentinel"),
        }
    }

    #[tokio::test]
    async fn reset_seen_clears_recorded_names() {
        let (_dir, fm, queue, gate) = fixture().await;
        let watcher = Watcher::new(fm, queue, gate, std::time::Duration::from_millis(10));
        watcher.seen.lock().await.insert("a.mp3".to_owned());
        assert_eq!(watcher.seen_count().await, 1);
        watcher.reset_seen().await;
        assert_eq!(watcher.seen_count().await, 0);
    }

    #[tokio::test]
    async fn recover_moves_processing_objects_back_to_uploads() {
        let (dir, fm, queue, gate) = fixture().await;
        tokio::fs::create_dir_all(dir.path().join("processing")).await.unwrap();
        tokio::fs::write(dir.path().join("processing").join("b.wav"), b"stranded")
            .await
            .unwrap();

        let watcher = Watcher::new(fm.clone(), queue, gate, std::time::Duration::from_millis(10));
        let recovered = watcher.recover_in_flight_objects().await.unwrap();
        assert_eq!(recovered, 1);
        assert!(dir.path().join("uploads").join("b.wav").exists());
        assert!(!dir.path().join("processing").join("b.wav").exists());
    }

    #[tokio::test]
    async fn recover_is_a_noop_when_nothing_stranded() {
        let (_dir, fm, queue, gate) = fixture().await;
        let watcher = Watcher::new(fm, queue, gate, std::time::Duration::from_millis(10));
        assert_eq!(watcher.recover_in_flight_objects().await.unwrap(), 0);
    }
}
