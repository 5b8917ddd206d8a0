//! The control surface described in §4.8: `start`/`stop`/`pause`/`resume`/
//! `restart`/`restartWorkerPool`/`getStatus`/`getConfig`/`updateConfig`,
//! generalized from the teacher's `AppState`-held handle pattern into a
//! single owning struct the HTTP adapter and the CLI both drive.

use std::sync::Arc;

use tokio::{sync::RwLock, task::JoinHandle};

use crate::{
    api_client::ApiClient,
    file_manager::FileManager,
    metrics::{MetricsCollector, Summary},
    pause::PauseGate,
    pipeline::PipelineContext,
    prelude::*,
    queue::TaskQueue,
    settings::Settings,
    transcription_client::TranscriptionClient,
    watcher::Watcher,
    worker_pool::{build_semaphores, WorkerPool},
};

/// A point-in-time snapshot of the control plane, as returned by `getStatus`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Status {
    /// Whether the worker pool is currently running.
    pub running: bool,
    /// Whether the pool is paused (still running, not dequeuing).
    pub paused: bool,
    /// Number of workers in the current pool.
    pub worker_count: usize,
    /// Number of object names the watcher has recorded as seen this pool
    /// generation.
    pub seen_count: usize,
    /// Current task-queue full-event counter.
    pub queue_full_events: u64,
    /// Session and all-time metric counters.
    pub metrics: Summary,
}

struct Running {
    queue: Arc<TaskQueue>,
    pool: WorkerPool,
    watcher: Arc<Watcher>,
    watcher_handle: JoinHandle<()>,
}

/// A freshly built queue + watcher pair sharing the same queue, not yet
/// started. Kept together because a watcher and its queue must always be
/// replaced as a unit (§4.8 step 5: a restart's fresh watcher implies a
/// fresh, empty seen-set and a fresh queue).
struct Generation {
    queue: Arc<TaskQueue>,
    watcher: Arc<Watcher>,
}

/// Owns every long-lived component and mediates every lifecycle/config
/// operation. Construct once per process; the HTTP adapter and the CLI's
/// in-process commands both hold an `Arc<ControlPlane>`.
pub struct ControlPlane {
    settings: RwLock<Settings>,
    file_manager: Arc<FileManager>,
    transcription: Arc<TranscriptionClient>,
    api: Arc<ApiClient>,
    metrics: Arc<MetricsCollector>,
    pause_gate: Arc<PauseGate>,
    running: RwLock<Option<Running>>,
}

impl ControlPlane {
    /// Build a control plane from `settings` and a bucket backend, but do
    /// not start the watcher or worker pool yet. Call [`ControlPlane::start`]
    /// to bring the pipeline up.
    pub async fn new(
        settings: Settings,
        backend: Box<dyn crate::storage::BucketBackend>,
    ) -> Result<Self> {
        let file_manager = Arc::new(FileManager::new(backend, &settings).await?);
        let transcription = Arc::new(TranscriptionClient::new(&settings)?);
        let api = Arc::new(ApiClient::new(&settings)?);
        Ok(ControlPlane {
            file_manager,
            transcription,
            api,
            metrics: Arc::new(MetricsCollector::new()),
            pause_gate: Arc::new(PauseGate::new()),
            running: RwLock::new(None),
            settings: RwLock::new(settings),
        })
    }

    fn pipeline_context(&self, settings: &Settings) -> PipelineContext {
        let (transcription_semaphore, api_semaphore) = build_semaphores(settings);
        PipelineContext {
            file_manager: self.file_manager.clone(),
            transcription: self.transcription.clone(),
            api: self.api.clone(),
            metrics: self.metrics.clone(),
            pause_gate: self.pause_gate.clone(),
            transcription_semaphore,
            api_semaphore,
            settings: Arc::new(settings.clone()),
        }
    }

    /// Bring the pipeline up: recover any objects stranded in *processing*
    /// from a prior crash, then start a fresh watcher and worker pool.
    #[instrument(skip(self), level = "info")]
    pub async fn start(&self) -> Result<()> {
        let mut guard = self.running.write().await;
        if guard.is_some() {
            return Ok(());
        }
        let settings = self.settings.read().await.clone();
        let generation = self.build_generation(&settings);
        generation.watcher.recover_in_flight_objects().await?;
        *guard = Some(self.start_generation(&settings, generation));
        Ok(())
    }

    /// Build a fresh, not-yet-started task queue and watcher pair.
    fn build_generation(&self, settings: &Settings) -> Generation {
        let queue = Arc::new(TaskQueue::new(settings.task_queue_max_size as usize));
        let watcher = Arc::new(Watcher::new(
            self.file_manager.clone(),
            queue.clone(),
            self.pause_gate.clone(),
            std::time::Duration::from_secs(settings.queue_check_interval_sec as u64),
        ));
        Generation { queue, watcher }
    }

    /// Stop the watcher and drain the worker pool, leaving every in-flight
    /// object exactly where the pipeline left it (some in *processing*,
    /// recoverable on the next `start`).
    #[instrument(skip(self), level = "info")]
    pub async fn stop(&self) -> Result<()> {
        // Workers block on the pause gate before ever reaching `queue.recv()`;
        // resume them first or the shutdown sentinels below go unobserved
        // until the stop timeout expires.
        self.pause_gate.resume();
        let mut guard = self.running.write().await;
        if let Some(mut running) = guard.take() {
            running.watcher.stop();
            running.watcher_handle.abort();
            running.pool.stop().await;
        }
        Ok(())
    }

    /// Pause: the pool and watcher keep running but block before their next
    /// suspension point (§5 "Cancellation & timeouts").
    pub async fn pause(&self) {
        self.pause_gate.pause();
    }

    /// Resume a paused pipeline.
    pub async fn resume(&self) {
        self.pause_gate.resume();
    }

    /// Full restart: stop, then start again (which re-runs recovery).
    #[instrument(skip(self), level = "info")]
    pub async fn restart(&self) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    /// The drain-then-rebuild sequence from §4.8, used directly by
    /// [`ControlPlane::update_config`] when a concurrency field changes, and
    /// exposed standalone as `restartWorkerPool`.
    #[instrument(skip(self), level = "info")]
    pub async fn restart_worker_pool(&self) -> Result<()> {
        let settings = self.settings.read().await.clone();
        let mut guard = self.running.write().await;

        // 1-2: pool enters draining state, existing workers finish or are
        // hard-cancelled after the stop timeout. Resume first so any worker
        // currently parked on the pause gate can reach `queue.recv()` and
        // observe the shutdown sentinel.
        self.pause_gate.resume();
        if let Some(mut running) = guard.take() {
            running.watcher.stop();
            running.watcher_handle.abort();
            running.pool.stop().await;
        }

        // 3: recovery. A fresh watcher (with its own fresh queue) performs
        // it; its seen-set starts empty, satisfying step 5 for free.
        let generation = self.build_generation(&settings);
        generation.watcher.recover_in_flight_objects().await?;

        // 4, 6: fresh pool with the new bounds; session metrics reset,
        // daily history preserved.
        self.metrics.reset_session().await;
        *guard = Some(self.start_generation(&settings, generation));
        Ok(())
    }

    fn start_generation(&self, settings: &Settings, generation: Generation) -> Running {
        let Generation { queue, watcher } = generation;
        let context = self.pipeline_context(settings);
        let mut pool = WorkerPool::new(context, queue.clone(), settings);
        pool.start();

        let watcher_handle = {
            let watcher = watcher.clone();
            tokio::spawn(async move {
                watcher.run().await;
            })
        };

        Running {
            queue,
            pool,
            watcher,
            watcher_handle,
        }
    }

    /// A read-only snapshot of the effective configuration.
    pub async fn get_config(&self) -> Settings {
        self.settings.read().await.clone()
    }

    /// Status for `getStatus`: running/paused flags, worker and seen
    /// counts, queue saturation counter, and metric summary.
    pub async fn get_status(&self) -> Status {
        let guard = self.running.read().await;
        let (running, worker_count, seen_count, queue_full_events) = match guard.as_ref() {
            Some(r) => (
                true,
                r.pool.worker_count(),
                r.watcher.seen_count().await,
                r.queue.full_event_count(),
            ),
            None => (false, 0, 0, 0),
        };
        Status {
            running,
            paused: self.pause_gate.is_paused(),
            worker_count,
            seen_count,
            queue_full_events,
            metrics: self.metrics.summary().await,
        }
    }

    /// Apply a validated patch over the current settings. Concurrency-field
    /// changes trigger [`ControlPlane::restart_worker_pool`]; everything
    /// else is pushed live into the already-running clients and watcher.
    #[instrument(skip(self, patch), level = "info")]
    pub async fn update_config(&self, patch: Settings) -> Result<()> {
        patch.validate()?;

        let previous = self.settings.read().await.clone();
        let restart_needed = previous.concurrency_fields_differ(&patch);

        {
            let mut guard = self.settings.write().await;
            *guard = patch.clone();
        }

        if restart_needed {
            self.restart_worker_pool().await?;
        } else {
            self.transcription.apply_settings(&patch);
            self.api.apply_settings(&patch);
            self.file_manager.apply_settings(&patch);
            if let Some(running) = self.running.read().await.as_ref() {
                running.watcher.apply_settings(&patch);
            }
        }
        Ok(())
    }

    /// Handle to the metrics collector, for the metrics-query endpoints in
    /// §4.7.
    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
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
            max_concurrent_tasks: 2,
            max_transcription_calls: 2,
            max_api_calls: 2,
            task_queue_max_size: 10,
            queue_check_interval_sec: 1,
            transcription_timeout_sec: 60,
            api_timeout_sec: 10,
            api_max_retries: 1,
            auth_max_retries: 1,
            max_polling_attempts: 5,
            polling_interval_sec: 0,
            pool_stop_timeout_sec: 1,
            max_file_size_bytes: 10_000_000,
            recognition_params: serde_json::json!({}),
        }
    }

    async fn control_plane(dir: &TempDir) -> ControlPlane {
        let backend = Box::new(LocalBackend::new(dir.path()));
        ControlPlane::new(test_settings(), backend).await.unwrap()
    }

    #[tokio::test]
    async fn start_is_idempotent_and_reports_running_status() {
        let dir = TempDir::new().unwrap();
        let cp = control_plane(&dir).await;
        cp.start().await.unwrap();
        cp.start().await.unwrap();
        let status = cp.get_status().await;
        assert!(status.running);
        assert_eq!(status.worker_count, 2);
        cp.stop().await.unwrap();
        assert!(!cp.get_status().await.running);
    }

    #[tokio::test]
    async fn pause_and_resume_toggle_the_shared_gate() {
        let dir = TempDir::new().unwrap();
        let cp = control_plane(&dir).await;
        cp.start().await.unwrap();
        cp.pause().await;
        assert!(cp.get_status().await.paused);
        cp.resume().await;
        assert!(!cp.get_status().await.paused);
        cp.stop().await.unwrap();
    }

    #[tokio::test]
    async fn update_config_without_concurrency_change_applies_live() {
        let dir = TempDir::new().unwrap();
        let cp = control_plane(&dir).await;
        cp.start().await.unwrap();

        let mut patch = test_settings();
        patch.api_timeout_sec = 20;
        cp.update_config(patch).await.unwrap();

        assert_eq!(cp.get_config().await.api_timeout_sec, 20);
        // The same worker-pool generation must still be running.
        assert_eq!(cp.get_status().await.worker_count, 2);
        cp.stop().await.unwrap();
    }

    #[tokio::test]
    async fn update_config_with_concurrency_change_restarts_the_pool() {
        let dir = TempDir::new().unwrap();
        let cp = control_plane(&dir).await;
        cp.start().await.unwrap();

        let mut patch = test_settings();
        patch.max_concurrent_tasks = 4;
        patch.task_queue_max_size = 10;
        cp.update_config(patch).await.unwrap();

        let status = cp.get_status().await;
        assert!(status.running);
        assert_eq!(status.worker_count, 4);
        cp.stop().await.unwrap();
    }

    #[tokio::test]
    async fn update_config_rejects_out_of_bounds_patch() {
        let dir = TempDir::new().unwrap();
        let cp = control_plane(&dir).await;
        let mut patch = test_settings();
        patch.max_concurrent_tasks = 0;
        assert!(cp.update_config(patch).await.is_err());
    }

    #[tokio::test]
    async fn start_recovers_objects_stranded_in_processing() {
        let dir = TempDir::new().unwrap();
        tokio::fs::create_dir_all(dir.path().join("processing")).await.unwrap();
        tokio::fs::write(dir.path().join("processing").join("a.mp3"), b"stranded")
            .await
            .unwrap();

        let cp = control_plane(&dir).await;
        cp.start().await.unwrap();
        assert!(dir.path().join("uploads").join("a.mp3").exists());
        cp.stop().await.unwrap();
    }
}
