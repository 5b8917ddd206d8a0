//! The per-object pipeline described in §4.4: eight strictly-ordered steps
//! from claiming an object in *uploads* to recording its outcome.

use std::{sync::Arc, time::Instant};

use tokio::sync::Semaphore;

use crate::{
    api_client::ApiClient,
    file_manager::FileManager,
    metrics::MetricsCollector,
    models::{BucketRole, PollStatus},
    pause::PauseGate,
    prelude::*,
    settings::Settings,
    transcription_client::TranscriptionClient,
};

/// Everything a pipeline run needs, shared across every worker. Cheap to
/// clone: every field is already reference-counted.
#[derive(Clone)]
pub struct PipelineContext {
    /// Bucket/file manager shared by every worker.
    pub file_manager: Arc<FileManager>,
    /// Recognition service client.
    pub transcription: Arc<TranscriptionClient>,
    /// Downstream delivery client.
    pub api: Arc<ApiClient>,
    /// Process-wide metrics collector.
    pub metrics: Arc<MetricsCollector>,
    /// Cooperative pause gate checked between steps.
    pub pause_gate: Arc<PauseGate>,
    /// Bounds concurrent transcription submit/poll regions across workers.
    pub transcription_semaphore: Arc<Semaphore>,
    /// Bounds concurrent downstream delivery calls across workers.
    pub api_semaphore: Arc<Semaphore>,
    /// A read-only copy of the settings this pipeline was built from, for
    /// recognition parameters and other per-call configuration.
    pub settings: Arc<Settings>,
}

/// Run the pipeline for `name`, an object currently sitting in *uploads*.
/// Never returns an `Err`; every failure path records a FileMetric and
/// returns normally, since the pool has nothing further to do with a
/// per-object failure beyond logging it.
#[instrument(skip(ctx), level = "info")]
pub async fn run_pipeline(ctx: &PipelineContext, name: &str) {
    let start = Instant::now();
    ctx.pause_gate.wait_if_paused().await;

    // Step 1: Claim.
    if let Err(err) = ctx
        .file_manager
        .move_object(BucketRole::Uploads, BucketRole::Processing, name)
        .await
    {
        error!(file = name, error = ?err, "claim failed");
        record_failure(ctx, name, start, 0, &err.to_string()).await;
        return;
    }

    ctx.pause_gate.wait_if_paused().await;

    // Step 2: Fetch.
    let bytes = match ctx.file_manager.read_bytes(BucketRole::Processing, name).await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(file = name, error = ?err, "fetch failed");
            return_to_uploads(ctx, name).await;
            record_failure(ctx, name, start, 0, &err.to_string()).await;
            return;
        }
    };
    let size_bytes = bytes.len() as u64;

    ctx.pause_gate.wait_if_paused().await;

    // Step 3: Submit, under the transcription semaphore.
    let task_id = {
        let _permit = ctx.transcription_semaphore.acquire().await;
        match ctx.transcription.submit(name, bytes, &ctx.settings).await {
            Ok(task_id) => task_id,
            Err(err) => {
                error!(file = name, error = ?err, "submit failed");
                return_to_uploads(ctx, name).await;
                record_failure(ctx, name, start, size_bytes, &err.to_string()).await;
                return;
            }
        }
    };

    ctx.pause_gate.wait_if_paused().await;

    // Step 4: Poll.
    let result_document = match ctx.transcription.poll_until_done(&task_id).await {
        Ok(document) => document,
        Err(err) => {
            error!(file = name, task_id, error = ?err, "poll failed or timed out");
            record_failure(ctx, name, start, size_bytes, &err.to_string()).await;
            return;
        }
    };

    ctx.pause_gate.wait_if_paused().await;

    // Step 5: Persist.
    let json_name = FileManager::result_document_name(name);
    if let Err(err) = ctx
        .file_manager
        .write_document(BucketRole::Json, &json_name, &result_document)
        .await
    {
        error!(file = name, error = ?err, "persist failed");
        record_failure(ctx, name, start, size_bytes, &err.to_string()).await;
        return;
    }

    ctx.pause_gate.wait_if_paused().await;

    // Step 6: Deliver, under the API semaphore. Best-effort: a delivery
    // failure does not block finalize (§9 Open Question resolution).
    {
        let _permit = ctx.api_semaphore.acquire().await;
        if let Err(err) = ctx.api.send(name, &result_document).await {
            warn!(file = name, error = ?err, "delivery failed; proceeding to finalize anyway");
        }
    }

    // Step 7: Finalize.
    if let Err(err) = ctx
        .file_manager
        .move_object(BucketRole::Processing, BucketRole::Processed, name)
        .await
    {
        error!(file = name, error = ?err, "finalize move failed");
        record_failure(ctx, name, start, size_bytes, &err.to_string()).await;
        return;
    }

    // Step 8: Record.
    let elapsed = start.elapsed().as_secs_f64();
    ctx.metrics.record_success(name, elapsed, size_bytes).await;
    info!(file = name, elapsed_sec = elapsed, "pipeline complete");
}

async fn return_to_uploads(ctx: &PipelineContext, name: &str) {
    if let Err(err) = ctx
        .file_manager
        .move_object(BucketRole::Processing, BucketRole::Uploads, name)
        .await
    {
        error!(file = name, error = ?err, "could not return object to uploads after failure");
    }
}

async fn record_failure(ctx: &PipelineContext, name: &str, start: Instant, size_bytes: u64, error: &str) {
    let elapsed = start.elapsed().as_secs_f64();
    ctx.metrics.record_failure(name, elapsed, size_bytes, error).await;
}

/// Maps a freshly-parsed poll status onto whether polling should continue.
/// Exposed for the worker pool's own logging around poll budgets; the
/// transcription client performs the actual loop.
pub fn poll_status_is_terminal(status: PollStatus) -> bool {
    status.is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::local::LocalBackend;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn terminal_status_helper_matches_model() {
        assert!(poll_status_is_terminal(PollStatus::Ready));
        assert!(poll_status_is_terminal(PollStatus::Failed));
        assert!(poll_status_is_terminal(PollStatus::NotFound));
        assert!(!poll_status_is_terminal(PollStatus::Waiting));
    }

    fn test_settings(submit_url: String, result_url: String, api_url: String) -> Settings {
        Settings {
            upload_bucket: "uploads".into(),
            processing_bucket: "processing".into(),
            json_bucket: "json".into(),
            processed_bucket: "processed".into(),
            api_endpoint: api_url,
            transcription_service_url: submit_url,
            transcription_result_url: result_url,
            authorization_service_url: "http://localhost/auth".into(),
            use_authorization: false,
            login: None,
            password: None,
            transcription_access_token: None,
            max_concurrent_tasks: 1,
            max_transcription_calls: 1,
            max_api_calls: 1,
            task_queue_max_size: 10,
            queue_check_interval_sec: 2,
            transcription_timeout_sec: 30,
            api_timeout_sec: 30,
            api_max_retries: 2,
            auth_max_retries: 1,
            max_polling_attempts: 5,
            polling_interval_sec: 0,
            pool_stop_timeout_sec: 15,
            max_file_size_bytes: 10_000_000,
            recognition_params: serde_json::json!({}),
        }
    }

    async fn ctx_with_servers(
        transcription_server: &MockServer,
        api_server: &MockServer,
        dir: &TempDir,
    ) -> (PipelineContext, Arc<FileManager>) {
        let settings = test_settings(
            format!("{}/submit", transcription_server.uri()),
            format!("{}/result", transcription_server.uri()),
            format!("{}/api", api_server.uri()),
        );
        let backend = Box::new(LocalBackend::new(dir.path()));
        let file_manager = Arc::new(FileManager::new(backend, &settings).await.unwrap());
        let ctx = PipelineContext {
            file_manager: file_manager.clone(),
            transcription: Arc::new(TranscriptionClient::new(&settings).unwrap()),
            api: Arc::new(ApiClient::new(&settings).unwrap()),
            metrics: Arc::new(MetricsCollector::new()),
            pause_gate: Arc::new(PauseGate::new()),
            transcription_semaphore: Arc::new(Semaphore::new(1)),
            api_semaphore: Arc::new(Semaphore::new(1)),
            settings: Arc::new(settings),
        };
        (ctx, file_manager)
    }

    #[tokio::test]
    async fn happy_path_single_file_reaches_processed() {
        let dir = TempDir::new().unwrap();
        tokio::fs::create_dir_all(dir.path().join("uploads")).await.unwrap();
        tokio::fs::write(dir.path().join("uploads").join("a.mp3"), vec![0u8; 1_048_576])
            .await
            .unwrap();

        let transcription_server = MockServer::start().await;
        let api_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/submit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"taskID": "T1"})))
            .mount(&transcription_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/result/T1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"status": "ready", "transcript": "hello"}),
            ))
            .mount(&transcription_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 42})))
            .mount(&api_server)
            .await;

        let (ctx, file_manager) = ctx_with_servers(&transcription_server, &api_server, &dir).await;
        run_pipeline(&ctx, "a.mp3").await;

        let processed = file_manager.list_audio(BucketRole::Processed).await.unwrap();
        assert_eq!(processed, vec!["a.mp3".to_owned()]);
        let snapshot = ctx.metrics.all_time_snapshot();
        assert_eq!(snapshot.successful, 1);
        assert_eq!(snapshot.failed, 0);
    }

    #[tokio::test]
    async fn permanent_api_failure_still_finalizes() {
        let dir = TempDir::new().unwrap();
        tokio::fs::create_dir_all(dir.path().join("uploads")).await.unwrap();
        tokio::fs::write(dir.path().join("uploads").join("a.mp3"), b"some bytes")
            .await
            .unwrap();

        let transcription_server = MockServer::start().await;
        let api_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/submit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"taskID": "T1"})))
            .mount(&transcription_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/result/T1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"status": "ready", "transcript": "hello"}),
            ))
            .mount(&transcription_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&api_server)
            .await;

        let (ctx, file_manager) = ctx_with_servers(&transcription_server, &api_server, &dir).await;
        run_pipeline(&ctx, "a.mp3").await;

        let processed = file_manager.list_audio(BucketRole::Processed).await.unwrap();
        assert_eq!(processed, vec!["a.mp3".to_owned()]);
        let snapshot = ctx.metrics.all_time_snapshot();
        assert_eq!(snapshot.successful, 1, "delivery is best-effort and must not block finalize");
    }

    #[tokio::test]
    async fn recognition_failed_status_records_failure_and_stays_in_processing() {
        let dir = TempDir::new().unwrap();
        tokio::fs::create_dir_all(dir.path().join("uploads")).await.unwrap();
        tokio::fs::write(dir.path().join("uploads").join("a.mp3"), b"some bytes")
            .await
            .unwrap();

        let transcription_server = MockServer::start().await;
        let api_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/submit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"taskID": "T1"})))
            .mount(&transcription_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/result/T1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"status": "failed", "error": "bad audio"}),
            ))
            .mount(&transcription_server)
            .await;

        let (ctx, file_manager) = ctx_with_servers(&transcription_server, &api_server, &dir).await;
        run_pipeline(&ctx, "a.mp3").await;

        let processing = file_manager.list_audio(BucketRole::Processing).await.unwrap();
        assert_eq!(processing, vec!["a.mp3".to_owned()]);
        let snapshot = ctx.metrics.all_time_snapshot();
        assert_eq!(snapshot.failed, 1);
    }
}
