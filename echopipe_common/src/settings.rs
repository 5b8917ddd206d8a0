//! Process-wide configuration, loaded once from the environment at startup
//! and mutated in bounded ways thereafter via [`crate::control_plane`].

use std::{collections::HashSet, env};

use crate::prelude::*;

/// The audio file extensions the pipeline will pick up from *uploads*.
pub fn supported_audio_extensions() -> &'static [&'static str] {
    &[".wav", ".mp3", ".m4a", ".flac", ".ogg", ".aac", ".wma"]
}

/// Bounded-integer knobs and endpoint configuration for the orchestrator.
///
/// Field names mirror the source project's `Settings` class so that an
/// operator migrating from it can map environment variables one-to-one.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Settings {
    /// Physical bucket name (or directory) backing the *uploads* role.
    pub upload_bucket: String,
    /// Physical bucket name (or directory) backing the *processing* role.
    pub processing_bucket: String,
    /// Physical bucket name (or directory) backing the *json* role.
    pub json_bucket: String,
    /// Physical bucket name (or directory) backing the *processed* role.
    pub processed_bucket: String,

    /// Base URL for the downstream conversation-ingest API.
    pub api_endpoint: String,
    /// URL of the recognition service's submit endpoint.
    pub transcription_service_url: String,
    /// URL of the recognition service's poll-by-task-id endpoint.
    pub transcription_result_url: String,
    /// URL of the recognition service's auth endpoint.
    pub authorization_service_url: String,

    /// Whether to authenticate against the recognition service at all.
    pub use_authorization: bool,
    /// Login used against the recognition service, if authorization is on.
    pub login: Option<String>,
    /// Password used against the recognition service, if authorization is on.
    pub password: Option<String>,
    /// A pre-obtained access token, bypassing the login/password exchange.
    pub transcription_access_token: Option<String>,

    /// Number of workers in the pool. Bounds: `[1, 20]`.
    pub max_concurrent_tasks: u32,
    /// Concurrent transcription submit/poll calls allowed across the pool.
    /// Bounds: `[1, 10]`.
    pub max_transcription_calls: u32,
    /// Concurrent downstream API deliveries allowed across the pool.
    /// Bounds: `[1, 20]`.
    pub max_api_calls: u32,
    /// Task queue capacity. Bounds: `[10, 1000]`, and must be
    /// `>= max_concurrent_tasks`.
    pub task_queue_max_size: u32,
    /// How often the watcher rescans *uploads*, in seconds. Bounds: `[1, 10]`.
    pub queue_check_interval_sec: u32,

    /// Single-operation timeout for a transcription HTTP call, in seconds.
    /// Bounds: `[60, 3600]`.
    pub transcription_timeout_sec: u32,
    /// Single-operation timeout for a downstream API call, in seconds.
    /// Bounds: `[10, 300]`.
    pub api_timeout_sec: u32,
    /// Maximum retry attempts for a downstream API delivery. Bounds: `[1, 10]`.
    pub api_max_retries: u32,
    /// Maximum retry attempts for the recognition-service auth call.
    pub auth_max_retries: u32,
    /// Number of poll iterations before giving up on a transcription job.
    pub max_polling_attempts: u32,
    /// Delay between poll iterations, in seconds.
    pub polling_interval_sec: u32,
    /// Hard stop timeout for worker-pool shutdown, in seconds.
    pub pool_stop_timeout_sec: u32,

    /// Maximum accepted audio file size, in bytes.
    pub max_file_size_bytes: u64,

    /// Fixed recognition-service flag bag sent verbatim on every submit,
    /// preserved as an opaque JSON object so new flags never require a code
    /// change here.
    pub recognition_params: serde_json::Value,
}

impl Settings {
    /// Load settings from the environment, falling back to the documented
    /// defaults, and validate all bounds. Fails process startup on the first
    /// invalid value, the same way a missing/malformed required field would.
    #[instrument(level = "debug")]
    pub fn load_from_env() -> Result<Self> {
        let settings = Settings {
            upload_bucket: env_or("UPLOAD_BUCKET", "audio-uploads"),
            processing_bucket: env_or("PROCESSING_BUCKET", "audio-processing"),
            json_bucket: env_or("JSON_BUCKET", "audio-json-output"),
            processed_bucket: env_or("PROCESSED_BUCKET", "audio-processed"),

            api_endpoint: env_or(
                "API_ENDPOINT",
                "http://api:8000/api/conversations",
            ),
            transcription_service_url: env_or(
                "TRANSCRIPTION_SERVICE_URL",
                "https://demo.connect2ai.net/spr/stt/big",
            ),
            transcription_result_url: env_or(
                "TRANSCRIPTION_SERVICE_BY_JOB_URL",
                "https://demo.connect2ai.net/spr/result",
            ),
            authorization_service_url: env_or(
                "AUTHORIZATION_SERVICE_URL",
                "https://demo.connect2ai.net/auth/access",
            ),

            use_authorization: env_bool("USE_AUTHORIZATION", false),
            login: env::var("LOGIN").ok(),
            password: env::var("PASSWORD").ok(),
            transcription_access_token: env::var("TRANSCRIPTION_ACCESS_TOKEN").ok(),

            max_concurrent_tasks: env_u32("MAX_CONCURRENT_TASKS", 3)?,
            max_transcription_calls: env_u32("MAX_TRANSCRIPTION_CALLS", 3)?,
            max_api_calls: env_u32("MAX_API_CALLS", 5)?,
            task_queue_max_size: env_u32("TASK_QUEUE_MAX_SIZE", 100)?,
            queue_check_interval_sec: env_u32("QUEUE_CHECK_INTERVAL", 2)?,

            transcription_timeout_sec: env_u32("TRANSCRIPTION_TIMEOUT", 300)?,
            api_timeout_sec: env_u32("API_TIMEOUT", 30)?,
            api_max_retries: env_u32("API_MAX_RETRIES", 3)?,
            auth_max_retries: env_u32("AUTH_MAX_RETRIES", 5)?,
            max_polling_attempts: env_u32("MAX_POLLING_ATTEMPTS", 300)?,
            polling_interval_sec: env_u32("POLLING_INTERVAL_SEC", 2)?,
            pool_stop_timeout_sec: env_u32("POOL_STOP_TIMEOUT_SEC", 15)?,

            max_file_size_bytes: env_or("MAX_FILE_SIZE_BYTES", "524288000")
                .parse()
                .context("MAX_FILE_SIZE_BYTES must be an integer")?,

            recognition_params: default_recognition_params(),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Check every bounded field against the ranges documented in the spec.
    /// Called both at startup and by [`crate::control_plane::ControlPlane::update_config`].
    pub fn validate(&self) -> Result<()> {
        check_range("maxConcurrentTasks", self.max_concurrent_tasks, 1, 20)?;
        check_range("maxTranscriptionCalls", self.max_transcription_calls, 1, 10)?;
        check_range("maxApiCalls", self.max_api_calls, 1, 20)?;
        check_range("taskQueueMaxSize", self.task_queue_max_size, 10, 1000)?;
        check_range("queueCheckIntervalSec", self.queue_check_interval_sec, 1, 10)?;
        check_range("transcriptionTimeoutSec", self.transcription_timeout_sec, 60, 3600)?;
        check_range("apiTimeoutSec", self.api_timeout_sec, 10, 300)?;
        check_range("apiMaxRetries", self.api_max_retries, 1, 10)?;
        if self.task_queue_max_size < self.max_concurrent_tasks {
            return Err(format_err!(
                "taskQueueMaxSize ({}) must be >= maxConcurrentTasks ({})",
                self.task_queue_max_size,
                self.max_concurrent_tasks
            ));
        }
        Ok(())
    }

    /// The subset of fields that, when changed, force a worker-pool restart.
    pub fn concurrency_fields_differ(&self, other: &Settings) -> bool {
        self.max_concurrent_tasks != other.max_concurrent_tasks
            || self.max_transcription_calls != other.max_transcription_calls
            || self.max_api_calls != other.max_api_calls
            || self.task_queue_max_size != other.task_queue_max_size
    }

    /// The file extensions this process treats as audio.
    pub fn supported_extensions(&self) -> HashSet<&'static str> {
        supported_audio_extensions().iter().copied().collect()
    }
}

fn default_recognition_params() -> serde_json::Value {
    serde_json::json!({
        "async": 1,
        "speakers": 1,
        "vad": "webrtc",
        "classifiers": "[]",
        "emotion": 0,
        "toxicity": 0,
    })
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

fn env_u32(key: &str, default: u32) -> Result<u32> {
    match env::var(key) {
        Ok(v) => v.parse().with_context(|| format!("{key} must be an integer")),
        Err(_) => Ok(default),
    }
}

fn check_range(name: &str, value: u32, min: u32, max: u32) -> Result<()> {
    if value < min || value > max {
        return Err(format_err!(
            "{name} = {value} is out of bounds [{min}, {max}]"
        ));
    }
    Ok(())
}
