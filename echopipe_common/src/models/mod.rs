//! Data types shared across the storage, pipeline, transcription, API, and
//! metrics layers.

use crate::prelude::*;

/// The four logical roles an object can occupy. Each role maps to exactly
/// one physical bucket name via [`crate::settings::Settings`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketRole {
    /// Newly-arrived objects, not yet claimed by a worker.
    Uploads,
    /// Objects currently owned by a worker's in-flight pipeline.
    Processing,
    /// Persisted `ResultDocument`s, one per successfully-transcribed object.
    Json,
    /// Objects that completed the pipeline (delivery may or may not have
    /// succeeded; see the best-effort delivery design note).
    Processed,
}

impl BucketRole {
    /// All roles, in the order objects logically flow through them.
    pub fn all() -> [BucketRole; 4] {
        [
            BucketRole::Uploads,
            BucketRole::Processing,
            BucketRole::Json,
            BucketRole::Processed,
        ]
    }
}

impl fmt::Display for BucketRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BucketRole::Uploads => "uploads",
            BucketRole::Processing => "processing",
            BucketRole::Json => "json",
            BucketRole::Processed => "processed",
        };
        write!(f, "{s}")
    }
}

/// An entry on the bounded task queue: the name of an object in *uploads*
/// waiting for a worker.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Task {
    /// The object's stable filename.
    pub name: String,
    /// When the watcher enqueued this task.
    pub enqueued_at: DateTime<Utc>,
}

impl Task {
    /// Create a new task for `name`, enqueued now.
    pub fn new(name: impl Into<String>) -> Self {
        Task {
            name: name.into(),
            enqueued_at: Utc::now(),
        }
    }
}

/// The recognition service's last-observed status for a submitted job.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    /// The job is still being processed.
    Waiting,
    /// The job finished; the response body is the `ResultDocument`.
    Ready,
    /// The recognition service has no record of this task id.
    NotFound,
    /// The recognition service reports a terminal failure for this task.
    Failed,
}

impl PollStatus {
    /// Parse the recognition service's `status` string into a `PollStatus`.
    /// Anything unrecognized is treated as `Waiting` so that polling
    /// continues within budget, per §4.5.
    pub fn parse(raw: &str) -> PollStatus {
        match raw {
            "ready" => PollStatus::Ready,
            "not found" | "not_found" => PollStatus::NotFound,
            "failed" => PollStatus::Failed,
            "waiting" => PollStatus::Waiting,
            _ => PollStatus::Waiting,
        }
    }

    /// Whether this status ends the poll loop (successfully or not).
    pub fn is_terminal(self) -> bool {
        !matches!(self, PollStatus::Waiting)
    }
}

/// A submitted transcription job and what we know about its progress.
#[derive(Clone, Debug)]
pub struct TranscriptionJob {
    /// The opaque handle returned by the recognition service on submit.
    pub task_id: String,
    /// When the job was submitted.
    pub submitted_at: DateTime<Utc>,
    /// The last status observed while polling.
    pub last_status: PollStatus,
}

/// The opaque document returned by the recognition service on `ready`.
/// Persisted verbatim; this crate never interprets its fields.
pub type ResultDocument = serde_json::Value;

/// The outcome of processing a single object, as recorded by the
/// [`crate::metrics`] collector.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricStatus {
    /// The object reached *processed* with a persisted `ResultDocument`.
    Success,
    /// The pipeline stopped before reaching *processed*.
    Failed,
}

/// A single per-object outcome record, appended by a worker on completion.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FileMetric {
    /// The object's stable filename.
    pub filename: String,
    /// ISO-8601 UTC timestamp of when this record was created.
    pub timestamp: DateTime<Utc>,
    /// Wall-clock duration of the pipeline run, in seconds.
    pub duration_sec: f64,
    /// Outcome of the pipeline run.
    pub status: MetricStatus,
    /// Size of the source object in bytes.
    pub size_bytes: u64,
    /// Error excerpt (≤200 chars), present only for `status: Failed`.
    pub error: Option<String>,
}

impl FileMetric {
    /// Build a success record.
    pub fn success(filename: impl Into<String>, duration_sec: f64, size_bytes: u64) -> Self {
        FileMetric {
            filename: filename.into(),
            timestamp: Utc::now(),
            duration_sec,
            status: MetricStatus::Success,
            size_bytes,
            error: None,
        }
    }

    /// Build a failure record, truncating `error` to 200 characters as the
    /// error-handling design table requires.
    pub fn failure(
        filename: impl Into<String>,
        duration_sec: f64,
        size_bytes: u64,
        error: impl Into<String>,
    ) -> Self {
        let error = error.into();
        let error = crate::transcription_client::truncate(&error, 200).to_owned();
        FileMetric {
            filename: filename.into(),
            timestamp: Utc::now(),
            duration_sec,
            status: MetricStatus::Failed,
            size_bytes,
            error: Some(error),
        }
    }

    /// The calendar day (UTC) this record belongs to, as `YYYY-MM-DD`.
    pub fn day_key(&self) -> String {
        self.timestamp.format("%Y-%m-%d").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_status_parses_known_values() {
        assert_eq!(PollStatus::parse("ready"), PollStatus::Ready);
        assert_eq!(PollStatus::parse("waiting"), PollStatus::Waiting);
        assert_eq!(PollStatus::parse("not found"), PollStatus::NotFound);
        assert_eq!(PollStatus::parse("failed"), PollStatus::Failed);
        assert_eq!(PollStatus::parse("anything-else"), PollStatus::Waiting);
    }

    #[test]
    fn terminal_statuses() {
        assert!(PollStatus::Ready.is_terminal());
        assert!(PollStatus::NotFound.is_terminal());
        assert!(PollStatus::Failed.is_terminal());
        assert!(!PollStatus::Waiting.is_terminal());
    }

    #[test]
    fn failure_metric_truncates_long_errors() {
        let error = "x".repeat(500);
        let metric = FileMetric::failure("a.mp3", 1.0, 10, error);
        assert_eq!(metric.error.unwrap().len(), 200);
    }

    #[test]
    fn day_key_is_utc_date() {
        let metric = FileMetric::success("a.mp3", 1.0, 10);
        assert_eq!(metric.day_key().len(), 10);
    }
}
