//! The metrics collector described in §4.7: process-wide all-time and
//! per-day history, plus a session view that resets independently on pool
//! restart.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

use crate::prelude::*;

/// One calendar day's accumulated outcomes.
#[derive(Clone, Debug, Default, Serialize)]
pub struct DayBucket {
    /// Count of `Success` records for this day.
    pub successful: u64,
    /// Count of `Failed` records for this day.
    pub failed: u64,
    /// Sum of `duration_sec` across successful records for this day.
    pub total_time_sec: f64,
    /// The append-only list of records for this day, in recorded order.
    pub files: Vec<FileMetric>,
}

impl DayBucket {
    fn total(&self) -> u64 {
        self.successful + self.failed
    }

    fn success_rate(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.successful as f64 / self.total() as f64 * 100.0
        }
    }
}

/// Session counters, resettable independently of the all-time history.
#[derive(Default)]
struct SessionCounters {
    successful: AtomicU64,
    failed: AtomicU64,
    // Stored as millis so it fits an AtomicU64; §4.7 only needs 2dp precision.
    total_time_millis: AtomicU64,
    started_at: RwLock<DateTime<Utc>>,
}

/// Snapshot view of session counters, for `summary`/`get_metrics`-style
/// responses.
#[derive(Clone, Debug, Serialize)]
pub struct SessionSnapshot {
    /// Successful outcomes since the session started (or last reset).
    pub successful: u64,
    /// Failed outcomes since the session started (or last reset).
    pub failed: u64,
    /// `successful + failed`.
    pub total: u64,
    /// `successful / total * 100`, or 0 if `total` is 0.
    pub success_rate: f64,
    /// Sum of successful durations, in seconds.
    pub total_time_sec: f64,
    /// `total_time_sec / successful`, or 0 if `successful` is 0.
    pub average_processing_time_sec: f64,
    /// Seconds since the session started (or was last reset).
    pub session_elapsed_sec: f64,
}

/// Snapshot view of the all-time counters.
#[derive(Clone, Debug, Serialize)]
pub struct AllTimeSnapshot {
    /// Successful outcomes since process start.
    pub successful: u64,
    /// Failed outcomes since process start.
    pub failed: u64,
    /// `successful + failed`.
    pub total: u64,
    /// `successful / total * 100`, or 0 if `total` is 0.
    pub success_rate: f64,
    /// Sum of successful durations, in seconds.
    pub total_time_sec: f64,
    /// `total_time_sec / successful`, or 0 if `successful` is 0.
    pub average_processing_time_sec: f64,
}

/// A short summary combining session and all-time counts, per
/// `getSummary`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Summary {
    /// Session-scoped counts.
    pub session: SessionCounts,
    /// All-time counts.
    pub all_time: SessionCounts,
}

/// Bare processed/failed counts, used inside [`Summary`].
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct SessionCounts {
    /// Successful outcomes.
    pub processed: u64,
    /// Failed outcomes.
    pub failed: u64,
}

/// Process-wide metrics collector. Cheap to clone (wraps an `Arc`
/// internally via its callers holding it behind their own `Arc`); survives
/// worker-pool restarts, not process restarts (§4.7).
pub struct MetricsCollector {
    session: SessionCounters,
    all_time_successful: AtomicU64,
    all_time_failed: AtomicU64,
    all_time_time_millis: AtomicU64,
    daily: RwLock<HashMap<String, DayBucket>>,
}

impl MetricsCollector {
    /// Create an empty collector with the session clock starting now.
    pub fn new() -> Self {
        MetricsCollector {
            session: SessionCounters {
                started_at: RwLock::new(Utc::now()),
                ..Default::default()
            },
            all_time_successful: AtomicU64::new(0),
            all_time_failed: AtomicU64::new(0),
            all_time_time_millis: AtomicU64::new(0),
            daily: RwLock::new(HashMap::new()),
        }
    }

    /// Record a successful outcome for `name`.
    #[instrument(skip(self), level = "debug")]
    pub async fn record_success(&self, name: &str, duration_sec: f64, size_bytes: u64) {
        let metric = FileMetric::success(name, duration_sec, size_bytes);
        self.session.successful.fetch_add(1, Ordering::SeqCst);
        self.session
            .total_time_millis
            .fetch_add((duration_sec * 1000.0) as u64, Ordering::SeqCst);
        self.all_time_successful.fetch_add(1, Ordering::SeqCst);
        self.all_time_time_millis
            .fetch_add((duration_sec * 1000.0) as u64, Ordering::SeqCst);
        self.append(metric).await;
    }

    /// Record a failed outcome for `name`. `error` is truncated to 200
    /// characters by [`FileMetric::failure`].
    #[instrument(skip(self), level = "debug")]
    pub async fn record_failure(&self, name: &str, duration_sec: f64, size_bytes: u64, error: &str) {
        let metric = FileMetric::failure(name, duration_sec, size_bytes, error);
        self.session.failed.fetch_add(1, Ordering::SeqCst);
        self.all_time_failed.fetch_add(1, Ordering::SeqCst);
        self.append(metric).await;
    }

    async fn append(&self, metric: FileMetric) {
        let day = metric.day_key();
        let mut daily = self.daily.write().await;
        let bucket = daily.entry(day).or_default();
        match metric.status {
            MetricStatus::Success => {
                bucket.successful += 1;
                bucket.total_time_sec += metric.duration_sec;
            }
            MetricStatus::Failed => bucket.failed += 1,
        }
        bucket.files.push(metric);
    }

    /// Clear session counters only. All-time and daily history survive.
    #[instrument(skip(self), level = "info")]
    pub async fn reset_session(&self) {
        self.session.successful.store(0, Ordering::SeqCst);
        self.session.failed.store(0, Ordering::SeqCst);
        self.session.total_time_millis.store(0, Ordering::SeqCst);
        *self.session.started_at.write().await = Utc::now();
    }

    /// A snapshot of the current session's counters.
    pub async fn session_snapshot(&self) -> SessionSnapshot {
        let successful = self.session.successful.load(Ordering::SeqCst);
        let failed = self.session.failed.load(Ordering::SeqCst);
        let total = successful + failed;
        let total_time_sec = self.session.total_time_millis.load(Ordering::SeqCst) as f64 / 1000.0;
        let elapsed = Utc::now() - *self.session.started_at.read().await;

        SessionSnapshot {
            successful,
            failed,
            total,
            success_rate: if total == 0 {
                0.0
            } else {
                successful as f64 / total as f64 * 100.0
            },
            total_time_sec,
            average_processing_time_sec: if successful == 0 {
                0.0
            } else {
                total_time_sec / successful as f64
            },
            session_elapsed_sec: elapsed.num_milliseconds() as f64 / 1000.0,
        }
    }

    /// A snapshot of the all-time counters.
    pub fn all_time_snapshot(&self) -> AllTimeSnapshot {
        let successful = self.all_time_successful.load(Ordering::SeqCst);
        let failed = self.all_time_failed.load(Ordering::SeqCst);
        let total = successful + failed;
        let total_time_sec = self.all_time_time_millis.load(Ordering::SeqCst) as f64 / 1000.0;

        AllTimeSnapshot {
            successful,
            failed,
            total,
            success_rate: if total == 0 {
                0.0
            } else {
                successful as f64 / total as f64 * 100.0
            },
            total_time_sec,
            average_processing_time_sec: if successful == 0 {
                0.0
            } else {
                total_time_sec / successful as f64
            },
        }
    }

    /// A short summary combining session and all-time counts.
    pub async fn summary(&self) -> Summary {
        let session = self.session_snapshot().await;
        let all_time = self.all_time_snapshot();
        Summary {
            session: SessionCounts {
                processed: session.successful,
                failed: session.failed,
            },
            all_time: SessionCounts {
                processed: all_time.successful,
                failed: all_time.failed,
            },
        }
    }

    /// All records for the given `YYYY-MM-DD` day, in recorded order.
    pub async fn files_by_date(&self, date: &str) -> Vec<FileMetric> {
        self.daily
            .read()
            .await
            .get(date)
            .map(|bucket| bucket.files.clone())
            .unwrap_or_default()
    }

    /// Summarized day stats for the trailing `days` calendar days, most
    /// recent first. Days with no records are omitted.
    pub async fn last_n_days(&self, days: u32) -> Vec<(String, DayBucket)> {
        let daily = self.daily.read().await;
        let mut result = Vec::new();
        let today = Utc::now().date_naive();
        for offset in 0..days {
            let date = today - chrono::Duration::days(offset as i64);
            let key = date.format("%Y-%m-%d").to_string();
            if let Some(bucket) = daily.get(&key) {
                result.push((key, bucket.clone()));
            }
        }
        result
    }

    /// Records matching `status`, optionally scoped to a single day.
    pub async fn files_by_status(&self, status: MetricStatus, date: Option<&str>) -> Vec<FileMetric> {
        let daily = self.daily.read().await;
        let mut result = Vec::new();
        match date {
            Some(date) => {
                if let Some(bucket) = daily.get(date) {
                    result.extend(bucket.files.iter().filter(|f| f.status == status).cloned());
                }
            }
            None => {
                for bucket in daily.values() {
                    result.extend(bucket.files.iter().filter(|f| f.status == status).cloned());
                }
            }
        }
        result
    }

    /// The most recent record for `filename`, searched across all days.
    pub async fn file_info(&self, filename: &str) -> Option<FileMetric> {
        let daily = self.daily.read().await;
        let mut found: Option<FileMetric> = None;
        for bucket in daily.values() {
            for metric in &bucket.files {
                if metric.filename == filename {
                    if found.as_ref().map(|f| f.timestamp < metric.timestamp).unwrap_or(true) {
                        found = Some(metric.clone());
                    }
                }
            }
        }
        found
    }

    /// Case-insensitive substring search over filenames, across all days.
    pub async fn search_files(&self, pattern: &str) -> Vec<FileMetric> {
        let pattern = pattern.to_ascii_lowercase();
        let daily = self.daily.read().await;
        let mut result = Vec::new();
        for bucket in daily.values() {
            for metric in &bucket.files {
                if metric.filename.to_ascii_lowercase().contains(&pattern) {
                    result.push(metric.clone());
                }
            }
        }
        result
    }

    /// Today's stats, per `_get_today_stats` in the original collector.
    pub async fn today_stats(&self) -> (String, DayBucket) {
        let key = Utc::now().format("%Y-%m-%d").to_string();
        let bucket = self.daily.read().await.get(&key).cloned().unwrap_or_default();
        (key, bucket)
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_accumulate_session_and_all_time() {
        let metrics = MetricsCollector::new();
        metrics.record_success("a.mp3", 1.5, 100).await;
        metrics.record_failure("b.mp3", 0.0, 0, "boom").await;

        let session = metrics.session_snapshot().await;
        assert_eq!(session.successful, 1);
        assert_eq!(session.failed, 1);

        let all_time = metrics.all_time_snapshot();
        assert_eq!(all_time.successful, 1);
        assert_eq!(all_time.failed, 1);
    }

    #[tokio::test]
    async fn reset_session_preserves_all_time_and_daily_history() {
        let metrics = MetricsCollector::new();
        metrics.record_success("a.mp3", 1.0, 10).await;
        metrics.reset_session().await;

        let session = metrics.session_snapshot().await;
        assert_eq!(session.successful, 0);

        let all_time = metrics.all_time_snapshot();
        assert_eq!(all_time.successful, 1);

        let (today_key, bucket) = metrics.today_stats().await;
        assert_eq!(bucket.successful, 1);
        assert_eq!(today_key.len(), 10);
    }

    #[tokio::test]
    async fn search_and_lookup_are_case_insensitive() {
        let metrics = MetricsCollector::new();
        metrics.record_success("Interview.mp3", 1.0, 10).await;

        let found = metrics.search_files("interview").await;
        assert_eq!(found.len(), 1);

        let info = metrics.file_info("Interview.mp3").await;
        assert!(info.is_some());
        assert!(metrics.file_info("nope.mp3").await.is_none());
    }

    #[tokio::test]
    async fn files_by_status_scopes_to_date_when_given() {
        let metrics = MetricsCollector::new();
        metrics.record_success("a.mp3", 1.0, 10).await;
        metrics.record_failure("b.mp3", 0.0, 0, "err").await;

        let all_success = metrics.files_by_status(MetricStatus::Success, None).await;
        assert_eq!(all_success.len(), 1);

        let (today_key, _) = metrics.today_stats().await;
        let scoped = metrics.files_by_status(MetricStatus::Failed, Some(&today_key)).await;
        assert_eq!(scoped.len(), 1);

        let wrong_day = metrics.files_by_status(MetricStatus::Failed, Some("1999-01-01")).await;
        assert!(wrong_day.is_empty());
    }
}
