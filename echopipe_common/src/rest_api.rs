//! The REST API for `echopipe-orchestrator`'s HTTP Adapter (§4.9): the patch
//! DTO accepted by `PATCH /config`, and a thin `reqwest`-based client the
//! `echopipe` CLI drives against it.

use serde::de::DeserializeOwned;
use url::Url;
use utoipa::ToSchema;

use crate::{control_plane::Status, metrics::Summary, models::FileMetric, prelude::*, settings::Settings};

/// A partial update over [`Settings`], as accepted by `PATCH /config`. Every
/// field is optional; absent fields leave the current value untouched.
/// [`SettingsPatch::apply_to`] merges it onto a snapshot of the running
/// configuration, which is then re-validated by [`Settings::validate`]
/// before being applied.
#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct SettingsPatch {
    /// See [`Settings::max_concurrent_tasks`].
    pub max_concurrent_tasks: Option<u32>,
    /// See [`Settings::max_transcription_calls`].
    pub max_transcription_calls: Option<u32>,
    /// See [`Settings::max_api_calls`].
    pub max_api_calls: Option<u32>,
    /// See [`Settings::task_queue_max_size`].
    pub task_queue_max_size: Option<u32>,
    /// See [`Settings::queue_check_interval_sec`].
    pub queue_check_interval_sec: Option<u32>,
    /// See [`Settings::transcription_timeout_sec`].
    pub transcription_timeout_sec: Option<u32>,
    /// See [`Settings::api_timeout_sec`].
    pub api_timeout_sec: Option<u32>,
    /// See [`Settings::api_max_retries`].
    pub api_max_retries: Option<u32>,
    /// See [`Settings::auth_max_retries`].
    pub auth_max_retries: Option<u32>,
    /// See [`Settings::max_polling_attempts`].
    pub max_polling_attempts: Option<u32>,
    /// See [`Settings::polling_interval_sec`].
    pub polling_interval_sec: Option<u32>,
    /// See [`Settings::pool_stop_timeout_sec`].
    pub pool_stop_timeout_sec: Option<u32>,
    /// See [`Settings::max_file_size_bytes`].
    pub max_file_size_bytes: Option<u64>,
}

impl SettingsPatch {
    /// Merge this patch onto `base`, leaving every absent field unchanged.
    pub fn apply_to(&self, base: &Settings) -> Settings {
        let mut merged = base.clone();
        if let Some(v) = self.max_concurrent_tasks {
            merged.max_concurrent_tasks = v;
        }
        if let Some(v) = self.max_transcription_calls {
            merged.max_transcription_calls = v;
        }
        if let Some(v) = self.max_api_calls {
            merged.max_api_calls = v;
        }
        if let Some(v) = self.task_queue_max_size {
            merged.task_queue_max_size = v;
        }
        if let Some(v) = self.queue_check_interval_sec {
            merged.queue_check_interval_sec = v;
        }
        if let Some(v) = self.transcription_timeout_sec {
            merged.transcription_timeout_sec = v;
        }
        if let Some(v) = self.api_timeout_sec {
            merged.api_timeout_sec = v;
        }
        if let Some(v) = self.api_max_retries {
            merged.api_max_retries = v;
        }
        if let Some(v) = self.auth_max_retries {
            merged.auth_max_retries = v;
        }
        if let Some(v) = self.max_polling_attempts {
            merged.max_polling_attempts = v;
        }
        if let Some(v) = self.polling_interval_sec {
            merged.polling_interval_sec = v;
        }
        if let Some(v) = self.pool_stop_timeout_sec {
            merged.pool_stop_timeout_sec = v;
        }
        if let Some(v) = self.max_file_size_bytes {
            merged.max_file_size_bytes = v;
        }
        merged
    }
}

/// Query string accepted by `GET /metrics/status/:status`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct StatusMetricsQuery {
    /// Restrict the results to this calendar day (`YYYY-MM-DD`).
    pub date: Option<String>,
}

/// Query string accepted by `GET /metrics/search`.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct SearchMetricsQuery {
    /// Case-insensitive substring to match against filenames.
    pub q: String,
}

/// A client for talking to `echopipe-orchestrator`'s HTTP Adapter. Used by
/// the `echopipe` CLI and by integration tests.
pub struct Client {
    url: Url,
    client: reqwest::Client,
}

impl Client {
    /// Create a new client against the Adapter rooted at `base_url`.
    #[instrument(level = "trace")]
    pub fn new(base_url: &str) -> Result<Client> {
        let url = Url::parse(base_url).with_context(|| format!("invalid base URL {base_url}"))?;
        let client = reqwest::Client::builder()
            .build()
            .context("cannot build HTTP client")?;
        Ok(Client { url, client })
    }

    /// `GET /status`
    #[instrument(level = "trace", skip_all)]
    pub async fn status(&self) -> Result<Status> {
        let url = self.url.join("status")?;
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("error getting {url}"))?;
        self.handle_json_response(&url, resp).await
    }

    /// `GET /config`
    #[instrument(level = "trace", skip_all)]
    pub async fn get_config(&self) -> Result<Settings> {
        let url = self.url.join("config")?;
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("error getting {url}"))?;
        self.handle_json_response(&url, resp).await
    }

    /// `PATCH /config`
    #[instrument(level = "trace", skip_all)]
    pub async fn update_config(&self, patch: &SettingsPatch) -> Result<Settings> {
        let url = self.url.join("config")?;
        let resp = self
            .client
            .patch(url.clone())
            .json(patch)
            .send()
            .await
            .with_context(|| format!("error patching {url}"))?;
        self.handle_json_response(&url, resp).await
    }

    /// `POST /start`
    pub async fn start(&self) -> Result<()> {
        self.post_empty("start").await
    }

    /// `POST /stop`
    pub async fn stop(&self) -> Result<()> {
        self.post_empty("stop").await
    }

    /// `POST /pause`
    pub async fn pause(&self) -> Result<()> {
        self.post_empty("pause").await
    }

    /// `POST /resume`
    pub async fn resume(&self) -> Result<()> {
        self.post_empty("resume").await
    }

    /// `POST /restart`
    pub async fn restart(&self) -> Result<()> {
        self.post_empty("restart").await
    }

    /// `POST /restart-worker-pool`
    pub async fn restart_worker_pool(&self) -> Result<()> {
        self.post_empty("restart-worker-pool").await
    }

    async fn post_empty(&self, path: &str) -> Result<()> {
        let url = self.url.join(path)?;
        let resp = self
            .client
            .post(url.clone())
            .send()
            .await
            .with_context(|| format!("error posting {url}"))?;
        self.handle_empty_response(&url, resp).await
    }

    /// `GET /metrics/summary`
    #[instrument(level = "trace", skip_all)]
    pub async fn metrics_summary(&self) -> Result<Summary> {
        let url = self.url.join("metrics/summary")?;
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("error getting {url}"))?;
        self.handle_json_response(&url, resp).await
    }

    /// `GET /metrics/day/:date`
    #[instrument(level = "trace", skip_all)]
    pub async fn metrics_day(&self, date: &str) -> Result<Vec<FileMetric>> {
        let url = self.url.join(&format!("metrics/day/{date}"))?;
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("error getting {url}"))?;
        self.handle_json_response(&url, resp).await
    }

    /// `GET /metrics/recent/:days`
    #[instrument(level = "trace", skip_all)]
    pub async fn metrics_recent(&self, days: u32) -> Result<Vec<FileMetric>> {
        let url = self.url.join(&format!("metrics/recent/{days}"))?;
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("error getting {url}"))?;
        self.handle_json_response(&url, resp).await
    }

    /// `GET /metrics/status/:status`
    #[instrument(level = "trace", skip_all)]
    pub async fn metrics_status(&self, status: &str, date: Option<&str>) -> Result<Vec<FileMetric>> {
        let mut url = self.url.join(&format!("metrics/status/{status}"))?;
        if let Some(date) = date {
            url.query_pairs_mut().append_pair("date", date);
        }
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("error getting {url}"))?;
        self.handle_json_response(&url, resp).await
    }

    /// `GET /metrics/search?q=`
    #[instrument(level = "trace", skip_all)]
    pub async fn metrics_search(&self, pattern: &str) -> Result<Vec<FileMetric>> {
        let mut url = self.url.join("metrics/search")?;
        url.query_pairs_mut().append_pair("q", pattern);
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("error getting {url}"))?;
        self.handle_json_response(&url, resp).await
    }

    /// `GET /metrics/file/:name`
    #[instrument(level = "trace", skip_all)]
    pub async fn metrics_file(&self, name: &str) -> Result<Option<FileMetric>> {
        let url = self.url.join(&format!("metrics/file/{name}"))?;
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("error getting {url}"))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        self.handle_json_response(&url, resp).await
    }

    /// Check the HTTP status code and parse a JSON response.
    #[instrument(level = "trace", skip_all, fields(url = %url))]
    async fn handle_json_response<T>(&self, url: &Url, resp: reqwest::Response) -> Result<T>
    where
        T: DeserializeOwned,
    {
        if resp.status().is_success() {
            let value = resp.json().await.with_context(|| format!("error parsing {url}"))?;
            Ok(value)
        } else {
            Err(self.handle_error_response(url, resp).await)
        }
    }

    /// Check the HTTP status code, discarding a successful body.
    #[instrument(level = "trace", skip_all, fields(url = %url))]
    async fn handle_empty_response(&self, url: &Url, resp: reqwest::Response) -> Result<()> {
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(self.handle_error_response(url, resp).await)
        }
    }

    /// Extract an error from an HTTP response payload.
    #[instrument(level = "trace", skip_all, fields(url = %url, status = %resp.status()))]
    async fn handle_error_response(&self, url: &Url, resp: reqwest::Response) -> Error {
        let status = resp.status();
        match resp.text().await {
            Ok(body) => format_err!("unexpected HTTP status {} for {}:\n{}", status, url, body),
            Err(err) => err.into(),
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("url", &self.url).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;

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

    #[test]
    fn patch_leaves_absent_fields_untouched() {
        let base = test_settings();
        let patch = SettingsPatch {
            max_concurrent_tasks: Some(7),
            ..Default::default()
        };
        let merged = patch.apply_to(&base);
        assert_eq!(merged.max_concurrent_tasks, 7);
        assert_eq!(merged.max_api_calls, base.max_api_calls);
        assert_eq!(merged.api_endpoint, base.api_endpoint);
    }

    #[test]
    fn empty_patch_is_a_no_op() {
        let base = test_settings();
        let merged = SettingsPatch::default().apply_to(&base);
        assert_eq!(merged.max_concurrent_tasks, base.max_concurrent_tasks);
        assert_eq!(merged.max_file_size_bytes, base.max_file_size_bytes);
    }
}
