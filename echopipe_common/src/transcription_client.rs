//! Client for the recognition service described in §4.5: optional token
//! auth, multipart submit, and a poll loop that maps server statuses onto
//! [`PollStatus`].

use std::{
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
    time::Duration,
};

use reqwest::{Client, StatusCode};
use tokio::sync::Mutex;

use crate::{
    prelude::*,
    retry::{exponential_seconds, retry_when},
    settings::Settings,
};

const AUTH_MAX_DELAY: Duration = Duration::from_secs(60);

fn mime_for_extension(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        _ => "audio/mpeg",
    }
}

/// The recognition parameters sent with every submit: a base bag of
/// defaults, with `recognitionParams` entries overriding (not duplicating)
/// any base field they share a key with.
fn recognition_form_fields(settings: &Settings) -> Vec<(String, String)> {
    let mut fields: Vec<(String, String)> = vec![
        ("speakers".to_owned(), "1".to_owned()),
        ("speaker_counter".to_owned(), "0".to_owned()),
        ("async".to_owned(), "1".to_owned()),
        ("punctuation".to_owned(), "0".to_owned()),
        ("normalization".to_owned(), "0".to_owned()),
        ("toxicity".to_owned(), "1".to_owned()),
        ("emotion".to_owned(), "1".to_owned()),
        ("voice_analyzer".to_owned(), "1".to_owned()),
        ("vad".to_owned(), "webrtc".to_owned()),
    ];
    if let serde_json::Value::Object(extra) = &settings.recognition_params {
        for (key, value) in extra {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            match fields.iter_mut().find(|(k, _)| k == key) {
                Some((_, v)) => *v = rendered,
                None => fields.push((key.clone(), rendered)),
            }
        }
    }
    fields
}

/// Outcome of a single poll attempt, prior to deciding whether to keep
/// polling.
enum PollOutcome {
    Completed(ResultDocument),
    Pending,
    Failed(String),
}

/// Talks to the external recognition/transcription service.
pub struct TranscriptionClient {
    http: Client,
    settings_submit_url: String,
    settings_result_url: String,
    settings_auth_url: String,
    use_authorization: bool,
    login: Option<String>,
    password: Option<String>,
    auth_max_retries: AtomicU32,
    timeout_sec: AtomicU64,
    polling_interval_sec: AtomicU64,
    max_polling_attempts: AtomicU32,
    token: Mutex<Option<String>>,
}

impl TranscriptionClient {
    /// Build a client from `settings`. The HTTP client itself has no global
    /// timeout; each call applies `transcriptionTimeoutSec` explicitly so the
    /// auth timeout (fixed at 60s, per the teacher's own auth client) can
    /// differ from it.
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(TranscriptionClient {
            http: Client::builder()
                .build()
                .context("failed to build transcription HTTP client")?,
            settings_submit_url: settings.transcription_service_url.clone(),
            settings_result_url: settings.transcription_result_url.clone(),
            settings_auth_url: settings.authorization_service_url.clone(),
            use_authorization: settings.use_authorization,
            login: settings.login.clone(),
            password: settings.password.clone(),
            auth_max_retries: AtomicU32::new(settings.auth_max_retries),
            timeout_sec: AtomicU64::new(settings.transcription_timeout_sec as u64),
            polling_interval_sec: AtomicU64::new(settings.polling_interval_sec as u64),
            max_polling_attempts: AtomicU32::new(settings.max_polling_attempts),
            token: Mutex::new(settings.transcription_access_token.clone()),
        })
    }

    /// Apply the subset of settings this client reads on every call, so a
    /// `Control Plane` config update takes effect on the very next request
    /// without reconstructing the client (§4.8: timeouts, retry counts, and
    /// polling cadence do not require a worker-pool restart).
    pub fn apply_settings(&self, settings: &Settings) {
        self.auth_max_retries.store(settings.auth_max_retries, Ordering::SeqCst);
        self.timeout_sec
            .store(settings.transcription_timeout_sec as u64, Ordering::SeqCst);
        self.polling_interval_sec
            .store(settings.polling_interval_sec as u64, Ordering::SeqCst);
        self.max_polling_attempts
            .store(settings.max_polling_attempts, Ordering::SeqCst);
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec.load(Ordering::SeqCst))
    }

    fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_sec.load(Ordering::SeqCst))
    }

    async fn cached_token(&self) -> Option<String> {
        self.token.lock().await.clone()
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// Authenticate against the auth URL, caching the returned token.
    /// A no-op returning `Ok(())` if `useAuthorization` is false.
    #[instrument(skip(self), level = "debug")]
    pub async fn authenticate(&self) -> Result<()> {
        if !self.use_authorization {
            return Ok(());
        }
        let (login, password) = match (&self.login, &self.password) {
            (Some(l), Some(p)) => (l.clone(), p.clone()),
            _ => return Err(format_err!("authorization enabled but login/password not configured")),
        };

        let builder = exponential_seconds(self.auth_max_retries.load(Ordering::SeqCst), AUTH_MAX_DELAY);
        let url = self.settings_auth_url.clone();
        let http = self.http.clone();
        let token = retry_when(
            builder,
            |e: &Error| {
                e.downcast_ref::<reqwest::Error>()
                    .map(|e| e.is_timeout() || e.is_connect() || status_is_server_error(e))
                    .unwrap_or(true)
            },
            move || {
                let http = http.clone();
                let url = url.clone();
                let login = login.clone();
                let password = password.clone();
                async move {
                    let response = http
                        .post(&url)
                        .timeout(AUTH_MAX_DELAY)
                        .form(&[("username", login.as_str()), ("password", password.as_str())])
                        .send()
                        .await
                        .context("authentication request failed")?;
                    if !response.status().is_success() {
                        let status = response.status();
                        let body = response.text().await.unwrap_or_default();
                        return Err(format_err!(
                            "authentication failed: {status} {}",
                            truncate(&body, 200)
                        ));
                    }
                    let body: serde_json::Value =
                        response.json().await.context("could not parse authentication response")?;
                    body.get("x-access-token")
                        .and_then(|v| v.as_str())
                        .map(str::to_owned)
                        .ok_or_else(|| format_err!("authentication response missing x-access-token"))
                }
            },
        )
        .await?;

        info!("acquired transcription access token");
        *self.token.lock().await = Some(token);
        Ok(())
    }

    /// Submit `bytes` (named `filename`) for transcription. Returns the
    /// server-assigned task id.
    #[instrument(skip(self, bytes), level = "debug")]
    pub async fn submit(&self, filename: &str, bytes: Vec<u8>, settings: &Settings) -> Result<String> {
        if self.use_authorization && self.cached_token().await.is_none() {
            self.authenticate().await?;
        }

        let response = self.do_submit(filename, &bytes, settings).await?;
        if response.status() == StatusCode::UNAUTHORIZED && self.use_authorization {
            warn!(file = filename, "transcription token expired, re-authenticating");
            self.invalidate_token().await;
            self.authenticate().await?;
            let retried = self.do_submit(filename, &bytes, settings).await?;
            return Self::parse_submit_response(retried).await;
        }
        Self::parse_submit_response(response).await
    }

    async fn do_submit(
        &self,
        filename: &str,
        bytes: &[u8],
        settings: &Settings,
    ) -> Result<reqwest::Response> {
        let part = reqwest::multipart::Part::bytes(bytes.to_vec())
            .file_name(filename.to_owned())
            .mime_str(mime_for_extension(filename))
            .context("invalid mime type")?;
        let mut form = reqwest::multipart::Form::new().part("wav", part);
        for (key, value) in recognition_form_fields(settings) {
            form = form.text(key, value);
        }

        let mut request = self
            .http
            .post(&self.settings_submit_url)
            .timeout(self.timeout())
            .multipart(form);
        if self.use_authorization {
            if let Some(token) = self.cached_token().await {
                request = request.header("x-access-token", token);
            }
        }

        request
            .send()
            .await
            .with_context(|| format!("submit request failed for {filename}"))
    }

    async fn parse_submit_response(response: reqwest::Response) -> Result<String> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format_err!("submit failed: {status} {}", truncate(&body, 200)));
        }
        let body: serde_json::Value = response.json().await.context("could not parse submit response")?;
        body.get("taskID")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .ok_or_else(|| format_err!("submit response missing taskID"))
    }

    /// Poll `{resultUrl}/{taskId}` until the job completes, fails, or the
    /// attempt budget is exhausted.
    #[instrument(skip(self), level = "debug")]
    pub async fn poll_until_done(&self, task_id: &str) -> Result<ResultDocument> {
        let max_attempts = self.max_polling_attempts.load(Ordering::SeqCst);
        for attempt in 1..=max_attempts {
            match self.poll_once(task_id).await? {
                PollOutcome::Completed(doc) => return Ok(doc),
                PollOutcome::Failed(reason) => {
                    return Err(format_err!("transcription job {task_id} failed: {reason}"))
                }
                PollOutcome::Pending => {
                    if attempt == max_attempts {
                        return Err(format_err!(
                            "transcription job {task_id} did not complete within {max_attempts} attempts"
                        ));
                    }
                    tokio::time::sleep(self.polling_interval()).await;
                }
            }
        }
        Err(format_err!("transcription job {task_id} exhausted its polling budget"))
    }

    async fn poll_once(&self, task_id: &str) -> Result<PollOutcome> {
        let response = self.do_poll(task_id).await?;
        if response.status() == StatusCode::UNAUTHORIZED && self.use_authorization {
            warn!(task_id, "token expired mid-poll, re-authenticating");
            self.invalidate_token().await;
            self.authenticate().await?;
            let retried = self.do_poll(task_id).await?;
            return Self::interpret_poll(retried).await;
        }
        Self::interpret_poll(response).await
    }

    async fn do_poll(&self, task_id: &str) -> Result<reqwest::Response> {
        let url = format!("{}/{task_id}", self.settings_result_url);
        let mut request = self.http.get(&url).timeout(self.timeout());
        if self.use_authorization {
            if let Some(token) = self.cached_token().await {
                request = request.header("x-access-token", token);
            }
        }
        request
            .send()
            .await
            .with_context(|| format!("poll request failed for task {task_id}"))
    }

    async fn interpret_poll(response: reqwest::Response) -> Result<PollOutcome> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format_err!("poll failed: {status} {}", truncate(&body, 200)));
        }
        let body: serde_json::Value = response.json().await.context("could not parse poll response")?;
        let raw_status = body.get("status").and_then(|v| v.as_str()).unwrap_or("");
        match PollStatus::parse(raw_status) {
            PollStatus::Ready => Ok(PollOutcome::Completed(body)),
            PollStatus::Waiting => Ok(PollOutcome::Pending),
            PollStatus::NotFound => Ok(PollOutcome::Failed("task not found".to_owned())),
            PollStatus::Failed => {
                let reason = body
                    .get("error")
                    .and_then(|v| v.as_str())
                    .unwrap_or("task processing failed")
                    .to_owned();
                Ok(PollOutcome::Failed(reason))
            }
        }
    }
}

fn status_is_server_error(e: &reqwest::Error) -> bool {
    e.status().map(|s| s.is_server_error()).unwrap_or(false)
}

pub(crate) fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_mapping_covers_known_extensions() {
        assert_eq!(mime_for_extension("a.mp3"), "audio/mpeg");
        assert_eq!(mime_for_extension("a.wav"), "audio/wav");
        assert_eq!(mime_for_extension("a.m4a"), "audio/mp4");
        assert_eq!(mime_for_extension("a.flac"), "audio/flac");
        assert_eq!(mime_for_extension("a.ogg"), "audio/ogg");
        assert_eq!(mime_for_extension("a.unknown"), "audio/mpeg");
        assert_eq!(mime_for_extension("noext"), "audio/mpeg");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello world", 5), "hello");
        assert_eq!(truncate("hi", 200), "hi");
    }
}
