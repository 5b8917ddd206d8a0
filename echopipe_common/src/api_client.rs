//! Client for the downstream API described in §4.6: a single-shot POST of
//! the ResultDocument, retried with `2^attempt` backoff on transient
//! failures only.

use std::{
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
    time::Duration,
};

use reqwest::{Client, StatusCode};

use crate::{
    prelude::*,
    retry::{exponential_seconds, retry_when},
    settings::Settings,
};

/// Non-retryable response statuses per §4.6 and §7: the caller made a
/// request the server will never accept, so retrying wastes the budget.
fn is_permanent_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_REQUEST
            | StatusCode::UNAUTHORIZED
            | StatusCode::FORBIDDEN
            | StatusCode::UNPROCESSABLE_ENTITY
    )
}

/// Posts ResultDocuments to the downstream ingestion API.
pub struct ApiClient {
    http: Client,
    endpoint: String,
    timeout_sec: AtomicU64,
    max_retries: AtomicU32,
}

impl ApiClient {
    /// Build a client from `settings`.
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(ApiClient {
            http: Client::builder()
                .build()
                .context("failed to build API HTTP client")?,
            endpoint: settings.api_endpoint.clone(),
            timeout_sec: AtomicU64::new(settings.api_timeout_sec as u64),
            max_retries: AtomicU32::new(settings.api_max_retries),
        })
    }

    /// Apply the subset of settings this client reads on every call, so a
    /// `Control Plane` config update takes effect on the next send without
    /// reconstructing the client.
    pub fn apply_settings(&self, settings: &Settings) {
        self.timeout_sec.store(settings.api_timeout_sec as u64, Ordering::SeqCst);
        self.max_retries.store(settings.api_max_retries, Ordering::SeqCst);
    }

    /// Send `document` for object `name`. Both the `fname` and `fpath` query
    /// parameters carry the object name (§9 Open Question: this deployment
    /// has no meaningful distinct path to report).
    #[instrument(skip(self, document), level = "debug")]
    pub async fn send(&self, name: &str, document: &ResultDocument) -> Result<()> {
        let builder = exponential_seconds(self.max_retries.load(Ordering::SeqCst), Duration::from_secs(60));
        let http = self.http.clone();
        let endpoint = self.endpoint.clone();
        let timeout = Duration::from_secs(self.timeout_sec.load(Ordering::SeqCst));
        let name = name.to_owned();
        let document = document.clone();

        retry_when(
            builder,
            |e: &Error| !e.chain().any(|cause| cause.is::<Permanent>()),
            move || {
                let http = http.clone();
                let endpoint = endpoint.clone();
                let name = name.clone();
                let document = document.clone();
                async move { Self::send_once(&http, &endpoint, timeout, &name, &document).await }
            },
        )
        .await
    }

    async fn send_once(
        http: &Client,
        endpoint: &str,
        timeout: Duration,
        name: &str,
        document: &ResultDocument,
    ) -> Result<()> {
        let response = http
            .post(endpoint)
            .timeout(timeout)
            .query(&[("fname", name), ("fpath", name)])
            .json(document)
            .send()
            .await
            .with_context(|| format!("API request failed for {name}"))?;

        let status = response.status();
        if status.is_success() {
            let body: serde_json::Value = response
                .json()
                .await
                .with_context(|| format!("could not parse API response for {name}"))?;
            if body.get("id").and_then(|v| v.as_i64()).is_some() {
                Ok(())
            } else {
                Err(format_err!("API response for {name} missing a numeric id field"))
            }
        } else if is_permanent_status(status) {
            let body = response.text().await.unwrap_or_default();
            Err(Error::from(Permanent).context(format!(
                "API rejected {name} with {status}: {}",
                truncate(&body, 200)
            )))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(format_err!(
                "API call failed for {name} with {status}: {}",
                truncate(&body, 200)
            ))
        }
    }
}

/// Marker wrapped into an error's chain to flag it as non-retryable. Checked
/// by walking the chain rather than a string match so the retry predicate
/// can't misclassify an error whose message happens to mention a status
/// code.
#[derive(Debug)]
struct Permanent;

impl fmt::Display for Permanent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "permanent API failure")
    }
}

impl std::error::Error for Permanent {}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_statuses_match_spec_table() {
        assert!(is_permanent_status(StatusCode::BAD_REQUEST));
        assert!(is_permanent_status(StatusCode::UNAUTHORIZED));
        assert!(is_permanent_status(StatusCode::FORBIDDEN));
        assert!(is_permanent_status(StatusCode::UNPROCESSABLE_ENTITY));
        assert!(!is_permanent_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_permanent_status(StatusCode::BAD_GATEWAY));
    }
}
