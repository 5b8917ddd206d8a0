//! Exponential-backoff retry helpers shared by the transcription and API
//! clients.

use std::{future::Future, time::Duration};

use backon::{ExponentialBuilder, Retryable};

use crate::prelude::*;

/// Build a `2^attempt` backoff schedule (per §4.6/§4.5), capped so that a
/// misconfigured retry count can't sleep for hours.
///
/// `max_times` is the number of retries (not counting the first attempt).
pub fn exponential_seconds(max_times: u32, cap: Duration) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_factor(2.0)
        .with_max_delay(cap)
        .with_max_times(max_times as usize)
}

/// Retry `f` using `builder`'s schedule as long as `should_retry` accepts the
/// error. Logs a warning before each retry, matching the density of the
/// teacher's own `retry_if_appropriate_async`.
pub async fn retry_when<F, Fut, T, P>(
    builder: ExponentialBuilder,
    should_retry: P,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&Error) -> bool,
{
    (move || f())
        .retry(builder)
        .when(|err| should_retry(err))
        .notify(|err, dur| warn!("retrying after error ({:?} backoff): {}", dur, err))
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn retries_until_success() {
        let attempts = AtomicU32::new(0);
        let result = retry_when(
            exponential_seconds(5, Duration::from_secs(1)),
            |_| true,
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(format_err!("transient"))
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_when_predicate_rejects() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = retry_when(
            exponential_seconds(5, Duration::from_secs(1)),
            |_| false,
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(format_err!("permanent")) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
