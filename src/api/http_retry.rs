//! Retry for idempotent admin API reads.
//!
//! List endpoints are retried on 429 (Too Many Requests) and 5xx with
//! exponential backoff plus jitter; a numeric `Retry-After` header wins over
//! the computed delay. Writes (create/update/save/restore) are never retried
//! since the server gives no idempotency guarantee for them.

use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;

/// Retry bounds for a single logical request
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Backoff for the given zero-based retry, capped, with 10-30% jitter
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as f64 * 2f64.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);
        let jitter = capped * (0.1 + rand::random::<f64>() * 0.2);
        Duration::from_millis((capped + jitter) as u64)
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || matches!(status.as_u16(), 500 | 502 | 503 | 504)
}

/// Seconds form of Retry-After, capped at five minutes
fn retry_after(response: &Response) -> Option<Duration> {
    let value = response.headers().get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(|secs| Duration::from_secs(secs.min(300)))
}

/// Send a request built fresh by `build` for every attempt.
///
/// Transport errors are retried the same way as retryable statuses; the last
/// response (or error) is returned once retries run out.
pub async fn send_idempotent<F>(build: F, policy: &RetryPolicy) -> Result<Response, reqwest::Error>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0;
    loop {
        let outcome = build().send().await;
        let delay = match &outcome {
            Ok(resp) if is_retryable(resp.status()) => {
                Some(retry_after(resp).unwrap_or_else(|| policy.backoff(attempt)))
            }
            Err(e) if e.is_connect() || e.is_timeout() => Some(policy.backoff(attempt)),
            _ => None,
        };
        let Some(delay) = delay else {
            return outcome;
        };
        if attempt >= policy.max_retries {
            return outcome;
        }
        attempt += 1;
        tracing::debug!(
            "Admin API request failed ({}), retry {}/{} after {:?}",
            match &outcome {
                Ok(resp) => resp.status().to_string(),
                Err(e) => e.to_string(),
            },
            attempt,
            policy.max_retries,
            delay
        );
        tokio::time::sleep(delay).await;
    }
}
