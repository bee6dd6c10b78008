//! Retry logic for transient HTTP statuses with exponential backoff.

use anyhow::Result;
use log::{debug, warn};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::future::Future;
use std::time::Duration;

/// Statuses worth retrying: rate limiting and gateway/server hiccups.
pub const RETRY_STATUS: [u16; 5] = [429, 500, 502, 503, 504];

/// Maximum number of attempts (the first call included).
pub const MAX_RETRIES: usize = 3;

/// Delay before the first retry.
pub const BACKOFF_START: Duration = Duration::from_millis(600);

/// Growth factor applied to the delay after every retry.
pub const BACKOFF_FACTOR: f64 = 1.7;

/// A fully-read HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: StatusCode,
    /// Value of the `Retry-After` header, when given in seconds
    pub retry_after: Option<Duration>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    RETRY_STATUS.contains(&status.as_u16())
}

/// Reads `Retry-After` as a number of seconds. HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// The server's `Retry-After` wins when it asks for more than our own backoff.
pub fn next_delay(backoff: Duration, retry_after: Option<Duration>) -> Duration {
    match retry_after {
        Some(retry_after) => retry_after.max(backoff),
        None => backoff,
    }
}

/// Runs `operation` until it yields a non-retryable status or [`MAX_RETRIES`]
/// attempts were made. The closure receives the zero-based attempt index.
///
/// HTTP statuses never turn into errors here: after the last attempt the last
/// response is returned and the caller decides what the status means. Errors
/// returned by `operation` (transport failures) propagate immediately.
pub async fn with_retries<F, Fut>(operation_name: &str, mut operation: F) -> Result<HttpResponse>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<HttpResponse>>,
{
    let mut backoff = BACKOFF_START;
    let mut attempt = 0;

    loop {
        let response = operation(attempt).await?;
        attempt += 1;

        if !is_retryable_status(response.status) {
            return Ok(response);
        }

        if attempt >= MAX_RETRIES {
            debug!(
                "{}: giving up after {} attempts (HTTP {})",
                operation_name,
                attempt,
                response.status.as_u16()
            );
            return Ok(response);
        }

        let delay = next_delay(backoff, response.retry_after);
        warn!(
            "{}: attempt {}/{} returned HTTP {}, retrying in {}ms...",
            operation_name,
            attempt,
            MAX_RETRIES,
            response.status.as_u16(),
            delay.as_millis()
        );
        tokio::time::sleep(delay).await;
        backoff = backoff.mul_f64(BACKOFF_FACTOR);
    }
}
