//! HTTP client module with retry logic for transient statuses.

mod client;
mod retry;

pub use client::HttpClient;
pub use retry::{
    BACKOFF_FACTOR, BACKOFF_START, HttpResponse, MAX_RETRIES, RETRY_STATUS, is_retryable_status,
    next_delay, parse_retry_after, with_retries,
};
