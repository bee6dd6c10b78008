//! Error taxonomy for the SIRED client.
//!
//! Functions return `anyhow::Result`; a [`SiredError`] inside the chain can be
//! recovered with `downcast_ref` when the caller needs to tell the kinds apart.

/// Errors raised by the SIRED client.
///
/// None of the variants ever carries a credential (token, client secret or
/// subscription key).
#[derive(Debug)]
pub enum SiredError {
    /// Missing or invalid configuration
    Config(String),
    /// Network failure, or a local precondition of a request (e.g. missing file)
    Transport(String),
    /// Non-2xx final status from the SIRED API, after retries
    Api {
        method: &'static str,
        path: String,
        status: u16,
        body: String,
    },
    /// The identity provider refused the request or returned an unusable token
    Token(String),
}

impl SiredError {
    /// HTTP status of an [`SiredError::Api`] error.
    pub fn status(&self) -> Option<u16> {
        match self {
            SiredError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl std::fmt::Display for SiredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SiredError::Config(msg) => write!(f, "Configuration error: {}", msg),
            SiredError::Transport(msg) => write!(f, "Transport error: {}", msg),
            SiredError::Api {
                method,
                path,
                status,
                body,
            } => write!(f, "{} {} HTTP {}: {}", method, path, status, body),
            SiredError::Token(msg) => write!(f, "Token request failed: {}", msg),
        }
    }
}

impl std::error::Error for SiredError {}

/// Converts a reqwest error into a transport error.
///
/// The URL is stripped first because request URLs carry the subscription key
/// in their query string.
pub fn transport_error(error: reqwest::Error) -> anyhow::Error {
    anyhow::Error::from(SiredError::Transport(error.without_url().to_string()))
}
