//! HTTP client that reads whole responses and retries transient statuses.

use anyhow::Result;
use log::debug;
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;

use super::retry::{HttpResponse, parse_retry_after, with_retries};
use crate::error::transport_error;

/// Thin wrapper over a reqwest [`Client`] whose requests go through
/// [`with_retries`].
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a new HTTP client wrapping the given reqwest Client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds the reqwest client used against the identity provider and SIRED.
    ///
    /// `timeout` applies to every single request, independently of any polling
    /// deadline on top of it.
    pub fn build(user_agent: &str, timeout: Duration, verify_ssl: bool) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_ssl)
            .build()?;
        Ok(Self::new(client))
    }

    /// Returns a reference to the underlying reqwest Client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Sends the request produced by `build`, rebuilding it for every attempt.
    ///
    /// Requests can't be cloned once they carry a multipart body, hence the
    /// builder closure instead of a ready-made request.
    #[tracing::instrument(skip(self, build))]
    pub async fn execute<F>(&self, operation_name: &str, build: F) -> Result<HttpResponse>
    where
        F: Fn(usize) -> Result<RequestBuilder>,
    {
        with_retries(operation_name, |attempt| {
            let request = build(attempt);
            async move {
                let response = request?.send().await.map_err(transport_error)?;
                read_response(response).await
            }
        })
        .await
    }
}

async fn read_response(response: Response) -> Result<HttpResponse> {
    let status = response.status();
    let retry_after = parse_retry_after(response.headers());
    let body = response.bytes().await.map_err(transport_error)?;

    debug!("HTTP {} ({} bytes)", status.as_u16(), body.len());

    Ok(HttpResponse {
        status,
        retry_after,
        body: body.to_vec(),
    })
}
