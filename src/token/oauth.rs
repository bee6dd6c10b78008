use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use reqwest::header::ACCEPT;
use serde::Deserialize;

use super::Token;
use crate::error::SiredError;
use crate::http::HttpClient;

/// Source of fresh tokens.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FetchToken: Send + Sync {
    async fn fetch_token(&self) -> Result<Token>;
}

/// Token endpoint response. Some identity providers send `expires_in` as a
/// string, so it is kept loose here.
#[derive(Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<serde_json::Value>,
}

impl TokenResponse {
    pub fn expires_in_secs(&self) -> Option<i64> {
        match self.expires_in.as_ref()? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// OAuth2 client-credentials grant.
pub struct OAuthClient {
    http: HttpClient,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
}

impl OAuthClient {
    pub fn new(
        http: HttpClient,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: scope.into(),
        }
    }
}

#[async_trait]
impl FetchToken for OAuthClient {
    #[tracing::instrument(skip(self))]
    async fn fetch_token(&self) -> Result<Token> {
        info!("Requesting access token from identity provider...");

        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
            ("grant_type", "client_credentials"),
        ];

        let response = self
            .http
            .execute("Requesting access token", |_| {
                Ok(self
                    .http
                    .inner()
                    .post(&self.token_url)
                    .header(ACCEPT, "application/json")
                    .form(&form))
            })
            .await
            .context("Failed to reach the token endpoint")?;

        if !response.is_success() {
            return Err(SiredError::Token(format!(
                "HTTP {}: {}",
                response.status.as_u16(),
                response.text()
            ))
            .into());
        }

        let parsed: TokenResponse = serde_json::from_slice(&response.body).map_err(|_| {
            SiredError::Token(format!("invalid token response: {}", response.text()))
        })?;

        let access_token = match parsed.access_token.as_deref() {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => {
                return Err(SiredError::Token("response has no access_token".to_string()).into());
            }
        };

        let token = Token::issued(
            access_token,
            parsed.token_type.clone(),
            parsed.expires_in_secs(),
            Utc::now().timestamp(),
        );
        debug!("Obtained {:?}", token);
        Ok(token)
    }
}
