//! Bearer token acquisition and caching.
//!
//! - `store` - where a token is kept between runs (file or memory)
//! - `oauth` - client-credentials grant against the identity provider

mod oauth;
mod store;

#[cfg(test)]
pub use oauth::MockFetchToken;
pub use oauth::{FetchToken, OAuthClient, TokenResponse};
pub use store::{FileTokenStore, MemoryTokenStore, TOKEN_CACHE_FILE};

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Seconds shaved off the advertised lifetime so a token is never used at the
/// very edge of its validity.
pub const EXPIRY_MARGIN_SECS: i64 = 30;

/// Lower bound of the cached lifetime, whatever the identity provider says.
pub const MIN_LIFETIME_SECS: i64 = 60;

/// Lifetime assumed when the identity provider omits `expires_in`.
pub const DEFAULT_TTL_SECS: i64 = 3600;

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// A cached bearer token. Times are Unix timestamps in seconds.
#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct Token {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub obtained_at: i64,
    pub expires_at: i64,
}

impl Token {
    /// Builds a token obtained at `obtained_at` with a lifetime of
    /// `expires_in` seconds, applying the expiry margin.
    pub fn issued(
        access_token: impl Into<String>,
        token_type: Option<String>,
        expires_in: Option<i64>,
        obtained_at: i64,
    ) -> Self {
        let ttl = expires_in.unwrap_or(DEFAULT_TTL_SECS);
        Self {
            access_token: access_token.into(),
            token_type: token_type.unwrap_or_else(default_token_type),
            obtained_at,
            expires_at: obtained_at
                .saturating_add(ttl.saturating_sub(EXPIRY_MARGIN_SECS).max(MIN_LIFETIME_SECS)),
        }
    }

    pub fn is_valid_at(&self, now: i64) -> bool {
        !self.access_token.is_empty() && now < self.expires_at
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now().timestamp())
    }

    /// Access token with only the first and last `keep` characters visible.
    pub fn masked(&self, keep: usize) -> String {
        crate::audit::mask_secret(&self.access_token, keep)
    }

    pub fn obtained_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.obtained_at, 0)
    }

    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.expires_at, 0)
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &self.masked(4))
            .field("token_type", &self.token_type)
            .field("obtained_at", &self.obtained_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Persistence for the single cached token.
///
/// Implementations need no locking: two processes refreshing at the same time
/// both end up with a valid token, and the last write wins.
pub trait TokenStore: Send + Sync {
    /// Returns the cached token, or `None` when nothing usable is stored.
    fn load(&self) -> Option<Token>;

    fn save(&self, token: &Token) -> Result<()>;
}

/// Returns the cached access token while it is valid; otherwise obtains a new
/// one from `refresh`, stores it and returns it.
///
/// A failing store write is logged and ignored. Only a failing refresh is an
/// error.
pub async fn get_or_refresh<S, F, Fut>(store: &S, refresh: F) -> Result<String>
where
    S: TokenStore + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Token>>,
{
    if let Some(token) = store.load() {
        if token.is_valid() {
            debug!("Using cached token (expires at {})", token.expires_at);
            return Ok(token.access_token);
        }
        debug!("Cached token expired at {}, refreshing", token.expires_at);
    }

    let token = refresh().await?;
    if let Err(e) = store.save(&token) {
        warn!("Failed to cache access token: {:#}", e);
    }
    Ok(token.access_token)
}
