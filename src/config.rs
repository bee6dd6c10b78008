//! Client settings, read from `SIRED_*` environment variables.

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::SiredError;
use crate::runtime::Runtime;

pub const ENV_TOKEN_URL: &str = "SIRED_TOKEN_URL";
pub const ENV_CLIENT_ID: &str = "SIRED_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "SIRED_CLIENT_SECRET";
pub const ENV_SCOPE: &str = "SIRED_SCOPE";
pub const ENV_SUBSCRIPTION_KEY: &str = "SIRED_SUBSCRIPTION_KEY";
pub const ENV_API_BASE: &str = "SIRED_API_BASE";
pub const ENV_STORAGE_DIR: &str = "SIRED_STORAGE_DIR";
pub const ENV_HTTP_TIMEOUT: &str = "SIRED_HTTP_TIMEOUT";
pub const ENV_VERIFY_SSL: &str = "SIRED_VERIFY_SSL";
pub const ENV_USER_AGENT: &str = "SIRED_USER_AGENT";

/// Per-request timeout when `SIRED_HTTP_TIMEOUT` is unset.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(120);

pub fn default_user_agent() -> String {
    format!("sired/{}", env!("SIRED_VERSION"))
}

/// Everything needed to talk to the identity provider and the SIRED API.
#[derive(Clone, PartialEq)]
pub struct Settings {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
    pub subscription_key: String,
    /// API root, without trailing slash
    pub api_base: String,
    pub storage_dir: PathBuf,
    pub http_timeout: Duration,
    pub verify_ssl: bool,
    pub user_agent: String,
}

impl Settings {
    /// Reads settings from the environment. `storage_dir` (e.g. from the
    /// command line) takes precedence over `SIRED_STORAGE_DIR`, which takes
    /// precedence over `~/.sired`.
    pub fn from_env<R: Runtime>(runtime: &R, storage_dir: Option<PathBuf>) -> Result<Self> {
        let var = |key: &str| runtime.env_var(key).map(|v| v.trim().to_string()).ok();
        let required = |key: &str| var(key).unwrap_or_default();

        let storage_dir = match storage_dir.or_else(|| var(ENV_STORAGE_DIR).map(PathBuf::from)) {
            Some(dir) => dir,
            None => runtime
                .home_dir()
                .map(|home| home.join(".sired"))
                .ok_or_else(|| {
                    SiredError::Config(format!(
                        "cannot determine home directory; set {}",
                        ENV_STORAGE_DIR
                    ))
                })?,
        };

        let http_timeout = match var(ENV_HTTP_TIMEOUT) {
            Some(secs) if !secs.is_empty() => secs
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| {
                    SiredError::Config(format!("{} must be a number of seconds", ENV_HTTP_TIMEOUT))
                })?,
            _ => DEFAULT_HTTP_TIMEOUT,
        };

        let verify_ssl = match var(ENV_VERIFY_SSL).as_deref() {
            None | Some("") => true,
            Some(value) => parse_bool(value).ok_or_else(|| {
                SiredError::Config(format!("{} must be true or false", ENV_VERIFY_SSL))
            })?,
        };

        let settings = Self {
            token_url: required(ENV_TOKEN_URL),
            client_id: required(ENV_CLIENT_ID),
            client_secret: required(ENV_CLIENT_SECRET),
            scope: required(ENV_SCOPE),
            subscription_key: required(ENV_SUBSCRIPTION_KEY),
            api_base: required(ENV_API_BASE).trim_end_matches('/').to_string(),
            storage_dir,
            http_timeout,
            verify_ssl,
            user_agent: var(ENV_USER_AGENT)
                .filter(|ua| !ua.is_empty())
                .unwrap_or_else(default_user_agent),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Fails fast on missing credentials, before any network call.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            (ENV_TOKEN_URL, &self.token_url),
            (ENV_CLIENT_ID, &self.client_id),
            (ENV_CLIENT_SECRET, &self.client_secret),
            (ENV_SCOPE, &self.scope),
            (ENV_SUBSCRIPTION_KEY, &self.subscription_key),
            (ENV_API_BASE, &self.api_base),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(key, _)| key)
        .collect();

        if !missing.is_empty() {
            return Err(SiredError::Config(format!("missing {}", missing.join(", "))).into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scope", &self.scope)
            .field("subscription_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("storage_dir", &self.storage_dir)
            .field("http_timeout", &self.http_timeout)
            .field("verify_ssl", &self.verify_ssl)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
