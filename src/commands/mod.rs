use anyhow::Result;
use log::debug;
use std::path::PathBuf;

use crate::{
    config::Settings,
    runtime::Runtime,
    sired::SiredClient,
    token::{FileTokenStore, OAuthClient},
};

mod check;
mod send;
mod token;

pub use check::{check, run_check};
pub use send::{SendOptions, run_send, send};
pub use token::{run_token, token};

/// Client wired to the real identity provider and token cache file.
pub type LiveClient<R> = SiredClient<R, FileTokenStore<R>, OAuthClient>;

/// Reads settings from the environment and builds the live client.
#[tracing::instrument(skip(runtime))]
pub fn connect<R: Runtime + Clone>(runtime: R, storage_dir: Option<PathBuf>) -> Result<LiveClient<R>> {
    let settings = Settings::from_env(&runtime, storage_dir)?;
    debug!("Using {:?}", settings);
    SiredClient::new(runtime, &settings)
}
