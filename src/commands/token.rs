use anyhow::Result;
use chrono::DateTime;
use std::path::PathBuf;

use crate::{
    runtime::Runtime,
    sired::{SiredClient, TokenMeta},
    token::{FetchToken, TokenStore},
};

use super::connect;

/// Shows metadata of the current access token, masked.
#[tracing::instrument(skip(runtime, storage_dir))]
pub async fn token<R: Runtime + Clone>(runtime: R, storage_dir: Option<PathBuf>) -> Result<()> {
    let client = connect(runtime, storage_dir)?;
    let meta = run_token(&client).await?;
    print!("{}", render_meta(&meta));
    Ok(())
}

pub async fn run_token<R: Runtime, S: TokenStore, F: FetchToken>(
    client: &SiredClient<R, S, F>,
) -> Result<TokenMeta> {
    client.token_meta().await
}

fn format_timestamp(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}

fn render_meta(meta: &TokenMeta) -> String {
    format!(
        "Type:       {}\nLength:     {}\nToken:      {}\nObtained:   {}\nExpires:    {}\n",
        meta.token_type,
        meta.length,
        meta.access_token_masked,
        format_timestamp(meta.obtained_at),
        format_timestamp(meta.expires_at),
    )
}
