use anyhow::Result;
use log::debug;
use std::path::PathBuf;

use crate::{
    error::SiredError,
    runtime::Runtime,
    sired::{SiredClient, StatusSnapshot, SubmissionApi, sanitize_solicitud_id},
    token::{FetchToken, TokenStore},
};

use super::connect;

/// Re-queries a previous submission and tries once to fetch its log.
#[tracing::instrument(skip(runtime, storage_dir))]
pub async fn check<R: Runtime + Clone>(
    runtime: R,
    storage_dir: Option<PathBuf>,
    solicitud_id: &str,
) -> Result<()> {
    let client = connect(runtime, storage_dir)?;
    run_check(&client, solicitud_id).await?;
    Ok(())
}

#[tracing::instrument(skip(client))]
pub async fn run_check<R: Runtime, S: TokenStore, F: FetchToken>(
    client: &SiredClient<R, S, F>,
    solicitud_id: &str,
) -> Result<(StatusSnapshot, Option<PathBuf>)> {
    let id = sanitize_solicitud_id(solicitud_id);
    if id.is_empty() {
        return Err(SiredError::Config(format!("invalid SolicitudId {:?}", solicitud_id)).into());
    }
    debug!("Checking {}", id);

    let token = client.get_token().await?;
    let snapshot = client.get_solicitud(&token, &id).await?;

    println!("SolicitudId: {}", id);
    println!("Estado: {}", snapshot.estado());
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    let log_path = client.download_log(&token, &id, None).await?;
    match &log_path {
        Some(path) => println!("Log: {}", path.display()),
        None => println!("Log not available yet"),
    }

    Ok((snapshot, log_path))
}
