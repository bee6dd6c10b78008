use anyhow::Result;
use chrono::{DateTime, Local};
use log::{info, warn};
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::{
    audit::save_run,
    polling::{PollState, Poller},
    runtime::Runtime,
    sired::{SiredClient, StatusSnapshot, SubmissionApi, UploadRequest},
    token::{FetchToken, TokenStore},
};

use super::connect;

/// What `sired send` was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub struct SendOptions {
    pub upload: UploadRequest,
    /// Poll for a terminal state before fetching the log
    pub wait: bool,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub log_timeout: Duration,
}

/// Uploads a report, optionally waits for it to settle, fetches its log and
/// writes a run record. Returns the run record path.
#[tracing::instrument(skip(runtime, storage_dir, cancel))]
pub async fn send<R: Runtime + Clone>(
    runtime: R,
    storage_dir: Option<PathBuf>,
    options: SendOptions,
    cancel: CancellationToken,
) -> Result<PathBuf> {
    let client = connect(runtime, storage_dir)?;
    run_send(&client, &options, &cancel).await
}

#[tracing::instrument(skip(client, cancel))]
pub async fn run_send<R: Runtime, S: TokenStore, F: FetchToken>(
    client: &SiredClient<R, S, F>,
    options: &SendOptions,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    let started_at = Local::now();
    let token = client.get_token().await?;
    let upload = client.upload_zip(&token, &options.upload).await?;

    let mut status: Option<Value> = None;
    let mut log_path: Option<PathBuf> = None;

    match upload.solicitud_id.as_deref() {
        Some(id) if options.wait => {
            println!("SolicitudId: {}", id);
            let poller = Poller::new(client);
            let outcome = poller
                .wait_for_terminal_state(&token, id, options.timeout, options.poll_interval, cancel)
                .await?;

            println!("Estado: {}", outcome.estado());
            match outcome.state {
                PollState::TimedOut => warn!(
                    "{} still not final after {:?}; run `sired check {}` later",
                    id, options.timeout, id
                ),
                PollState::Cancelled => warn!("Stopped waiting for {}", id),
                _ => {}
            }

            if outcome.state != PollState::Cancelled {
                log_path = poller
                    .try_download_log_with_retry(
                        &token,
                        id,
                        options.log_timeout,
                        options.poll_interval,
                        cancel,
                    )
                    .await?;
            }
            status = outcome.snapshot.map(StatusSnapshot::into_value);
        }
        Some(id) => {
            println!("SolicitudId: {}", id);
            log_path = client.download_log(&token, id, None).await?;
        }
        None => warn!("Upload response carries no SolicitudId; skipping status and log"),
    }

    match &log_path {
        Some(path) => println!("Log: {}", path.display()),
        None => info!("No log downloaded"),
    }

    let record = run_record(
        started_at,
        options,
        upload.response,
        upload.solicitud_id,
        status,
        log_path,
    );
    let path = save_run(client.runtime(), client.storage_dir(), record, started_at)?;
    println!("OK. Run record: {}", path.display());
    Ok(path)
}

fn run_record(
    started_at: DateTime<Local>,
    options: &SendOptions,
    upload_response: Value,
    solicitud_id: Option<String>,
    status: Option<Value>,
    log_path: Option<PathBuf>,
) -> Map<String, Value> {
    let upload = &options.upload;
    let mut record = Map::new();
    record.insert(
        "FechaEjecucion".to_string(),
        json!(started_at.to_rfc3339()),
    );
    record.insert(
        "Parametros".to_string(),
        json!({
            "fecha": upload.upload_date,
            "tipo": upload.upload_type,
            "agente": upload.agent_code,
            "mercado": upload.market_code,
            "correo": upload.email,
            "zip": upload.zip_path.display().to_string(),
        }),
    );
    record.insert("UploadRespuesta".to_string(), upload_response);
    record.insert("SolicitudId".to_string(), json!(solicitud_id));
    record.insert("ConsultaEstado".to_string(), status.unwrap_or(Value::Null));
    record.insert(
        "LogPath".to_string(),
        json!(log_path.map(|p| p.display().to_string())),
    );
    record
}
