use anyhow::Result;
use clap::Parser;
use log::debug;
use sired::commands;
use sired::sired::UploadRequest;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// sired - SIRED report upload client
///
/// Uploads a ZIP report to the SIRED API, follows its processing status and
/// downloads the result log.
///
/// Credentials come from SIRED_* environment variables (a .env file in the
/// current directory is loaded first): SIRED_TOKEN_URL, SIRED_CLIENT_ID,
/// SIRED_CLIENT_SECRET, SIRED_SCOPE, SIRED_SUBSCRIPTION_KEY and SIRED_API_BASE.
///
/// Examples:
///   sired send 2025-09-21 Diario EEPD PEIM reporte.zip ops@example.com --wait
///   sired check 123e4567-e89b-12d3-a456-426614174000
#[derive(Parser, Debug)]
#[command(author, version = env!("SIRED_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory for the token cache, logs and run records (default ~/.sired)
    #[arg(long, env = "SIRED_STORAGE_DIR", value_name = "PATH", global = true)]
    pub storage_dir: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Upload a report and fetch its log
    Send(SendArgs),

    /// Query the status of an earlier upload and try to fetch its log
    Check(CheckArgs),

    /// Show the current access token, masked
    Token,
}

#[derive(clap::Args, Debug)]
pub struct SendArgs {
    /// Upload date (FechaDeCarga), e.g. 2025-09-21
    pub fecha: String,

    /// Upload type (TipoCarga), e.g. Diario
    pub tipo: String,

    /// Agent code (Agente)
    pub agente: String,

    /// Market code (Mercado)
    pub mercado: String,

    /// ZIP package to upload
    #[arg(value_name = "ZIP")]
    pub zip: PathBuf,

    /// Notification e-mail (Correo)
    pub correo: Option<String>,

    /// Wait until the upload reaches a final state
    #[arg(long)]
    pub wait: bool,

    /// Seconds to wait for a final state
    #[arg(long, value_name = "SECS", default_value_t = 300)]
    pub timeout: u64,

    /// Seconds between status queries
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    pub poll: u64,

    /// Seconds to wait for the log once the state is final
    #[arg(long, value_name = "SECS", default_value_t = 90)]
    pub log_timeout: u64,
}

impl SendArgs {
    fn into_options(self) -> commands::SendOptions {
        commands::SendOptions {
            upload: UploadRequest {
                zip_path: self.zip,
                upload_date: self.fecha,
                upload_type: self.tipo,
                agent_code: self.agente,
                market_code: self.mercado,
                email: self.correo,
            },
            wait: self.wait,
            timeout: Duration::from_secs(self.timeout),
            poll_interval: Duration::from_secs(self.poll),
            log_timeout: Duration::from_secs(self.log_timeout),
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct CheckArgs {
    /// SolicitudId returned by the upload
    #[arg(value_name = "SOLICITUD_ID")]
    pub solicitud_id: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let dotenv = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    if let Ok(path) = dotenv {
        debug!("Loaded environment from {:?}", path);
    }

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let runtime = sired::runtime::RealRuntime;

    match cli.command {
        Commands::Send(args) => {
            // First Ctrl-C stops polling so the run record still gets written
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            let ctrl_c_handler = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("\nInterrupted, stopping...");
                    trigger.cancel();
                }
                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(130);
                }
            });

            let result =
                commands::send(runtime, cli.storage_dir, args.into_options(), cancel).await;
            ctrl_c_handler.abort();
            result?;
        }
        Commands::Check(args) => {
            commands::check(runtime, cli.storage_dir, &args.solicitud_id).await?
        }
        Commands::Token => commands::token(runtime, cli.storage_dir).await?,
    }
    Ok(())
}
