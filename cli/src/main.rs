mod commands;
mod events;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dashboard_core::domain::error::AppError;
use dashboard_core::domain::site::SiteIdentity;
use dashboard_core::infra::api::HttpJobApi;
use dashboard_core::infra::config::{self, API_TOKEN_ENV};
use dashboard_core::infra::credentials::MemoryCredentialStore;
use dashboard_core::usecase::dashboard::DashboardService;

use commands::CommandError;
use events::{ErrorPayload, StdoutView, ERROR};

#[derive(Parser, Debug)]
#[command(name = "site-audit-dashboard")]
#[command(about = "Keeps the site audit dashboard in sync from the terminal")]
struct Args {
    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Domain of the site being audited
    #[arg(long, global = true, default_value = "")]
    domain: String,

    /// Alternate domains (staging, production) matched against job domains
    #[arg(long = "alt-domain", global = true)]
    alt_domains: Vec<String>,

    /// Bearer token for the audit API
    #[arg(long, global = true, env = API_TOKEN_ENV, hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync once and print the current state
    Status,
    /// Keep syncing and print state changes until interrupted
    Watch {
        /// Stop after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// Start a site check for --domain
    Scan {
        /// Keep running until the new job finishes
        #[arg(long)]
        follow: bool,
    },
    /// Switch the active organisation and resync
    SwitchOrg { organisation_id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            events::emit_event(ERROR, ErrorPayload::from(&e));
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), CommandError> {
    let settings_path = args
        .config
        .clone()
        .unwrap_or_else(config::default_settings_path);
    let settings = config::load_settings(&settings_path)?;
    log::info!("API base: {}", settings.api_base_url);

    let credentials = Arc::new(MemoryCredentialStore::new(args.token.clone()));
    let api = HttpJobApi::new(
        &settings.api_base_url,
        settings.request_timeout(),
        credentials.clone(),
    )
    .map_err(|e| AppError::from_api(&e))?;
    let site = SiteIdentity::new(&args.domain).with_candidates(args.alt_domains.clone());

    // リアルタイムプロバイダ無し: レガシーポーリング経路で動く
    let service = DashboardService::new(
        Arc::new(api),
        credentials,
        Arc::new(StdoutView),
        settings,
        site,
    );

    match args.command {
        Command::Status => commands::status(&service).await,
        Command::Watch { duration_secs } => {
            commands::watch(&service, duration_secs.map(Duration::from_secs)).await
        }
        Command::Scan { follow } => commands::scan(&service, follow).await,
        Command::SwitchOrg { organisation_id } => {
            commands::switch_org(&service, &organisation_id).await
        }
    }
}
