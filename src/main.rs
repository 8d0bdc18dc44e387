//! Sentinel uploader - forwards chat log intel reports to a Sentinel server.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sentinel_uploader::api::{build_http_client, UploaderClient};
use sentinel_uploader::app::UploaderApp;
use sentinel_uploader::config::{ApiEndpoints, ConfigLoader, Options};

#[derive(Parser)]
#[command(
    name = "sentinel-uploader",
    about = "Upload chat log intel reports to a Sentinel server",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Sentinel server URL.
    #[arg(long, env = "SENTINEL_BASE_URL")]
    base_url: Option<String>,

    /// Long-lived uploader token.
    #[arg(long, env = "SENTINEL_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Directory containing chat logs.
    #[arg(long, env = "SENTINEL_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Follow a single chat log instead of scanning a directory.
    #[arg(long, env = "SENTINEL_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Settings file to load instead of the default search paths.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, env = "SENTINEL_DEBUG")]
    debug: bool,
}

impl Cli {
    fn options(&self) -> Options {
        Options {
            base_url: self.base_url.clone().unwrap_or_default(),
            token: self.token.clone().unwrap_or_default(),
            log_dir: self.log_dir.clone(),
            log_file: self.log_file.clone(),
            debug: self.debug,
        }
    }
}

fn init_tracing(verbosity: u8, debug: bool) {
    let level = match verbosity {
        _ if debug && verbosity < 2 => "debug",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn shutdown_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown requested");
        cancel.cancel();
    });
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loader = cli
        .config
        .clone()
        .map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    let loaded = loader.load();
    let settings = loaded.as_ref().cloned().unwrap_or_default();
    let opts = cli.options().merge_settings(&settings).with_default_log_dir();

    init_tracing(cli.verbose, opts.debug);
    if let Err(e) = &loaded {
        tracing::error!(error = %e, "Failed to load settings");
        return ExitCode::FAILURE;
    }
    if let Err(e) = opts.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        return ExitCode::FAILURE;
    }

    let endpoints = match ApiEndpoints::from_base_url(&opts.base_url) {
        Ok(endpoints) => endpoints,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    let http = match build_http_client() {
        Ok(http) => http,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build HTTP client");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(api = %endpoints.base_url, "Starting Sentinel uploader");

    let client = UploaderClient::new(http, endpoints, opts.token.clone());
    let app = UploaderApp::new(opts, client);

    let cancel = CancellationToken::new();
    shutdown_on_ctrl_c(cancel.clone());

    match app.run(&cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Uploader stopped");
            ExitCode::FAILURE
        }
    }
}
