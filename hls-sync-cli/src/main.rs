use clap::Parser;
use hls_sync_engine::{HlsSynchronizer, SyncConfig};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod cli;
mod config;
mod error;
mod logging;

use cli::CliArgs;
use error::AppError;

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        error!(error = ?e, "hls-sync failed");
        std::process::exit(1);
    }
}

/// Flags first, then the config file on top when `-c` is given.
fn resolve_config(args: &CliArgs) -> Result<SyncConfig, AppError> {
    let flags = args.to_config();
    let mut config = match &args.config {
        Some(path) => {
            let config = config::load(&flags, path, &args.urls)?;
            eprintln!("Loaded config from <{}>.", path.display());
            config
        }
        None => flags,
    };
    config.retries = config.retries.max(1);
    if config.program_time_format.is_empty() {
        config.program_time_format = SyncConfig::default().program_time_format;
    }
    Ok(config)
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    let args = CliArgs::parse();
    eprintln!(
        "hls-sync {} - HTTP Live Streaming (HLS) Synchronizer.",
        env!("CARGO_PKG_VERSION")
    );

    let config = resolve_config(&args)?;

    if args.check {
        eprintln!("{}", config::render(&config)?);
        match config.validate() {
            Ok(()) => eprintln!("Configuration OK."),
            Err(e) => eprintln!("Configuration invalid: {e}"),
        }
        return Ok(());
    }

    let _guard = logging::init_logging(&config.log_level, config.log_file.as_deref())?;

    let synchronizer = HlsSynchronizer::new(config)?;
    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            shutdown_signal().await;
            token.cancel();
        }
    });

    info!(
        sources = synchronizer.config().source.urls.len(),
        "Starting hls-sync"
    );
    synchronizer.run(token).await?;
    info!("hls-sync stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining pipeline");
}
