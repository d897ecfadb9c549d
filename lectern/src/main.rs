#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod args;

use args::{Args, Command};
use clap::Parser;
use lectern_config::Config;
use lectern_server::{CLEAR_ALL_CONFIRMATION, Server};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(&args.config)?;

    lectern_telemetry::init(&config.telemetry)?;

    tracing::debug!(config_path = %args.config.display(), "configuration loaded");

    match args.command {
        Command::Serve { listen } => serve(&config, listen).await,
        Command::Cleanup { days } => {
            let cache = lectern_cache::create_cache_service(&config.cache)?;
            let deleted = cache.clear_old_cache(days.unwrap_or(config.cache.cleanup_days)).await?;
            println!("{deleted}");
            Ok(())
        }
        Command::Invalidate { lecture_id } => {
            let cache = lectern_cache::create_cache_service(&config.cache)?;
            let deleted = cache.invalidate_lecture_cache(&lecture_id).await?;
            println!("{deleted}");
            Ok(())
        }
        Command::Clear { confirm } => {
            if confirm != CLEAR_ALL_CONFIRMATION {
                anyhow::bail!("refusing to clear the cache: --confirm must be {CLEAR_ALL_CONFIRMATION}");
            }
            let cache = lectern_cache::create_cache_service(&config.cache)?;
            cache.clear_all_cache().await?;
            Ok(())
        }
        Command::Stats => {
            let cache = lectern_cache::create_cache_service(&config.cache)?;
            let stats = cache.get_cache_stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
    }
}

async fn serve(config: &Config, listen: Option<std::net::SocketAddr>) -> anyhow::Result<()> {
    tracing::info!("starting lectern");

    let mut server = Server::new(config)?;
    if let Some(listen) = listen {
        server = server.with_listen_address(listen);
    }

    // Set up graceful shutdown
    let shutdown = CancellationToken::new();
    let shutdown_clone = shutdown.clone();

    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_clone.cancel();
    });

    server.serve(shutdown).await?;

    tracing::info!("lectern stopped");
    Ok(())
}

/// Wait for a shutdown signal (`SIGINT` or `SIGTERM`)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
