use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use turnstile::admission::{AdmissionEngine, BypassDirectory, NoBypass, PolicyCatalog, StaticBypassSet};
use turnstile::config::TurnstileConfig;
use turnstile::http::{api_router, ApiServer};
use turnstile::store::{FailoverStore, StoreSettings};

#[derive(Parser, Debug)]
#[command(name = "turnstile")]
#[command(about = "Request admission control for the dating API")]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the listen address
    #[arg(short, long)]
    listen: Option<std::net::SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();

    info!("Starting Turnstile admission control");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = TurnstileConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    info!(listen_addr = %config.server.listen_addr, "Configuration loaded");

    // The catalog is deploy-time constant; validation catches bad edits.
    let catalog = PolicyCatalog::builtin();
    catalog.validate()?;

    let store = FailoverStore::connect(StoreSettings::from(&config.store)).await;

    let bypass: Arc<dyn BypassDirectory> = if config.bypass.principal_ids.is_empty() {
        Arc::new(NoBypass)
    } else {
        info!(
            count = config.bypass.principal_ids.len(),
            "Loaded privileged bypass identities"
        );
        Arc::new(StaticBypassSet::new(config.bypass.principal_ids.clone()))
    };

    let engine = Arc::new(AdmissionEngine::new(
        store,
        bypass,
        config.keying.forwarded_header.clone(),
    ));
    info!("Admission engine initialized");

    let router = api_router(engine, &catalog);
    let server = ApiServer::new(config.server.listen_addr, router);

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Turnstile stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
