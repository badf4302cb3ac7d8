use std::sync::Arc;

use clap::Parser;
use postal_core::PostalConfig;
use postal_scheduler::{JobStore, PostalOffice};
use postal_server::{app, signal};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Dispatch reports buffered before the scheduler starts dropping them.
const REPORT_BUFFER: usize = 1024;

#[derive(Parser)]
#[command(name = "postal-office", version, about = "Delayed mail dispatch service")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "POSTAL_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "postal_server=info,postal_scheduler=info,postal_mail=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();
    let config = PostalConfig::load(cli.config.as_deref())?;

    let transport = postal_mail::from_config(&config.mail);
    let (reports_tx, reports_rx) = tokio::sync::mpsc::channel(REPORT_BUFFER);
    let office = PostalOffice::new(&config.scheduler, transport, Some(reports_tx));
    let store = JobStore::new(config.store.database_path());
    info!(
        env = %config.store.env,
        path = %store.path().display(),
        max_jobs = office.capacity(),
        "postal office starting"
    );

    // Waits at the admission gate if more jobs were saved than fit.
    let restored = office.restore(&store).await?;
    info!(restored, "startup restore complete");

    let state = Arc::new(app::AppState::new(config, office));
    let collector = app::spawn_report_collector(Arc::clone(&state), reports_rx);

    let listener = tokio::net::TcpListener::bind(state.config.server.listen_addr()).await?;
    info!("Postal office listening on {}", listener.local_addr()?);

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(postal_server::serve(
        listener,
        Arc::clone(&state),
        shutdown.clone(),
    ));

    signal::wait_for_shutdown().await;
    shutdown.cancel();

    let saved = state.office.shutdown(&store)?;
    let _ = server.await;
    collector.abort();
    info!(saved, "shutting down gracefully");
    Ok(())
}
