//! `postal-server`: the postal office RPC service.
//!
//! Accepts newline-delimited JSON connections and routes each request to
//! the shared [`postal_scheduler::PostalOffice`].

pub mod app;
pub mod rpc;
pub mod signal;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::app::AppState;

/// Pause after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Accept connections until `shutdown` fires. Each connection runs on its
/// own task and is closed when `shutdown` fires.
pub async fn serve(listener: TcpListener, app: Arc<AppState>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("listener closed");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!(%peer, error = %e, "set_nodelay failed");
                    }
                    tokio::spawn(rpc::connection::run_connection(
                        stream,
                        peer,
                        Arc::clone(&app),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
        }
    }
}
