use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use postal_core::PostalConfig;
use postal_scheduler::{DispatchOutcome, DispatchReport, PostalOffice};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Central shared state, passed as `Arc<AppState>` to every connection.
pub struct AppState {
    pub config: PostalConfig,
    pub office: PostalOffice,
    pub stats: DispatchStats,
    /// Open RPC connections: conn_id -> peer address.
    pub clients: DashMap<String, SocketAddr>,
}

impl AppState {
    pub fn new(config: PostalConfig, office: PostalOffice) -> Self {
        Self {
            config,
            office,
            stats: DispatchStats::default(),
            clients: DashMap::new(),
        }
    }
}

/// Running totals of terminated jobs, fed by the scheduler's report channel.
#[derive(Debug, Default)]
pub struct DispatchStats {
    delivered: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchTotals {
    pub delivered: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl DispatchStats {
    pub fn record(&self, report: &DispatchReport) {
        let counter = match report.outcome {
            DispatchOutcome::Delivered => &self.delivered,
            DispatchOutcome::Failed(_) => &self.failed,
            DispatchOutcome::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn totals(&self) -> DispatchTotals {
        DispatchTotals {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

/// Drain dispatch reports into `state.stats` until every sender is gone.
pub fn spawn_report_collector(
    state: Arc<AppState>,
    mut reports_rx: mpsc::Receiver<DispatchReport>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(report) = reports_rx.recv().await {
            debug!(
                job_id = %report.job_id,
                attempts = report.attempts,
                outcome = ?report.outcome,
                "dispatch report"
            );
            state.stats.record(&report);
        }
    })
}
