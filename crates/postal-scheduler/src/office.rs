use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use postal_core::config::SchedulerConfig;
use postal_mail::MailTransport;
use postal_protocol::{NewJobArgs, WILDCARD_JOB_ID};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::{Result, SchedulerError},
    gate::{AdmissionGate, GateUnit},
    registry::JobRegistry,
    store::JobStore,
    types::{DispatchOutcome, DispatchReport, LiveJob, PendingJobRecord},
};

/// Retry and timeout knobs applied when a job's delay elapses.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// Total attempts; `1` means a single fire-and-forget send.
    pub attempts: u32,
    /// Linear backoff step: attempt `n` waits `backoff * n` before the next try.
    pub backoff: Duration,
    pub send_timeout: Duration,
}

impl From<&SchedulerConfig> for DispatchPolicy {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            attempts: config.dispatch_attempts.max(1),
            backoff: config.retry_backoff(),
            send_timeout: config.send_timeout(),
        }
    }
}

/// The delayed-dispatch scheduler.
///
/// Every accepted job holds one gate unit and owns one Tokio task that
/// sleeps for the job's delay (or until cancelled) and then hands the
/// message to the [`MailTransport`]. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PostalOffice {
    inner: Arc<Inner>,
}

struct Inner {
    gate: AdmissionGate,
    registry: JobRegistry,
    transport: Arc<dyn MailTransport>,
    policy: DispatchPolicy,
    /// Fired once when teardown begins; blocks further admissions.
    shutdown: CancellationToken,
    /// Shared by registrations, held exclusively while `shutdown` fires.
    admission: RwLock<()>,
    /// If set, every terminated job is reported here.
    reports_tx: Option<mpsc::Sender<DispatchReport>>,
}

impl PostalOffice {
    /// Pass `Some(tx)` to receive a [`DispatchReport`] for every job that
    /// terminates. The sender is non-blocking (`try_send`).
    pub fn new(
        config: &SchedulerConfig,
        transport: Arc<dyn MailTransport>,
        reports_tx: Option<mpsc::Sender<DispatchReport>>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        Self {
            inner: Arc::new(Inner {
                gate: AdmissionGate::new(config.max_jobs, shutdown.clone()),
                registry: JobRegistry::new(),
                transport,
                policy: DispatchPolicy::from(config),
                shutdown,
                admission: RwLock::new(()),
                reports_tx,
            }),
        }
    }

    /// Accept a job and return its id.
    ///
    /// Waits at the admission gate while the scheduler is at capacity. A
    /// job already registered under the same unique id is replaced and
    /// cancelled.
    pub async fn submit_job(&self, args: NewJobArgs) -> Result<String> {
        if args.unique_id.is_empty() {
            return Err(SchedulerError::MissingUniqueId);
        }
        let requested_id = args.id.clone().filter(|id| !id.is_empty());
        // Fail fast instead of waiting at the gate for an id that is taken.
        // The authoritative check happens at registration.
        if let Some(ref id) = requested_id {
            if self.inner.registry.contains_job(id) {
                return Err(SchedulerError::DuplicateJobId { id: id.clone() });
            }
        }

        let unit = self.inner.gate.acquire().await?;
        self.start_job(args, requested_id, unit)
    }

    /// Register an admitted job and spawn its task.
    ///
    /// Runs under the shared side of the admission lock, so it either
    /// completes before [`shutdown`](Self::shutdown) takes its snapshot or
    /// observes the shutdown and gives the unit back.
    fn start_job(
        &self,
        args: NewJobArgs,
        requested_id: Option<String>,
        unit: GateUnit,
    ) -> Result<String> {
        let _admission = self
            .inner
            .admission
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if self.inner.shutdown.is_cancelled() {
            return Err(SchedulerError::ShuttingDown);
        }

        let job_id = requested_id.unwrap_or_else(new_job_id);
        let job = LiveJob::new(job_id.clone(), args, Instant::now());

        // Register before spawning so a zero-delay task cannot deregister
        // ahead of its own registration.
        if let Some(previous) = self.inner.registry.register(job.clone())? {
            info!(
                job_id = %previous.job_id,
                unique_id = %previous.unique_id,
                replaced_by = %job_id,
                "job replaced by newer submission; cancelling"
            );
            previous.cancel();
        }

        info!(
            job_id = %job_id,
            unique_id = %job.unique_id,
            kind = %job.kind,
            delay_ms = job.delay.as_millis() as u64,
            "new job received"
        );

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run_job(job, unit).await });

        Ok(job_id)
    }

    /// Signal the job with `job_id` to stop without dispatching.
    ///
    /// Always reports `true`: an unknown or already finished job is not an
    /// error. [`WILDCARD_JOB_ID`] cancels every live job.
    pub fn cancel_job(&self, job_id: &str) -> bool {
        if job_id == WILDCARD_JOB_ID {
            let n = self.inner.registry.cancel_all();
            info!(count = n, "cancelling all jobs");
            return true;
        }
        if self.inner.registry.cancel(job_id) {
            info!(job_id = %job_id, "cancelling job");
        } else {
            info!(job_id = %job_id, "cancel requested for unknown or finished job");
        }
        true
    }

    /// Id of the live job registered under `unique_id`.
    pub fn get_job_id(&self, unique_id: &str) -> Result<String> {
        self.inner
            .registry
            .lookup_job_id(unique_id)
            .ok_or_else(|| SchedulerError::NotFound {
                unique_id: unique_id.to_string(),
            })
    }

    /// Number of live jobs.
    pub fn pending(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.gate.capacity()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Replay the jobs persisted by the previous run, each under its original
    /// id with the remaining delay, then empty the store.
    ///
    /// Returns how many jobs were resubmitted. Skipped when no store file
    /// exists. If teardown starts mid-replay the store is left untouched so
    /// nothing is lost.
    pub async fn restore(&self, store: &JobStore) -> Result<usize> {
        if !store.exists() {
            info!(path = %store.path().display(), "no pending-jobs store; skipping restore");
            return Ok(0);
        }

        let records = store.load_all()?;
        let total = records.len();
        let mut restored = 0usize;
        for record in records {
            let job_id = record.id.clone();
            match self.submit_job(record.into_args()).await {
                Ok(_) => restored += 1,
                Err(SchedulerError::ShuttingDown) => {
                    warn!(restored, total, "shutdown during restore; keeping stored jobs");
                    return Err(SchedulerError::ShuttingDown);
                }
                Err(e) => warn!(job_id = %job_id, error = %e, "failed to restore job"),
            }
        }

        let cleared = store.clear_all()?;
        info!(restored, total, cleared, "pending jobs restored");
        Ok(restored)
    }

    /// Stop admitting jobs, persist every live job with its remaining delay,
    /// and cancel their tasks. Returns how many records were written.
    pub fn shutdown(&self, store: &JobStore) -> Result<usize> {
        info!("saving pending jobs");
        {
            // Waits out registrations already in progress; later ones see
            // the cancelled token.
            let _admission = self
                .inner
                .admission
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            self.inner.shutdown.cancel();
        }

        let now = Instant::now();
        let updated_at = Utc::now();
        let records: Vec<PendingJobRecord> = self
            .inner
            .registry
            .snapshot()
            .iter()
            .map(|job| PendingJobRecord::capture(job, now, updated_at))
            .collect();
        let cancelled = self.inner.registry.cancel_all();

        if records.is_empty() {
            info!("no pending jobs to save");
            return Ok(0);
        }

        let saved = store.save_all(&records)?;
        info!(saved, cancelled, path = %store.path().display(), "pending jobs saved");
        Ok(saved)
    }
}

impl Inner {
    /// Body of a job's task. Releases the gate unit exactly once, when the
    /// task ends.
    async fn run_job(&self, job: LiveJob, unit: GateUnit) {
        let cancel = job.cancel_token();
        let fired = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(job.delay) => true,
        };

        // Leave the registry before sending so a concurrent shutdown
        // snapshot cannot persist a job that is already going out.
        self.registry.deregister(&job.unique_id, &job.job_id);

        let (outcome, attempts) = if fired {
            self.dispatch(&job).await
        } else {
            info!(job_id = %job.job_id, "job cancelled");
            (DispatchOutcome::Cancelled, 0)
        };

        unit.release();
        info!(job_id = %job.job_id, unique_id = %job.unique_id, "job deleted");

        if let Some(ref tx) = self.reports_tx {
            let report = DispatchReport {
                job_id: job.job_id.clone(),
                unique_id: job.unique_id.clone(),
                attempts,
                outcome,
            };
            // try_send never blocks the job task; log if the channel is full.
            if tx.try_send(report).is_err() {
                warn!(job_id = %job.job_id, "report channel full or closed; report dropped");
            }
        }
    }

    /// Hand the message to the transport, retrying per policy. Failures are
    /// logged and reported, never surfaced to the submitter.
    async fn dispatch(&self, job: &LiveJob) -> (DispatchOutcome, u32) {
        let transport = self.transport.name();
        let mut last_err = String::new();

        for attempt in 1..=self.policy.attempts {
            let result =
                tokio::time::timeout(self.policy.send_timeout, self.transport.send(&job.message))
                    .await;
            match result {
                Ok(Ok(())) => {
                    info!(job_id = %job.job_id, transport, attempt, "job success");
                    return (DispatchOutcome::Delivered, attempt);
                }
                Ok(Err(e)) => last_err = e.to_string(),
                Err(_) => {
                    last_err = format!(
                        "send timed out after {}ms",
                        self.policy.send_timeout.as_millis()
                    )
                }
            }

            warn!(job_id = %job.job_id, transport, attempt, error = %last_err, "job error");

            if attempt < self.policy.attempts {
                tokio::time::sleep(self.policy.backoff * attempt).await;
            }
        }

        (DispatchOutcome::Failed(last_err), self.policy.attempts)
    }
}

fn new_job_id() -> String {
    Uuid::new_v4().simple().to_string()
}
