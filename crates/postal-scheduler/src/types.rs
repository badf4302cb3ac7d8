use std::time::Duration;

use chrono::{DateTime, Utc};
use postal_protocol::{JobKind, MailMessage, NewJobArgs};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A job accepted by the scheduler and not yet terminated.
///
/// Owned by the [`JobRegistry`](crate::registry::JobRegistry) while pending;
/// the dispatch task keeps its own clone.
#[derive(Debug, Clone)]
pub struct LiveJob {
    pub job_id: String,
    pub unique_id: String,
    pub kind: JobKind,
    /// Delay requested at submission (the remaining delay for replayed jobs).
    pub delay: Duration,
    pub accepted_at: Instant,
    pub message: MailMessage,
    cancel: CancellationToken,
}

impl LiveJob {
    pub fn new(job_id: String, args: NewJobArgs, accepted_at: Instant) -> Self {
        let delay = args.delay();
        Self {
            job_id,
            unique_id: args.unique_id,
            kind: args.kind,
            delay,
            accepted_at,
            message: args.payload,
            cancel: CancellationToken::new(),
        }
    }

    /// `delay - (now - accepted_at)`, floored at zero.
    pub fn remaining_delay(&self, now: Instant) -> Duration {
        self.delay
            .saturating_sub(now.saturating_duration_since(self.accepted_at))
    }

    /// Ask this job's dispatch task, and only this one, to stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// JSON body of the `pending_jobs.payload` column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPayload {
    pub kind: JobKind,
    pub remaining_delay_ms: u64,
    pub message: MailMessage,
}

/// One row of the durable snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingJobRecord {
    pub id: String,
    pub unique_id: String,
    pub payload: StoredPayload,
    pub updated_at: DateTime<Utc>,
}

impl PendingJobRecord {
    /// Capture `job` as of `now`, replacing its delay with what is left of it.
    pub fn capture(job: &LiveJob, now: Instant, updated_at: DateTime<Utc>) -> Self {
        let remaining = job.remaining_delay(now);
        Self {
            id: job.job_id.clone(),
            unique_id: job.unique_id.clone(),
            payload: StoredPayload {
                kind: job.kind,
                remaining_delay_ms: u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
                message: job.message.clone(),
            },
            updated_at,
        }
    }

    pub fn remaining_delay(&self) -> Duration {
        Duration::from_millis(self.payload.remaining_delay_ms)
    }

    /// Submission arguments that recreate this job under its original id.
    pub fn into_args(self) -> NewJobArgs {
        NewJobArgs {
            id: Some(self.id),
            kind: self.payload.kind,
            unique_id: self.unique_id,
            delay_ms: self.payload.remaining_delay_ms,
            payload: self.payload.message,
        }
    }
}

/// How a job left the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The transport accepted the message.
    Delivered,
    /// Every attempt failed; carries the last error.
    Failed(String),
    /// Cancelled before its delay elapsed.
    Cancelled,
}

/// Emitted once per terminated job when a report channel is configured.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub job_id: String,
    pub unique_id: String,
    pub attempts: u32,
    pub outcome: DispatchOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(delay: Duration) -> NewJobArgs {
        NewJobArgs::new(
            "msg_1",
            delay,
            MailMessage {
                sender_name: "a".into(),
                recipient: "b@example.com".into(),
                subject: "s".into(),
                body: "x".into(),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_delay_floors_at_zero() {
        let start = Instant::now();
        let job = LiveJob::new("j1".into(), args(Duration::from_secs(10)), start);

        assert_eq!(
            job.remaining_delay(start + Duration::from_secs(3)),
            Duration::from_secs(7)
        );
        assert_eq!(
            job.remaining_delay(start + Duration::from_secs(30)),
            Duration::ZERO
        );
    }

    #[tokio::test(start_paused = true)]
    async fn capture_then_into_args_keeps_identity() {
        let start = Instant::now();
        let job = LiveJob::new("j1".into(), args(Duration::from_secs(10)), start);
        let record = PendingJobRecord::capture(&job, start + Duration::from_secs(4), Utc::now());

        assert_eq!(record.remaining_delay(), Duration::from_secs(6));
        let replay = record.into_args();
        assert_eq!(replay.id.as_deref(), Some("j1"));
        assert_eq!(replay.unique_id, "msg_1");
        assert_eq!(replay.delay(), Duration::from_secs(6));
        assert_eq!(replay.payload.recipient, "b@example.com");
    }

    #[test]
    fn cancel_is_per_job() {
        let now = Instant::now();
        let a = LiveJob::new("a".into(), args(Duration::from_secs(1)), now);
        let b = LiveJob::new("b".into(), args(Duration::from_secs(1)), now);
        a.cancel();
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
    }
}
