use std::time::Duration;

use serde::{Deserialize, Serialize};

/// `CancelJobArgs::job_id` value that cancels every active job.
pub const WILDCARD_JOB_ID: &str = "*";

/// What a job does once its delay elapses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Hand the payload to the mail transport.
    #[default]
    Send,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Send => write!(f, "send"),
        }
    }
}

/// Message content. Opaque to the scheduler; passed through to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    /// Display name shown in the `From` header.
    pub sender_name: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Params of `postal.submit_job`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJobArgs {
    /// Only set when replaying a persisted job; the server generates one otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub kind: JobKind,
    /// Caller-chosen correlation key. Absent decodes as empty, which the
    /// scheduler rejects.
    #[serde(default)]
    pub unique_id: String,
    /// Milliseconds to wait, from acceptance, before dispatch.
    pub delay_ms: u64,
    pub payload: MailMessage,
}

impl NewJobArgs {
    pub fn new(unique_id: impl Into<String>, delay: Duration, payload: MailMessage) -> Self {
        Self {
            id: None,
            kind: JobKind::Send,
            unique_id: unique_id.into(),
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            payload,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Params of `postal.cancel_job`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelJobArgs {
    pub job_id: String,
}

/// Params of `postal.get_job_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetJobIdArgs {
    pub unique_id: String,
}
