//! Method handlers.
//!
//! Each function decodes its params, calls the [`PostalOffice`] and returns
//! a `ResFrame`. `dispatch::route` is the only caller.
//!
//! [`PostalOffice`]: postal_scheduler::PostalOffice

use postal_protocol::frames::ResFrame;
use postal_protocol::{CancelJobArgs, GetJobIdArgs, NewJobArgs};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::app::AppState;

fn parse_params<T: DeserializeOwned>(params: Option<&Value>) -> Result<T, String> {
    let Some(value) = params else {
        return Err("missing params".to_string());
    };
    serde_json::from_value(value.clone()).map_err(|e| format!("invalid params: {e}"))
}

// ---------------------------------------------------------------------------
// postal.submit_job
// ---------------------------------------------------------------------------

/// Params: [`NewJobArgs`]. Returns the job id as a bare string.
///
/// May wait at the admission gate while the scheduler is full; the caller
/// runs it on its own task.
pub async fn handle_submit_job(
    params: Option<&Value>,
    req_id: &str,
    app: &AppState,
) -> ResFrame {
    let args: NewJobArgs = match parse_params(params) {
        Ok(a) => a,
        Err(msg) => return ResFrame::err(req_id, "INVALID_PARAMS", &msg),
    };

    match app.office.submit_job(args).await {
        Ok(job_id) => ResFrame::ok(req_id, job_id),
        Err(e) => {
            warn!(error = %e, "postal.submit_job failed");
            ResFrame::err(req_id, e.code(), &e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// postal.cancel_job
// ---------------------------------------------------------------------------

/// Params: `{ "job_id": string }`, where `"*"` cancels everything.
/// Always answers `true`.
pub fn handle_cancel_job(params: Option<&Value>, req_id: &str, app: &AppState) -> ResFrame {
    let args: CancelJobArgs = match parse_params(params) {
        Ok(a) => a,
        Err(msg) => return ResFrame::err(req_id, "INVALID_PARAMS", &msg),
    };
    ResFrame::ok(req_id, app.office.cancel_job(&args.job_id))
}

// ---------------------------------------------------------------------------
// postal.get_job_id
// ---------------------------------------------------------------------------

/// Params: `{ "unique_id": string }`. Returns the job id or `NOT_FOUND`.
pub fn handle_get_job_id(params: Option<&Value>, req_id: &str, app: &AppState) -> ResFrame {
    let args: GetJobIdArgs = match parse_params(params) {
        Ok(a) => a,
        Err(msg) => return ResFrame::err(req_id, "INVALID_PARAMS", &msg),
    };

    match app.office.get_job_id(&args.unique_id) {
        Ok(job_id) => ResFrame::ok(req_id, job_id),
        Err(e) => ResFrame::err(req_id, e.code(), &e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// postal.stats
// ---------------------------------------------------------------------------

pub fn handle_stats(req_id: &str, app: &AppState) -> ResFrame {
    ResFrame::ok(
        req_id,
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "pending": app.office.pending(),
            "capacity": app.office.capacity(),
            "shutting_down": app.office.is_shutting_down(),
            "connections": app.clients.len(),
            "dispatched": app.stats.totals(),
        }),
    )
}
