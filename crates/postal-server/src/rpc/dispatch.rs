use std::sync::Arc;

use postal_protocol::frames::ResFrame;
use postal_protocol::methods::{CANCEL_JOB, GET_JOB_ID, PING, STATS, SUBMIT_JOB};
use serde_json::Value;

use crate::app::AppState;
use crate::rpc::handlers;

/// Route one method call to its handler.
pub async fn route(
    method: &str,
    params: Option<&Value>,
    req_id: &str,
    app: &Arc<AppState>,
) -> ResFrame {
    match method {
        PING => ResFrame::ok(req_id, serde_json::json!({ "pong": true })),

        // ------------------------------------------------------------------
        // Jobs
        // ------------------------------------------------------------------
        SUBMIT_JOB => handlers::handle_submit_job(params, req_id, app).await,

        CANCEL_JOB => handlers::handle_cancel_job(params, req_id, app),

        GET_JOB_ID => handlers::handle_get_job_id(params, req_id, app),

        STATS => handlers::handle_stats(req_id, app),

        _ => ResFrame::err(
            req_id,
            "METHOD_NOT_FOUND",
            &format!("unknown method '{}'", method),
        ),
    }
}
