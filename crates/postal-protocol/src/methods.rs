// Well-known RPC method names.

pub const PING: &str = "ping";

// jobs
pub const SUBMIT_JOB: &str = "postal.submit_job";
pub const CANCEL_JOB: &str = "postal.cancel_job";
pub const GET_JOB_ID: &str = "postal.get_job_id";

// introspection
pub const STATS: &str = "postal.stats";
