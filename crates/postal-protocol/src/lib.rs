//! Wire contracts for the postal office RPC surface.
//!
//! Every message is a single line of JSON. Clients send [`frames::ReqFrame`]s
//! and the server answers each with a [`frames::ResFrame`] carrying the same
//! `id`.

pub mod frames;
pub mod jobs;
pub mod methods;

pub use jobs::{CancelJobArgs, GetJobIdArgs, JobKind, MailMessage, NewJobArgs, WILDCARD_JOB_ID};
