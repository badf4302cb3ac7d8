//! `postal-scheduler`: delayed-dispatch job scheduler with a SQLite
//! shutdown snapshot.
//!
//! # Overview
//!
//! [`PostalOffice::submit_job`] admits a job through the [`gate::AdmissionGate`],
//! records it in the [`registry::JobRegistry`] and spawns one Tokio task that
//! waits out the delay before handing the message to a
//! [`postal_mail::MailTransport`]. Jobs can be cancelled individually by id.
//!
//! # Lifecycle of the durable snapshot
//!
//! | Phase    | Action                                                       |
//! |----------|--------------------------------------------------------------|
//! | Shutdown | [`PostalOffice::shutdown`] writes every live job with its remaining delay |
//! | Startup  | [`PostalOffice::restore`] resubmits every row, then clears the table |

pub mod db;
pub mod error;
pub mod gate;
pub mod office;
pub mod registry;
pub mod store;
pub mod types;

pub use error::{Result, SchedulerError};
pub use office::{DispatchPolicy, PostalOffice};
pub use store::JobStore;
pub use types::{DispatchOutcome, DispatchReport, LiveJob, PendingJobRecord, StoredPayload};
