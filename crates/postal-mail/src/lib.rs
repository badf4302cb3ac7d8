//! `postal-mail`: the seam between the scheduler and whatever actually
//! delivers mail.

pub mod error;
pub mod log;
pub mod mailgun;
pub mod transport;

pub use error::MailError;
pub use log::LogTransport;
pub use mailgun::MailgunTransport;
pub use transport::{from_config, MailTransport};
