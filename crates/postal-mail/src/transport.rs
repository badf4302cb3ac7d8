use std::sync::Arc;

use async_trait::async_trait;
use postal_core::config::MailConfig;
use postal_protocol::MailMessage;
use tracing::{info, warn};

use crate::{error::MailError, log::LogTransport, mailgun::MailgunTransport};

/// Anything able to deliver a [`MailMessage`].
///
/// Implementations must be `Send + Sync`: one instance is shared by every
/// dispatch task.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Stable lowercase identifier used in logs (e.g. `"mailgun"`).
    fn name(&self) -> &str;

    /// Deliver a single message. No retries happen at this level.
    async fn send(&self, msg: &MailMessage) -> Result<(), MailError>;
}

/// Pick the transport for this process: Mailgun when credentials are
/// configured, the log-only transport otherwise.
pub fn from_config(config: &MailConfig) -> Arc<dyn MailTransport> {
    match MailgunTransport::from_config(config) {
        Ok(mailgun) => {
            info!(domain = %mailgun.domain(), "mail transport: mailgun");
            Arc::new(mailgun)
        }
        Err(e) => {
            warn!("mailgun transport unavailable ({e}); messages will only be logged");
            Arc::new(LogTransport)
        }
    }
}
