use async_trait::async_trait;
use postal_protocol::MailMessage;
use tracing::info;

use crate::{error::MailError, transport::MailTransport};

/// Development transport: writes the envelope to the log and reports success.
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, msg: &MailMessage) -> Result<(), MailError> {
        info!(
            to = %msg.recipient,
            from = %msg.sender_name,
            subject = %msg.subject,
            bytes = msg.body.len(),
            "mail not sent (log transport)"
        );
        Ok(())
    }
}
