use thiserror::Error;

/// Errors raised while handing a message to the mail provider.
#[derive(Debug, Error)]
pub enum MailError {
    /// The request never produced a response (DNS, TLS, connect, timeout).
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// The provider answered with a non-success status.
    #[error("Rejected by provider ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The transport-specific configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for MailError {
    fn from(e: reqwest::Error) -> Self {
        MailError::TransportFailure(e.to_string())
    }
}
