use thiserror::Error;

/// Errors returned by [`PostalClient`](crate::PostalClient) calls.
///
/// A lost connection is normally absorbed by queueing the call; it only
/// surfaces from the low-level exchange used during replay.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The TCP connection is gone or could not be used.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The server answered `ok: false`.
    #[error("Remote error ({code}): {message}")]
    Remote { code: String, message: String },

    /// The server answered with something that is not a valid response.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    /// Remote error code, if the server produced one (e.g. `"NOT_FOUND"`).
    pub fn remote_code(&self) -> Option<&str> {
        match self {
            ClientError::Remote { code, .. } => Some(code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
