//! Error types for Synheart Sync

use thiserror::Error;

/// Errors that can occur while reconciling source entities into the destination
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("HTTP {status} from {endpoint}: {body}")]
    Http {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Transport failure calling {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Unsupported capability: {0}")]
    Unsupported(String),

    #[error("Gave up on {operation} after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: Box<SyncError>,
    },

    #[error("Window discovery failed: {0}")]
    WindowFetch(Box<SyncError>),
}

impl SyncError {
    /// Rate limiting and server-side failures may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Http { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }

    /// A lookup that found nothing, as opposed to a broken request.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Http { status: 404, .. })
    }

    pub(crate) fn http(endpoint: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        SyncError::Http {
            endpoint: endpoint.into(),
            status,
            body: body.into(),
        }
    }
}
