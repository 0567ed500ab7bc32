//! Release host errors.

use launchpad_core::Error;

/// Errors raised while talking to a release host.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflicting write on tag '{0}'")]
    Conflict(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    /// Transport failures, throttling and server errors may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            HostError::Request(_) | HostError::Conflict(_) => true,
            HostError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<HostError> for Error {
    fn from(err: HostError) -> Self {
        let transient = err.is_transient();
        match err {
            HostError::NotFound(what) => Error::NotFound(what),
            HostError::Conflict(tag) => Error::PublishConflict { tag, attempts: 1 },
            HostError::Io(e) => Error::Io(e),
            other => Error::External {
                message: other.to_string(),
                transient,
            },
        }
    }
}
