use std::time::Duration;
use thiserror::Error;

/// Fatal errors raised while the relay starts up
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Missing credential: set the {env_var} environment variable or backend.api_key")]
    MissingCredential { env_var: String },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a single generation call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend unavailable: {reason}")]
    Unavailable { reason: String, status: Option<u16> },

    #[error("backend rejected the request: {0}")]
    Rejected(String),

    #[error("backend did not answer within {0:?}")]
    Timeout(Duration),
}

impl BackendError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
            status: None,
        }
    }

    /// Whether another attempt could plausibly succeed.
    /// Auth failures are reported as unavailable but retrying them is pointless.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable { status, .. } => !matches!(status, Some(401) | Some(403)),
            Self::Rejected(_) | Self::Timeout(_) => false,
        }
    }
}

/// Per-request failure reported back to the client as an error frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TurnError {
    #[error("empty frame rejected")]
    EmptyFrame,

    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("binary frames are not supported")]
    UnsupportedFrame,

    #[error("server shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Backend(#[from] BackendError),
}
