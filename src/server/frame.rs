use crate::constants::{DEFAULT_MAX_FRAME_BYTES, ERROR_FRAME_PREFIX, TRANSPORT_HEADROOM_BYTES};
use crate::utils::TurnError;

/// An application frame received from the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    /// Binary payload; only its size is kept for reporting
    Binary(usize),
    /// Text over the frame limit, dropped on receipt
    Oversized(usize),
}

/// Per-frame acceptance rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_frame_bytes: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl FrameLimits {
    /// Hard bound handed to the transport.
    ///
    /// Frames between `max_frame_bytes` and this bound are still read so they
    /// can be answered with an error frame; anything larger drops the connection.
    pub fn transport_limit(&self) -> usize {
        self.max_frame_bytes.saturating_add(TRANSPORT_HEADROOM_BYTES)
    }
}

impl Inbound {
    /// Classify a text payload without keeping oversized ones around
    pub fn text(text: &str, limits: &FrameLimits) -> Self {
        if text.len() > limits.max_frame_bytes {
            Inbound::Oversized(text.len())
        } else {
            Inbound::Text(text.to_owned())
        }
    }

    /// Turn the frame into a prompt, or the error to report instead of calling the backend
    pub fn into_prompt(self, limits: &FrameLimits) -> Result<String, TurnError> {
        match self {
            Inbound::Binary(_) => Err(TurnError::UnsupportedFrame),
            Inbound::Oversized(size) => Err(TurnError::FrameTooLarge {
                size,
                limit: limits.max_frame_bytes,
            }),
            Inbound::Text(text) if text.is_empty() => Err(TurnError::EmptyFrame),
            Inbound::Text(text) if text.len() > limits.max_frame_bytes => {
                Err(TurnError::FrameTooLarge {
                    size: text.len(),
                    limit: limits.max_frame_bytes,
                })
            }
            Inbound::Text(text) => Ok(text),
        }
    }
}

/// Text of the frame sent back for a failed turn
pub fn error_frame(err: &TurnError) -> String {
    format!("{ERROR_FRAME_PREFIX}{err}")
}
