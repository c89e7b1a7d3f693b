use crate::store::StoreError;

use super::protocol::{MALFORMED_FRAME, ServerFrame};

/// Per-frame failures. Each one is reported to the offending connection as an
/// `error` frame and never affects other sessions.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid message format")]
    Malformed,
    /// Well-formed frame that is not valid in the current session state.
    #[error("{0}")]
    Protocol(&'static str),
    /// Handshake credentials were rejected. Closes the connection.
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Internal server error")]
    Internal(#[source] anyhow::Error),
}

impl RelayError {
    pub fn to_frame(&self) -> ServerFrame {
        match self {
            RelayError::Malformed => ServerFrame::error(MALFORMED_FRAME),
            other => ServerFrame::error(other.to_string()),
        }
    }

    pub fn closes_connection(&self) -> bool {
        matches!(self, RelayError::Unauthorized(_))
    }
}

impl From<StoreError> for RelayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(msg) => RelayError::Validation(msg),
            StoreError::NotFound(msg) => RelayError::NotFound(msg),
            StoreError::Database(e) => RelayError::Internal(e.into()),
        }
    }
}
