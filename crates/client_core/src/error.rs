use shared::error::{ProtocolError, ValidationError};
use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("connection closed by peer")]
    ClosedByPeer,
    #[error("no traffic from server for {0:?}")]
    LivenessTimeout(std::time::Duration),
}

/// Why a raw inbound frame never reached a state sink.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
