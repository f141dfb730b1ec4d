//! Session errors

use thiserror::Error;

/// Errors surfaced by the session layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The peer closed the connection
    #[error("Transport closed")]
    TransportClosed,

    /// The reconnect budget is spent
    #[error("Reconnect abandoned after {attempts} attempts")]
    ReconnectExhausted {
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Send attempted without an open connection
    #[error("Not connected; message dropped")]
    SendWhileClosed,

    /// Connecting, reading or writing failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// An outbound message could not be serialized
    #[error("Failed to encode message: {0}")]
    Encode(String),

    /// The session task is gone
    #[error("Session task has stopped")]
    SessionEnded,
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Transport(err.to_string())
    }
}

impl From<tokio_util::codec::LinesCodecError> for SessionError {
    fn from(err: tokio_util::codec::LinesCodecError) -> Self {
        SessionError::Transport(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error;
        match err {
            Error::ConnectionClosed | Error::AlreadyClosed => SessionError::TransportClosed,
            other => SessionError::Transport(other.to_string()),
        }
    }
}
