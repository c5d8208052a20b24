use thiserror::Error;

/// Errors surfaced by the voice session and the stream upload client
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    /// Missing credential or unusable configuration value
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Connection-level failure reported by the underlying socket
    #[error("transport error: {0}")]
    Transport(String),

    /// Failure reported by the remote service (failure ack or in-band error)
    #[error("{0}")]
    Protocol(String),

    /// No live connection to send on
    #[error("not connected")]
    NotConnected,

    /// Connect or acknowledgement wait exceeded its deadline
    #[error("timed out waiting for {0}")]
    Timeout(String),
}

pub type RelayResult<T> = Result<T, RelayError>;

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        RelayError::Transport(err.to_string())
    }
}
