use clawlink_protocol::{ErrorShape, ProtocolRange};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("gateway did not complete the handshake in time")]
    HandshakeTimeout,

    #[error("gateway rejected the connection: {0}")]
    AuthRejected(ErrorShape),

    #[error(
        "no common protocol version (client supports {}..={}): {message}",
        offered.min,
        offered.max
    )]
    ProtocolMismatch {
        offered: ProtocolRange,
        server: Option<u32>,
        message: String,
    },

    #[error("gateway session is not ready")]
    NotConnected,

    #[error("a connection is already open or being opened")]
    AlreadyConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("{method} timed out waiting for a response")]
    RequestTimeout { method: String },

    #[error("{method} failed: {error}")]
    Request { method: String, error: ErrorShape },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl Error {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Handshake failures that will not go away by retrying with the same
    /// credentials and protocol range.
    pub fn is_fatal_handshake(&self) -> bool {
        matches!(self, Self::AuthRejected(_) | Self::ProtocolMismatch { .. })
    }

    /// Gateway error code, when the failure came back in a response frame.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::AuthRejected(shape) | Self::Request { error: shape, .. } => {
                Some(shape.code.as_str())
            },
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
