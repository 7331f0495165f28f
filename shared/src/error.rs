use std::net::SocketAddr;
use thiserror::Error;

/// Socket-level failures. Apart from [`TransportError::FrameTooLarge`] these
/// terminate the role that hit them.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to send to {addr}: {source}")]
    Send {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("receive failed: {0}")]
    Receive(#[source] std::io::Error),
    #[error("socket option failed: {0}")]
    Configure(#[source] std::io::Error),
    #[error("frame of {len} bytes exceeds the {max} byte datagram limit")]
    FrameTooLarge { len: usize, max: usize },
}

impl TransportError {
    /// Whether the socket itself is unusable. An oversized frame only loses
    /// that one frame.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::FrameTooLarge { .. })
    }
}

/// A frame that could not be turned into a [`crate::Message`].
///
/// Receive loops log these and drop the frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid UTF-8")]
    NotUtf8,
    #[error("empty frame")]
    Empty,
    #[error("unknown tag `{0}`")]
    UnknownTag(String),
    #[error("tag `{0}` requires a payload")]
    MissingPayload(&'static str),
    #[error("invalid identity `{0}`")]
    InvalidIdentity(String),
    #[error("malformed `{tag}` payload: {source}")]
    Json {
        tag: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("name of {len} characters exceeds the {max} character limit")]
    NameTooLong { len: usize, max: usize },
    #[error("`{0}` payload carries a non-finite position")]
    NonFinite(&'static str),
    #[error("malformed advertisement `{0}`")]
    Advertisement(String),
}
