//! Error types shared by the hub, the client pumps and the transports.

use std::io;

use thiserror::Error;

/// A connection failed to read or write a message.
///
/// Every variant is terminal for the pump that observed it.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer went away while a write was in flight.
    #[error("connection closed by peer")]
    Closed,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed frame: {0}")]
    Codec(#[from] serde_json::Error),

    /// The peer sent a message body larger than the connection allows.
    #[error("message text is {len} bytes, limit is {limit}")]
    Oversized { len: usize, limit: usize },

    /// A line grew past the frame limit before it ended.
    #[error("frame exceeds {limit} bytes")]
    FrameTooLong { limit: usize },

    /// A well-formed frame that is not valid at this point of the conversation.
    #[error("unexpected frame: {0}")]
    Protocol(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] axum::Error),
}

/// The message store refused or failed to save a message.
#[derive(Debug, Error)]
#[error("failed to persist message: {reason}")]
pub struct PersistenceError {
    reason: String,
}

impl PersistenceError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// The hub event loop is no longer accepting requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HubError {
    #[error("hub event loop has stopped")]
    Closed,
}
