//! The narrow interfaces the core consumes.
//!
//! A transport supplies a [`Connection`] per accepted peer, and the surrounding
//! application supplies one [`MessageStore`]. Nothing else crosses the boundary.

use async_trait::async_trait;

use crate::error::{PersistenceError, TransportError};
use crate::message::{Draft, Message, UserId};

/// Read side of a live connection, owned by the client's inbound pump.
#[async_trait]
pub trait MessageReader: Send + 'static {
    /// Reads the next draft from the peer.
    ///
    /// `Ok(None)` means the peer closed the connection cleanly.
    async fn read_message(&mut self) -> Result<Option<Draft>, TransportError>;
}

/// Write side of a live connection, owned by the client's outbound pump.
#[async_trait]
pub trait MessageWriter: Send + 'static {
    async fn write_message(&mut self, message: &Message) -> Result<(), TransportError>;

    /// Called once when the outbound pump stops. Best effort.
    async fn close(&mut self) {}
}

/// A bidirectional connection that can be split between two pumps.
pub trait Connection: Send + 'static {
    type Reader: MessageReader;
    type Writer: MessageWriter;

    fn split(self) -> (Self::Reader, Self::Writer);
}

/// Durable storage for sent messages.
///
/// The returned message is canonical: the hub broadcasts exactly that value.
#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    async fn save_message(
        &self,
        from_id: UserId,
        to_id: UserId,
        text: String,
    ) -> Result<Message, PersistenceError>;
}
