use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::message::{Draft, Message};
use crate::ports::{Connection, MessageReader, MessageWriter};

/// Creates an in-process connection and the peer that drives it.
///
/// `capacity` bounds both directions. Dropping the peer's draft sender reads
/// as a clean close; dropping its message receiver makes writes fail.
pub fn channel_connection(capacity: usize) -> (ChannelConnection, RemotePeer) {
    let (drafts_tx, drafts_rx) = mpsc::channel(capacity.max(1));
    let (messages_tx, messages_rx) = mpsc::channel(capacity.max(1));

    (
        ChannelConnection {
            drafts: drafts_rx,
            messages: messages_tx,
        },
        RemotePeer {
            drafts: drafts_tx,
            messages: messages_rx,
        },
    )
}

pub struct ChannelConnection {
    drafts: mpsc::Receiver<Draft>,
    messages: mpsc::Sender<Message>,
}

impl Connection for ChannelConnection {
    type Reader = ChannelReader;
    type Writer = ChannelWriter;

    fn split(self) -> (Self::Reader, Self::Writer) {
        (ChannelReader(self.drafts), ChannelWriter(self.messages))
    }
}

pub struct ChannelReader(mpsc::Receiver<Draft>);

#[async_trait]
impl MessageReader for ChannelReader {
    async fn read_message(&mut self) -> Result<Option<Draft>, TransportError> {
        Ok(self.0.recv().await)
    }
}

pub struct ChannelWriter(mpsc::Sender<Message>);

#[async_trait]
impl MessageWriter for ChannelWriter {
    async fn write_message(&mut self, message: &Message) -> Result<(), TransportError> {
        self.0
            .send(message.clone())
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// The far end of a [`ChannelConnection`].
pub struct RemotePeer {
    drafts: mpsc::Sender<Draft>,
    messages: mpsc::Receiver<Message>,
}

impl RemotePeer {
    pub async fn send(&self, draft: Draft) -> Result<(), TransportError> {
        self.drafts
            .send(draft)
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Next delivered message, or `None` once the connection's writer is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        self.messages.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        self.messages.try_recv().ok()
    }

    /// Splits the peer so each direction can be dropped on its own.
    pub fn into_parts(self) -> (mpsc::Sender<Draft>, mpsc::Receiver<Message>) {
        (self.drafts, self.messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageId, UserId};
    use chrono::Utc;

    #[tokio::test]
    async fn drafts_and_messages_cross_the_pair() {
        let (connection, mut peer) = channel_connection(4);
        let (mut reader, mut writer) = connection.split();

        peer.send(Draft::new(2, "hi")).await.expect("send draft");
        let draft = reader.read_message().await.expect("read").expect("draft");
        assert_eq!(draft, Draft::new(2, "hi"));

        let message = Message::new(MessageId(1), UserId(1), UserId(2), "hi", Utc::now());
        writer.write_message(&message).await.expect("write");
        assert_eq!(peer.recv().await, Some(message));
    }

    #[tokio::test]
    async fn dropping_peer_halves_ends_each_direction() {
        let (connection, peer) = channel_connection(1);
        let (mut reader, mut writer) = connection.split();
        let (drafts, messages) = peer.into_parts();

        drop(drafts);
        assert_eq!(reader.read_message().await.expect("read"), None);

        drop(messages);
        let message = Message::new(MessageId(1), UserId(1), UserId(2), "lost", Utc::now());
        assert!(matches!(
            writer.write_message(&message).await,
            Err(TransportError::Closed)
        ));
    }
}
