use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::TransportError;
use crate::message::{Draft, Message};
use crate::ports::{Connection, MessageReader, MessageWriter};
use crate::protocol::{ClientFrame, FrameReader, ServerFrame, frame_limit, write_frame};

/// A connection that exchanges one JSON frame per line.
///
/// Reads `send` frames and writes `message` frames. The handshake is done by
/// the caller before the halves are handed over.
pub struct JsonLinesConnection<R, W> {
    frames: FrameReader<R>,
    writer: W,
    max_text_len: usize,
}

impl<R, W> JsonLinesConnection<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W, max_text_len: usize) -> Self {
        Self::from_frames(
            FrameReader::new(reader, frame_limit(max_text_len)),
            writer,
            max_text_len,
        )
    }

    /// Continues on a reader that already carried the handshake, keeping
    /// whatever it buffered past the `hello` line.
    pub fn from_frames(frames: FrameReader<R>, writer: W, max_text_len: usize) -> Self {
        Self {
            frames,
            writer,
            max_text_len,
        }
    }
}

impl<R, W> Connection for JsonLinesConnection<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    type Reader = JsonLinesReader<R>;
    type Writer = JsonLinesWriter<W>;

    fn split(self) -> (Self::Reader, Self::Writer) {
        (
            JsonLinesReader {
                frames: self.frames,
                max_text_len: self.max_text_len,
            },
            JsonLinesWriter { inner: self.writer },
        )
    }
}

pub struct JsonLinesReader<R> {
    frames: FrameReader<R>,
    max_text_len: usize,
}

#[async_trait]
impl<R> MessageReader for JsonLinesReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn read_message(&mut self) -> Result<Option<Draft>, TransportError> {
        match self.frames.next_frame::<ClientFrame>().await? {
            Some(frame) => frame.into_draft(self.max_text_len).map(Some),
            None => Ok(None),
        }
    }
}

pub struct JsonLinesWriter<W> {
    inner: W,
}

#[async_trait]
impl<W> MessageWriter for JsonLinesWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn write_message(&mut self, message: &Message) -> Result<(), TransportError> {
        let frame = ServerFrame::Message {
            message: message.clone(),
        };
        write_frame(&mut self.inner, &frame).await
    }

    async fn close(&mut self) {
        if let Err(error) = self.inner.shutdown().await {
            debug!(?error, "failed to shut down connection writer");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageId, UserId};
    use chrono::Utc;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader, duplex};
    use tokio::time::timeout;

    #[tokio::test]
    async fn reads_send_frames_as_drafts() {
        let input: &[u8] = b"{\"type\":\"send\",\"toId\":7,\"text\":\"hey\"}\n";
        let connection = JsonLinesConnection::new(input, tokio::io::sink(), 64);
        let (mut reader, _writer) = connection.split();

        let draft = reader.read_message().await.expect("read").expect("draft");
        assert_eq!(draft, Draft::new(7, "hey"));
        assert_eq!(reader.read_message().await.expect("read eof"), None);
    }

    #[tokio::test]
    async fn oversized_and_malformed_frames_fail_the_read() {
        let input: &[u8] = b"{\"type\":\"send\",\"toId\":7,\"text\":\"too long\"}\n";
        let (mut reader, _writer) = JsonLinesConnection::new(input, tokio::io::sink(), 3).split();
        assert!(matches!(
            reader.read_message().await,
            Err(TransportError::Oversized { .. })
        ));

        let input: &[u8] = b"not json\n";
        let (mut reader, _writer) = JsonLinesConnection::new(input, tokio::io::sink(), 3).split();
        assert!(matches!(
            reader.read_message().await,
            Err(TransportError::Codec(_))
        ));
    }

    #[tokio::test]
    async fn unterminated_line_fails_once_past_the_frame_limit() {
        let (mut peer, local) = duplex(16 * 1024);
        let (mut reader, _writer) = JsonLinesConnection::new(local, tokio::io::sink(), 8).split();

        // Keeps the line open forever: only the limit can end the read.
        let flood = tokio::spawn(async move {
            let chunk = vec![b'x'; 4096];
            while peer.write_all(&chunk).await.is_ok() {}
        });

        let result = timeout(Duration::from_secs(2), reader.read_message())
            .await
            .expect("the limit should end the read before the line does");
        let limit = frame_limit(8);
        assert!(matches!(
            result,
            Err(TransportError::FrameTooLong { limit: l }) if l == limit
        ));
        flood.abort();
    }

    #[tokio::test]
    async fn writes_message_frames_and_closes() {
        let (local, remote) = duplex(1024);
        let (_reader, mut writer) = JsonLinesConnection::new(&b""[..], local, 64).split();
        let message = Message::new(MessageId(9), UserId(1), UserId(2), "yo", Utc::now());

        writer.write_message(&message).await.expect("write");
        writer.close().await;

        let mut lines = BufReader::new(remote).lines();
        let line = lines.next_line().await.expect("read").expect("line");
        let frame: ServerFrame = serde_json::from_str(&line).expect("parse");
        assert_eq!(frame, ServerFrame::Message { message });
        assert_eq!(lines.next_line().await.expect("read eof"), None);
    }
}
