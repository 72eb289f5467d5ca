use futures::StreamExt;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use crate::error::TransportError;
use crate::message::{Draft, Message, UserId};

/// Room for everything in a frame besides the message text.
const FRAME_OVERHEAD: usize = 256;

/// Longest line a peer may send for a given text limit.
///
/// JSON escapes a control byte as `\u00XX`, so the text can take six times
/// its length on the wire.
pub fn frame_limit(max_text_len: usize) -> usize {
    max_text_len.saturating_mul(6).saturating_add(FRAME_OVERHEAD)
}

/// Frames a peer sends to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    /// Claims an identity. Only valid as the first frame on a TCP connection.
    Hello { user_id: UserId },
    Send { to_id: UserId, text: String },
}

impl ClientFrame {
    /// Turns a `send` frame into a draft, enforcing the body size limit.
    pub fn into_draft(self, max_text_len: usize) -> Result<Draft, TransportError> {
        match self {
            ClientFrame::Send { to_id, text } => {
                if text.len() > max_text_len {
                    return Err(TransportError::Oversized {
                        len: text.len(),
                        limit: max_text_len,
                    });
                }
                Ok(Draft { to_id, text })
            }
            ClientFrame::Hello { .. } => Err(TransportError::Protocol(
                "hello after the connection was identified".to_string(),
            )),
        }
    }
}

/// Frames the server sends to a peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    Welcome { user_id: UserId },
    Message { message: Message },
    Error { message: String },
}

/// Reads one JSON frame per line, blank lines ignored.
///
/// A line longer than the limit fails as soon as the limit is passed rather
/// than after the whole line arrived. [`FrameReader::next_frame`] is
/// cancel-safe: bytes of a partly received line stay buffered when the
/// future is dropped, so it can sit in a `select!` loop.
pub struct FrameReader<R> {
    lines: FramedRead<R, LinesCodec>,
    max_line_len: usize,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, max_line_len: usize) -> Self {
        Self {
            lines: FramedRead::new(reader, LinesCodec::new_with_max_length(max_line_len)),
            max_line_len,
        }
    }

    pub fn max_line_len(&self) -> usize {
        self.max_line_len
    }

    pub async fn next_frame<T>(&mut self) -> Result<Option<T>, TransportError>
    where
        T: DeserializeOwned,
    {
        let limit = self.max_line_len;
        while let Some(line) = self.lines.next().await {
            let line = line.map_err(|error| match error {
                LinesCodecError::MaxLineLengthExceeded => TransportError::FrameTooLong { limit },
                LinesCodecError::Io(error) => TransportError::Io(error),
            })?;
            if line.trim().is_empty() {
                continue;
            }
            return Ok(Some(serde_json::from_str(&line)?));
        }
        Ok(None)
    }
}

pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut encoded = serde_json::to_vec(frame)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageId;
    use chrono::Utc;
    use std::time::Duration;
    use tokio::io::duplex;
    use tokio::time::timeout;

    #[tokio::test]
    async fn message_frame_survives_the_wire_unchanged() {
        let (mut writer, reader) = duplex(1024);
        let mut reader = FrameReader::new(reader, 1024);
        let frame = ServerFrame::Message {
            message: Message::new(MessageId(3), UserId(1), UserId(2), "hello", Utc::now()),
        };

        write_frame(&mut writer, &frame).await.expect("write frame");
        let parsed = reader
            .next_frame::<ServerFrame>()
            .await
            .expect("read frame")
            .expect("expected frame");

        assert_eq!(frame, parsed);
    }

    #[test]
    fn client_frames_use_tagged_camel_case_json() {
        let hello: ClientFrame =
            serde_json::from_str(r#"{"type":"hello","userId":4}"#).expect("parse hello");
        assert_eq!(hello, ClientFrame::Hello { user_id: UserId(4) });

        let send: ClientFrame = serde_json::from_str(r#"{"type":"send","toId":5,"text":"yo"}"#)
            .expect("parse send");
        assert_eq!(
            send.into_draft(16).expect("draft"),
            Draft::new(5, "yo")
        );
    }

    #[test]
    fn oversized_text_is_rejected() {
        let frame = ClientFrame::Send {
            to_id: UserId(2),
            text: "x".repeat(9),
        };
        assert!(matches!(
            frame.into_draft(8),
            Err(TransportError::Oversized { len: 9, limit: 8 })
        ));
    }

    #[test]
    fn second_hello_is_a_protocol_error() {
        let frame = ClientFrame::Hello { user_id: UserId(1) };
        assert!(matches!(
            frame.into_draft(8),
            Err(TransportError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn blank_lines_are_skipped_and_eof_is_none() {
        let input: &[u8] = b"\n\r\n{\"type\":\"send\",\"toId\":1,\"text\":\"a\"}\r\n";
        let mut reader = FrameReader::new(input, 1024);
        let first = reader.next_frame::<ClientFrame>().await.expect("read frame");
        assert!(matches!(first, Some(ClientFrame::Send { .. })));

        let end = reader.next_frame::<ClientFrame>().await.expect("read eof");
        assert_eq!(end, None);
    }

    #[tokio::test]
    async fn dropped_read_keeps_the_partial_line() {
        let (mut peer, local) = duplex(1024);
        let mut reader = FrameReader::new(local, 1024);
        let line = b"{\"type\":\"send\",\"toId\":1,\"text\":\"split\"}\n";
        let (head, tail) = line.split_at(14);

        peer.write_all(head).await.expect("write head");
        let early = timeout(Duration::from_millis(50), reader.next_frame::<ClientFrame>()).await;
        assert!(early.is_err(), "half a line must not yield a frame");

        peer.write_all(tail).await.expect("write tail");
        let frame = reader
            .next_frame::<ClientFrame>()
            .await
            .expect("read frame")
            .expect("expected frame");
        assert_eq!(
            frame,
            ClientFrame::Send {
                to_id: UserId(1),
                text: "split".into()
            }
        );
    }

    #[test]
    fn frame_limit_leaves_room_for_escaped_text() {
        let text = "\u{1}".repeat(100);
        let frame = ClientFrame::Send {
            to_id: UserId(u64::MAX),
            text,
        };
        let encoded = serde_json::to_string(&frame).expect("encode");
        assert!(encoded.len() <= frame_limit(100));
    }
}
