//! WebSocket endpoint.
//!
//! Peers connect to `GET /ws?userId=N`. Every text frame they send must be a
//! `send` frame; the server answers with a `welcome` frame and then one
//! `message` frame per delivered message. `GET /healthz` answers `ok`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::client::Client;
use crate::config::ServerConfig;
use crate::error::TransportError;
use crate::hub::HubHandle;
use crate::message::{Draft, Message, UserId};
use crate::ports::{Connection, MessageReader, MessageStore, MessageWriter};
use crate::protocol::{ClientFrame, ServerFrame, frame_limit};

#[derive(Clone)]
pub struct WsState {
    pub hub: HubHandle,
    pub store: Arc<dyn MessageStore>,
    pub config: ServerConfig,
}

pub fn router(state: WsState) -> Router {
    Router::new()
        .route("/ws", get(connect))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectParams {
    user_id: UserId,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn connect(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<WsState>,
) -> Response {
    let limit = frame_limit(state.config.max_text_len);
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| serve_socket(socket, params.user_id, state))
}

async fn serve_socket(mut socket: WebSocket, user_id: UserId, state: WsState) {
    let pending = match Client::register(
        user_id,
        state.hub.clone(),
        Arc::clone(&state.store),
        &state.config.client,
    )
    .await
    {
        Ok(pending) => pending,
        Err(error) => {
            warn!(user_id = %user_id, %error, "rejecting websocket client");
            let _ = send_frame(
                &mut socket,
                &ServerFrame::Error {
                    message: error.to_string(),
                },
            )
            .await;
            return;
        }
    };

    if let Err(error) = send_frame(&mut socket, &ServerFrame::Welcome { user_id }).await {
        debug!(user_id = %user_id, %error, "websocket closed before welcome");
        pending.cancel().await;
        return;
    }

    let connection = WsConnection::new(socket, state.config.max_text_len);
    pending.start(connection).join().await;
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> Result<(), TransportError> {
    let text = serde_json::to_string(frame)?;
    socket.send(WsMessage::Text(text)).await?;
    Ok(())
}

pub struct WsConnection {
    socket: WebSocket,
    max_text_len: usize,
}

impl WsConnection {
    pub fn new(socket: WebSocket, max_text_len: usize) -> Self {
        Self {
            socket,
            max_text_len,
        }
    }
}

impl Connection for WsConnection {
    type Reader = WsReader;
    type Writer = WsWriter;

    fn split(self) -> (Self::Reader, Self::Writer) {
        let (sink, stream) = self.socket.split();
        (WsReader::new(stream, self.max_text_len), WsWriter { sink })
    }
}

/// Reads `send` frames from a stream of WebSocket messages.
///
/// A close frame or the end of the stream is a clean end; binary frames are
/// refused.
pub struct WsReader<S = SplitStream<WebSocket>> {
    stream: S,
    max_text_len: usize,
}

impl<S> WsReader<S> {
    pub fn new(stream: S, max_text_len: usize) -> Self {
        Self {
            stream,
            max_text_len,
        }
    }
}

#[async_trait]
impl<S> MessageReader for WsReader<S>
where
    S: Stream<Item = Result<WsMessage, axum::Error>> + Unpin + Send + 'static,
{
    async fn read_message(&mut self) -> Result<Option<Draft>, TransportError> {
        loop {
            let Some(frame) = self.stream.next().await else {
                return Ok(None);
            };
            match frame? {
                WsMessage::Text(text) => {
                    let frame: ClientFrame = serde_json::from_str(&text)?;
                    return frame.into_draft(self.max_text_len).map(Some);
                }
                WsMessage::Close(_) => return Ok(None),
                // axum answers pings itself.
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
                WsMessage::Binary(_) => {
                    return Err(TransportError::Protocol(
                        "binary frames are not supported".to_string(),
                    ));
                }
            }
        }
    }
}

pub struct WsWriter {
    sink: SplitSink<WebSocket, WsMessage>,
}

#[async_trait]
impl MessageWriter for WsWriter {
    async fn write_message(&mut self, message: &Message) -> Result<(), TransportError> {
        let frame = ServerFrame::Message {
            message: message.clone(),
        };
        let text = serde_json::to_string(&frame)?;
        self.sink.send(WsMessage::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(error) = self.sink.close().await {
            debug!(%error, "failed to close websocket");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::hub::Hub;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_router() -> Router {
        let (_hub, handle) = Hub::new(&HubConfig::default());
        router(WsState {
            hub: handle,
            store: Arc::new(MemoryStore::new()),
            config: ServerConfig::default(),
        })
    }

    #[tokio::test]
    async fn healthz_answers_ok() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .expect("build request"),
            )
            .await
            .expect("call router");

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 64)
            .await
            .expect("read body");
        assert_eq!(&body[..], b"ok");
    }

    fn reader(
        frames: Vec<WsMessage>,
    ) -> WsReader<impl Stream<Item = Result<WsMessage, axum::Error>> + Unpin + Send + 'static> {
        WsReader::new(futures::stream::iter(frames.into_iter().map(Ok)), 16)
    }

    #[tokio::test]
    async fn pings_are_skipped_and_close_ends_the_stream() {
        let mut reader = reader(vec![
            WsMessage::Ping(b"are you there".to_vec()),
            WsMessage::Text(r#"{"type":"send","toId":2,"text":"hi"}"#.to_string()),
            WsMessage::Close(None),
            WsMessage::Text(r#"{"type":"send","toId":2,"text":"late"}"#.to_string()),
        ]);

        let draft = reader.read_message().await.expect("read").expect("draft");
        assert_eq!(draft, Draft::new(2, "hi"));
        assert_eq!(reader.read_message().await.expect("read close"), None);
    }

    #[tokio::test]
    async fn binary_and_oversized_frames_fail_the_read() {
        let mut binary = reader(vec![WsMessage::Binary(vec![1, 2, 3])]);
        assert!(matches!(
            binary.read_message().await,
            Err(TransportError::Protocol(_))
        ));

        let long = format!(r#"{{"type":"send","toId":2,"text":"{}"}}"#, "x".repeat(17));
        let mut oversized = reader(vec![WsMessage::Text(long)]);
        assert!(matches!(
            oversized.read_message().await,
            Err(TransportError::Oversized { len: 17, limit: 16 })
        ));
    }

    #[tokio::test]
    async fn plain_get_on_ws_is_rejected() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/ws?userId=1")
                    .body(Body::empty())
                    .expect("build request"),
            )
            .await
            .expect("call router");

        assert!(response.status().is_client_error());
    }
}
