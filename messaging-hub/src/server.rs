use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    client::Client,
    config::ServerConfig,
    hub::HubHandle,
    message::UserId,
    ports::MessageStore,
    protocol::{ClientFrame, FrameReader, ServerFrame, frame_limit, write_frame},
    transport::tcp::JsonLinesConnection,
};

/// Accepts TCP peers and attaches each one to the hub.
///
/// A peer must open with a `hello` frame naming its user id. The server then
/// registers it, answers `welcome`, and hands the socket to the client pumps.
pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

struct ServerState {
    hub: HubHandle,
    store: Arc<dyn MessageStore>,
    config: ServerConfig,
}

impl Server {
    pub fn new(
        listener: TcpListener,
        hub: HubHandle,
        store: Arc<dyn MessageStore>,
        config: ServerConfig,
    ) -> Self {
        Self {
            listener,
            state: Arc::new(ServerState { hub, store, config }),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// Sessions already running are left to the hub: they end when the hub
    /// shuts down and closes their queues.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, state } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("server stopped accepting connections");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<ServerState>,
) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, state),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(stream: TcpStream, peer: SocketAddr, state: &Arc<ServerState>) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, peer, state).await {
            debug!(peer = %peer, error = %err, "connection closed with error");
        }
    });
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, state: Arc<ServerState>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut frames = FrameReader::new(reader, frame_limit(state.config.max_text_len));

    let user_id = perform_handshake(&mut frames, &mut writer).await?;

    let pending = match Client::register(
        user_id,
        state.hub.clone(),
        Arc::clone(&state.store),
        &state.config.client,
    )
    .await
    {
        Ok(pending) => pending,
        Err(err) => {
            send_error(&mut writer, err.to_string()).await;
            return Err(err.into());
        }
    };

    // Registered before the welcome, so nothing routed after the peer sees it can be missed.
    if let Err(err) = write_frame(&mut writer, &ServerFrame::Welcome { user_id }).await {
        pending.cancel().await;
        return Err(err.into());
    }
    info!(peer = %peer, user_id = %user_id, client = %pending.key().id, "client joined");

    let connection = JsonLinesConnection::from_frames(frames, writer, state.config.max_text_len);
    let report = pending.start(connection).join().await;
    debug!(peer = %peer, ?report, "connection finished");

    Ok(())
}

async fn perform_handshake<R, W>(frames: &mut FrameReader<R>, writer: &mut W) -> Result<UserId>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let hello = match frames.next_frame::<ClientFrame>().await {
        Ok(Some(frame)) => frame,
        Ok(None) => anyhow::bail!("connection closed before handshake"),
        Err(err) => {
            send_error(writer, err.to_string()).await;
            return Err(err.into());
        }
    };

    match hello {
        ClientFrame::Hello { user_id } => Ok(user_id),
        ClientFrame::Send { .. } => {
            send_error(writer, "expected hello frame first".to_string()).await;
            anyhow::bail!("expected hello frame first")
        }
    }
}

async fn send_error<W>(writer: &mut W, message: String)
where
    W: AsyncWrite + Unpin,
{
    if let Err(err) = write_frame(writer, &ServerFrame::Error { message }).await {
        debug!(error = %err, "failed to report error to peer");
    }
}
