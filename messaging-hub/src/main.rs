use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use messaging_hub::{
    cli::{Cli, Command, ServeArgs},
    hub::Hub,
    server::Server,
    store::MemoryStore,
    terminal,
    transport::ws::{self, WsState},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await?,
        Command::Chat(args) => terminal::run(args).await?,
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let listener = TcpListener::bind(args.listen).await?;
    let (hub, hub_task) = Hub::spawn(&args.hub_config());
    let store = Arc::new(MemoryStore::new());
    let config = args.server_config();

    let server = Server::new(listener, hub.clone(), store.clone(), config.clone());
    let addr = server.local_addr()?;
    info!("hub listening on {}", addr);

    if let Some(ws_addr) = args.ws_listen {
        let ws_listener = TcpListener::bind(ws_addr).await?;
        info!("websocket endpoint on ws://{}/ws", ws_listener.local_addr()?);
        let app = ws::router(WsState {
            hub: hub.clone(),
            store,
            config,
        });
        tokio::spawn(async move {
            if let Err(err) = axum::serve(ws_listener, app).await {
                warn!("websocket server exited with error: {err:?}");
            }
        });
    }

    let result = server.run_until_ctrl_c().await;
    if let Err(err) = &result {
        warn!("server exited with error: {err:?}");
    }

    hub.shutdown().await;
    let stats = hub_task.await?;
    info!(?stats, "shutdown complete");
    result
}
