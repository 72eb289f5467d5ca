//! One live connection bound to one user, pumped by two tasks.
//!
//! - The **inbound pump** reads drafts from the connection, saves them through
//!   the [`MessageStore`] and submits the stored copy to the hub.
//! - The **outbound pump** drains the client's outbound queue into the
//!   connection.
//!
//! The pumps share nothing but the hub. A pump that hits a terminal error
//! unregisters the client; the hub then closes the outbound queue, which stops
//! the outbound pump, and the outbound pump stopping cancels the inbound pump's
//! pending read.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, PersistenceFailurePolicy};
use crate::error::HubError;
use crate::hub::{ClientKey, HubHandle, OutboundQueue, outbound_queue};
use crate::message::UserId;
use crate::ports::{Connection, MessageReader, MessageStore, MessageWriter};

/// Why a pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// The peer closed its side cleanly.
    PeerClosed,
    /// A read or write on the connection failed.
    TransportFailed,
    /// The message store failed under [`PersistenceFailurePolicy::Disconnect`].
    PersistenceFailed,
    /// The hub stopped taking requests.
    HubClosed,
    /// The hub closed the outbound queue (unregister, eviction or shutdown).
    QueueClosed,
    /// The other pump of the same client stopped first.
    SiblingStopped,
    /// The task was cancelled or panicked.
    Aborted,
}

/// How both pumps of a finished session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub key: ClientKey,
    pub inbound: PumpExit,
    pub outbound: PumpExit,
}

/// The per-connection context shared by both pumps.
#[derive(Clone)]
pub struct Client {
    key: ClientKey,
    hub: HubHandle,
    store: Arc<dyn MessageStore>,
    policy: PersistenceFailurePolicy,
}

impl Client {
    /// Registers `user_id` with the hub and starts both pumps over `connection`.
    pub async fn connect<C: Connection>(
        user_id: UserId,
        connection: C,
        hub: HubHandle,
        store: Arc<dyn MessageStore>,
        config: &ClientConfig,
    ) -> Result<ClientSession, HubError> {
        let pending = Self::register(user_id, hub, store, config).await?;
        Ok(pending.start(connection))
    }

    /// Registers `user_id` with the hub without starting the pumps yet.
    ///
    /// Messages routed to the client buffer in its outbound queue until
    /// [`PendingClient::start`]. Transports use this to finish their own
    /// handshake knowing the client can no longer miss a broadcast.
    pub async fn register(
        user_id: UserId,
        hub: HubHandle,
        store: Arc<dyn MessageStore>,
        config: &ClientConfig,
    ) -> Result<PendingClient, HubError> {
        let (registration, queue) = outbound_queue(user_id, config.outbound_capacity);
        let key = registration.key();
        hub.register(registration).await?;
        debug!(client = %key.id, user_id = %user_id, "client registered with hub");

        Ok(PendingClient {
            client: Self {
                key,
                hub,
                store,
                policy: config.persistence_failure,
            },
            queue,
        })
    }

    pub fn key(&self) -> ClientKey {
        self.key
    }

    async fn run_inbound<R: MessageReader>(
        self,
        mut reader: R,
        mut sibling_stopped: oneshot::Receiver<()>,
    ) -> PumpExit {
        let exit = loop {
            // Only the read is raced against the sibling; a save in progress always finishes.
            let read = tokio::select! {
                biased;
                _ = &mut sibling_stopped => break PumpExit::SiblingStopped,
                read = reader.read_message() => read,
            };

            let draft = match read {
                Ok(Some(draft)) => draft,
                Ok(None) => break PumpExit::PeerClosed,
                Err(error) => {
                    debug!(client = %self.key.id, error = %error, "read failed");
                    break PumpExit::TransportFailed;
                }
            };

            let stored = match self
                .store
                .save_message(self.key.user_id, draft.to_id, draft.text)
                .await
            {
                Ok(stored) => stored,
                Err(error) => match self.policy {
                    PersistenceFailurePolicy::Disconnect => {
                        warn!(client = %self.key.id, error = %error, "dropping client after persistence failure");
                        break PumpExit::PersistenceFailed;
                    }
                    PersistenceFailurePolicy::Skip => {
                        warn!(client = %self.key.id, error = %error, "message not persisted, skipping");
                        continue;
                    }
                },
            };

            if self.hub.broadcast(stored).await.is_err() {
                break PumpExit::HubClosed;
            }
        };

        let _ = self.hub.unregister(self.key).await;
        exit
    }

    async fn run_outbound<W: MessageWriter>(
        self,
        mut queue: OutboundQueue,
        mut writer: W,
        _stopped: oneshot::Sender<()>,
    ) -> PumpExit {
        let exit = loop {
            let Some(message) = queue.recv().await else {
                break PumpExit::QueueClosed;
            };
            if let Err(error) = writer.write_message(&message).await {
                debug!(client = %self.key.id, error = %error, "write failed");
                let _ = self.hub.unregister(self.key).await;
                break PumpExit::TransportFailed;
            }
        };

        writer.close().await;
        exit
    }
}

/// A registered client whose pumps have not started.
pub struct PendingClient {
    client: Client,
    queue: OutboundQueue,
}

impl PendingClient {
    pub fn key(&self) -> ClientKey {
        self.client.key
    }

    /// Spawns the inbound and outbound pumps.
    pub fn start<C: Connection>(self, connection: C) -> ClientSession {
        let PendingClient { client, queue } = self;
        let key = client.key;
        let hub = client.hub.clone();
        let (reader, writer) = connection.split();
        let (stopped_tx, stopped_rx) = oneshot::channel();

        let outbound = tokio::spawn(client.clone().run_outbound(queue, writer, stopped_tx));
        let inbound = tokio::spawn(client.run_inbound(reader, stopped_rx));
        info!(client = %key.id, user_id = %key.user_id, "client pumps started");

        ClientSession {
            key,
            hub,
            inbound,
            outbound,
        }
    }

    /// Gives up before starting: unregisters the client.
    pub async fn cancel(self) {
        let _ = self.client.hub.unregister(self.client.key).await;
    }
}

/// The running pumps of one client.
pub struct ClientSession {
    key: ClientKey,
    hub: HubHandle,
    inbound: JoinHandle<PumpExit>,
    outbound: JoinHandle<PumpExit>,
}

impl ClientSession {
    pub fn key(&self) -> ClientKey {
        self.key
    }

    /// Waits for both pumps to stop.
    pub async fn join(self) -> SessionReport {
        let (inbound, outbound) = tokio::join!(self.inbound, self.outbound);
        let report = SessionReport {
            key: self.key,
            inbound: inbound.unwrap_or(PumpExit::Aborted),
            outbound: outbound.unwrap_or(PumpExit::Aborted),
        };
        info!(
            client = %report.key.id,
            user_id = %report.key.user_id,
            inbound = ?report.inbound,
            outbound = ?report.outbound,
            "client session ended"
        );
        report
    }

    /// Cancels both pumps and removes the client from the hub.
    pub async fn close(self) -> SessionReport {
        self.inbound.abort();
        self.outbound.abort();
        let _ = self.hub.unregister(self.key).await;
        self.join().await
    }
}
