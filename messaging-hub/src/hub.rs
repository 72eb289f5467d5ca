//! The hub: sole owner of the set of live clients.
//!
//! All registration, removal and fan-out decisions are requests on one bounded
//! FIFO queue, consumed by a single task:
//!
//! - **[`HubHandle`]**: cloneable submitter used by connection handlers and pumps
//! - **[`Hub`]**: the event loop that owns `live` and processes one request at a time
//!
//! Because only the loop touches the live set there is no lock around it, and
//! every operation on it is totally ordered. A single queue (rather than one per
//! request kind) also means a registration enqueued before a client's pumps
//! start is processed before anything those pumps submit.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::error::HubError;
use crate::message::{Message, UserId};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub fn next() -> Self {
        Self(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Names a client to the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub id: ClientId,
    pub user_id: UserId,
}

/// The hub's half of a client's outbound queue.
///
/// Registering hands the sender to the hub. Once the hub drops it (on
/// unregister, eviction or shutdown) the queue is closed and the reader sees
/// the end after draining whatever was already buffered.
#[derive(Debug, Clone)]
pub struct Registration {
    key: ClientKey,
    outbound: mpsc::Sender<Message>,
}

impl Registration {
    pub fn key(&self) -> ClientKey {
        self.key
    }
}

/// The client's half of its outbound queue, drained by the outbound pump.
#[derive(Debug)]
pub struct OutboundQueue {
    key: ClientKey,
    receiver: mpsc::Receiver<Message>,
}

impl OutboundQueue {
    pub fn key(&self) -> ClientKey {
        self.key
    }

    /// Waits for the next message. `None` once the hub closed the queue and
    /// nothing is left buffered.
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Takes a buffered message without waiting.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }

    /// Whether the hub has let go of this queue.
    pub fn is_closed(&self) -> bool {
        self.receiver.is_closed()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

/// Creates a fresh client identity and its bounded outbound queue.
pub fn outbound_queue(user_id: UserId, capacity: usize) -> (Registration, OutboundQueue) {
    let key = ClientKey {
        id: ClientId::next(),
        user_id,
    };
    // mpsc::channel panics on zero capacity.
    let (outbound, receiver) = mpsc::channel(capacity.max(1));
    (
        Registration { key, outbound },
        OutboundQueue { key, receiver },
    )
}

/// Running totals kept by the event loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub registered: u64,
    pub unregistered: u64,
    pub broadcasts: u64,
    pub delivered: u64,
    pub evicted: u64,
}

/// The live set as seen by the event loop at one point in its request order.
#[derive(Debug, Clone)]
pub struct HubSnapshot {
    /// One entry per registration, ordered by client id.
    pub clients: Vec<ClientKey>,
    pub stats: HubStats,
}

impl HubSnapshot {
    pub fn contains(&self, key: ClientKey) -> bool {
        self.clients.contains(&key)
    }

    /// Number of live entries for `key` (more than one only after a duplicate registration).
    pub fn entries_for(&self, key: ClientKey) -> usize {
        self.clients.iter().filter(|client| **client == key).count()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Requests processed by the event loop, strictly in arrival order.
#[derive(Debug)]
enum HubRequest {
    Register(Registration),
    Unregister(ClientKey),
    Broadcast(Message),
    Snapshot {
        respond_to: oneshot::Sender<HubSnapshot>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Handle for submitting requests to a running hub.
///
/// Submitting waits only for room in the request queue, not for the request
/// to be processed. A full queue therefore slows producers down, while the hub
/// itself never waits on any client.
#[derive(Debug, Clone)]
pub struct HubHandle {
    requests: mpsc::Sender<HubRequest>,
}

impl HubHandle {
    /// Admits a client into the live set.
    ///
    /// Each client must be registered exactly once. Registering a clone of the
    /// same registration adds a second entry sharing the same queue, so every
    /// broadcast is then enqueued twice.
    pub async fn register(&self, registration: Registration) -> Result<(), HubError> {
        self.submit(HubRequest::Register(registration)).await
    }

    /// Removes every entry for `key` and closes its queue. A no-op for absent clients.
    pub async fn unregister(&self, key: ClientKey) -> Result<(), HubError> {
        self.submit(HubRequest::Unregister(key)).await
    }

    /// Routes a stored message to the live clients of its sender and recipient.
    pub async fn broadcast(&self, message: Message) -> Result<(), HubError> {
        self.submit(HubRequest::Broadcast(message)).await
    }

    /// Returns the live set after every request submitted before this one.
    pub async fn snapshot(&self) -> Result<HubSnapshot, HubError> {
        let (respond_to, response) = oneshot::channel();
        self.submit(HubRequest::Snapshot { respond_to }).await?;
        response.await.map_err(|_| HubError::Closed)
    }

    /// Stops the hub once the requests already queued have been processed.
    ///
    /// Every live queue is closed on the way out. Resolves when the loop has
    /// finished; calling it on a stopped hub returns immediately.
    pub async fn shutdown(&self) {
        let (respond_to, done) = oneshot::channel();
        if self
            .requests
            .send(HubRequest::Shutdown { respond_to })
            .await
            .is_ok()
        {
            // A dropped ack also means the loop is gone.
            let _ = done.await;
        }
    }

    /// Whether the event loop has stopped taking requests.
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }

    async fn submit(&self, request: HubRequest) -> Result<(), HubError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| HubError::Closed)
    }
}

struct LiveEntry {
    id: ClientId,
    outbound: mpsc::Sender<Message>,
}

/// The event loop owning the live set.
///
/// Live clients are indexed by user so a broadcast only visits the entries of
/// its (at most two) participants.
pub struct Hub {
    requests: mpsc::Receiver<HubRequest>,
    live: HashMap<UserId, Vec<LiveEntry>>,
    stats: HubStats,
}

impl Hub {
    pub fn new(config: &HubConfig) -> (Self, HubHandle) {
        let (requests_tx, requests) = mpsc::channel(config.request_capacity.max(1));
        let hub = Self {
            requests,
            live: HashMap::new(),
            stats: HubStats::default(),
        };
        (
            hub,
            HubHandle {
                requests: requests_tx,
            },
        )
    }

    /// Builds a hub and runs its loop on a new task.
    pub fn spawn(config: &HubConfig) -> (HubHandle, JoinHandle<HubStats>) {
        let (hub, handle) = Self::new(config);
        (handle, tokio::spawn(hub.run()))
    }

    /// Runs until [`HubHandle::shutdown`] is processed or every handle is dropped.
    ///
    /// # Shutdown
    ///
    /// The request queue is closed first so new submitters get
    /// [`HubError::Closed`]. Requests already queued are still processed, then
    /// every live queue is closed and all shutdown callers are answered.
    pub async fn run(mut self) -> HubStats {
        debug!("hub event loop started");
        let mut acks = Vec::new();

        while let Some(request) = self.requests.recv().await {
            if let Some(ack) = self.handle_request(request) {
                acks.push(ack);
                acks.extend(self.drain_pending());
                break;
            }
        }

        let closed: usize = self.live.drain().map(|(_, entries)| entries.len()).sum();
        info!(closed, stats = ?self.stats, "hub stopped");

        for ack in acks {
            let _ = ack.send(());
        }
        self.stats
    }

    /// Processes one request. Returns the reply channel of a shutdown request.
    fn handle_request(&mut self, request: HubRequest) -> Option<oneshot::Sender<()>> {
        match request {
            HubRequest::Register(registration) => self.register(registration),
            HubRequest::Unregister(key) => self.unregister(key),
            HubRequest::Broadcast(message) => self.broadcast(message),
            HubRequest::Snapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
            HubRequest::Shutdown { respond_to } => return Some(respond_to),
        }
        None
    }

    fn drain_pending(&mut self) -> Vec<oneshot::Sender<()>> {
        self.requests.close();
        let mut acks = Vec::new();
        while let Ok(request) = self.requests.try_recv() {
            if let Some(ack) = self.handle_request(request) {
                acks.push(ack);
            }
        }
        acks
    }

    fn register(&mut self, registration: Registration) {
        let Registration { key, outbound } = registration;
        let entries = self.live.entry(key.user_id).or_default();
        if entries.iter().any(|entry| entry.id == key.id) {
            warn!(client = %key.id, user_id = %key.user_id, "client registered twice");
        }
        entries.push(LiveEntry {
            id: key.id,
            outbound,
        });
        self.stats.registered += 1;
        debug!(client = %key.id, user_id = %key.user_id, "client registered");
    }

    fn unregister(&mut self, key: ClientKey) {
        if self.remove(key) {
            self.stats.unregistered += 1;
            debug!(client = %key.id, user_id = %key.user_id, "client unregistered");
        }
    }

    /// Fans a message out to its participants without ever waiting.
    ///
    /// A client whose queue is full cannot keep up and is evicted instead of
    /// receiving the message; one whose queue reader is gone is evicted too.
    fn broadcast(&mut self, message: Message) {
        self.stats.broadcasts += 1;
        let mut delivered = 0;
        let mut evicted: Vec<ClientKey> = Vec::new();

        for user_id in message.participants() {
            let Some(entries) = self.live.get(&user_id) else {
                continue;
            };
            for entry in entries {
                let key = ClientKey {
                    id: entry.id,
                    user_id,
                };
                if evicted.contains(&key) {
                    continue;
                }
                match entry.outbound.try_send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(client = %key.id, user_id = %user_id, "outbound queue full, evicting slow client");
                        evicted.push(key);
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(client = %key.id, user_id = %user_id, "outbound queue reader gone, evicting client");
                        evicted.push(key);
                    }
                }
            }
        }

        self.stats.delivered += delivered;
        for key in evicted {
            if self.remove(key) {
                self.stats.evicted += 1;
            }
        }
    }

    fn snapshot(&self) -> HubSnapshot {
        let mut clients: Vec<ClientKey> = self
            .live
            .iter()
            .flat_map(|(user_id, entries)| {
                entries.iter().map(move |entry| ClientKey {
                    id: entry.id,
                    user_id: *user_id,
                })
            })
            .collect();
        clients.sort_by_key(|key| key.id);
        HubSnapshot {
            clients,
            stats: self.stats,
        }
    }

    /// Drops every entry for `key`, which closes its queue.
    fn remove(&mut self, key: ClientKey) -> bool {
        let Some(entries) = self.live.get_mut(&key.user_id) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != key.id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.live.remove(&key.user_id);
        }
        removed
    }
}
