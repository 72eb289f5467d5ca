//! Tunables for the hub, the client pumps and the bundled servers.
//!
//! The binary fills these from command-line flags (see [`crate::cli`]); library
//! users can start from `Default`.

use clap::ValueEnum;

pub const DEFAULT_REQUEST_CAPACITY: usize = 64;
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 16;
pub const DEFAULT_MAX_TEXT_LEN: usize = 4096;

/// What the inbound pump does when the message store fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum PersistenceFailurePolicy {
    /// Stop the inbound pump and unregister the client.
    #[default]
    Disconnect,
    /// Drop the message and keep reading; the client stays registered.
    Skip,
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Requests that may be queued before submitters wait on the hub.
    pub request_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            request_capacity: DEFAULT_REQUEST_CAPACITY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Messages buffered per client before the hub treats it as a slow consumer.
    pub outbound_capacity: usize,
    pub persistence_failure: PersistenceFailurePolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            persistence_failure: PersistenceFailurePolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub client: ClientConfig,
    /// Largest message body, in bytes, a connection accepts from its peer.
    pub max_text_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            max_text_len: DEFAULT_MAX_TEXT_LEN,
        }
    }
}
