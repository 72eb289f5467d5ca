//! Real-time message routing for one-to-one chat.
//!
//! Every connected client is bound to a user id. A message a client sends is
//! saved through a [`ports::MessageStore`] and then delivered to every live
//! connection of its sender and its recipient. Each module focuses on a
//! concrete responsibility:
//!
//! - [`hub`] owns the set of live clients in a single event loop and fans
//!   stored messages out to their bounded outbound queues.
//! - [`client`] runs the inbound and outbound pumps of one connection.
//! - [`ports`] defines the connection and storage traits the core consumes.
//! - [`message`] holds the message, draft and id types.
//! - [`protocol`] is the JSON-lines frame format plus async read/write helpers.
//! - [`transport`] adapts TCP, WebSocket and in-process channels to [`ports`].
//! - [`server`] accepts TCP peers and performs the `hello` handshake.
//! - [`store`] is an in-memory [`ports::MessageStore`].
//! - [`config`], [`cli`] and [`error`] carry tunables, flags and error types.
//! - [`terminal`] is the interactive chat client behind `messaging_hub chat`.
//!
//! Integration tests under `tests/` drive the hub through channel, TCP and
//! WebSocket connections and run the binary end to end.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod hub;
pub mod message;
pub mod ports;
pub mod protocol;
pub mod server;
pub mod store;
pub mod terminal;
pub mod transport;
