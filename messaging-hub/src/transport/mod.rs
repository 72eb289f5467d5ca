//! [`Connection`](crate::ports::Connection) implementations.
//!
//! - [`tcp`] speaks newline-delimited JSON over any byte stream.
//! - [`ws`] serves WebSocket peers through an axum router.
//! - [`channel`] is an in-process pair of queues, used by tests and embedders.

pub mod channel;
pub mod tcp;
pub mod ws;
