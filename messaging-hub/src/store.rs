//! In-memory message store.
//!
//! Stands in for the relational store of the full application: assigns ids
//! and timestamps and keeps every saved message for history reads.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::PersistenceError;
use crate::message::{Message, MessageId, UserId};
use crate::ports::MessageStore;

/// Most messages one history read returns.
pub const HISTORY_PAGE_LEN: usize = 100;

/// Append-only log of saved messages.
///
/// Ids are assigned under the same lock as the append, so the log is always
/// in id order.
#[derive(Default)]
pub struct MemoryStore {
    log: Mutex<Vec<Message>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// One page of the messages exchanged between `a` and `b`, in either
    /// direction, oldest first.
    ///
    /// `after` is the last message id the reader already has; `None` starts
    /// from the beginning. At most [`HISTORY_PAGE_LEN`] messages come back, so
    /// a reader pages forward by passing the id of the last one it got.
    pub fn conversation(&self, a: UserId, b: UserId, after: Option<MessageId>) -> Vec<Message> {
        let log = self.lock();
        // Ids are 1-based positions in the log.
        let start = after.map_or(0, |id| usize::try_from(id.0).unwrap_or(usize::MAX));
        log.iter()
            .skip(start)
            .filter(|message| {
                (message.from_id() == a && message.to_id() == b)
                    || (message.from_id() == b && message.to_id() == a)
            })
            .take(HISTORY_PAGE_LEN)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Message>> {
        // A panic mid-append cannot leave a half-written message behind.
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn save_message(
        &self,
        from_id: UserId,
        to_id: UserId,
        text: String,
    ) -> Result<Message, PersistenceError> {
        let mut log = self.lock();
        let id = MessageId(log.len() as u64 + 1);
        let message = Message::new(id, from_id, to_id, text, Utc::now());
        log.push(message.clone());
        Ok(message)
    }
}
