use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identity of a user. The hub never validates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl FromStr for UserId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Identifier assigned by the message store when a message is saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A persisted chat message between two users.
///
/// Only a [`MessageStore`](crate::ports::MessageStore) creates these; everything
/// downstream of the store (hub, pumps, transports) passes them along untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    id: MessageId,
    from_id: UserId,
    to_id: UserId,
    text: String,
    sent_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        id: MessageId,
        from_id: UserId,
        to_id: UserId,
        text: impl Into<String>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            from_id,
            to_id,
            text: text.into(),
            sent_at,
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn from_id(&self) -> UserId {
        self.from_id
    }

    pub fn to_id(&self) -> UserId {
        self.to_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn sent_at(&self) -> DateTime<Utc> {
        self.sent_at
    }

    /// Identities that should see this message: the sender, then the recipient
    /// unless it is the sender talking to themselves.
    pub fn participants(&self) -> impl Iterator<Item = UserId> {
        let recipient = (self.to_id != self.from_id).then_some(self.to_id);
        std::iter::once(self.from_id).chain(recipient)
    }

    /// Whether `user` is the sender or the recipient.
    pub fn involves(&self, user: UserId) -> bool {
        self.from_id == user || self.to_id == user
    }
}

/// What a connected peer submits: a recipient and a body.
///
/// The sender is always the identity bound to the connection, and the id and
/// timestamp come from the store, so a peer cannot supply any of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub to_id: UserId,
    pub text: String,
}

impl Draft {
    pub fn new(to_id: impl Into<UserId>, text: impl Into<String>) -> Self {
        Self {
            to_id: to_id.into(),
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(from: u64, to: u64) -> Message {
        Message::new(MessageId(1), UserId(from), UserId(to), "hi", Utc::now())
    }

    #[test]
    fn participants_are_sender_then_recipient() {
        let participants: Vec<_> = message(1, 2).participants().collect();
        assert_eq!(participants, vec![UserId(1), UserId(2)]);
    }

    #[test]
    fn self_addressed_message_has_one_participant() {
        let participants: Vec<_> = message(7, 7).participants().collect();
        assert_eq!(participants, vec![UserId(7)]);
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let json = serde_json::to_value(message(1, 2)).expect("serialize message");
        assert_eq!(json["fromId"], 1);
        assert_eq!(json["toId"], 2);
        assert_eq!(json["text"], "hi");
        assert!(json.get("sentAt").is_some());
    }

    #[test]
    fn draft_ignores_sender_supplied_fields() {
        let draft: Draft =
            serde_json::from_str(r#"{"toId":2,"text":"hey","fromId":99,"id":5}"#)
                .expect("parse draft");
        assert_eq!(draft, Draft::new(2, "hey"));
    }
}
