use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The unordered pair of participants that identifies a conversation.
///
/// Construction sorts the two uids, so `(a, b)` and `(b, a)` are the same
/// conversation and the same realtime room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId {
    low: String,
    high: String,
}

impl ConversationId {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        let (a, b) = (a.into(), b.into());
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn low(&self) -> &str {
        &self.low
    }

    pub fn high(&self) -> &str {
        &self.high
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.low == uid || self.high == uid
    }

    /// The other participant, or `None` if `uid` is not part of this pair.
    pub fn peer_of(&self, uid: &str) -> Option<&str> {
        if self.low == uid {
            Some(&self.high)
        } else if self.high == uid {
            Some(&self.low)
        } else {
            None
        }
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.low, self.high)
    }
}

/// Which side of a message a viewer is on. Decides the ciphertext field
/// that viewer can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

/// A stored message. The server only ever sees the two ciphertexts.
///
/// `message_s` is sealed to the sender's public key, `message_r` to the
/// receiver's. Either may be missing on legacy records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    #[serde(alias = "senderId")]
    pub sender_uid: String,
    #[serde(alias = "receiverId")]
    pub receiver_uid: String,
    #[serde(rename = "messageS", default)]
    pub message_s: Option<String>,
    #[serde(rename = "messageR", default)]
    pub message_r: Option<String>,
    #[serde(default)]
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn conversation(&self) -> ConversationId {
        ConversationId::new(self.sender_uid.as_str(), self.receiver_uid.as_str())
    }

    /// Role of `uid` in this message. A note-to-self resolves to `Sender`.
    pub fn role_of(&self, uid: &str) -> Option<Role> {
        if self.sender_uid == uid {
            Some(Role::Sender)
        } else if self.receiver_uid == uid {
            Some(Role::Receiver)
        } else {
            None
        }
    }

    /// Ciphertext addressed to `role`. Empty fields count as missing.
    pub fn ciphertext_for(&self, role: Role) -> Option<&str> {
        let field = match role {
            Role::Sender => self.message_s.as_deref(),
            Role::Receiver => self.message_r.as_deref(),
        };
        field.filter(|c| !c.is_empty())
    }
}

/// Input to an append: everything except the server-assigned `sequence`
/// and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub id: Uuid,
    pub sender_uid: String,
    pub receiver_uid: String,
    pub message_s: String,
    pub message_r: String,
}

impl NewMessage {
    pub fn conversation(&self) -> ConversationId {
        ConversationId::new(self.sender_uid.as_str(), self.receiver_uid.as_str())
    }
}
