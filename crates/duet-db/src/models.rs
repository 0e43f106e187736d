//! Database row types. These map directly to SQLite rows and stay separate
//! from the duet-types wire models.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use duet_types::{Message, NewMessage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub id: String,
    pub sender_uid: String,
    pub receiver_uid: String,
    pub message_s: Option<String>,
    pub message_r: Option<String>,
    pub sequence: i64,
    pub created_at: String,
}

impl MessageRow {
    /// Same participants and ciphertexts as `message`.
    pub fn matches(&self, message: &NewMessage) -> bool {
        self.sender_uid == message.sender_uid
            && self.receiver_uid == message.receiver_uid
            && self.message_s.as_deref() == Some(message.message_s.as_str())
            && self.message_r.as_deref() == Some(message.message_r.as_str())
    }

    /// Convert to the wire model. Corrupt ids or timestamps are logged and
    /// defaulted rather than failing the whole page.
    pub fn into_message(self) -> Message {
        let id = self.id.parse::<Uuid>().unwrap_or_else(|e| {
            warn!("Corrupt message id '{}': {}", self.id, e);
            Uuid::default()
        });
        let created_at = parse_timestamp(&self.created_at).unwrap_or_else(|| {
            warn!("Corrupt created_at '{}' on message '{}'", self.created_at, self.id);
            DateTime::default()
        });

        Message {
            id,
            sender_uid: self.sender_uid,
            receiver_uid: self.receiver_uid,
            message_s: self.message_s,
            message_r: self.message_r,
            sequence: self.sequence,
            created_at,
        }
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>().ok().or_else(|| {
        // SQLite's datetime('now') has no timezone; it is UTC.
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|ndt| ndt.and_utc())
    })
}
