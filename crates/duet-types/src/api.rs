use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, NewMessage};

// -- Keys --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyResponse {
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PublishKeyRequest {
    pub public_key: String,
}

// -- Messages --

pub const DEFAULT_PAGE_LIMIT: u32 = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesQuery {
    #[serde(rename = "userId1")]
    pub user_id1: String,
    #[serde(rename = "userId2")]
    pub user_id2: String,
    /// 1-based page number counted back from the newest message.
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_LIMIT
}

/// One page of history. `messages` is newest-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

/// A message as submitted by a client, over REST or the gateway.
///
/// `id` is optional for older clients; the server assigns one when absent,
/// and an append that repeats a known id returns the stored record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(rename = "senderId")]
    pub sender_id: String,
    #[serde(rename = "receiverId")]
    pub receiver_id: String,
    #[serde(rename = "messageS")]
    pub message_s: String,
    #[serde(rename = "messageR")]
    pub message_r: String,
}

impl OutgoingMessage {
    pub fn into_new_message(self) -> NewMessage {
        NewMessage {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            sender_uid: self.sender_id,
            receiver_uid: self.receiver_id,
            message_s: self.message_s,
            message_r: self.message_r,
        }
    }

    /// Both ciphertexts present and the two participants named.
    pub fn is_well_formed(&self) -> bool {
        !self.sender_id.is_empty()
            && !self.receiver_id.is_empty()
            && !self.message_s.is_empty()
            && !self.message_r.is_empty()
    }
}

impl From<&NewMessage> for OutgoingMessage {
    fn from(m: &NewMessage) -> Self {
        Self {
            id: Some(m.id),
            sender_id: m.sender_uid.clone(),
            receiver_id: m.receiver_uid.clone(),
            message_s: m.message_s.clone(),
            message_r: m.message_r.clone(),
        }
    }
}

impl From<&Message> for OutgoingMessage {
    fn from(m: &Message) -> Self {
        Self {
            id: Some(m.id),
            sender_id: m.sender_uid.clone(),
            receiver_id: m.receiver_uid.clone(),
            message_s: m.message_s.clone().unwrap_or_default(),
            message_r: m.message_r.clone().unwrap_or_default(),
        }
    }
}
