use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::OutgoingMessage;
use crate::models::{ConversationId, Message};

/// Commands sent FROM client TO server over the gateway WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayCommand {
    /// Join the room of the conversation between the two uids. No reply.
    /// A connection sits in one room at a time.
    JoinRoom(RoomJoin),

    /// Leave the current room, if any.
    LeaveRoom,

    /// Persist a message and relay it to the other members of its room.
    SendMessage(OutgoingMessage),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomJoin {
    #[serde(rename = "senderId")]
    pub sender_id: String,
    #[serde(rename = "receiverId")]
    pub receiver_id: String,
}

impl RoomJoin {
    pub fn conversation(&self) -> ConversationId {
        ConversationId::new(self.sender_id.as_str(), self.receiver_id.as_str())
    }
}

/// Events sent FROM server TO client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayEvent {
    /// A message was posted to a room this connection has joined.
    ReceiveMessage(DeliveredMessage),

    /// A command from this connection could not be carried out.
    Error { message: String },
}

/// Realtime form of a stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredMessage {
    pub id: Uuid,
    #[serde(rename = "senderId")]
    pub sender_id: String,
    #[serde(rename = "receiverId")]
    pub receiver_id: String,
    #[serde(rename = "messageS", default)]
    pub message_s: Option<String>,
    #[serde(rename = "messageR", default)]
    pub message_r: Option<String>,
    #[serde(default)]
    pub sequence: i64,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl From<Message> for DeliveredMessage {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            sender_id: m.sender_uid,
            receiver_id: m.receiver_uid,
            message_s: m.message_s,
            message_r: m.message_r,
            sequence: m.sequence,
            created_at: m.created_at,
        }
    }
}

impl From<DeliveredMessage> for Message {
    fn from(m: DeliveredMessage) -> Self {
        Self {
            id: m.id,
            sender_uid: m.sender_id,
            receiver_uid: m.receiver_id,
            message_s: m.message_s,
            message_r: m.message_r,
            sequence: m.sequence,
            created_at: m.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_room_wire_shape() {
        let cmd = GatewayCommand::JoinRoom(RoomJoin {
            sender_id: "alice".into(),
            receiver_id: "bob".into(),
        });
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "joinRoom");
        assert_eq!(json["data"]["senderId"], "alice");
        assert_eq!(json["data"]["receiverId"], "bob");
    }

    #[test]
    fn leave_room_parses_without_data() {
        let cmd: GatewayCommand = serde_json::from_str(r#"{"type":"leaveRoom"}"#).unwrap();
        assert!(matches!(cmd, GatewayCommand::LeaveRoom));
    }

    #[test]
    fn receive_message_wire_shape() {
        let event = GatewayEvent::ReceiveMessage(DeliveredMessage {
            id: Uuid::new_v4(),
            sender_id: "bob".into(),
            receiver_id: "alice".into(),
            message_s: Some("s".into()),
            message_r: Some("r".into()),
            sequence: 3,
            created_at: Utc::now(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "receiveMessage");
        assert_eq!(json["data"]["messageR"], "r");

        let GatewayEvent::ReceiveMessage(delivered) = event else {
            unreachable!()
        };
        let message = Message::from(delivered);
        assert_eq!(message.conversation(), ConversationId::new("alice", "bob"));
        assert_eq!(message.sequence, 3);
    }
}
