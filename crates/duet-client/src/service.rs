use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use duet_crypto::PrivateKey;
use duet_types::{ConversationId, Message, NewMessage};

use crate::channel::{MessageHandler, RealtimeChannel};
use crate::error::{ClientError, Result};
use crate::keystore::KeyStore;
use crate::repository::MessageRepository;
use crate::session::{ConversationSession, ConversationTracker};

/// What a viewer gets out of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Text(String),
    /// The ciphertext addressed to this viewer is missing (legacy record).
    Unavailable,
    /// The ciphertext is there but would not open with the viewer's key.
    Undecryptable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMessage {
    pub id: Uuid,
    pub sender_uid: String,
    pub receiver_uid: String,
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
    pub body: MessageBody,
}

impl DecryptedMessage {
    fn new(message: &Message, body: MessageBody) -> Self {
        Self {
            id: message.id,
            sender_uid: message.sender_uid.clone(),
            receiver_uid: message.receiver_uid.clone(),
            sequence: message.sequence,
            created_at: message.created_at,
            body,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// A decrypted page of history. `messages` keeps the server's
/// newest-first order.
#[derive(Debug, Clone)]
pub struct SyncedPage {
    pub conversation: ConversationId,
    pub page: u32,
    pub messages: Vec<DecryptedMessage>,
    pub has_more: bool,
}

impl SyncedPage {
    /// Oldest first, ready to prepend to what is already displayed.
    pub fn chronological(self) -> Vec<DecryptedMessage> {
        let mut messages = self.messages;
        messages.reverse();
        messages
    }
}

/// Open the ciphertext that `local_uid`'s role in `message` can read.
fn open(key: &PrivateKey, message: &Message, local_uid: &str) -> MessageBody {
    let Some(role) = message.role_of(local_uid) else {
        return MessageBody::Undecryptable(format!("{local_uid} is not a participant"));
    };
    let Some(ciphertext) = message.ciphertext_for(role) else {
        return MessageBody::Unavailable;
    };
    match duet_crypto::decrypt(key, ciphertext) {
        Ok(text) => MessageBody::Text(text),
        Err(e) => {
            debug!("Message {} did not decrypt for {}: {}", message.id, local_uid, e);
            MessageBody::Undecryptable(e.to_string())
        }
    }
}

/// Send, receive and history sync for one device.
pub struct MessageService {
    keys: Arc<KeyStore>,
    repository: Arc<dyn MessageRepository>,
    channel: Arc<dyn RealtimeChannel>,
    tracker: ConversationTracker,
}

impl MessageService {
    pub fn new(
        keys: Arc<KeyStore>,
        repository: Arc<dyn MessageRepository>,
        channel: Arc<dyn RealtimeChannel>,
    ) -> Self {
        Self {
            keys,
            repository,
            channel,
            tracker: ConversationTracker::default(),
        }
    }

    pub fn keys(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    pub fn tracker(&self) -> &ConversationTracker {
        &self.tracker
    }

    /// Encrypt `plaintext` for both parties, store it, then push it to the
    /// room. The caller gets its own plaintext back without a decrypt.
    ///
    /// A relay failure is reported as [`ClientError::Transport`]; the
    /// message is stored by then and reaches the peer through history.
    pub async fn send(&self, sender_uid: &str, receiver_uid: &str, plaintext: &str) -> Result<DecryptedMessage> {
        let (receiver_key, sender_key) = tokio::try_join!(
            self.keys.public_key(receiver_uid),
            self.keys.public_key(sender_uid),
        )?;

        let message_r = duet_crypto::encrypt(&receiver_key, plaintext)?;
        let message_s = duet_crypto::encrypt(&sender_key, plaintext)?;

        let stored = self
            .repository
            .append(NewMessage {
                id: Uuid::new_v4(),
                sender_uid: sender_uid.to_string(),
                receiver_uid: receiver_uid.to_string(),
                message_s,
                message_r,
            })
            .await?;
        debug!("Stored message {} #{} in {}", stored.id, stored.sequence, stored.conversation());

        if let Err(e) = self.channel.send(&stored).await {
            warn!("Message {} stored but not relayed: {}", stored.id, e);
            return Err(e);
        }

        Ok(DecryptedMessage::new(&stored, MessageBody::Text(plaintext.to_string())))
    }

    /// Decrypt one inbound message for `local_uid`.
    ///
    /// Returns `None` for messages `local_uid` sent itself. A missing
    /// ciphertext field yields [`MessageBody::Unavailable`]; a ciphertext
    /// that will not open is an error.
    pub async fn receive(&self, message: &Message, local_uid: &str) -> Result<Option<DecryptedMessage>> {
        if message.sender_uid == local_uid {
            return Ok(None);
        }
        let role = message.role_of(local_uid).ok_or_else(|| ClientError::NotParticipant {
            uid: local_uid.to_string(),
            message_id: message.id,
        })?;
        let Some(ciphertext) = message.ciphertext_for(role) else {
            return Ok(Some(DecryptedMessage::new(message, MessageBody::Unavailable)));
        };

        let key = self.keys.private_key(local_uid).await?;
        let text = duet_crypto::decrypt(&key, ciphertext)?;
        Ok(Some(DecryptedMessage::new(message, MessageBody::Text(text))))
    }

    /// Fetch page `page` of the conversation and decrypt every record.
    ///
    /// Records are decrypted in parallel and independently: a bad record
    /// becomes [`MessageBody::Undecryptable`] or [`MessageBody::Unavailable`]
    /// without affecting its neighbours.
    pub async fn sync_page(&self, local_uid: &str, peer_uid: &str, page: u32, page_size: u32) -> Result<SyncedPage> {
        let fetched = self.repository.page(local_uid, peer_uid, page, page_size).await?;
        let conversation = ConversationId::new(local_uid, peer_uid);
        if fetched.messages.is_empty() {
            return Ok(SyncedPage {
                conversation,
                page,
                messages: Vec::new(),
                has_more: fetched.has_more,
            });
        }

        let key = self.keys.private_key(local_uid).await?;
        let tasks = fetched.messages.iter().cloned().map(|message| {
            let key = key.clone();
            let local = local_uid.to_string();
            tokio::task::spawn_blocking(move || open(&key, &message, &local))
        });
        let bodies = join_all(tasks).await;

        let messages = fetched
            .messages
            .iter()
            .zip(bodies)
            .map(|(message, body)| {
                let body = body.unwrap_or_else(|e| MessageBody::Undecryptable(format!("decrypt task failed: {e}")));
                DecryptedMessage::new(message, body)
            })
            .collect();

        Ok(SyncedPage {
            conversation,
            page,
            messages,
            has_more: fetched.has_more,
        })
    }

    /// Make `(local_uid, peer_uid)` the active conversation.
    ///
    /// Generates the local key pair on first use, joins the room and
    /// installs the only inbound handler, replacing whatever a previous
    /// session had registered.
    pub async fn open_conversation(&self, local_uid: &str, peer_uid: &str) -> Result<ConversationSession> {
        let pair = self.keys.ensure_key_pair(local_uid).await?;
        let conversation = ConversationId::new(local_uid, peer_uid);
        let ticket = self.tracker.activate(conversation.clone());

        self.channel.join(local_uid, peer_uid).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let key = pair.private;
        let local = local_uid.to_string();
        let room = conversation.clone();
        let handler: MessageHandler = Arc::new(move |message: Message| {
            if message.conversation() != room || message.sender_uid == local {
                return;
            }
            let body = open(&key, &message, &local);
            if tx.send(DecryptedMessage::new(&message, body)).is_err() {
                debug!("Session for {} gone, dropping message {}", room, message.id);
            }
        });
        let subscription = self.channel.on_receive(handler);
        info!("{} opened conversation {}", local_uid, conversation);

        Ok(ConversationSession {
            conversation,
            local_uid: local_uid.to_string(),
            events: rx,
            ticket,
            tracker: self.tracker.clone(),
            channel: self.channel.clone(),
            subscription,
        })
    }

    /// [`sync_page`](Self::sync_page) for an open session. Returns `None`
    /// if the user moved to another conversation while the page was in
    /// flight.
    pub async fn load_history(&self, session: &ConversationSession, page: u32, page_size: u32) -> Result<Option<SyncedPage>> {
        let synced = self
            .sync_page(session.local_uid(), session.peer_uid(), page, page_size)
            .await?;
        if !self.tracker.is_current(session.ticket()) {
            debug!("Discarding page {} of {}: conversation changed", page, session.conversation());
            return Ok(None);
        }
        Ok(Some(synced))
    }
}
