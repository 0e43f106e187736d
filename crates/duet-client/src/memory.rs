//! In-process backends for every client seam. Useful for tests and for
//! embedding both ends of a conversation in one process.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use duet_crypto::{PrivateKey, PublicKey};
use duet_types::api::MessagePage;
use duet_types::{ConversationId, Message, NewMessage};

use crate::channel::{HandlerSlot, MessageHandler, RealtimeChannel, Subscription};
use crate::error::{ClientError, Result};
use crate::keystore::{KeyDirectory, SecretStore, Stored};
use crate::repository::MessageRepository;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct MemorySecretStore {
    keys: Mutex<HashMap<String, PrivateKey>>,
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn load(&self, uid: &str) -> Result<Option<PrivateKey>> {
        Ok(lock(&self.keys).get(uid).cloned())
    }

    async fn create(&self, uid: &str, key: &PrivateKey) -> Result<Stored> {
        match lock(&self.keys).entry(uid.to_string()) {
            Entry::Occupied(existing) => Ok(Stored::Existing(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(key.clone());
                Ok(Stored::Created)
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryKeyDirectory {
    keys: Mutex<HashMap<String, PublicKey>>,
}

#[async_trait]
impl KeyDirectory for MemoryKeyDirectory {
    async fn publish(&self, uid: &str, key: &PublicKey) -> Result<()> {
        match lock(&self.keys).entry(uid.to_string()) {
            Entry::Occupied(existing) if existing.get() == key => Ok(()),
            Entry::Occupied(_) => Err(ClientError::KeyConflict(uid.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(*key);
                Ok(())
            }
        }
    }

    async fn fetch(&self, uid: &str) -> Result<PublicKey> {
        lock(&self.keys)
            .get(uid)
            .copied()
            .ok_or_else(|| ClientError::KeyNotFound(uid.to_string()))
    }
}

/// Message history kept in memory, with the same paging rules as the
/// server: per-conversation sequence, newest-first pages, 1-based page
/// numbers, idempotent append on id.
#[derive(Default)]
pub struct MemoryMessageRepository {
    conversations: Mutex<HashMap<ConversationId, Vec<Message>>>,
}

impl MemoryMessageRepository {
    /// Insert a record as-is, bypassing validation. For seeding legacy data.
    pub fn insert_raw(&self, message: Message) {
        let mut conversations = lock(&self.conversations);
        let history = conversations.entry(message.conversation()).or_default();
        history.push(message);
        history.sort_by_key(|m| m.sequence);
    }
}

#[async_trait]
impl MessageRepository for MemoryMessageRepository {
    async fn append(&self, message: NewMessage) -> Result<Message> {
        let mut conversations = lock(&self.conversations);

        let existing = conversations.values().flatten().find(|m| m.id == message.id);
        if let Some(existing) = existing {
            let same = existing.sender_uid == message.sender_uid
                && existing.receiver_uid == message.receiver_uid
                && existing.message_s.as_deref() == Some(message.message_s.as_str())
                && existing.message_r.as_deref() == Some(message.message_r.as_str());
            return if same {
                Ok(existing.clone())
            } else {
                Err(ClientError::MessageIdConflict(message.id))
            };
        }

        let history = conversations.entry(message.conversation()).or_default();

        let stored = Message {
            id: message.id,
            sender_uid: message.sender_uid,
            receiver_uid: message.receiver_uid,
            message_s: Some(message.message_s),
            message_r: Some(message.message_r),
            sequence: history.last().map_or(1, |m| m.sequence + 1),
            created_at: Utc::now(),
        };
        history.push(stored.clone());
        Ok(stored)
    }

    async fn page(&self, uid_a: &str, uid_b: &str, page: u32, page_size: u32) -> Result<MessagePage> {
        let conversations = lock(&self.conversations);
        let Some(history) = conversations.get(&ConversationId::new(uid_a, uid_b)) else {
            return Ok(MessagePage { messages: vec![], has_more: false });
        };
        if page_size == 0 {
            return Ok(MessagePage { messages: vec![], has_more: false });
        }

        let skip = (page.max(1) as usize - 1) * page_size as usize;
        let messages: Vec<Message> = history
            .iter()
            .rev()
            .skip(skip)
            .take(page_size as usize)
            .cloned()
            .collect();
        let has_more = history.len() > skip + messages.len();
        Ok(MessagePage { messages, has_more })
    }
}

/// In-process stand-in for the realtime gateway. Each [`MemoryChannel`]
/// made from one hub is a separate connection.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubState>>,
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    /// connection id -> (room, handler slot)
    members: HashMap<u64, (Option<ConversationId>, HandlerSlot)>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection to this hub.
    pub fn channel(&self) -> MemoryChannel {
        let mut state = lock(&self.inner);
        state.next_id += 1;
        let id = state.next_id;
        let handlers = HandlerSlot::default();
        state.members.insert(id, (None, handlers.clone()));
        MemoryChannel {
            id,
            hub: self.clone(),
            handlers,
        }
    }
}

pub struct MemoryChannel {
    id: u64,
    hub: MemoryHub,
    handlers: HandlerSlot,
}

#[async_trait]
impl RealtimeChannel for MemoryChannel {
    async fn join(&self, uid: &str, peer_uid: &str) -> Result<()> {
        let room = ConversationId::new(uid, peer_uid);
        debug!("Memory connection {} joining {}", self.id, room);
        if let Some((current, _)) = lock(&self.hub.inner).members.get_mut(&self.id) {
            *current = Some(room);
        }
        Ok(())
    }

    async fn leave(&self) -> Result<()> {
        if let Some((current, _)) = lock(&self.hub.inner).members.get_mut(&self.id) {
            *current = None;
        }
        Ok(())
    }

    async fn send(&self, message: &Message) -> Result<()> {
        let room = message.conversation();
        // Collect targets first so handlers never run under the hub lock.
        let targets: Vec<HandlerSlot> = lock(&self.hub.inner)
            .members
            .iter()
            .filter(|(id, (joined, _))| **id != self.id && joined.as_ref() == Some(&room))
            .map(|(_, (_, slot))| slot.clone())
            .collect();

        for slot in targets {
            slot.dispatch(message.clone());
        }
        Ok(())
    }

    fn on_receive(&self, handler: MessageHandler) -> Subscription {
        self.handlers.register(handler)
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        lock(&self.hub.inner).members.remove(&self.id);
    }
}
