use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tracing::{debug, trace};

use duet_types::Message;

use crate::error::Result;

/// Callback for inbound messages. Invoked once per event, in delivery order.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Live pub/sub of messages, scoped to conversation rooms.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    /// Join the room for the pair `(uid, peer_uid)`, leaving any other.
    async fn join(&self, uid: &str, peer_uid: &str) -> Result<()>;

    async fn leave(&self) -> Result<()>;

    /// Push a stored message to its room. If the peer is not joined the
    /// message is only reachable through history.
    async fn send(&self, message: &Message) -> Result<()>;

    /// Install the inbound handler, replacing any previous one. The handler
    /// stays installed until the returned [`Subscription`] is dropped.
    fn on_receive(&self, handler: MessageHandler) -> Subscription;
}

type Slot = Mutex<Option<(u64, MessageHandler)>>;

/// Holds at most one inbound handler per channel.
#[derive(Clone, Default)]
pub struct HandlerSlot {
    slot: Arc<Slot>,
    next_token: Arc<AtomicU64>,
}

impl HandlerSlot {
    pub fn register(&self, handler: MessageHandler) -> Subscription {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        let previous = self
            .slot
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .replace((token, handler));
        if let Some((old, _)) = previous {
            debug!("Inbound handler {} replaced by {}", old, token);
        }
        Subscription {
            slot: Arc::downgrade(&self.slot),
            token,
        }
    }

    /// Hand `message` to the current handler, if any.
    pub fn dispatch(&self, message: Message) {
        let handler = self
            .slot
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map(|(_, h)| h.clone());
        match handler {
            Some(handler) => handler(message),
            None => trace!("No inbound handler, dropping message {}", message.id),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().unwrap_or_else(|p| p.into_inner()).is_none()
    }
}

/// Keeps an inbound handler installed. Dropping it removes the handler,
/// unless a newer registration has already replaced it.
#[must_use = "dropping a Subscription deregisters its handler"]
pub struct Subscription {
    slot: Weak<Slot>,
    token: u64,
}

impl Subscription {
    /// True while this subscription's handler is the installed one.
    pub fn is_active(&self) -> bool {
        self.slot.upgrade().is_some_and(|slot| {
            slot.lock()
                .unwrap_or_else(|p| p.into_inner())
                .as_ref()
                .is_some_and(|(token, _)| *token == self.token)
        })
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(slot) = self.slot.upgrade() else {
            return;
        };
        let mut current = slot.lock().unwrap_or_else(|p| p.into_inner());
        if current.as_ref().is_some_and(|(token, _)| *token == self.token) {
            *current = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use chrono::Utc;
    use uuid::Uuid;

    fn message() -> Message {
        Message {
            id: Uuid::new_v4(),
            sender_uid: "alice".into(),
            receiver_uid: "bob".into(),
            message_s: Some("s".into()),
            message_r: Some("r".into()),
            sequence: 1,
            created_at: Utc::now(),
        }
    }

    fn counting(counter: &Arc<AtomicUsize>) -> MessageHandler {
        let counter = counter.clone();
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn re_registration_replaces_handler() {
        let slot = HandlerSlot::default();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let sub1 = slot.register(counting(&first));
        let sub2 = slot.register(counting(&second));
        slot.dispatch(message());

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert!(!sub1.is_active());
        assert!(sub2.is_active());

        // Dropping the stale subscription must not remove the live handler.
        drop(sub1);
        slot.dispatch(message());
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn drop_deregisters() {
        let slot = HandlerSlot::default();
        let count = Arc::new(AtomicUsize::new(0));
        let sub = slot.register(counting(&count));
        sub.unsubscribe();

        assert!(slot.is_empty());
        slot.dispatch(message());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
