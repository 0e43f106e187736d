use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::debug;

use duet_types::ConversationId;

use crate::channel::{RealtimeChannel, Subscription};
use crate::error::Result;
use crate::service::DecryptedMessage;

/// Tracks which conversation is currently on screen.
///
/// Every activation bumps a generation counter, so a result fetched for a
/// conversation that was left and later re-entered still counts as stale.
#[derive(Clone, Default)]
pub struct ConversationTracker {
    state: Arc<Mutex<TrackerState>>,
}

#[derive(Default)]
struct TrackerState {
    generation: u64,
    active: Option<ConversationId>,
}

/// Proof that a conversation was active when some work started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTicket {
    generation: u64,
    conversation: ConversationId,
}

impl ConversationTicket {
    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }
}

impl ConversationTracker {
    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn activate(&self, conversation: ConversationId) -> ConversationTicket {
        let mut state = self.state();
        state.generation += 1;
        state.active = Some(conversation.clone());
        ConversationTicket {
            generation: state.generation,
            conversation,
        }
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.generation += 1;
        state.active = None;
    }

    pub fn active(&self) -> Option<ConversationId> {
        self.state().active.clone()
    }

    /// True if nothing was activated or cleared since `ticket` was issued.
    pub fn is_current(&self, ticket: &ConversationTicket) -> bool {
        self.state().generation == ticket.generation
    }
}

/// The one live conversation of a [`MessageService`](crate::MessageService).
///
/// Holds the room membership and the only inbound handler. Opening another
/// conversation replaces the handler, after which this session's stream
/// ends. Dropping the session deregisters its handler; call
/// [`close`](Self::close) to also leave the room.
pub struct ConversationSession {
    pub(crate) conversation: ConversationId,
    pub(crate) local_uid: String,
    pub(crate) events: mpsc::UnboundedReceiver<DecryptedMessage>,
    pub(crate) ticket: ConversationTicket,
    pub(crate) tracker: ConversationTracker,
    pub(crate) channel: Arc<dyn RealtimeChannel>,
    pub(crate) subscription: Subscription,
}

impl ConversationSession {
    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    pub fn local_uid(&self) -> &str {
        &self.local_uid
    }

    pub fn peer_uid(&self) -> &str {
        self.conversation
            .peer_of(&self.local_uid)
            .unwrap_or(self.local_uid.as_str())
    }

    pub fn ticket(&self) -> &ConversationTicket {
        &self.ticket
    }

    /// Still the active conversation and still holding the handler.
    pub fn is_current(&self) -> bool {
        self.tracker.is_current(&self.ticket) && self.subscription.is_active()
    }

    /// Next inbound message from the peer, in delivery order. `None` once
    /// the session has been superseded.
    pub async fn next(&mut self) -> Option<DecryptedMessage> {
        self.events.recv().await
    }

    pub fn try_next(&mut self) -> Option<DecryptedMessage> {
        self.events.try_recv().ok()
    }

    /// Leave the room if this session is still the active one.
    pub async fn close(self) -> Result<()> {
        if !self.tracker.is_current(&self.ticket) {
            debug!("Session for {} already superseded", self.conversation);
            return Ok(());
        }
        self.tracker.clear();
        self.channel.leave().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_entering_a_conversation_invalidates_old_tickets() {
        let tracker = ConversationTracker::default();
        let ab = ConversationId::new("a", "b");
        let ac = ConversationId::new("a", "c");

        let first = tracker.activate(ab.clone());
        assert!(tracker.is_current(&first));

        tracker.activate(ac);
        let again = tracker.activate(ab.clone());

        assert!(!tracker.is_current(&first));
        assert!(tracker.is_current(&again));
        assert_eq!(tracker.active(), Some(ab));
    }

    #[test]
    fn clear_drops_active() {
        let tracker = ConversationTracker::default();
        let ticket = tracker.activate(ConversationId::new("a", "b"));
        tracker.clear();
        assert!(!tracker.is_current(&ticket));
        assert_eq!(tracker.active(), None);
    }
}
