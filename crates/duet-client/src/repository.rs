use async_trait::async_trait;

use duet_types::api::MessagePage;
use duet_types::{Message, NewMessage};

use crate::error::Result;

/// Persisted, paginated history of dual-ciphertext messages.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Store a message. The returned record carries the assigned `sequence`
    /// and `created_at`. Appending the same id twice returns the first record.
    async fn append(&self, message: NewMessage) -> Result<Message>;

    /// Page `page` (1-based) of the conversation between `uid_a` and `uid_b`,
    /// newest first. Stateless: the page number alone positions the window.
    async fn page(&self, uid_a: &str, uid_b: &str, page: u32, page_size: u32) -> Result<MessagePage>;
}
