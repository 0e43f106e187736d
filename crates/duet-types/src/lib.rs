//! Types shared by the duet server and client.
//!
//! Field names on the wire (`messageS`, `messageR`, `senderId`, ...) are part
//! of the interop contract and must not be renamed.

pub mod api;
pub mod events;
pub mod models;

pub use models::{ConversationId, Message, NewMessage, Role};
