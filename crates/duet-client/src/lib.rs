//! Client core of duet: key management, dual encryption on send,
//! decryption on receive and paginated history sync.
//!
//! Every outside dependency sits behind a trait ([`SecretStore`],
//! [`KeyDirectory`], [`MessageRepository`], [`RealtimeChannel`]) with an
//! HTTP/WebSocket implementation for a real server and an in-memory one in
//! [`memory`].

pub mod channel;
pub mod config;
pub mod error;
pub mod http;
pub mod keystore;
pub mod memory;
pub mod repository;
pub mod service;
pub mod session;
pub mod ws;

use std::sync::Arc;

pub use channel::{HandlerSlot, MessageHandler, RealtimeChannel, Subscription};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use http::ApiClient;
pub use keystore::{FileSecretStore, KeyDirectory, KeyStore, SecretStore, Stored};
pub use repository::MessageRepository;
pub use service::{DecryptedMessage, MessageBody, MessageService, SyncedPage};
pub use session::{ConversationSession, ConversationTicket, ConversationTracker};
pub use ws::WsChannel;

/// Build a [`MessageService`] against a running server: private keys on
/// disk under `config.key_dir`, keys and history over REST, live messages
/// over the gateway WebSocket.
///
/// The returned [`WsChannel`] is the same one the service uses, for
/// reconnecting or shutting down.
pub async fn connect(config: ClientConfig) -> Result<(MessageService, Arc<WsChannel>)> {
    let api = Arc::new(ApiClient::new(&config)?);
    let secrets = Arc::new(FileSecretStore::new(config.key_dir.clone()));
    let keys = Arc::new(KeyStore::new(secrets, api.clone()));

    let channel = Arc::new(WsChannel::new(config));
    channel.connect().await?;

    let service = MessageService::new(keys, api, channel.clone());
    Ok((service, channel))
}
