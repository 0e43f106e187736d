use duet_crypto::CryptoError;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// No key pair was ever generated (locally) or published (remotely)
    /// for this uid.
    #[error("no key pair for user {0}")]
    KeyNotFound(String),

    /// The directory already holds a different public key for this uid.
    #[error("user {0} already published a different public key")]
    KeyConflict(String),

    /// Key mismatch, tampering or malformed ciphertext.
    #[error("decryption failed: {0}")]
    Decryption(#[source] CryptoError),

    #[error(transparent)]
    Crypto(CryptoError),

    /// Network or channel failure. Not retried here.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("key storage error: {0}")]
    Storage(String),

    /// The message id is already taken by a different message.
    #[error("message id {0} is already in use")]
    MessageIdConflict(Uuid),

    #[error("{uid} is not a participant of message {message_id}")]
    NotParticipant { uid: String, message_id: Uuid },
}

impl From<CryptoError> for ClientError {
    fn from(e: CryptoError) -> Self {
        if e.is_decryption_failure() {
            Self::Decryption(e)
        } else {
            Self::Crypto(e)
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
