use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("plaintext of {len} bytes exceeds the {max} byte limit")]
    MessageTooLarge { len: usize, max: usize },

    /// The ciphertext field was empty. Callers treat this as "unavailable",
    /// not as a failed decryption.
    #[error("ciphertext is empty")]
    Empty,

    #[error("decryption failed: {0}")]
    Decryption(&'static str),

    #[error("encryption failed")]
    Encryption,
}

impl CryptoError {
    /// True for key mismatch, tampering or malformed input.
    pub fn is_decryption_failure(&self) -> bool {
        matches!(self, Self::Decryption(_))
    }
}
