/// Duet Crypto Library
///
/// Every user owns one static X25519 key pair. A message is sealed twice,
/// once to the sender's public key and once to the receiver's, so each side
/// can reopen its own copy without sharing a symmetric secret.
///
/// Sealing is ECIES-style: a fresh ephemeral X25519 key per ciphertext,
/// HKDF-SHA256 over the shared secret, then AES-256-GCM.

pub mod encrypt;
pub mod error;
pub mod keys;

pub use encrypt::{MAX_PLAINTEXT_BYTES, decrypt, encrypt};
pub use error::CryptoError;
pub use keys::{KeyPair, PrivateKey, PublicKey};
