use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand_core::OsRng;
use x25519_dalek::StaticSecret;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Public half of a user's key pair. Safe to publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(x25519_dalek::PublicKey);

/// Private half of a user's key pair. Zeroized on drop, never printed.
#[derive(Clone)]
pub struct PrivateKey(StaticSecret);

/// A user's static key pair, generated once for the lifetime of the account.
#[derive(Clone)]
pub struct KeyPair {
    pub public: PublicKey,
    pub private: PrivateKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        PrivateKey(StaticSecret::random_from_rng(OsRng)).into()
    }
}

impl From<PrivateKey> for KeyPair {
    fn from(private: PrivateKey) -> Self {
        Self {
            public: private.public_key(),
            private,
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public.to_base64())
            .finish_non_exhaustive()
    }
}

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::PublicKey::from(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    pub(crate) fn inner(&self) -> &x25519_dalek::PublicKey {
        &self.0
    }

    /// Encode to base64 for the key directory.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0.as_bytes())
    }

    /// Decode a base64 public key.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        Ok(Self::from_bytes(decode_32(encoded)?))
    }
}

impl PrivateKey {
    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0))
    }

    pub(crate) fn inner(&self) -> &StaticSecret {
        &self.0
    }

    /// Encode to base64 for local storage. The buffer is wiped on drop.
    pub fn to_base64(&self) -> Zeroizing<String> {
        let bytes = Zeroizing::new(self.0.to_bytes());
        Zeroizing::new(BASE64.encode(bytes.as_slice()))
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(decode_32(encoded)?);
        Ok(Self(StaticSecret::from(*bytes)))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

fn decode_32(encoded: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = Zeroizing::new(
        BASE64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?,
    );
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))
}
