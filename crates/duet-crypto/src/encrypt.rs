use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hkdf::Hkdf;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::keys::{PrivateKey, PublicKey};

/// Largest plaintext accepted by [`encrypt`].
pub const MAX_PLAINTEXT_BYTES: usize = 64 * 1024;

const VERSION: u8 = 1;
const HKDF_SALT: &[u8] = b"duet-sealed-box-v1";
const EPHEMERAL_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + EPHEMERAL_LEN + NONCE_LEN;

/// Seal a UTF-8 message to `recipient`.
///
/// Output is base64 of `version(1) || ephemeral_pub(32) || nonce(12) || ct`.
/// A fresh ephemeral key and nonce are drawn per call, so sealing the same
/// text twice yields different ciphertexts.
pub fn encrypt(recipient: &PublicKey, plaintext: &str) -> Result<String, CryptoError> {
    if plaintext.len() > MAX_PLAINTEXT_BYTES {
        return Err(CryptoError::MessageTooLarge {
            len: plaintext.len(),
            max: MAX_PLAINTEXT_BYTES,
        });
    }

    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_pub = X25519PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(recipient.inner());

    let key = derive_key(shared.as_bytes(), ephemeral_pub.as_bytes(), recipient.as_bytes())?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice()));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
        .map_err(|_| CryptoError::Encryption)?;

    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.push(VERSION);
    out.extend_from_slice(ephemeral_pub.as_bytes());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(out))
}

/// Open a ciphertext produced by [`encrypt`] with the matching private key.
pub fn decrypt(private: &PrivateKey, ciphertext: &str) -> Result<String, CryptoError> {
    let ciphertext = ciphertext.trim();
    if ciphertext.is_empty() {
        return Err(CryptoError::Empty);
    }

    let raw = BASE64
        .decode(ciphertext)
        .map_err(|_| CryptoError::Decryption("ciphertext is not valid base64"))?;

    if raw.len() < HEADER_LEN + TAG_LEN {
        return Err(CryptoError::Decryption("ciphertext is truncated"));
    }
    if raw[0] != VERSION {
        return Err(CryptoError::Decryption("unknown ciphertext version"));
    }

    let mut ephemeral_bytes = [0u8; EPHEMERAL_LEN];
    ephemeral_bytes.copy_from_slice(&raw[1..1 + EPHEMERAL_LEN]);
    let ephemeral_pub = X25519PublicKey::from(ephemeral_bytes);
    let nonce = Nonce::from_slice(&raw[1 + EPHEMERAL_LEN..HEADER_LEN]);

    let shared = private.inner().diffie_hellman(&ephemeral_pub);
    let recipient = private.public_key();
    let key = derive_key(shared.as_bytes(), ephemeral_pub.as_bytes(), recipient.as_bytes())?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice()));

    let plaintext = Zeroizing::new(
        cipher
            .decrypt(nonce, &raw[HEADER_LEN..])
            .map_err(|_| CryptoError::Decryption("authentication failed"))?,
    );

    String::from_utf8(plaintext.to_vec())
        .map_err(|_| CryptoError::Decryption("plaintext is not valid UTF-8"))
}

fn derive_key(
    shared: &[u8; 32],
    ephemeral_pub: &[u8; 32],
    recipient_pub: &[u8; 32],
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let mut info = [0u8; 64];
    info[..32].copy_from_slice(ephemeral_pub);
    info[32..].copy_from_slice(recipient_pub);

    let mut okm = Zeroizing::new([0u8; 32]);
    Hkdf::<Sha256>::new(Some(HKDF_SALT), shared)
        .expand(&info, okm.as_mut_slice())
        .map_err(|_| CryptoError::Encryption)?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let pair = KeyPair::generate();
        for text in ["Hello from Duet!", "", "héllo wörld ✓ 你好", "a\nb\tc"] {
            let sealed = encrypt(&pair.public, text).unwrap();
            assert_ne!(sealed, text);
            assert_eq!(decrypt(&pair.private, &sealed).unwrap(), text);
        }
    }

    #[test]
    fn wrong_key_fails() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let sealed = encrypt(&alice.public, "Secret message").unwrap();
        let err = decrypt(&bob.private, &sealed).unwrap_err();
        assert!(err.is_decryption_failure());
    }

    #[test]
    fn same_plaintext_seals_differently() {
        let pair = KeyPair::generate();
        let a = encrypt(&pair.public, "hello").unwrap();
        let b = encrypt(&pair.public, "hello").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let pair = KeyPair::generate();
        let sealed = encrypt(&pair.public, "do not touch").unwrap();

        let mut raw = BASE64.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = BASE64.encode(raw);

        assert!(decrypt(&pair.private, &tampered).unwrap_err().is_decryption_failure());
    }

    #[test]
    fn malformed_input_fails() {
        let pair = KeyPair::generate();
        assert!(decrypt(&pair.private, "%%%").unwrap_err().is_decryption_failure());
        assert!(
            decrypt(&pair.private, &BASE64.encode([VERSION; 20]))
                .unwrap_err()
                .is_decryption_failure()
        );

        let mut raw = BASE64.decode(encrypt(&pair.public, "x").unwrap()).unwrap();
        raw[0] = 9;
        assert_eq!(
            decrypt(&pair.private, &BASE64.encode(raw)).unwrap_err(),
            CryptoError::Decryption("unknown ciphertext version")
        );
    }

    #[test]
    fn empty_ciphertext_is_distinct() {
        let pair = KeyPair::generate();
        assert_eq!(decrypt(&pair.private, "").unwrap_err(), CryptoError::Empty);
        assert!(!CryptoError::Empty.is_decryption_failure());
    }

    #[test]
    fn oversized_plaintext_rejected() {
        let pair = KeyPair::generate();
        let big = "x".repeat(MAX_PLAINTEXT_BYTES + 1);
        assert!(matches!(
            encrypt(&pair.public, &big),
            Err(CryptoError::MessageTooLarge { .. })
        ));
        let max = "y".repeat(MAX_PLAINTEXT_BYTES);
        assert_eq!(decrypt(&pair.private, &encrypt(&pair.public, &max).unwrap()).unwrap(), max);
    }
}
