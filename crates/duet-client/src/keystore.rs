//! Key lifecycle: private keys stay on this device, public keys live in a
//! directory every user can query.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use tracing::{debug, info, warn};
use uuid::Uuid;

use duet_crypto::{KeyPair, PrivateKey, PublicKey};

use crate::error::{ClientError, Result};

/// Outcome of an exclusive create in a [`SecretStore`].
pub enum Stored {
    /// This call wrote the key.
    Created,
    /// A key was already on file; it is returned and the offered one dropped.
    Existing(PrivateKey),
}

/// Device-local storage for private keys, one per uid.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn load(&self, uid: &str) -> Result<Option<PrivateKey>>;

    /// Store `key` for `uid` only if nothing is stored yet.
    async fn create(&self, uid: &str, key: &PrivateKey) -> Result<Stored>;
}

/// Where public keys are published and looked up.
#[async_trait]
pub trait KeyDirectory: Send + Sync {
    /// Publish a public key. Re-publishing the same key is fine; a
    /// different key for the same uid is [`ClientError::KeyConflict`].
    async fn publish(&self, uid: &str, key: &PublicKey) -> Result<()>;

    /// Fails with [`ClientError::KeyNotFound`] if `uid` never published one.
    async fn fetch(&self, uid: &str) -> Result<PublicKey>;
}

/// Private keys as files under one directory.
///
/// Creation is exclusive: the key is written to a temp file and then
/// hard-linked into place, so a concurrent creator either wins outright or
/// finds a complete file already there.
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path to the key file for a uid. The uid is base64url-encoded so any
    /// identifier maps to a safe file name.
    pub fn key_path(&self, uid: &str) -> PathBuf {
        self.dir.join(format!("{}.key", URL_SAFE_NO_PAD.encode(uid)))
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn load(&self, uid: &str) -> Result<Option<PrivateKey>> {
        let path = self.key_path(uid);
        match tokio::fs::read_to_string(&path).await {
            Ok(encoded) => Ok(Some(
                PrivateKey::from_base64(&encoded)
                    .map_err(|e| ClientError::Storage(format!("{}: {}", path.display(), e)))?,
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create(&self, uid: &str, key: &PrivateKey) -> Result<Stored> {
        let dir = self.dir.clone();
        let path = self.key_path(uid);
        let encoded = key.to_base64();

        let created = tokio::task::spawn_blocking(move || create_exclusive(&dir, &path, encoded.as_bytes()))
            .await
            .map_err(|e| ClientError::Storage(format!("key write task failed: {e}")))??;

        if created {
            return Ok(Stored::Created);
        }
        debug!("Key file for {} already exists, keeping it", uid);
        match self.load(uid).await? {
            Some(existing) => Ok(Stored::Existing(existing)),
            None => Err(ClientError::Storage(format!("key file for {uid} vanished"))),
        }
    }
}

/// Returns `false` if `path` already existed.
fn create_exclusive(dir: &Path, path: &Path, contents: &[u8]) -> std::io::Result<bool> {
    std::fs::create_dir_all(dir)?;
    let tmp = dir.join(format!(".tmp-{}", Uuid::new_v4()));

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let written = options.open(&tmp).and_then(|mut file| {
        file.write_all(contents)?;
        file.sync_all()
    });
    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }

    let linked = std::fs::hard_link(&tmp, path);
    let _ = std::fs::remove_file(&tmp);
    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

/// The local user's key pair plus public keys of everyone else.
///
/// Public keys are static for the lifetime of an account, so lookups are
/// cached after the first fetch.
pub struct KeyStore {
    secrets: Arc<dyn SecretStore>,
    directory: Arc<dyn KeyDirectory>,
    public_cache: RwLock<HashMap<String, PublicKey>>,
}

impl KeyStore {
    pub fn new(secrets: Arc<dyn SecretStore>, directory: Arc<dyn KeyDirectory>) -> Self {
        Self {
            secrets,
            directory,
            public_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Return the key pair for `uid`, generating and storing one on first
    /// use, and make sure its public half is in the directory. Concurrent
    /// first calls agree on a single pair: whichever create lands first is
    /// the one everybody gets back.
    ///
    /// A publish that failed on an earlier call is retried here.
    pub async fn ensure_key_pair(&self, uid: &str) -> Result<KeyPair> {
        let pair = match self.secrets.load(uid).await? {
            Some(private) => KeyPair::from(private),
            None => {
                let fresh = KeyPair::generate();
                match self.secrets.create(uid, &fresh.private).await? {
                    Stored::Created => {
                        info!("Generated a key pair for {}", uid);
                        fresh
                    }
                    Stored::Existing(private) => KeyPair::from(private),
                }
            }
        };

        self.publish(uid, &pair.public).await?;
        Ok(pair)
    }

    /// Publish unless this store already saw `public` in the directory.
    async fn publish(&self, uid: &str, public: &PublicKey) -> Result<()> {
        if self.cached_public(uid).as_ref() == Some(public) {
            return Ok(());
        }
        self.directory.publish(uid, public).await?;
        self.cache_public(uid, *public);
        debug!("Public key for {} is in the directory", uid);
        Ok(())
    }

    /// The private key generated for `uid` on this device.
    pub async fn private_key(&self, uid: &str) -> Result<PrivateKey> {
        self.secrets
            .load(uid)
            .await?
            .ok_or_else(|| ClientError::KeyNotFound(uid.to_string()))
    }

    /// Public key of any user, local or remote.
    pub async fn public_key(&self, uid: &str) -> Result<PublicKey> {
        if let Some(key) = self.cached_public(uid) {
            return Ok(key);
        }
        let key = self.directory.fetch(uid).await?;
        self.cache_public(uid, key);
        Ok(key)
    }

    fn cached_public(&self, uid: &str) -> Option<PublicKey> {
        match self.public_cache.read() {
            Ok(cache) => cache.get(uid).copied(),
            Err(_) => None,
        }
    }

    fn cache_public(&self, uid: &str, key: PublicKey) {
        match self.public_cache.write() {
            Ok(mut cache) => {
                cache.insert(uid.to_string(), key);
            }
            Err(_) => warn!("Public key cache lock poisoned, not caching {}", uid),
        }
    }
}
