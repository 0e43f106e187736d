use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, warn};

use duet_crypto::PublicKey;
use duet_types::api::{MessagePage, MessagesQuery, OutgoingMessage, PublicKeyResponse, PublishKeyRequest};
use duet_types::{Message, NewMessage};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::keystore::KeyDirectory;
use crate::repository::MessageRepository;

/// REST client for the key directory and message history endpoints.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base: Url,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base = Url::parse(&config.server_url)
            .map_err(|e| ClientError::Transport(format!("invalid server url {}: {e}", config.server_url)))?;
        let http = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { http, base })
    }

    /// `base` + the given path segments, each percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Transport(format!("server url {} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// Turn a non-success response into a transport error carrying the body.
async fn unexpected(resp: reqwest::Response) -> ClientError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    ClientError::Transport(format!("server returned {status}: {body}"))
}

#[async_trait]
impl KeyDirectory for ApiClient {
    async fn publish(&self, uid: &str, key: &PublicKey) -> Result<()> {
        let url = self.url(&["api", "publicKey", uid])?;
        let resp = self
            .http
            .put(url)
            .json(&PublishKeyRequest {
                public_key: key.to_base64(),
            })
            .send()
            .await?;

        match resp.status() {
            StatusCode::OK | StatusCode::CREATED => {
                debug!("Published public key for {}", uid);
                Ok(())
            }
            StatusCode::CONFLICT => {
                warn!("Directory holds a different public key for {}", uid);
                Err(ClientError::KeyConflict(uid.to_string()))
            }
            _ => Err(unexpected(resp).await),
        }
    }

    async fn fetch(&self, uid: &str) -> Result<PublicKey> {
        let url = self.url(&["api", "getPublicKey", uid])?;
        let resp = self.http.get(url).send().await?;

        match resp.status() {
            StatusCode::OK => {
                let body: PublicKeyResponse = resp.json().await?;
                PublicKey::from_base64(&body.public_key).map_err(ClientError::Crypto)
            }
            StatusCode::NOT_FOUND => Err(ClientError::KeyNotFound(uid.to_string())),
            _ => Err(unexpected(resp).await),
        }
    }
}

#[async_trait]
impl MessageRepository for ApiClient {
    async fn append(&self, message: NewMessage) -> Result<Message> {
        let url = self.url(&["api", "messages"])?;
        let resp = self
            .http
            .post(url)
            .json(&OutgoingMessage::from(&message))
            .send()
            .await?;

        match resp.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(resp.json().await?),
            StatusCode::CONFLICT => Err(ClientError::MessageIdConflict(message.id)),
            _ => Err(unexpected(resp).await),
        }
    }

    async fn page(&self, uid_a: &str, uid_b: &str, page: u32, page_size: u32) -> Result<MessagePage> {
        let url = self.url(&["api", "messages"])?;
        let query = MessagesQuery {
            user_id1: uid_a.to_string(),
            user_id2: uid_b.to_string(),
            page,
            limit: page_size,
        };
        let resp = self.http.get(url).query(&query).send().await?;

        if !resp.status().is_success() {
            return Err(unexpected(resp).await);
        }
        Ok(resp.json().await?)
    }
}
