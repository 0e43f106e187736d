use std::sync::Arc;
use std::time::Duration;

use duet_client::memory::MemorySecretStore;
use duet_client::{ApiClient, ClientConfig, ClientError, KeyStore, MessageService, WsChannel};
use duet_db::Database;
use duet_server::{Config, router};

/// Serve a fresh server on an ephemeral port. The temp dir must outlive it.
async fn spawn_server() -> (String, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::open(&dir.path().join("duet.db")).unwrap());
    let app = router(db, &Config::default());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), dir)
}

async fn device(url: &str, uid: &str) -> MessageService {
    let config = ClientConfig::new(url);
    let api = Arc::new(ApiClient::new(&config).unwrap());
    let keys = Arc::new(KeyStore::new(Arc::new(MemorySecretStore::default()), api.clone()));
    keys.ensure_key_pair(uid).await.unwrap();

    let channel = Arc::new(WsChannel::new(config));
    channel.connect().await.unwrap();
    MessageService::new(keys, api, channel)
}

#[tokio::test]
async fn two_users_chat_live_and_through_history() {
    let (url, _dir) = spawn_server().await;
    let alice = device(&url, "alice").await;
    let bob = device(&url, "bob").await;

    let mut bob_session = bob.open_conversation("bob", "alice").await.unwrap();
    let _alice_session = alice.open_conversation("alice", "bob").await.unwrap();
    // Joins are fire-and-forget; give the gateway a moment to process them.
    tokio::time::sleep(Duration::from_millis(200)).await;

    alice.send("alice", "bob", "first").await.unwrap();
    alice.send("alice", "bob", "second").await.unwrap();

    for expected in ["first", "second"] {
        let got = tokio::time::timeout(Duration::from_secs(5), bob_session.next())
            .await
            .expect("live message")
            .expect("session open");
        assert_eq!(got.text(), Some(expected));
    }

    // REST append and gateway relay share one id, so nothing is doubled.
    let history = bob.sync_page("bob", "alice", 1, 10).await.unwrap();
    assert!(!history.has_more);
    let texts: Vec<_> = history
        .chronological()
        .into_iter()
        .map(|m| m.text().map(str::to_owned))
        .collect();
    assert_eq!(texts, vec![Some("first".to_string()), Some("second".to_string())]);

    let own_view = alice.sync_page("alice", "bob", 1, 10).await.unwrap();
    assert!(own_view.messages.iter().all(|m| m.text().is_some()));
}

#[tokio::test]
async fn key_directory_over_http() {
    let (url, _dir) = spawn_server().await;
    let api = ApiClient::new(&ClientConfig::new(url.as_str())).unwrap();
    let keys = KeyStore::new(Arc::new(MemorySecretStore::default()), Arc::new(api.clone()));

    assert!(matches!(keys.public_key("ghost").await, Err(ClientError::KeyNotFound(_))));

    let pair = keys.ensure_key_pair("alice").await.unwrap();
    let other = KeyStore::new(Arc::new(MemorySecretStore::default()), Arc::new(api));
    assert_eq!(other.public_key("alice").await.unwrap(), pair.public);

    // A second device generating its own pair cannot take over the uid.
    assert!(matches!(
        other.ensure_key_pair("alice").await,
        Err(ClientError::KeyConflict(_))
    ));

    let resp = reqwest::Client::new()
        .put(format!("{url}/api/publicKey/bob"))
        .json(&serde_json::json!({ "publicKey": "not base64!" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sending_without_a_connected_gateway_still_stores() {
    let (url, _dir) = spawn_server().await;
    let config = ClientConfig::new(url.as_str());
    let api = Arc::new(ApiClient::new(&config).unwrap());
    let keys = Arc::new(KeyStore::new(Arc::new(MemorySecretStore::default()), api.clone()));
    keys.ensure_key_pair("alice").await.unwrap();
    keys.ensure_key_pair("bob").await.unwrap();

    let offline = MessageService::new(keys, api, Arc::new(WsChannel::new(config)));
    let err = offline.send("alice", "bob", "queued").await.unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)));

    // Same device holds both keys here, so it can read bob's side too.
    let page = offline.sync_page("bob", "alice", 1, 10).await.unwrap();
    assert_eq!(page.messages[0].text(), Some("queued"));
}
