use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, info, warn};

use duet_crypto::PublicKey;
use duet_db::PublishOutcome;
use duet_types::api::{PublicKeyResponse, PublishKeyRequest};

use crate::state::AppState;

/// `GET /api/getPublicKey/{uid}`
pub async fn get_public_key(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let public_key = tokio::task::spawn_blocking(move || db.get_public_key(&uid))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(|e| { error!("Public key lookup failed: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(PublicKeyResponse { public_key }))
}

/// `PUT /api/publicKey/{uid}`
///
/// The first key published for a uid is permanent. Publishing it again is
/// accepted; publishing a different one is a conflict.
pub async fn publish_public_key(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Json(req): Json<PublishKeyRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if uid.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    // Reject anything that is not a 32-byte X25519 key before storing it.
    let key = PublicKey::from_base64(&req.public_key).map_err(|e| {
        warn!("Rejected public key for {}: {}", uid, e);
        StatusCode::BAD_REQUEST
    })?;
    let encoded = key.to_base64();

    let db = state.db.clone();
    let uid_db = uid.clone();
    let outcome = tokio::task::spawn_blocking(move || db.publish_public_key(&uid_db, &encoded))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(|e| { error!("Public key publish failed: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?;

    match outcome {
        PublishOutcome::Created => {
            info!("Published public key for {}", uid);
            Ok((StatusCode::CREATED, Json(PublicKeyResponse { public_key: key.to_base64() })))
        }
        PublishOutcome::Unchanged => {
            Ok((StatusCode::OK, Json(PublicKeyResponse { public_key: key.to_base64() })))
        }
        PublishOutcome::Conflict { .. } => {
            warn!("Refused to replace the public key of {}", uid);
            Err(StatusCode::CONFLICT)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        Router,
        body::Body,
        http::{Request, header},
        routing::{get, put},
    };
    use tower::ServiceExt;

    use duet_crypto::KeyPair;
    use duet_db::Database;

    use super::*;
    use crate::state::AppStateInner;

    fn app() -> (tempfile::TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("keys.db")).unwrap());
        let state: AppState = Arc::new(AppStateInner { db, page_limit_max: 100 });
        let router = Router::new()
            .route("/api/getPublicKey/{uid}", get(get_public_key))
            .route("/api/publicKey/{uid}", put(publish_public_key))
            .with_state(state);
        (dir, router)
    }

    fn publish(uid: &str, key: &str) -> Request<Body> {
        Request::put(format!("/api/publicKey/{uid}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::json!({ "publicKey": key }).to_string()))
            .unwrap()
    }

    fn lookup(uid: &str) -> Request<Body> {
        Request::get(format!("/api/getPublicKey/{uid}"))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn unknown_uid_is_not_found() {
        let (_dir, app) = app();
        let resp = app.oneshot(lookup("ghost")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn first_key_is_kept() {
        let (_dir, app) = app();
        let first = KeyPair::generate().public.to_base64();
        let second = KeyPair::generate().public.to_base64();

        let resp = app.clone().oneshot(publish("alice", &first)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let resp = app.clone().oneshot(publish("alice", &first)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = app.clone().oneshot(publish("alice", &second)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = app.oneshot(lookup("alice")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: PublicKeyResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.public_key, first);
    }

    #[tokio::test]
    async fn malformed_key_is_rejected() {
        let (_dir, app) = app();
        let resp = app.clone().oneshot(publish("bob", "too-short")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = app.oneshot(lookup("bob")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
