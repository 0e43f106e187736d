//! Duet server: public-key directory, message history and the realtime
//! gateway behind one axum router.

pub mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::{get, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use duet_api::state::{AppState, AppStateInner};
use duet_api::{keys, messages};
use duet_db::Database;
use duet_gateway::connection;
use duet_gateway::dispatcher::Dispatcher;

pub use config::Config;

#[derive(Clone)]
struct GatewayState {
    dispatcher: Dispatcher,
    db: Arc<Database>,
}

/// Build the full router over an opened database.
pub fn router(db: Arc<Database>, config: &Config) -> Router {
    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        page_limit_max: config.page_limit_max,
    });

    let api_routes = Router::new()
        .route("/api/getPublicKey/{uid}", get(keys::get_public_key))
        .route("/api/publicKey/{uid}", put(keys::publish_public_key))
        .route("/api/messages", get(messages::get_messages).post(messages::append_message))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(GatewayState {
            dispatcher: Dispatcher::new(),
            db,
        });

    Router::new()
        .merge(api_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Open the database, bind and serve until `shutdown` resolves.
pub async fn run(
    config: Config,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let db = Arc::new(Database::open(&config.db_path)?);
    let app = router(db, &config);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Duet server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.dispatcher, state.db))
}
