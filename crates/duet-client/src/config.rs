use std::path::PathBuf;
use std::time::Duration;

/// Where the client finds the server and keeps its private keys.
///
/// Timeouts live here, on the transport; the messaging protocol itself
/// has none.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the duet server, e.g. `http://localhost:3000`.
    pub server_url: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Directory holding one private key file per local user.
    pub key_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3000".into(),
            request_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(10),
            key_dir: PathBuf::from(".duet/keys"),
        }
    }
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    /// Read `DUET_SERVER_URL`, `DUET_REQUEST_TIMEOUT_SECS` and `DUET_KEY_DIR`,
    /// falling back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_url: std::env::var("DUET_SERVER_URL").unwrap_or(defaults.server_url),
            request_timeout: std::env::var("DUET_REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            connect_timeout: defaults.connect_timeout,
            key_dir: std::env::var("DUET_KEY_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.key_dir),
        }
    }

    /// WebSocket URL of the realtime gateway.
    pub fn gateway_url(&self) -> String {
        let base = self.server_url.trim_end_matches('/');
        let ws = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{ws}/gateway")
    }
}
