use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use duet_types::Message;
use duet_types::api::OutgoingMessage;
use duet_types::events::{GatewayCommand, GatewayEvent, RoomJoin};

use crate::channel::{HandlerSlot, MessageHandler, RealtimeChannel, Subscription};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// Realtime channel over the server's `/gateway` WebSocket.
///
/// Inbound events are read by one task and handed to the handler in the
/// order the server sent them.
pub struct WsChannel {
    config: ClientConfig,
    handlers: HandlerSlot,
    connection: Mutex<Option<Connection>>,
    /// Last joined pair, replayed after a reconnect.
    room: Mutex<Option<(String, String)>>,
}

struct Connection {
    outgoing: mpsc::UnboundedSender<WsMessage>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    fn is_alive(&self) -> bool {
        !self.reader.is_finished() && !self.writer.is_finished()
    }

    fn shutdown(self) {
        let _ = self.outgoing.send(WsMessage::Close(None));
        self.reader.abort();
    }
}

impl WsChannel {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            handlers: HandlerSlot::default(),
            connection: Mutex::new(None),
            room: Mutex::new(None),
        }
    }

    /// Open the WebSocket, replacing any previous connection. Rejoins the
    /// last room if there was one.
    pub async fn connect(&self) -> Result<()> {
        let url = self.config.gateway_url();
        let (stream, _) = tokio::time::timeout(self.config.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| ClientError::Transport(format!("timed out connecting to {url}")))??;
        info!("Connected to gateway at {}", url);

        let (mut sink, mut source) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let closing = matches!(frame, WsMessage::Close(_));
                if let Err(e) = sink.send(frame).await {
                    debug!("Gateway write failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let handlers = self.handlers.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<GatewayEvent>(text.as_str()) {
                        Ok(GatewayEvent::ReceiveMessage(delivered)) => handlers.dispatch(delivered.into()),
                        Ok(GatewayEvent::Error { message }) => warn!("Gateway error: {}", message),
                        Err(e) => warn!("Unrecognised gateway event: {}", e),
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Gateway read failed: {}", e);
                        break;
                    }
                }
            }
            info!("Gateway connection closed");
        });

        let previous = self.connection.lock().await.replace(Connection {
            outgoing: tx,
            reader,
            writer,
        });
        if let Some(previous) = previous {
            previous.shutdown();
        }

        let room = self.room.lock().await.clone();
        if let Some((uid, peer)) = room {
            self.command(GatewayCommand::JoinRoom(RoomJoin {
                sender_id: uid,
                receiver_id: peer,
            }))
            .await?;
        }
        Ok(())
    }

    pub async fn disconnect(&self) {
        if let Some(connection) = self.connection.lock().await.take() {
            connection.shutdown();
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.as_ref().is_some_and(Connection::is_alive)
    }

    async fn command(&self, command: GatewayCommand) -> Result<()> {
        let text = serde_json::to_string(&command)
            .map_err(|e| ClientError::Transport(format!("encoding gateway command: {e}")))?;

        let guard = self.connection.lock().await;
        let connection = guard
            .as_ref()
            .filter(|c| c.is_alive())
            .ok_or_else(|| ClientError::Transport("gateway not connected".into()))?;
        connection
            .outgoing
            .send(WsMessage::text(text))
            .map_err(|_| ClientError::Transport("gateway connection closed".into()))
    }
}

#[async_trait]
impl RealtimeChannel for WsChannel {
    async fn join(&self, uid: &str, peer_uid: &str) -> Result<()> {
        *self.room.lock().await = Some((uid.to_string(), peer_uid.to_string()));
        self.command(GatewayCommand::JoinRoom(RoomJoin {
            sender_id: uid.to_string(),
            receiver_id: peer_uid.to_string(),
        }))
        .await
    }

    async fn leave(&self) -> Result<()> {
        self.room.lock().await.take();
        self.command(GatewayCommand::LeaveRoom).await
    }

    async fn send(&self, message: &Message) -> Result<()> {
        self.command(GatewayCommand::SendMessage(OutgoingMessage::from(message)))
            .await
    }

    fn on_receive(&self, handler: MessageHandler) -> Subscription {
        self.handlers.register(handler)
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            connection.shutdown();
        }
    }
}
