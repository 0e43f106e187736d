use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use duet_db::{AppendOutcome, Database};
use duet_types::api::OutgoingMessage;
use duet_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive one gateway WebSocket until either side closes it.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, db: Arc<Database>) {
    let (mut sender, mut receiver) = socket.split();
    let (conn_id, mut events_rx) = dispatcher.register().await;
    info!("Gateway connection {} opened", conn_id);

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward room events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to encode gateway event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client. Commands are handled one at a time, which
    // keeps a sender's messages in send order for everyone in the room.
    let dispatcher_recv = dispatcher.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(text.as_str()) {
                    Ok(cmd) => handle_command(&dispatcher_recv, &db, conn_id, cmd).await,
                    Err(e) => {
                        warn!(
                            "Connection {} bad command: {} -- raw: {}",
                            conn_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        dispatcher_recv
                            .send_to(conn_id, GatewayEvent::Error { message: format!("bad command: {e}") })
                            .await;
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister(conn_id).await;
    info!("Gateway connection {} closed", conn_id);
}

/// Apply one client command on behalf of `conn_id`.
pub async fn handle_command(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    conn_id: Uuid,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::JoinRoom(join) => {
            let room = join.conversation();
            dispatcher.join_room(conn_id, room.clone()).await;
            info!(
                "Connection {} ({}) joined room {} ({} connected)",
                conn_id,
                join.sender_id,
                room,
                dispatcher.room_size(&room).await
            );
        }

        GatewayCommand::LeaveRoom => {
            if let Some(room) = dispatcher.leave_room(conn_id).await {
                info!("Connection {} left room {}", conn_id, room);
            }
        }

        GatewayCommand::SendMessage(outgoing) => {
            send_message(dispatcher, db, conn_id, outgoing).await;
        }
    }
}

async fn send_message(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    conn_id: Uuid,
    outgoing: OutgoingMessage,
) {
    if !outgoing.is_well_formed() {
        warn!("Connection {} sent a message with missing fields", conn_id);
        dispatcher
            .send_to(conn_id, GatewayEvent::Error { message: "messageS and messageR are required".into() })
            .await;
        return;
    }

    // Run blocking DB insert off the async runtime
    let new_message = outgoing.into_new_message();
    let db = db.clone();
    let stored = tokio::task::spawn_blocking(move || db.append_message(&new_message)).await;

    let row = match stored {
        Ok(Ok(AppendOutcome::Inserted(row) | AppendOutcome::Replayed(row))) => row,
        Ok(Ok(AppendOutcome::IdConflict)) => {
            warn!("Connection {} reused a message id for different content", conn_id);
            dispatcher
                .send_to(conn_id, GatewayEvent::Error { message: "message id already in use".into() })
                .await;
            return;
        }
        Ok(Err(e)) => {
            error!("Failed to store message from connection {}: {}", conn_id, e);
            dispatcher
                .send_to(conn_id, GatewayEvent::Error { message: "failed to store message".into() })
                .await;
            return;
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            return;
        }
    };

    let message = row.into_message();
    let room = message.conversation();
    let id = message.id;
    let delivered = dispatcher
        .publish(&room, GatewayEvent::ReceiveMessage(message.into()), Some(conn_id))
        .await;
    debug!("Message {} stored and relayed to {} connection(s) in {}", id, delivered, room);
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_types::ConversationId;
    use duet_types::events::RoomJoin;

    fn open_db() -> (tempfile::TempDir, Arc<Database>) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("gateway.db")).unwrap();
        (dir, Arc::new(db))
    }

    fn join(from: &str, to: &str) -> GatewayCommand {
        GatewayCommand::JoinRoom(RoomJoin {
            sender_id: from.into(),
            receiver_id: to.into(),
        })
    }

    fn send(from: &str, to: &str, body: &str) -> GatewayCommand {
        GatewayCommand::SendMessage(OutgoingMessage {
            id: None,
            sender_id: from.into(),
            receiver_id: to.into(),
            message_s: format!("s-{body}"),
            message_r: format!("r-{body}"),
        })
    }

    #[tokio::test]
    async fn send_message_persists_and_relays_to_peer() {
        let (_dir, db) = open_db();
        let dispatcher = Dispatcher::new();
        let (alice, mut alice_rx) = dispatcher.register().await;
        let (bob, mut bob_rx) = dispatcher.register().await;

        handle_command(&dispatcher, &db, alice, join("alice", "bob")).await;
        handle_command(&dispatcher, &db, bob, join("bob", "alice")).await;
        handle_command(&dispatcher, &db, alice, send("alice", "bob", "one")).await;
        handle_command(&dispatcher, &db, alice, send("alice", "bob", "two")).await;

        for (seq, body) in [(1, "one"), (2, "two")] {
            match bob_rx.recv().await.unwrap() {
                GatewayEvent::ReceiveMessage(m) => {
                    assert_eq!(m.sequence, seq);
                    assert_eq!(m.sender_id, "alice");
                    assert_eq!(m.message_r.as_deref(), Some(format!("r-{body}").as_str()));
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(alice_rx.try_recv().is_err());

        let (rows, has_more) = db.page_messages(&ConversationId::new("alice", "bob"), 1, 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(!has_more);
    }

    #[tokio::test]
    async fn offline_peer_only_gets_history() {
        let (_dir, db) = open_db();
        let dispatcher = Dispatcher::new();
        let (alice, _alice_rx) = dispatcher.register().await;

        handle_command(&dispatcher, &db, alice, join("alice", "bob")).await;
        handle_command(&dispatcher, &db, alice, send("alice", "bob", "later")).await;

        let (rows, _) = db.page_messages(&ConversationId::new("bob", "alice"), 1, 10).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn reused_id_is_not_relayed_into_another_room() {
        let (_dir, db) = open_db();
        let dispatcher = Dispatcher::new();
        let (alice, _alice_rx) = dispatcher.register().await;
        let (carol, mut carol_rx) = dispatcher.register().await;
        let (dave, mut dave_rx) = dispatcher.register().await;
        handle_command(&dispatcher, &db, dave, join("dave", "carol")).await;

        let id = uuid::Uuid::new_v4();
        let mut original = send("alice", "bob", "one");
        if let GatewayCommand::SendMessage(m) = &mut original {
            m.id = Some(id);
        }
        handle_command(&dispatcher, &db, alice, original).await;

        let mut reused = send("carol", "dave", "two");
        if let GatewayCommand::SendMessage(m) = &mut reused {
            m.id = Some(id);
        }
        handle_command(&dispatcher, &db, carol, reused).await;

        assert!(matches!(carol_rx.recv().await, Some(GatewayEvent::Error { .. })));
        assert!(dave_rx.try_recv().is_err());
        let (rows, _) = db.page_messages(&ConversationId::new("carol", "dave"), 1, 10).unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn malformed_message_is_rejected_to_sender() {
        let (_dir, db) = open_db();
        let dispatcher = Dispatcher::new();
        let (alice, mut alice_rx) = dispatcher.register().await;

        let cmd = GatewayCommand::SendMessage(OutgoingMessage {
            id: None,
            sender_id: "alice".into(),
            receiver_id: "bob".into(),
            message_s: String::new(),
            message_r: "r".into(),
        });
        handle_command(&dispatcher, &db, alice, cmd).await;

        assert!(matches!(alice_rx.recv().await, Some(GatewayEvent::Error { .. })));
        let (rows, _) = db.page_messages(&ConversationId::new("alice", "bob"), 1, 10).unwrap();
        assert!(rows.is_empty());
    }
}
