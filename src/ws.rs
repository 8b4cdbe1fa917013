use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;

use crate::protocol::ServerMessage;
use crate::store::StoreEvent;
use crate::state::AppState;

/// GET /ws/{code}: push channel for one room. The client receives a full
/// snapshot on connect and again after every committed write; this is the
/// low-latency path, with HTTP polling as the fallback.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(code): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    tracing::debug!(code, "websocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, code, state))
}

async fn handle_socket(socket: WebSocket, code: String, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let code = code.trim().to_ascii_uppercase();

    // Subscribe before the snapshot so no write between the two is missed.
    let mut events = state.store.subscribe();

    let initial = match state.get_room(&code).await {
        Ok(room) => {
            let route = room.state.phase.route().to_string();
            ServerMessage::RoomState { room, route }
        }
        Err(err) => ServerMessage::Error {
            code: err.code().to_string(),
            msg: err.to_string(),
        },
    };
    if send_message(&mut sender, &initial).await.is_err() {
        return;
    }
    if matches!(initial, ServerMessage::Error { .. }) {
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(StoreEvent::Updated(updated)) if updated == code => {
                        let message = match state.get_room(&code).await {
                            Ok(room) => {
                                let route = room.state.phase.route().to_string();
                                ServerMessage::RoomState { room, route }
                            }
                            // Deleted between event and read.
                            Err(_) => ServerMessage::RoomDeleted,
                        };
                        let done = matches!(message, ServerMessage::RoomDeleted);
                        if send_message(&mut sender, &message).await.is_err() || done {
                            break;
                        }
                    }
                    Ok(StoreEvent::Deleted(deleted)) if deleted == code => {
                        let _ = send_message(&mut sender, &ServerMessage::RoomDeleted).await;
                        break;
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        // Catch up with a fresh snapshot.
                        tracing::warn!(code, skipped, "websocket lagged behind store events");
                        match state.get_room(&code).await {
                            Ok(room) => {
                                let route = room.state.phase.route().to_string();
                                let message = ServerMessage::RoomState { room, route };
                                if send_message(&mut sender, &message).await.is_err() {
                                    break;
                                }
                            }
                            Err(_) => {
                                let _ = send_message(&mut sender, &ServerMessage::RoomDeleted).await;
                                break;
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::debug!(code, %err, "websocket error");
                        break;
                    }
                }
            }
        }
    }

    tracing::debug!(code, "websocket connection closed");
}

async fn send_message(
    sender: &mut (impl futures::Sink<Message, Error = axum::Error> + Unpin),
    message: &ServerMessage,
) -> Result<(), ()> {
    let json = serde_json::to_string(message).map_err(|_| ())?;
    sender.send(Message::Text(json.into())).await.map_err(|_| ())
}
