use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use hyper_tungstenite::tungstenite::Message;
use log::{error, info, warn};
use tokio::sync::mpsc;

use crate::auth::resolve_viewer;
use crate::error::SubscribeError;
use crate::messages::{ClientMessage, ServerMessage};
use crate::state::subscribers::{ConnId, ViewerId, ViewerSender};
use crate::state::SharedState;

// ============================================
// Dashboard WebSocket Connection Handler
// ============================================

pub async fn handle_connection(
    ws: hyper_tungstenite::WebSocketStream<hyper::upgrade::Upgraded>,
    addr: SocketAddr,
    state: SharedState,
) {
    info!("WebSocket connection established from {}", addr);

    let (mut ws_sender, mut ws_receiver) = ws.split();
    let conn_id: ConnId = uuid::Uuid::new_v4().to_string();

    // Bounded so a stalled socket makes fan-out time out instead of buffering forever.
    let (tx, mut rx) = mpsc::channel::<Message>(state.config.outbound_buffer);

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut viewer: Option<ViewerId> = None;

    loop {
        tokio::select! {
            msg_result = ws_receiver.next() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => {
                                match handle_message(msg, &conn_id, viewer.as_deref(), &state, &tx).await {
                                    Ok(viewer_id) => viewer = Some(viewer_id),
                                    Err(e) => {
                                        warn!("Rejected subscription on {}: {}", conn_id, e);
                                        send_error(&tx, e.to_string());
                                    }
                                }
                            }
                            Err(e) => {
                                warn!("Failed to parse message: {}", e);
                                send_error(&tx, format!("Invalid message format: {}", e));
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {} closed connection", addr);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.try_send(Message::Pong(data));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    None => break,
                }
            }
            _ = &mut send_task => {
                break;
            }
        }
    }

    if let Some(viewer_id) = state.subscribers.unregister(&conn_id).await {
        info!("Viewer {} disconnected ({})", viewer_id, conn_id);
    }
    send_task.abort();
}

async fn handle_message(
    msg: ClientMessage,
    conn_id: &ConnId,
    current: Option<&str>,
    state: &SharedState,
    sender: &ViewerSender,
) -> Result<ViewerId, SubscribeError> {
    match msg {
        ClientMessage::Subscribe { token, viewer_id } => {
            if current.is_some() {
                return Err(SubscribeError::AlreadySubscribed(conn_id.clone()));
            }
            let viewer_id = resolve_viewer(state.auth.as_ref(), &token, viewer_id.as_deref())?;
            state
                .subscribers
                .register(viewer_id.clone(), conn_id.clone(), sender.clone())
                .await?;
            Ok(viewer_id)
        }
    }
}

fn send_error(sender: &ViewerSender, message: String) {
    if let Ok(frame) = ServerMessage::error(message).to_message() {
        let _ = sender.try_send(frame);
    }
}
