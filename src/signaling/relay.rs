use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use super::router::RoomRouter;
use super::WireMessage;

pub fn build_router(router: RoomRouter) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/rooms/:room_code/members", get(list_members))
        .route("/ws/:room_code/:participant_id", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(router)
}

/// Serve the signaling relay until the listener fails.
pub async fn start_relay(addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Signaling relay listening on ws://{}/ws", listener.local_addr()?);
    axum::serve(listener, build_router(RoomRouter::new())).await
}

async fn list_members(
    Path(room_code): Path<String>,
    State(router): State<RoomRouter>,
) -> impl IntoResponse {
    Json(router.members(&room_code))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path((room_code, participant_id)): Path<(String, String)>,
    State(router): State<RoomRouter>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, router, room_code, participant_id))
}

async fn handle_socket(
    mut socket: WebSocket,
    router: RoomRouter,
    room_code: String,
    participant_id: String,
) {
    let (session, mut outbound) = router.join(&room_code, &participant_id);

    loop {
        tokio::select! {
            // Messages routed to this participant
            queued = outbound.recv() => {
                let Some(msg) = queued else { break };
                match serde_json::to_string(&msg) {
                    Ok(json) => {
                        if socket.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to serialize {} for {}: {}", msg.kind, participant_id, e),
                }
            }
            // Messages sent by this participant
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<WireMessage>(&text) {
                        Ok(mut msg) => {
                            // The connection identity is authoritative.
                            msg.sender_id = participant_id.clone();
                            let delivered = router.route(&room_code, msg);
                            debug!("Relayed frame from {} to {} member(s)", participant_id, delivered);
                        }
                        Err(e) => warn!("Malformed frame from {}: {}", participant_id, e),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    router.leave(&room_code, &participant_id, session);
    debug!("Relay socket closed for {} in {}", participant_id, room_code);
}
