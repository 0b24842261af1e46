use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use callroom_lib::models::ParticipantStatus;
use callroom_lib::signaling::relay::build_router;
use callroom_lib::signaling::{
    ReconnectPolicy, RoomRouter, SignalEvent, SignalKind, SignalingClient, WebSocketTransport,
};

async fn serve() -> (String, RoomRouter) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = RoomRouter::new();
    let app = build_router(router.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("ws://{}/ws", addr), router)
}

#[tokio::test]
async fn relay_routes_targeted_frames_between_websocket_clients() {
    let (url, router) = serve().await;
    let transport = Arc::new(WebSocketTransport::new(url));
    let host = SignalingClient::new("ROOM", "host", transport.clone(), ReconnectPolicy::default());
    let guest = SignalingClient::new("ROOM", "guest", transport.clone(), ReconnectPolicy::default());
    let bystander = SignalingClient::new("ROOM", "other", transport, ReconnectPolicy::default());

    let (tx, mut guest_rx) = mpsc::unbounded_channel();
    guest.on(SignalKind::AdmitParticipant, move |signal| {
        let _ = tx.send(signal.clone());
    });
    let (tx, mut other_rx) = mpsc::unbounded_channel();
    bystander.on(SignalKind::AdmitParticipant, move |signal| {
        let _ = tx.send(signal.clone());
    });

    host.connect().await.unwrap();
    guest.connect().await.unwrap();
    bystander.connect().await.unwrap();
    for _ in 0..100 {
        if router.members("ROOM").len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(router.members("ROOM").len(), 3);

    let admit = SignalEvent::AdmitParticipant {
        status: ParticipantStatus::InCall,
    };
    host.send(&admit, Some("guest")).unwrap();

    let signal = timeout(Duration::from_secs(5), guest_rx.recv()).await.unwrap().unwrap();
    assert_eq!(signal.sender_id, "host");
    assert_eq!(signal.event, admit);
    assert!(timeout(Duration::from_millis(300), other_rx.recv()).await.is_err());

    guest.disconnect();
    for _ in 0..100 {
        if router.members("ROOM").len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(router.members("ROOM"), vec!["host".to_string(), "other".to_string()]);
}
