mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use callroom_lib::error::SignalingError;
use callroom_lib::models::ChatMessage;
use callroom_lib::signaling::{
    LocalHub, ReconnectPolicy, Signal, SignalEvent, SignalKind, SignalingClient,
};

use common::{eventually, ROOM};

fn policy() -> ReconnectPolicy {
    ReconnectPolicy {
        base: Duration::from_millis(20),
        max: Duration::from_millis(100),
    }
}

fn client(hub: &LocalHub, id: &str) -> SignalingClient {
    SignalingClient::new(ROOM, id, Arc::new(hub.clone()), policy())
}

fn listen(client: &SignalingClient, kind: SignalKind) -> mpsc::UnboundedReceiver<Signal> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.on(kind, move |signal| {
        let _ = tx.send(signal.clone());
    });
    rx
}

fn chat(n: usize) -> SignalEvent {
    SignalEvent::ChatMessage(ChatMessage {
        id: format!("m{}", n),
        sender_id: "host".into(),
        sender_name: "Host".into(),
        content: format!("message {}", n),
        timestamp: n as i64,
    })
}

#[tokio::test(start_paused = true)]
async fn targeted_signal_reaches_only_its_target() {
    let hub = LocalHub::new();
    let host = client(&hub, "host");
    let a = client(&hub, "a");
    let b = client(&hub, "b");
    let mut host_rx = listen(&host, SignalKind::AdmitParticipant);
    let mut a_rx = listen(&a, SignalKind::AdmitParticipant);
    let mut b_rx = listen(&b, SignalKind::AdmitParticipant);
    for c in [&host, &a, &b] {
        c.connect().await.unwrap();
    }

    let admit = SignalEvent::AdmitParticipant {
        status: callroom_lib::models::ParticipantStatus::InCall,
    };
    host.send(&admit, Some("b")).unwrap();

    let got = timeout(Duration::from_secs(1), b_rx.recv()).await.unwrap().unwrap();
    assert_eq!(got.sender_id, "host");
    assert_eq!(got.event, admit);
    assert!(timeout(Duration::from_millis(200), a_rx.recv()).await.is_err());
    assert!(timeout(Duration::from_millis(200), host_rx.recv()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn broadcast_skips_sender_and_keeps_order() {
    let hub = LocalHub::new();
    let host = client(&hub, "host");
    let guest = client(&hub, "guest");
    let mut host_rx = listen(&host, SignalKind::ChatMessage);
    let mut guest_rx = listen(&guest, SignalKind::ChatMessage);
    host.connect().await.unwrap();
    guest.connect().await.unwrap();

    for n in 0..10 {
        host.send(&chat(n), None).unwrap();
    }
    for n in 0..10 {
        let signal = timeout(Duration::from_secs(1), guest_rx.recv()).await.unwrap().unwrap();
        assert_eq!(signal.event, chat(n));
    }
    assert!(timeout(Duration::from_millis(200), host_rx.recv()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn every_registered_handler_runs() {
    let hub = LocalHub::new();
    let host = client(&hub, "host");
    let guest = client(&hub, "guest");
    let mut first = listen(&guest, SignalKind::RecordingStarted);
    let mut second = listen(&guest, SignalKind::RecordingStarted);
    let mut unrelated = listen(&guest, SignalKind::RecordingStopped);
    host.connect().await.unwrap();
    guest.connect().await.unwrap();

    host.send(&SignalEvent::RecordingStarted {}, None).unwrap();
    assert!(timeout(Duration::from_secs(1), first.recv()).await.unwrap().is_some());
    assert!(timeout(Duration::from_secs(1), second.recv()).await.unwrap().is_some());
    assert!(timeout(Duration::from_millis(200), unrelated.recv()).await.is_err());
}

#[tokio::test]
async fn send_before_connect_is_an_error() {
    let hub = LocalHub::new();
    let host = client(&hub, "host");
    assert!(matches!(
        host.send(&SignalEvent::RecordingStarted {}, None),
        Err(SignalingError::NotConnected)
    ));
}

#[tokio::test(start_paused = true)]
async fn reconnects_after_transport_loss() {
    let hub = LocalHub::new();
    let host = client(&hub, "host");
    let guest = client(&hub, "guest");
    let mut guest_rx = listen(&guest, SignalKind::ChatMessage);
    host.connect().await.unwrap();
    guest.connect().await.unwrap();

    assert!(hub.drop_connection(ROOM, "guest"));
    assert!(!hub.router().members(ROOM).contains(&"guest".to_string()));

    let router = hub.router().clone();
    assert!(eventually(|| router.members(ROOM).contains(&"guest".to_string())).await);
    assert!(eventually(|| guest.is_connected()).await);

    host.send(&chat(1), None).unwrap();
    let signal = timeout(Duration::from_secs(1), guest_rx.recv()).await.unwrap().unwrap();
    assert_eq!(signal.event, chat(1));
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_idempotent_and_leaves_the_room() {
    let hub = LocalHub::new();
    let guest = client(&hub, "guest");
    guest.connect().await.unwrap();
    assert!(guest.is_connected());

    guest.disconnect();
    guest.disconnect();
    assert!(!guest.is_connected());

    let router = hub.router().clone();
    assert!(eventually(|| router.members(ROOM).is_empty()).await);
    assert!(matches!(
        guest.send(&SignalEvent::RecordingStopped {}, None),
        Err(SignalingError::NotConnected)
    ));
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_reconnect_stays_disconnected() {
    let hub = LocalHub::new();
    let guest = client(&hub, "guest");
    guest.connect().await.unwrap();

    assert!(hub.drop_connection(ROOM, "guest"));
    tokio::task::yield_now().await;
    guest.disconnect();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!guest.is_connected());
    assert!(hub.router().members(ROOM).is_empty());
    assert!(matches!(guest.send(&chat(1), None), Err(SignalingError::NotConnected)));
}
