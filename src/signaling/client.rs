use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::transport::SignalTransport;
use super::{ReconnectPolicy, Signal, SignalEvent, SignalKind, WireMessage};
use crate::error::SignalingError;

pub type SignalHandler = Arc<dyn Fn(&Signal) + Send + Sync>;

type HandlerMap = Arc<RwLock<HashMap<SignalKind, Vec<SignalHandler>>>>;
type Outbound = Arc<Mutex<LinkSlot>>;

/// The live outbound sender, tagged with the session that installed it.
///
/// Every `connect` and `disconnect` starts a new session. A pump only writes
/// to the slot while its own session is current, so a reconnect that finishes
/// after `disconnect` cannot bring the link back.
#[derive(Debug, Default)]
struct LinkSlot {
    tx: Option<mpsc::UnboundedSender<WireMessage>>,
    session: u64,
}

impl LinkSlot {
    fn open(&mut self, tx: mpsc::UnboundedSender<WireMessage>) -> u64 {
        self.session += 1;
        self.tx = Some(tx);
        self.session
    }

    fn close(&mut self) -> bool {
        self.session += 1;
        self.tx.take().is_some()
    }

    fn install(&mut self, session: u64, tx: mpsc::UnboundedSender<WireMessage>) -> bool {
        if self.session != session {
            return false;
        }
        self.tx = Some(tx);
        true
    }

    fn clear(&mut self, session: u64) -> bool {
        if self.session != session {
            return false;
        }
        self.tx = None;
        true
    }
}

/// Signaling connection for one participant in one room.
///
/// Constructed per (room, participant) and torn down with [`disconnect`],
/// which also runs on drop. Owns reconnection: if the transport drops while
/// connected, it reopens with backoff and keeps the registered handlers.
///
/// [`disconnect`]: SignalingClient::disconnect
pub struct SignalingClient {
    room_code: String,
    participant_id: String,
    transport: Arc<dyn SignalTransport>,
    reconnect: ReconnectPolicy,
    handlers: HandlerMap,
    outbound: Outbound,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl SignalingClient {
    pub fn new(
        room_code: impl Into<String>,
        participant_id: impl Into<String>,
        transport: Arc<dyn SignalTransport>,
        reconnect: ReconnectPolicy,
    ) -> Self {
        Self {
            room_code: room_code.into(),
            participant_id: participant_id.into(),
            transport,
            reconnect,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            outbound: Arc::new(Mutex::new(LinkSlot::default())),
            pump: Mutex::new(None),
        }
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn room_code(&self) -> &str {
        &self.room_code
    }

    pub fn is_connected(&self) -> bool {
        self.outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .tx
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Open the transport. Fails if it cannot be established; calling it again
    /// while connected is a no-op.
    pub async fn connect(&self) -> Result<(), SignalingError> {
        if self.pump.lock().unwrap_or_else(|e| e.into_inner()).is_some() {
            return Ok(());
        }

        let link = self
            .transport
            .open(&self.room_code, &self.participant_id)
            .await?;
        let session = self
            .outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .open(link.outbound);

        let pump = Pump {
            session,
            room_code: self.room_code.clone(),
            participant_id: self.participant_id.clone(),
            transport: self.transport.clone(),
            reconnect: self.reconnect,
            handlers: self.handlers.clone(),
            outbound: self.outbound.clone(),
        };
        let handle = tokio::spawn(pump.run(link.inbound));

        let mut slot = self.pump.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
        info!(
            "Signaling connected: room={}, participant={}",
            self.room_code, self.participant_id
        );
        Ok(())
    }

    /// Register a handler, invoked once per received message of `kind`.
    pub fn on<F>(&self, kind: SignalKind, handler: F)
    where
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Send to `target_id` only, or to every other participant when `None`.
    pub fn send(&self, event: &SignalEvent, target_id: Option<&str>) -> Result<(), SignalingError> {
        let msg = event.to_wire(&self.participant_id, target_id)?;
        let guard = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
        let tx = guard.tx.as_ref().ok_or(SignalingError::NotConnected)?;
        tx.send(msg).map_err(|_| SignalingError::Closed)?;
        debug!(
            "Sent {} to {}",
            event.kind().as_str(),
            target_id.unwrap_or("room")
        );
        Ok(())
    }

    /// Release the transport. Idempotent.
    pub fn disconnect(&self) {
        let had_link = self.outbound.lock().unwrap_or_else(|e| e.into_inner()).close();
        if let Some(pump) = self.pump.lock().unwrap_or_else(|e| e.into_inner()).take() {
            pump.abort();
        }
        if had_link {
            info!(
                "Signaling disconnected: room={}, participant={}",
                self.room_code, self.participant_id
            );
        }
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Background reader: dispatches inbound messages and reconnects on loss.
struct Pump {
    session: u64,
    room_code: String,
    participant_id: String,
    transport: Arc<dyn SignalTransport>,
    reconnect: ReconnectPolicy,
    handlers: HandlerMap,
    outbound: Outbound,
}

impl Pump {
    async fn run(self, mut inbound: mpsc::UnboundedReceiver<WireMessage>) {
        loop {
            while let Some(msg) = inbound.recv().await {
                self.dispatch(msg);
            }

            if !self.outbound.lock().unwrap_or_else(|e| e.into_inner()).clear(self.session) {
                return;
            }
            warn!(
                "Signaling transport lost for {} in room {}, reconnecting",
                self.participant_id, self.room_code
            );

            let mut attempt = 0u32;
            inbound = loop {
                tokio::time::sleep(self.reconnect.delay(attempt)).await;
                match self.transport.open(&self.room_code, &self.participant_id).await {
                    Ok(link) => {
                        let installed = self
                            .outbound
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .install(self.session, link.outbound);
                        if !installed {
                            debug!("Discarding reconnect for {}: client disconnected", self.participant_id);
                            return;
                        }
                        info!(
                            "Signaling reconnected for {} after {} attempt(s)",
                            self.participant_id,
                            attempt + 1
                        );
                        break link.inbound;
                    }
                    Err(e) => {
                        warn!("Signaling reconnect attempt {} failed: {}", attempt + 1, e);
                        attempt = attempt.saturating_add(1);
                    }
                }
            };
        }
    }

    fn dispatch(&self, msg: WireMessage) {
        if msg.sender_id == self.participant_id {
            return;
        }
        if let Some(target) = msg.target_id.as_deref() {
            if target != self.participant_id {
                return;
            }
        }

        let event = match SignalEvent::from_wire(&msg) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping malformed {} signal from {}: {}", msg.kind, msg.sender_id, e);
                return;
            }
        };

        let handlers: Vec<SignalHandler> = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            debug!("No handler for {} from {}", msg.kind, msg.sender_id);
            return;
        }

        let signal = Signal {
            sender_id: msg.sender_id,
            event,
        };
        for handler in handlers {
            handler(&signal);
        }
    }
}
