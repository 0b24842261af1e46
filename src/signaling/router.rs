use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::WireMessage;

struct Member {
    session: u64,
    tx: mpsc::UnboundedSender<WireMessage>,
}

/// Room-scoped routing table shared by the relay server and the in-process hub.
///
/// A targeted message reaches only its target; a broadcast reaches every
/// other member of the room. The sender never receives its own message.
/// Each member has one FIFO queue, so messages from one sender to one
/// receiver keep their send order.
#[derive(Clone, Default)]
pub struct RoomRouter {
    rooms: Arc<Mutex<HashMap<String, HashMap<String, Member>>>>,
    sessions: Arc<AtomicU64>,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `participant_id` in `room_code`. A second join with the same id
    /// (a reconnect) replaces the previous session.
    pub fn join(
        &self,
        room_code: &str,
        participant_id: &str,
    ) -> (u64, mpsc::UnboundedReceiver<WireMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = self.sessions.fetch_add(1, Ordering::Relaxed) + 1;
        let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        let replaced = rooms
            .entry(room_code.to_string())
            .or_default()
            .insert(participant_id.to_string(), Member { session, tx });
        if replaced.is_some() {
            info!("Participant {} rejoined room {} (session {})", participant_id, room_code, session);
        } else {
            info!("Participant {} joined room {}", participant_id, room_code);
        }
        (session, rx)
    }

    /// Remove a member, but only if `session` is still the current one.
    pub fn leave(&self, room_code: &str, participant_id: &str, session: u64) {
        let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(members) = rooms.get_mut(room_code) {
            if members.get(participant_id).map(|m| m.session) == Some(session) {
                members.remove(participant_id);
                info!("Participant {} left room {}", participant_id, room_code);
            }
            if members.is_empty() {
                rooms.remove(room_code);
            }
        }
    }

    /// Drop a member's queue regardless of session, closing its inbound stream.
    pub fn evict(&self, room_code: &str, participant_id: &str) -> bool {
        let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        rooms
            .get_mut(room_code)
            .and_then(|members| members.remove(participant_id))
            .is_some()
    }

    /// Deliver `msg` within `room_code`. Returns how many members received it.
    pub fn route(&self, room_code: &str, msg: WireMessage) -> usize {
        let rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        let Some(members) = rooms.get(room_code) else {
            debug!("Dropping {} for empty room {}", msg.kind, room_code);
            return 0;
        };

        match msg.target_id.as_deref() {
            Some(target) => {
                if target == msg.sender_id {
                    return 0;
                }
                match members.get(target) {
                    Some(member) => usize::from(member.tx.send(msg).is_ok()),
                    None => {
                        debug!("Target {} not in room {}, dropping {}", target, room_code, msg.kind);
                        0
                    }
                }
            }
            None => members
                .iter()
                .filter(|(id, _)| **id != msg.sender_id)
                .filter(|(_, member)| member.tx.send(msg.clone()).is_ok())
                .count(),
        }
    }

    pub fn members(&self, room_code: &str) -> Vec<String> {
        let rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = rooms
            .get(room_code)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}
