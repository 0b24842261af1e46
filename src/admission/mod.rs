use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::media::MediaStream;
use crate::models::{Participant, ParticipantRecord, ParticipantRole, ParticipantStatus};

/// Fires when someone shows up in the waiting room who has not been seen
/// there since it was last empty.
///
/// A guest dropping out of one poll and back into the next does not re-fire.
/// A new guest arriving after another was admitted does, even though the
/// count only returns to where it was.
#[derive(Debug, Default, Clone)]
pub struct WaitingRoomEdge {
    seen: HashSet<String>,
}

impl WaitingRoomEdge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the ids waiting as of one poll.
    pub fn observe<'a, I>(&mut self, waiting: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut any = false;
        let mut arrived = false;
        for id in waiting {
            any = true;
            arrived |= self.seen.insert(id.to_string());
        }
        if !any {
            self.seen.clear();
        }
        arrived
    }
}

/// Handed to the caller of a poll so results can be matched to the roster
/// state at the moment the request went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PollTicket(u64);

/// What a host action produced: the server PATCH body and the status to
/// signal to the affected participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAction {
    pub participant_id: String,
    pub status: ParticipantStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterChange {
    WaitingRoomGrew { waiting: usize },
    LocalStatusChanged(ParticipantStatus),
}

#[derive(Debug, Clone, Copy)]
struct Override {
    status: ParticipantStatus,
    epoch: u64,
}

/// Local view of who is in the room.
///
/// Two sources feed it: periodic polls of the server list, and local
/// transitions (host actions, or the admission signal for the local
/// participant). Local transitions are applied immediately and pinned until a
/// poll issued after them comes back, so a poll already in flight cannot undo
/// them.
#[derive(Debug)]
pub struct Roster {
    local_id: String,
    participants: Vec<Participant>,
    overrides: HashMap<String, Override>,
    poll_epoch: u64,
    last_applied: u64,
    edge: WaitingRoomEdge,
}

impl Roster {
    pub fn new(local: Participant) -> Self {
        Self {
            local_id: local.id.clone(),
            participants: vec![local],
            overrides: HashMap::new(),
            poll_epoch: 0,
            last_applied: 0,
            edge: WaitingRoomEdge::new(),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn local(&self) -> Option<&Participant> {
        self.get(&self.local_id)
    }

    pub fn local_status(&self) -> Option<ParticipantStatus> {
        self.local().map(|p| p.status)
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.id == id)
    }

    pub fn begin_poll(&mut self) -> PollTicket {
        self.poll_epoch += 1;
        PollTicket(self.poll_epoch)
    }

    /// Reconcile with a server list fetched under `ticket`.
    pub fn apply_poll(&mut self, ticket: PollTicket, records: Vec<ParticipantRecord>) -> Vec<RosterChange> {
        if ticket.0 <= self.last_applied {
            debug!("Dropping out-of-order poll result {:?}", ticket);
            return Vec::new();
        }
        self.last_applied = ticket.0;

        // Pins older than the poll are settled; server truth takes over.
        self.overrides.retain(|_, o| o.epoch >= ticket.0);

        let previous_local = self.local_status();
        let mut previous: HashMap<String, Participant> = self
            .participants
            .drain(..)
            .map(|p| (p.id.clone(), p))
            .collect();

        let mut next = Vec::with_capacity(records.len() + 1);
        for record in &records {
            let status = self
                .overrides
                .get(&record.id)
                .map(|o| o.status)
                .unwrap_or(record.status);
            let is_local = record.id == self.local_id;
            if status.is_removed() && !is_local {
                continue;
            }
            // Admission only moves forward; a lagging server record does not
            // put us back in the waiting room.
            let stale = is_local && !status.is_present() && !status.is_removed();
            let status = match previous_local {
                Some(current) if stale && current.is_present() => {
                    debug!("Ignoring stale {} for local participant", status.as_str());
                    current
                }
                _ => status,
            };

            let mut participant = Participant::from_record(record);
            participant.status = status;
            if let Some(prior) = previous.remove(&record.id) {
                participant.stream = prior.stream;
                participant.is_muted = prior.is_muted;
                participant.is_camera_off = prior.is_camera_off;
            }
            next.push(participant);
        }

        // The server may not list us yet; keep our own entry.
        if let Some(local) = previous.remove(&self.local_id) {
            next.push(local);
        }
        self.participants = next;

        let mut changes = Vec::new();
        let waiting_ids = self
            .participants
            .iter()
            .filter(|p| p.status == ParticipantStatus::Waiting)
            .map(|p| p.id.as_str());
        if self.edge.observe(waiting_ids) {
            let waiting = self.waiting_count();
            info!("Waiting room grew to {}", waiting);
            changes.push(RosterChange::WaitingRoomGrew { waiting });
        }
        let local = self.local_status();
        if let Some(status) = local.filter(|s| Some(*s) != previous_local) {
            info!("Local status reconciled to {}", status.as_str());
            changes.push(RosterChange::LocalStatusChanged(status));
        }
        debug!(
            "Roster reconciled: {} participant(s), {} pinned",
            self.participants.len(),
            self.overrides.len()
        );
        changes
    }

    fn pin(&mut self, id: &str, status: ParticipantStatus) {
        self.overrides.insert(
            id.to_string(),
            Override {
                status,
                epoch: self.poll_epoch,
            },
        );
    }

    pub fn admit(&mut self, id: &str) -> Option<HostAction> {
        let participant = self.get_mut(id)?;
        participant.status = ParticipantStatus::InCall;
        self.pin(id, ParticipantStatus::InCall);
        info!("Admitted {}", id);
        Some(HostAction {
            participant_id: id.to_string(),
            status: ParticipantStatus::InCall,
        })
    }

    pub fn deny(&mut self, id: &str) -> Option<HostAction> {
        self.remove(id, ParticipantStatus::Denied)
    }

    pub fn kick(&mut self, id: &str) -> Option<HostAction> {
        self.remove(id, ParticipantStatus::Left)
    }

    fn remove(&mut self, id: &str, status: ParticipantStatus) -> Option<HostAction> {
        if id == self.local_id {
            return None;
        }
        let index = self.participants.iter().position(|p| p.id == id)?;
        self.participants.remove(index);
        self.pin(id, status);
        info!("Removed {} from roster ({})", id, status.as_str());
        Some(HostAction {
            participant_id: id.to_string(),
            status,
        })
    }

    /// The host told us our new status. Returns it if it changed anything.
    pub fn apply_admission_signal(&mut self, status: ParticipantStatus) -> Option<ParticipantStatus> {
        let local_id = self.local_id.clone();
        let local = self.get_mut(&local_id)?;
        if local.status == status {
            return None;
        }
        local.status = status;
        self.pin(&local_id, status);
        info!("Admission signal moved local participant to {}", status.as_str());
        Some(status)
    }

    pub fn mark_local_left(&mut self) {
        let local_id = self.local_id.clone();
        if let Some(local) = self.get_mut(&local_id) {
            local.status = ParticipantStatus::Left;
        }
        self.pin(&local_id, ParticipantStatus::Left);
    }

    pub fn upsert_local(&mut self, participant: Participant) {
        match self.get_mut(&participant.id) {
            Some(existing) => *existing = participant,
            None => {
                self.local_id = participant.id.clone();
                self.participants.push(participant);
            }
        }
    }

    pub fn set_local_media(&mut self, is_muted: bool, is_camera_off: bool) {
        let local_id = self.local_id.clone();
        if let Some(local) = self.get_mut(&local_id) {
            local.is_muted = is_muted;
            local.is_camera_off = is_camera_off;
        }
    }

    /// Attach a remote participant's incoming stream from the media transport.
    pub fn attach_stream(&mut self, id: &str, stream: MediaStream) -> bool {
        match self.get_mut(id) {
            Some(participant) => {
                participant.stream = Some(stream);
                true
            }
            None => false,
        }
    }

    /// Everyone else who should get a video tile.
    pub fn remote_tiles(&self) -> Vec<&Participant> {
        self.participants
            .iter()
            .filter(|p| p.id != self.local_id && p.status.is_present())
            .collect()
    }

    pub fn waiting(&self) -> Vec<&Participant> {
        self.participants
            .iter()
            .filter(|p| p.status == ParticipantStatus::Waiting)
            .collect()
    }

    pub fn waiting_count(&self) -> usize {
        self.participants
            .iter()
            .filter(|p| p.status == ParticipantStatus::Waiting)
            .count()
    }

    /// Default recipients of a presented offer: in-call, non-host, not us.
    pub fn offer_targets(&self) -> Vec<String> {
        self.participants
            .iter()
            .filter(|p| p.id != self.local_id && p.status.is_present() && p.role != ParticipantRole::Host)
            .map(|p| p.id.clone())
            .collect()
    }

    pub fn host_id(&self) -> Option<&str> {
        self.participants
            .iter()
            .find(|p| p.role == ParticipantRole::Host)
            .map(|p| p.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, role: ParticipantRole, status: ParticipantStatus) -> ParticipantRecord {
        ParticipantRecord {
            id: id.into(),
            user_id: None,
            display_name: Some(id.to_uppercase()),
            guest_name: None,
            guest_email: None,
            avatar_url: None,
            role,
            status,
        }
    }

    fn host_roster() -> Roster {
        let host = Participant::from_record(&record("host", ParticipantRole::Host, ParticipantStatus::InCall));
        Roster::new(host)
    }

    fn fired(polls: &[&[&str]]) -> Vec<bool> {
        let mut edge = WaitingRoomEdge::new();
        polls.iter().map(|ids| edge.observe(ids.iter().copied())).collect()
    }

    #[test]
    fn edge_fires_on_growth_only() {
        // Counts 0, 1, 1, 2, 1, 2 with "b" missing from one poll.
        let polls: [&[&str]; 6] = [&[], &["a"], &["a"], &["a", "b"], &["a"], &["a", "b"]];
        assert_eq!(fired(&polls), vec![false, true, false, true, false, false]);
    }

    #[test]
    fn edge_fires_for_new_guest_after_an_admit() {
        // Counts 0, 2, 1, 2: "a" admitted, then "c" arrives.
        let polls: [&[&str]; 4] = [&[], &["a", "b"], &["b"], &["b", "c"]];
        assert_eq!(fired(&polls), vec![false, true, false, true]);
    }

    #[test]
    fn edge_rearms_after_room_empties() {
        let polls: [&[&str]; 3] = [&["a"], &[], &["a"]];
        assert_eq!(fired(&polls), vec![true, false, true]);
    }

    #[test]
    fn stale_waiting_record_does_not_demote_admitted_guest() {
        let guest = Participant::from_record(&record("g", ParticipantRole::Guest, ParticipantStatus::Waiting));
        let mut roster = Roster::new(guest);
        assert_eq!(
            roster.apply_admission_signal(ParticipantStatus::InCall),
            Some(ParticipantStatus::InCall)
        );

        // The host's PATCH never landed, so the server still lists us waiting.
        roster.begin_poll();
        let ticket = roster.begin_poll();
        let changes = roster.apply_poll(
            ticket,
            vec![
                record("h", ParticipantRole::Host, ParticipantStatus::InCall),
                record("g", ParticipantRole::Guest, ParticipantStatus::Waiting),
            ],
        );
        assert!(changes.is_empty());
        assert_eq!(roster.local_status(), Some(ParticipantStatus::InCall));

        // Removal still goes through.
        let ticket = roster.begin_poll();
        let changes = roster.apply_poll(ticket, vec![record("g", ParticipantRole::Guest, ParticipantStatus::Left)]);
        assert_eq!(changes, vec![RosterChange::LocalStatusChanged(ParticipantStatus::Left)]);
    }

    #[test]
    fn poll_reports_waiting_room_growth() {
        let mut roster = host_roster();
        let ticket = roster.begin_poll();
        let changes = roster.apply_poll(
            ticket,
            vec![
                record("host", ParticipantRole::Host, ParticipantStatus::InCall),
                record("g1", ParticipantRole::Guest, ParticipantStatus::Waiting),
            ],
        );
        assert_eq!(changes, vec![RosterChange::WaitingRoomGrew { waiting: 1 }]);

        let ticket = roster.begin_poll();
        let changes = roster.apply_poll(
            ticket,
            vec![
                record("host", ParticipantRole::Host, ParticipantStatus::InCall),
                record("g1", ParticipantRole::Guest, ParticipantStatus::Waiting),
            ],
        );
        assert!(changes.is_empty());
    }

    #[test]
    fn admit_is_not_undone_by_stale_poll() {
        let mut roster = host_roster();
        let t1 = roster.begin_poll();
        roster.apply_poll(t1, vec![record("g1", ParticipantRole::Guest, ParticipantStatus::Waiting)]);

        // Poll goes out, then the host admits before it returns.
        let stale = roster.begin_poll();
        let action = roster.admit("g1").unwrap();
        assert_eq!(action.status, ParticipantStatus::InCall);
        assert_eq!(roster.get("g1").unwrap().status, ParticipantStatus::InCall);

        roster.apply_poll(stale, vec![record("g1", ParticipantRole::Guest, ParticipantStatus::Waiting)]);
        assert_eq!(roster.get("g1").unwrap().status, ParticipantStatus::InCall);
        assert_eq!(roster.offer_targets(), vec!["g1".to_string()]);

        // A poll issued afterwards is authoritative.
        let fresh = roster.begin_poll();
        roster.apply_poll(fresh, vec![record("g1", ParticipantRole::Guest, ParticipantStatus::InCall)]);
        assert_eq!(roster.get("g1").unwrap().status, ParticipantStatus::InCall);
    }

    #[test]
    fn denied_participant_never_reappears_from_stale_poll() {
        let mut roster = host_roster();
        let t1 = roster.begin_poll();
        roster.apply_poll(t1, vec![record("g1", ParticipantRole::Guest, ParticipantStatus::Waiting)]);

        let stale = roster.begin_poll();
        let action = roster.deny("g1").unwrap();
        assert_eq!(action.status, ParticipantStatus::Denied);
        assert!(roster.get("g1").is_none());

        roster.apply_poll(stale, vec![record("g1", ParticipantRole::Guest, ParticipantStatus::Waiting)]);
        assert!(roster.get("g1").is_none());
        assert_eq!(roster.waiting_count(), 0);
    }

    #[test]
    fn removed_statuses_are_filtered() {
        let mut roster = host_roster();
        let ticket = roster.begin_poll();
        roster.apply_poll(
            ticket,
            vec![
                record("g1", ParticipantRole::Guest, ParticipantStatus::Left),
                record("g2", ParticipantRole::Guest, ParticipantStatus::Denied),
                record("g3", ParticipantRole::TeamMember, ParticipantStatus::InCall),
            ],
        );
        let ids: Vec<_> = roster.participants().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["g3", "host"]);
        assert!(roster.offer_targets().contains(&"g3".to_string()));
    }

    #[test]
    fn guest_admission_signal_wins_over_stale_poll() {
        let guest = Participant::from_record(&record("g1", ParticipantRole::Guest, ParticipantStatus::Waiting));
        let mut roster = Roster::new(guest);
        let stale = roster.begin_poll();

        assert_eq!(
            roster.apply_admission_signal(ParticipantStatus::InCall),
            Some(ParticipantStatus::InCall)
        );
        assert_eq!(roster.apply_admission_signal(ParticipantStatus::InCall), None);

        let changes = roster.apply_poll(
            stale,
            vec![
                record("host", ParticipantRole::Host, ParticipantStatus::InCall),
                record("g1", ParticipantRole::Guest, ParticipantStatus::Waiting),
            ],
        );
        assert!(changes.is_empty());
        assert_eq!(roster.local_status(), Some(ParticipantStatus::InCall));
        assert_eq!(roster.host_id(), Some("host"));
    }

    #[test]
    fn late_poll_result_is_ignored() {
        let mut roster = host_roster();
        let older = roster.begin_poll();
        let newer = roster.begin_poll();
        roster.apply_poll(newer, vec![record("g1", ParticipantRole::Guest, ParticipantStatus::InCall)]);
        roster.apply_poll(older, vec![record("g1", ParticipantRole::Guest, ParticipantStatus::Waiting)]);
        assert_eq!(roster.get("g1").unwrap().status, ParticipantStatus::InCall);
    }

    #[test]
    fn poll_keeps_media_state() {
        let mut roster = host_roster();
        let t = roster.begin_poll();
        roster.apply_poll(t, vec![record("g1", ParticipantRole::Guest, ParticipantStatus::InCall)]);
        assert!(roster.attach_stream("g1", MediaStream::default()));

        let t = roster.begin_poll();
        roster.apply_poll(t, vec![record("g1", ParticipantRole::Guest, ParticipantStatus::InCall)]);
        assert!(roster.get("g1").unwrap().stream.is_some());
        assert_eq!(roster.remote_tiles().len(), 1);
    }
}
