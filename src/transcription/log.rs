use std::sync::Arc;

use uuid::Uuid;

use super::{TranscriptResult, INTERIM_CHUNK_ID};
use crate::models::TranscriptChunk;

/// Outcome of feeding one result into the log.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptUpdate {
    /// The interim slot was created or replaced.
    Interim,
    /// A final chunk was appended.
    Committed(TranscriptChunk),
    /// A final repeating the previous final (same speaker and text); dropped.
    Duplicate,
    /// Empty text.
    Ignored,
}

/// Ordered transcript of finals plus at most one interim chunk, which reads
/// as coming after every final.
///
/// Finals sit behind an `Arc` so view snapshots share them; interim updates
/// never touch that list.
#[derive(Debug, Default)]
pub struct TranscriptLog {
    finals: Arc<Vec<TranscriptChunk>>,
    interim: Option<TranscriptChunk>,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// `timestamp` is seconds since the call started.
    pub fn apply(&mut self, result: &TranscriptResult, timestamp: f64) -> TranscriptUpdate {
        let text = result.text.trim();
        if text.is_empty() {
            return TranscriptUpdate::Ignored;
        }

        let interim = self.interim.take();

        if !result.is_final {
            let timestamp_start = interim.map(|c| c.timestamp_start).unwrap_or(timestamp);
            self.interim = Some(TranscriptChunk {
                id: INTERIM_CHUNK_ID.to_string(),
                speaker_label: result.speaker_label.clone(),
                content: text.to_string(),
                timestamp_start,
                is_flagged: false,
                flag_note: None,
                confidence: result.confidence,
            });
            return TranscriptUpdate::Interim;
        }

        let duplicate = self
            .finals
            .last()
            .is_some_and(|last| last.speaker_label == result.speaker_label && last.content == text);
        if duplicate {
            return TranscriptUpdate::Duplicate;
        }

        let chunk = TranscriptChunk {
            id: Uuid::new_v4().to_string(),
            speaker_label: result.speaker_label.clone(),
            content: text.to_string(),
            timestamp_start: interim.map(|c| c.timestamp_start).unwrap_or(timestamp),
            is_flagged: false,
            flag_note: None,
            confidence: result.confidence,
        };
        Arc::make_mut(&mut self.finals).push(chunk.clone());
        TranscriptUpdate::Committed(chunk)
    }

    pub fn interim(&self) -> Option<&TranscriptChunk> {
        self.interim.as_ref()
    }

    pub fn finals(&self) -> &[TranscriptChunk] {
        &self.finals
    }

    /// Finals as a cheaply clonable snapshot.
    pub fn shared_finals(&self) -> Arc<Vec<TranscriptChunk>> {
        self.finals.clone()
    }

    pub fn final_count(&self) -> usize {
        self.finals.len()
    }

    /// Finals plus the interim slot, if occupied.
    pub fn len(&self) -> usize {
        self.finals.len() + usize::from(self.interim.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flip the flag on a final chunk. Returns the new flag, or `None` if no
    /// such chunk exists.
    pub fn toggle_flag(&mut self, chunk_id: &str, note: Option<String>) -> Option<bool> {
        let index = self.finals.iter().position(|c| c.id == chunk_id)?;
        let chunk = &mut Arc::make_mut(&mut self.finals)[index];
        chunk.is_flagged = !chunk.is_flagged;
        chunk.flag_note = if chunk.is_flagged { note } else { None };
        Some(chunk.is_flagged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(speaker: &str, text: &str, is_final: bool) -> TranscriptResult {
        TranscriptResult {
            text: text.to_string(),
            is_final,
            speaker_label: speaker.to_string(),
            confidence: None,
        }
    }

    #[test]
    fn interims_share_one_slot() {
        let mut log = TranscriptLog::new();
        for (i, text) in ["so", "so the", "so the budget"].iter().enumerate() {
            assert_eq!(log.apply(&result("Host", text, false), i as f64), TranscriptUpdate::Interim);
        }
        assert_eq!(log.len(), 1);
        let interim = log.interim().unwrap();
        assert_eq!(interim.content, "so the budget");
        assert_eq!(interim.timestamp_start, 0.0);
        assert_eq!(log.final_count(), 0);
    }

    #[test]
    fn final_replaces_interim_and_keeps_its_start() {
        let mut log = TranscriptLog::new();
        log.apply(&result("Host", "hello", false), 3.0);
        let update = log.apply(&result("Host", "hello there", true), 5.0);
        let TranscriptUpdate::Committed(chunk) = update else {
            panic!("expected commit");
        };
        assert_eq!(chunk.timestamp_start, 3.0);
        assert!(log.interim().is_none());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn repeated_final_is_dropped() {
        let mut log = TranscriptLog::new();
        log.apply(&result("Host", "we can start Monday", true), 1.0);
        log.apply(&result("Host", "we can start Monday", false), 2.0);
        assert_eq!(
            log.apply(&result("Host", "we can start Monday", true), 2.5),
            TranscriptUpdate::Duplicate
        );
        assert_eq!(log.final_count(), 1);
        assert!(log.interim().is_none());

        // Same text from another speaker is kept.
        assert!(matches!(
            log.apply(&result("Guest", "we can start Monday", true), 3.0),
            TranscriptUpdate::Committed(_)
        ));
        assert_eq!(log.final_count(), 2);
    }

    #[test]
    fn non_adjacent_repeat_is_kept() {
        let mut log = TranscriptLog::new();
        log.apply(&result("Host", "yes", true), 1.0);
        log.apply(&result("Host", "no", true), 2.0);
        log.apply(&result("Host", "yes", true), 3.0);
        assert_eq!(log.final_count(), 3);
    }

    #[test]
    fn interim_stays_last_and_out_of_finals() {
        let mut log = TranscriptLog::new();
        log.apply(&result("Host", "first", true), 1.0);
        log.apply(&result("Host", "sec", false), 2.0);
        assert_eq!(log.finals().len(), 1);
        assert_eq!(log.len(), 2);
        assert!(log.interim().unwrap().is_interim());
    }

    #[test]
    fn interims_leave_shared_finals_alone() {
        let mut log = TranscriptLog::new();
        log.apply(&result("Host", "first", true), 1.0);
        let snapshot = log.shared_finals();
        for text in ["a", "ab", "abc"] {
            log.apply(&result("Host", text, false), 2.0);
        }
        assert!(Arc::ptr_eq(&snapshot, &log.shared_finals()));

        log.apply(&result("Host", "abcd", true), 3.0);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(log.final_count(), 2);
    }

    #[test]
    fn flag_toggles_only_finals() {
        let mut log = TranscriptLog::new();
        let TranscriptUpdate::Committed(chunk) = log.apply(&result("Host", "price is fine", true), 1.0)
        else {
            panic!("expected commit");
        };
        log.apply(&result("Host", "maybe", false), 2.0);

        assert_eq!(log.toggle_flag(&chunk.id, Some("buying signal".into())), Some(true));
        assert_eq!(log.finals()[0].flag_note.as_deref(), Some("buying signal"));
        assert_eq!(log.toggle_flag(&chunk.id, None), Some(false));
        assert_eq!(log.finals()[0].flag_note, None);
        assert_eq!(log.toggle_flag(INTERIM_CHUNK_ID, None), None);
    }

    #[test]
    fn blank_text_is_ignored() {
        let mut log = TranscriptLog::new();
        assert_eq!(log.apply(&result("Host", "   ", true), 0.0), TranscriptUpdate::Ignored);
        assert!(log.is_empty());
    }
}
