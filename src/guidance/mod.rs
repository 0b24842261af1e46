use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::CallApi;
use crate::models::{GuidanceItem, GuidanceRequest, GuidanceResponse, GuidanceType, TranscriptChunk};
use crate::transcription::SharedTranscript;

/// New final chunks folded into one guidance turn.
#[derive(Debug, Clone, PartialEq)]
pub struct GuidanceBatch {
    pub turn: String,
    pub speaker_label: String,
    pub chunk_ids: Vec<String>,
}

/// Count of final chunks already sent for guidance. Only moves forward.
#[derive(Debug, Default, Clone)]
pub struct GuidanceCursor {
    processed: usize,
}

impl GuidanceCursor {
    pub fn processed(&self) -> usize {
        self.processed
    }

    /// Take every final past the cursor and advance it to the end.
    pub fn take_batch(&mut self, finals: &[TranscriptChunk]) -> Option<GuidanceBatch> {
        if finals.len() <= self.processed {
            return None;
        }
        let fresh = &finals[self.processed..];
        self.processed = finals.len();

        let speaker_label = fresh
            .last()
            .map(|c| c.speaker_label.clone())
            .unwrap_or_default();
        Some(GuidanceBatch {
            turn: format_turn(fresh),
            speaker_label,
            chunk_ids: fresh.iter().map(|c| c.id.clone()).collect(),
        })
    }
}

/// `[speaker]: content`, one line per chunk.
pub fn format_turn(chunks: &[TranscriptChunk]) -> String {
    chunks
        .iter()
        .map(|c| format!("[{}]: {}", c.speaker_label, c.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `None` for skipped or empty responses.
pub fn item_from_response(response: GuidanceResponse) -> Option<GuidanceItem> {
    if response.skip.unwrap_or(false) {
        return None;
    }
    let content = response.content?.trim().to_string();
    if content.is_empty() {
        return None;
    }
    Some(GuidanceItem {
        id: response.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        guidance_type: response.guidance_type.unwrap_or(GuidanceType::General),
        content,
        framework_phase: response.framework_phase,
        framework_step: response.framework_step,
        was_used: false,
        was_dismissed: false,
        created_at: Utc::now(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A request was already in flight.
    Skipped,
    /// No new final chunks.
    Idle,
    /// One request was issued (whatever its result).
    Requested,
}

struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Periodically turns new final transcript chunks into guidance requests.
#[derive(Clone)]
pub struct GuidanceScheduler {
    api: Arc<dyn CallApi>,
    room_code: String,
    transcript: SharedTranscript,
    cursor: Arc<Mutex<GuidanceCursor>>,
    in_flight: Arc<AtomicBool>,
    items: mpsc::UnboundedSender<GuidanceItem>,
}

impl GuidanceScheduler {
    pub fn new(
        api: Arc<dyn CallApi>,
        room_code: impl Into<String>,
        transcript: SharedTranscript,
        items: mpsc::UnboundedSender<GuidanceItem>,
    ) -> Self {
        Self {
            api,
            room_code: room_code.into(),
            transcript,
            cursor: Arc::new(Mutex::new(GuidanceCursor::default())),
            in_flight: Arc::new(AtomicBool::new(false)),
            items,
        }
    }

    pub fn processed(&self) -> usize {
        self.cursor.lock().unwrap_or_else(|e| e.into_inner()).processed()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn tick(&self) -> TickOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Guidance request still in flight, skipping tick");
            return TickOutcome::Skipped;
        }
        let _guard = InFlightGuard(self.in_flight.clone());

        let batch = {
            let log = self.transcript.lock().unwrap_or_else(|e| e.into_inner());
            self.cursor
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take_batch(log.finals())
        };
        let Some(batch) = batch else {
            return TickOutcome::Idle;
        };

        debug!(
            "Requesting guidance for {} chunk(s) in {}",
            batch.chunk_ids.len(),
            self.room_code
        );
        let request = GuidanceRequest {
            transcript_turn: batch.turn,
            speaker_label: batch.speaker_label,
        };
        match self.api.request_guidance(&self.room_code, &request).await {
            Ok(response) => match item_from_response(response) {
                Some(item) => {
                    info!("Guidance received: {:?}", item.guidance_type);
                    if self.items.send(item).is_err() {
                        debug!("Guidance receiver gone");
                    }
                }
                None => debug!("Guidance skipped for this turn"),
            },
            Err(e) => warn!("Guidance request failed in {}: {}", self.room_code, e),
        }
        TickOutcome::Requested
    }

    /// Tick every `period` until the handle is disposed. Each tick runs on its
    /// own task, so a slow request makes later ticks skip rather than queue.
    pub fn spawn(self, period: Duration) -> GuidanceHandle {
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut ticks = JoinSet::new();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let scheduler = self.clone();
                        ticks.spawn(async move { scheduler.tick().await });
                    }
                    Some(_) = ticks.join_next() => {}
                }
            }
        });
        info!("Guidance scheduler started ({:?} interval)", period);
        GuidanceHandle { task: Some(task) }
    }
}

pub struct GuidanceHandle {
    task: Option<JoinHandle<()>>,
}

impl GuidanceHandle {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop ticking and cancel any request in flight. Idempotent.
    pub fn dispose(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Guidance scheduler stopped");
        }
    }
}

impl Drop for GuidanceHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}
