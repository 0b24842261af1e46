use tokio::time::Instant;
use tracing::{error, info, warn};

use super::{CallRoom, SummaryRoute};
use crate::events::CallEvent;
use crate::models::{ParticipantStatus, RecordingState};
use crate::signaling::SignalEvent;

impl CallRoom {
    /// Leave the call and hand back the summary route.
    ///
    /// Steps run in a fixed order and each one is attempted whatever happened
    /// to the one before, so this always reaches the summary. The saving state
    /// stays up for at least the configured minimum.
    pub async fn end_call(&mut self) -> SummaryRoute {
        if let Some(route) = &self.ended {
            return route.clone();
        }
        let started = Instant::now();
        info!("Ending call in {} for {}", self.room_code, self.participant_id());

        // 1. saving screen
        self.saving = true;
        self.emit(CallEvent::Saving(true));
        self.publish();

        // 2. transcription
        if let Some(transcription) = &self.transcription {
            transcription.stop();
        }

        // 3. recording, uploaded inline so it finishes before we navigate
        if self.recorder.is_recording() {
            self.recording_state = RecordingState::Stopping;
            self.emit(CallEvent::RecordingStateChanged(RecordingState::Stopping));
            match self.recorder.stop().await {
                Ok(blob) => {
                    if let Err(e) = self.api.upload_recording(&self.room_code, &blob).await {
                        error!("Recording upload failed at call end in {}: {}", self.room_code, e);
                    }
                }
                Err(e) => error!("Recording could not be finalized in {}: {}", self.room_code, e),
            }
            self.recording_state = RecordingState::Idle;
            self.emit(CallEvent::RecordingStateChanged(RecordingState::Idle));
            self.send_signal(&SignalEvent::RecordingStopped {}, None);
        }

        // 4. local media
        self.media.release();

        // 5. timers
        self.call_active = false;
        self.clock = None;
        self.poll = None;
        self.poll_tasks.abort_all();
        if let Some(mut guidance) = self.guidance.take() {
            guidance.dispose();
        }

        // 6. signaling
        self.signaling.disconnect();

        // 7. leave on the server
        self.roster.mark_local_left();
        let local_id = self.participant_id().to_string();
        if let Err(e) = self
            .api
            .update_participant_status(&self.room_code, &local_id, ParticipantStatus::Left)
            .await
        {
            warn!("Could not mark {} as left: {}", local_id, e);
        }

        // 8. end-of-call processing (host only)
        if self.is_host() {
            if let Err(e) = self.api.end_call(&self.room_code).await {
                error!("End-call notification failed for {}: {}", self.room_code, e);
            }
        }

        // 9. minimum saving time
        let minimum = self.config.min_saving_duration();
        let elapsed = started.elapsed();
        if elapsed < minimum {
            tokio::time::sleep(minimum - elapsed).await;
        }

        // 10. navigate
        let route = SummaryRoute::for_room(&self.room_code);
        self.ended = Some(route.clone());
        self.saving = false;
        self.emit(CallEvent::Saving(false));
        self.emit(CallEvent::NavigateToSummary {
            path: route.path.clone(),
        });
        self.publish();
        info!("Call ended in {} after {:?}", self.room_code, started.elapsed());
        route
    }
}
