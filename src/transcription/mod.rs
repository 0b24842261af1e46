mod log;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::TranscriptionError;
use crate::media::MediaTrack;

pub use log::{TranscriptLog, TranscriptUpdate};

/// Id reserved for the single replaceable interim chunk.
pub const INTERIM_CHUNK_ID: &str = "interim";

/// The transcript shared between the recognizer callback and the room.
pub type SharedTranscript = Arc<Mutex<TranscriptLog>>;

/// Raw output of a speech engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub text: String,
    pub is_final: bool,
    pub confidence: Option<f32>,
}

/// What the manager hands to its callback: a recognition result attributed
/// to the local speaker.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptResult {
    pub text: String,
    pub is_final: bool,
    pub speaker_label: String,
    pub confidence: Option<f32>,
}

/// A running recognition. Dropping `cancel` (or sending on it) tells the
/// engine to release its resources; the engine closes `results` when done.
pub struct RecognitionSession {
    pub results: mpsc::UnboundedReceiver<RecognitionResult>,
    pub cancel: oneshot::Sender<()>,
}

/// Continuous speech-to-text engine provided by the runtime.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn start(&self, track: MediaTrack) -> Result<RecognitionSession, TranscriptionError>;
}

struct ActiveRecognition {
    cancel: oneshot::Sender<()>,
    reader: JoinHandle<()>,
}

/// Runs continuous recognition on one audio track and forwards every result.
pub struct TranscriptionManager {
    recognizer: Arc<dyn SpeechRecognizer>,
    speaker_label: String,
    active: Mutex<Option<ActiveRecognition>>,
}

impl TranscriptionManager {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>, speaker_label: impl Into<String>) -> Self {
        Self {
            recognizer,
            speaker_label: speaker_label.into(),
            active: Mutex::new(None),
        }
    }

    pub fn speaker_label(&self) -> &str {
        &self.speaker_label
    }

    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|a| !a.reader.is_finished())
    }

    /// Begin recognition against `audio_track`. A running recognition is
    /// stopped first.
    pub async fn start<F>(&self, on_result: F, audio_track: MediaTrack) -> Result<(), TranscriptionError>
    where
        F: Fn(TranscriptResult) + Send + 'static,
    {
        self.stop();

        let RecognitionSession { mut results, cancel } = self.recognizer.start(audio_track).await?;
        let speaker_label = self.speaker_label.clone();

        let reader = tokio::spawn(async move {
            while let Some(result) = results.recv().await {
                if result.text.trim().is_empty() {
                    continue;
                }
                debug!(
                    "Recognition result (final={}): {}",
                    result.is_final, result.text
                );
                on_result(TranscriptResult {
                    text: result.text,
                    is_final: result.is_final,
                    speaker_label: speaker_label.clone(),
                    confidence: result.confidence,
                });
            }
            debug!("Recognition stream ended");
        });

        *self.active.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(ActiveRecognition { cancel, reader });
        info!("Transcription started for {}", self.speaker_label);
        Ok(())
    }

    /// Release the recognizer. Safe to call repeatedly.
    pub fn stop(&self) {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(active) = active {
            if active.cancel.send(()).is_err() {
                warn!("Recognizer already gone when stopping transcription");
            }
            active.reader.abort();
            info!("Transcription stopped for {}", self.speaker_label);
        }
    }
}

impl Drop for TranscriptionManager {
    fn drop(&mut self) {
        self.stop();
    }
}
