mod muxer;

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::RecordingError;
use crate::media::MediaStream;

pub use muxer::{decode_frames, encode_frame, StreamMuxer};

/// A capture in progress. The backend closes `chunks` only after it has
/// flushed every frame captured before `stop` fired.
pub struct CaptureSession {
    pub chunks: mpsc::UnboundedReceiver<Bytes>,
    pub stop: oneshot::Sender<()>,
}

/// Turns a live stream into a sequence of encoded chunks.
pub trait CaptureBackend: Send + Sync {
    fn begin(&self, stream: &MediaStream) -> Result<CaptureSession, RecordingError>;

    fn mime_type(&self) -> &str;
}

/// Finished recording, ready for upload.
#[derive(Debug, Clone)]
pub struct RecordingBlob {
    pub data: Bytes,
    pub mime_type: String,
    pub duration: Duration,
}

impl RecordingBlob {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

pub type StopCallback = Box<dyn Fn(RecordingBlob) + Send + Sync>;

struct ActiveCapture {
    stop: oneshot::Sender<()>,
    collector: JoinHandle<BytesMut>,
    started_at: Instant,
}

pub struct CallRecorder {
    backend: Arc<dyn CaptureBackend>,
    active: Option<ActiveCapture>,
    on_stop: Option<StopCallback>,
}

impl CallRecorder {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self {
            backend,
            active: None,
            on_stop: None,
        }
    }

    /// Callback fired by [`finish`](Self::finish) with the completed blob.
    pub fn on_stop<F>(&mut self, callback: F)
    where
        F: Fn(RecordingBlob) + Send + Sync + 'static,
    {
        self.on_stop = Some(Box::new(callback));
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn start(&mut self, stream: &MediaStream) -> Result<(), RecordingError> {
        if self.active.is_some() {
            return Err(RecordingError::AlreadyActive);
        }
        if stream.is_empty() {
            return Err(RecordingError::NoTracks);
        }

        let CaptureSession { mut chunks, stop } = self.backend.begin(stream)?;
        let collector = tokio::spawn(async move {
            let mut buffer = BytesMut::new();
            while let Some(chunk) = chunks.recv().await {
                buffer.extend_from_slice(&chunk);
            }
            buffer
        });

        self.active = Some(ActiveCapture {
            stop,
            collector,
            started_at: Instant::now(),
        });
        info!("Recording started with {} track(s)", stream.tracks().len());
        Ok(())
    }

    /// Stop capturing and return the complete blob. Resolves only after every
    /// buffered chunk has been collected. Does not fire the stop callback.
    pub async fn stop(&mut self) -> Result<RecordingBlob, RecordingError> {
        let active = self.active.take().ok_or(RecordingError::NotRecording)?;
        let duration = active.started_at.elapsed();
        if active.stop.send(()).is_err() {
            debug!("Capture backend finished before stop");
        }

        let data = active
            .collector
            .await
            .map_err(|e| RecordingError::Capture(e.to_string()))?
            .freeze();

        info!("Recording stopped: {} bytes over {:?}", data.len(), duration);
        Ok(RecordingBlob {
            data,
            mime_type: self.backend.mime_type().to_string(),
            duration,
        })
    }

    /// Normal stop: collect the blob and hand it to the stop callback.
    pub async fn finish(&mut self) -> Result<(), RecordingError> {
        let blob = self.stop().await?;
        match &self.on_stop {
            Some(callback) => callback(blob),
            None => warn!("Recording finished with no stop callback; {} bytes discarded", blob.len()),
        }
        Ok(())
    }
}

impl Drop for CallRecorder {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.stop.send(());
            active.collector.abort();
            warn!("Recorder dropped while recording; capture discarded");
        }
    }
}
