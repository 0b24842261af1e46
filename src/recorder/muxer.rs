use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, warn};

use super::{CaptureBackend, CaptureSession};
use crate::error::RecordingError;
use crate::media::{MediaStream, TrackKind};

const FRAME_HEADER_LEN: usize = 5;

/// Default capture backend: interleaves the frames of every live track into
/// one buffer, each frame as `tag | u32 LE length | payload`.
#[derive(Debug, Default, Clone)]
pub struct StreamMuxer;

impl StreamMuxer {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureBackend for StreamMuxer {
    fn begin(&self, stream: &MediaStream) -> Result<CaptureSession, RecordingError> {
        let (chunk_tx, chunks) = mpsc::unbounded_channel();
        let (stop, stop_rx) = oneshot::channel::<()>();
        let (halt_tx, halt_rx) = watch::channel(false);

        // Subscribe before returning so no frame pushed after start is missed.
        let mut forwarders = Vec::new();
        for track in stream.tracks().iter().filter(|t| t.is_live()) {
            forwarders.push(tokio::spawn(forward_track(
                track.kind().frame_tag(),
                track.subscribe(),
                halt_rx.clone(),
                chunk_tx.clone(),
            )));
        }
        if forwarders.is_empty() {
            return Err(RecordingError::NoTracks);
        }
        drop(chunk_tx);

        let track_count = forwarders.len();
        tokio::spawn(async move {
            let _ = stop_rx.await;
            halt_tx.send_replace(true);
            for forwarder in forwarders {
                let _ = forwarder.await;
            }
            debug!("Muxer flushed {} track(s)", track_count);
        });

        Ok(CaptureSession { chunks, stop })
    }

    fn mime_type(&self) -> &str {
        "application/x-callroom-mux"
    }
}

async fn forward_track(
    tag: u8,
    mut frames: broadcast::Receiver<Bytes>,
    mut halt: watch::Receiver<bool>,
    out: mpsc::UnboundedSender<Bytes>,
) {
    loop {
        tokio::select! {
            biased;
            frame = frames.recv() => match frame {
                Ok(data) => {
                    if out.send(encode_frame(tag, &data)).is_err() {
                        return;
                    }
                }
                Err(RecvError::Lagged(n)) => warn!("Recorder lagged, {} frame(s) skipped", n),
                Err(RecvError::Closed) => return,
            },
            _ = halt.changed() => break,
        }
    }

    // Drain what was already captured.
    loop {
        match frames.try_recv() {
            Ok(data) => {
                if out.send(encode_frame(tag, &data)).is_err() {
                    return;
                }
            }
            Err(TryRecvError::Lagged(n)) => warn!("Recorder lagged, {} frame(s) skipped", n),
            Err(_) => return,
        }
    }
}

pub fn encode_frame(tag: u8, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + data.len());
    buf.put_u8(tag);
    buf.put_u32_le(data.len() as u32);
    buf.put_slice(data);
    buf.freeze()
}

/// Split a muxed recording back into `(kind, payload)` frames.
pub fn decode_frames(mut data: Bytes) -> Result<Vec<(TrackKind, Bytes)>, RecordingError> {
    let mut frames = Vec::new();
    while data.has_remaining() {
        if data.remaining() < FRAME_HEADER_LEN {
            return Err(RecordingError::Capture("truncated frame header".into()));
        }
        let tag = data.get_u8();
        let kind = TrackKind::from_frame_tag(tag)
            .ok_or_else(|| RecordingError::Capture(format!("unknown frame tag {:#04x}", tag)))?;
        let len = data.get_u32_le() as usize;
        if data.remaining() < len {
            return Err(RecordingError::Capture("truncated frame payload".into()));
        }
        frames.push((kind, data.split_to(len)));
    }
    Ok(frames)
}
