//! Recording controller
//!
//! Multiplexes encoded audio and video into a container. Tracks are created
//! once both required formats are known and the first video keyframe
//! arrives (audio-only recordings start as soon as the audio format is
//! known). Pausing drops samples; resuming shifts every later timestamp back
//! by the accumulated pause duration so the output has no gap.

use super::keyframe::is_key_frame;
use super::state::{RecordStatus, RecordingSummary, TrackLayout};
use super::writer::{ContainerWriter, SampleTiming, TrackId};
use crate::encoder::format::{MediaFormat, TrackKind, MIME_H264};
use crate::encoder::traits::{EncodedSample, SampleSink};
use crate::utils::clock::{MonotonicClock, SystemClock};
use crate::utils::error::{RecordError, WriterError};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

struct ControllerState {
    status: RecordStatus,
    layout: TrackLayout,
    video_mime: String,
    writer: Option<Box<dyn ContainerWriter>>,
    video_format: Option<MediaFormat>,
    audio_format: Option<MediaFormat>,
    video_track: Option<TrackId>,
    audio_track: Option<TrackId>,
    /// Monotonic instant of the last pause
    pause_moment_us: i64,
    /// Total paused time subtracted from every written timestamp
    pause_time_us: i64,
    summary: Option<RecordingSummary>,
}

impl ControllerState {
    fn video_ready(&self) -> bool {
        self.video_format.is_some() && (!self.layout.has_audio() || self.audio_format.is_some())
    }

    fn is_key_frame(&self, sample: &EncodedSample<'_>) -> bool {
        sample.is_flagged_key_frame() || is_key_frame(&self.video_mime, sample.payload())
    }

    /// Add the session's tracks and start the writer
    fn init_tracks(&mut self, with_video: bool) -> Result<(), WriterError> {
        let writer = self.writer.as_mut().ok_or(WriterError::NotStarted)?;
        if with_video {
            if let Some(format) = &self.video_format {
                self.video_track = Some(writer.add_track(format)?);
            }
        }
        if self.layout.has_audio() {
            if let Some(format) = &self.audio_format {
                self.audio_track = Some(writer.add_track(format)?);
            }
        }
        writer.start()
    }

    fn write(&mut self, kind: TrackKind, sample: &EncodedSample<'_>) {
        let track = match kind {
            TrackKind::Video => self.video_track,
            TrackKind::Audio => self.audio_track,
        };
        let (Some(track), Some(writer)) = (track, self.writer.as_mut()) else {
            return;
        };

        let timing = SampleTiming {
            offset: sample.info.offset,
            size: sample.info.size,
            presentation_time_us: sample.info.presentation_time_us - self.pause_time_us,
            flags: sample.info.flags,
        };
        let result = writer.write_sample(track, sample.data, timing);

        if let Some(summary) = self.summary.as_mut() {
            match (&result, kind) {
                (Ok(()), TrackKind::Video) => summary.video_samples += 1,
                (Ok(()), TrackKind::Audio) => summary.audio_samples += 1,
                (Err(_), _) => summary.failed_writes += 1,
            }
        }
        if let Err(err) = result {
            tracing::warn!("Failed to write {} sample: {}", kind, err);
        }
    }

    /// Stop and release the writer, clearing per-recording state
    fn finalize(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(err) = writer.stop() {
                tracing::warn!("Error stopping container writer: {}", err);
            }
            writer.release();
        }
        self.video_track = None;
        self.audio_track = None;
        self.pause_moment_us = 0;
        self.pause_time_us = 0;
    }
}

/// Keyframe-gated mux state machine
///
/// All transitions are serialized behind one lock, so it can be fed from
/// the audio and video worker threads at the same time.
pub struct RecordController {
    state: Mutex<ControllerState>,
    clock: Arc<dyn MonotonicClock>,
    event_tx: broadcast::Sender<RecordStatus>,
}

impl RecordController {
    /// Create a controller timing pauses with the given clock
    pub fn new(clock: Arc<dyn MonotonicClock>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            state: Mutex::new(ControllerState {
                status: RecordStatus::Stopped,
                layout: TrackLayout::default(),
                video_mime: MIME_H264.to_string(),
                writer: None,
                video_format: None,
                audio_format: None,
                video_track: None,
                audio_track: None,
                pause_moment_us: 0,
                pause_time_us: 0,
                summary: None,
            }),
            clock,
            event_tx,
        }
    }

    /// Get the current status
    pub fn status(&self) -> RecordStatus {
        self.state.lock().status
    }

    pub fn is_running(&self) -> bool {
        self.status() != RecordStatus::Stopped
    }

    pub fn is_recording(&self) -> bool {
        self.status() == RecordStatus::Recording
    }

    /// Subscribe to status changes
    pub fn subscribe(&self) -> broadcast::Receiver<RecordStatus> {
        self.event_tx.subscribe()
    }

    /// Accumulated pause time of the current recording
    pub fn pause_time_us(&self) -> i64 {
        self.state.lock().pause_time_us
    }

    pub fn layout(&self) -> TrackLayout {
        self.state.lock().layout
    }

    /// Choose which tracks the next recording contains
    pub fn set_layout(&self, layout: TrackLayout) -> Result<(), RecordError> {
        let mut state = self.state.lock();
        if state.status != RecordStatus::Stopped {
            return Err(RecordError::IllegalState {
                op: "change track layout",
                status: state.status.to_string(),
            });
        }
        state.layout = layout;
        Ok(())
    }

    /// Codec of the video track, used for keyframe parsing
    pub fn set_video_mime(&self, mime: impl Into<String>) {
        self.state.lock().video_mime = mime.into();
    }

    fn set_status(&self, state: &mut ControllerState, status: RecordStatus) {
        if state.status != status {
            tracing::info!("Record status {} -> {}", state.status, status);
            state.status = status;
            let _ = self.event_tx.send(status);
        }
    }

    fn init(&self, state: &mut ControllerState, with_video: bool) {
        match state.init_tracks(with_video) {
            Ok(()) => {
                tracing::info!(
                    "Container started (video track: {:?}, audio track: {:?})",
                    state.video_track,
                    state.audio_track
                );
                self.set_status(state, RecordStatus::Recording);
            }
            Err(err) => {
                tracing::error!("Failed to start container: {}", err);
                state.finalize();
                if let Some(summary) = state.summary.as_mut() {
                    summary.end(0);
                }
                self.set_status(state, RecordStatus::Stopped);
            }
        }
    }

    /// Begin a recording into `writer`
    pub fn start_record(&self, writer: Box<dyn ContainerWriter>) -> Result<(), RecordError> {
        let mut state = self.state.lock();
        if state.status != RecordStatus::Stopped {
            return Err(RecordError::IllegalState {
                op: "start recording",
                status: state.status.to_string(),
            });
        }

        state.writer = Some(writer);
        state.summary = Some(RecordingSummary::new(state.layout));
        self.set_status(&mut state, RecordStatus::Started);

        if state.layout == TrackLayout::AudioOnly && state.audio_format.is_some() {
            self.init(&mut state, false);
        }
        Ok(())
    }

    /// Finalize the container; returns the recording's summary
    pub fn stop_record(&self) -> Option<RecordingSummary> {
        let mut state = self.state.lock();
        if state.status == RecordStatus::Stopped {
            return None;
        }

        let paused_us = state.pause_time_us;
        state.finalize();
        let mut summary = state.summary.take();
        if let Some(summary) = summary.as_mut() {
            summary.end(paused_us);
        }
        self.set_status(&mut state, RecordStatus::Stopped);
        summary
    }

    /// Pause a recording that is currently writing
    pub fn pause_record(&self) -> Result<(), RecordError> {
        let mut state = self.state.lock();
        if state.status != RecordStatus::Recording {
            return Err(RecordError::IllegalState {
                op: "pause",
                status: state.status.to_string(),
            });
        }
        state.pause_moment_us = self.clock.now_us();
        if let Some(summary) = state.summary.as_mut() {
            summary.pause_count += 1;
        }
        self.set_status(&mut state, RecordStatus::Paused);
        Ok(())
    }

    /// Resume a paused recording; writing restarts at the next keyframe
    pub fn resume_record(&self) -> Result<(), RecordError> {
        let mut state = self.state.lock();
        if state.status != RecordStatus::Paused {
            return Err(RecordError::IllegalState {
                op: "resume",
                status: state.status.to_string(),
            });
        }
        let paused = self.clock.now_us() - state.pause_moment_us;
        state.pause_time_us += paused.max(0);
        tracing::debug!("Resumed after {}us, total pause {}us", paused, state.pause_time_us);
        self.set_status(&mut state, RecordStatus::Resumed);
        Ok(())
    }

    pub fn record_video(&self, sample: &EncodedSample<'_>) {
        if sample.is_codec_config() {
            return;
        }
        let mut state = self.state.lock();
        let status = state.status;
        match status {
            RecordStatus::Started if state.video_ready() && state.is_key_frame(sample) => {
                self.init(&mut state, true);
            }
            RecordStatus::Resumed if state.is_key_frame(sample) => {
                self.set_status(&mut state, RecordStatus::Recording);
            }
            _ => {}
        }
        if state.status == RecordStatus::Recording {
            state.write(TrackKind::Video, sample);
        }
    }

    pub fn record_audio(&self, sample: &EncodedSample<'_>) {
        if sample.is_codec_config() {
            return;
        }
        let mut state = self.state.lock();
        // No keyframe to wait for without video
        if state.status == RecordStatus::Resumed && state.layout == TrackLayout::AudioOnly {
            self.set_status(&mut state, RecordStatus::Recording);
        }
        if state.status == RecordStatus::Recording {
            state.write(TrackKind::Audio, sample);
        }
    }

    pub fn set_video_format(&self, format: MediaFormat) {
        self.state.lock().video_format = Some(format);
    }

    pub fn set_audio_format(&self, format: MediaFormat) {
        let mut state = self.state.lock();
        state.audio_format = Some(format);
        if state.layout == TrackLayout::AudioOnly && state.status == RecordStatus::Started {
            self.init(&mut state, false);
        }
    }

    /// Forget both formats, e.g. before re-preparing encoders
    pub fn reset_formats(&self) {
        let mut state = self.state.lock();
        state.video_format = None;
        state.audio_format = None;
    }
}

impl Default for RecordController {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl SampleSink for RecordController {
    fn on_sample(&self, sample: EncodedSample<'_>) {
        match sample.kind {
            TrackKind::Video => self.record_video(&sample),
            TrackKind::Audio => self.record_audio(&sample),
        }
    }

    fn on_format(&self, format: MediaFormat) {
        match format.kind() {
            TrackKind::Video => self.set_video_format(format),
            TrackKind::Audio => self.set_audio_format(format),
        }
    }
}
