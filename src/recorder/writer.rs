//! Container writer boundary
//!
//! The controller talks to the muxer through [`ContainerWriter`]. Each write
//! carries its own [`SampleTiming`] value; timing is never shared between
//! writes or tracks.

use crate::encoder::format::{MediaFormat, TrackKind};
use crate::encoder::traits::SampleFlags;
use crate::utils::error::WriterError;
use parking_lot::Mutex;
use std::sync::Arc;

/// Identifier returned by [`ContainerWriter::add_track`]
pub type TrackId = usize;

/// Placement and timing of one sample inside the buffer passed to a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleTiming {
    pub offset: usize,
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: SampleFlags,
}

/// A container muxer
pub trait ContainerWriter: Send {
    fn add_track(&mut self, format: &MediaFormat) -> Result<TrackId, WriterError>;

    fn start(&mut self) -> Result<(), WriterError>;

    /// Fails before `start` or for an unknown track
    fn write_sample(&mut self, track: TrackId, data: &[u8], timing: SampleTiming) -> Result<(), WriterError>;

    fn stop(&mut self) -> Result<(), WriterError>;

    fn release(&mut self);
}

/// A sample captured by [`MemoryWriter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenSample {
    pub track: TrackId,
    pub data: Vec<u8>,
    pub timing: SampleTiming,
}

#[derive(Debug, Default)]
struct MemoryState {
    tracks: Vec<MediaFormat>,
    samples: Vec<WrittenSample>,
    started: bool,
    stopped: bool,
    released: bool,
}

/// In-memory container; clones share the same recording
#[derive(Debug, Clone, Default)]
pub struct MemoryWriter {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracks(&self) -> Vec<MediaFormat> {
        self.state.lock().tracks.clone()
    }

    pub fn samples(&self) -> Vec<WrittenSample> {
        self.state.lock().samples.clone()
    }

    /// Samples written to the first track of the given kind
    pub fn samples_of(&self, kind: TrackKind) -> Vec<WrittenSample> {
        let state = self.state.lock();
        let Some(track) = state.tracks.iter().position(|format| format.kind() == kind) else {
            return Vec::new();
        };
        state
            .samples
            .iter()
            .filter(|sample| sample.track == track)
            .cloned()
            .collect()
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    /// Whether the recording was stopped and released
    pub fn is_finalized(&self) -> bool {
        let state = self.state.lock();
        state.stopped && state.released
    }
}

impl ContainerWriter for MemoryWriter {
    fn add_track(&mut self, format: &MediaFormat) -> Result<TrackId, WriterError> {
        let mut state = self.state.lock();
        if state.started {
            return Err(WriterError::AlreadyStarted);
        }
        state.tracks.push(format.clone());
        Ok(state.tracks.len() - 1)
    }

    fn start(&mut self) -> Result<(), WriterError> {
        let mut state = self.state.lock();
        if state.started {
            return Err(WriterError::AlreadyStarted);
        }
        state.started = true;
        Ok(())
    }

    fn write_sample(&mut self, track: TrackId, data: &[u8], timing: SampleTiming) -> Result<(), WriterError> {
        let mut state = self.state.lock();
        if !state.started || state.stopped {
            return Err(WriterError::NotStarted);
        }
        if track >= state.tracks.len() {
            return Err(WriterError::UnknownTrack(track));
        }
        let end = timing.offset.saturating_add(timing.size);
        let payload = data
            .get(timing.offset..end)
            .ok_or_else(|| WriterError::Other(format!("sample region {}..{} out of bounds", timing.offset, end)))?;
        state.samples.push(WrittenSample {
            track,
            data: payload.to_vec(),
            timing,
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), WriterError> {
        let mut state = self.state.lock();
        if !state.started {
            return Err(WriterError::NotStarted);
        }
        state.stopped = true;
        Ok(())
    }

    fn release(&mut self) {
        self.state.lock().released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::format::{AudioParams, MIME_AAC};

    fn audio_format() -> MediaFormat {
        MediaFormat::audio(
            MIME_AAC,
            AudioParams {
                sample_rate: 44_100,
                channel_count: 2,
                bitrate: 128_000,
                max_input_size: 0,
            },
        )
    }

    fn timing(offset: usize, size: usize) -> SampleTiming {
        SampleTiming {
            offset,
            size,
            presentation_time_us: 0,
            flags: SampleFlags::empty(),
        }
    }

    #[test]
    fn test_write_requires_start_and_known_track() {
        let mut writer = MemoryWriter::new();
        let track = writer.add_track(&audio_format()).unwrap();

        assert!(matches!(
            writer.write_sample(track, &[1, 2], timing(0, 2)),
            Err(WriterError::NotStarted)
        ));

        writer.start().unwrap();
        assert!(matches!(
            writer.write_sample(7, &[1, 2], timing(0, 2)),
            Err(WriterError::UnknownTrack(7))
        ));
        assert!(writer.add_track(&audio_format()).is_err());

        writer.write_sample(track, &[9, 1, 2, 9], timing(1, 2)).unwrap();
        assert_eq!(writer.samples()[0].data, vec![1, 2]);
    }

    #[test]
    fn test_clones_share_state() {
        let observer = MemoryWriter::new();
        let mut writer = observer.clone();
        writer.add_track(&audio_format()).unwrap();
        writer.start().unwrap();
        writer.stop().unwrap();
        writer.release();

        assert_eq!(observer.tracks().len(), 1);
        assert!(observer.is_finalized());
        assert!(observer.samples_of(TrackKind::Video).is_empty());
    }
}
