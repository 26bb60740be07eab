//! Recording state management
//!
//! Defines the mux state machine and per-recording statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current state of the recording controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// No recording in progress
    Stopped,
    /// Recording requested, waiting for formats and a keyframe
    Started,
    /// Samples are being written
    Recording,
    /// Recording is paused; samples are dropped
    Paused,
    /// Resumed, waiting for the next keyframe
    Resumed,
}

impl Default for RecordStatus {
    fn default() -> Self {
        Self::Stopped
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecordStatus::Stopped => "stopped",
            RecordStatus::Started => "started",
            RecordStatus::Recording => "recording",
            RecordStatus::Paused => "paused",
            RecordStatus::Resumed => "resumed",
        };
        write!(f, "{}", name)
    }
}

/// Which tracks a recording contains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackLayout {
    #[default]
    AudioVideo,
    VideoOnly,
    AudioOnly,
}

impl TrackLayout {
    pub fn has_audio(self) -> bool {
        self != TrackLayout::VideoOnly
    }

    pub fn has_video(self) -> bool {
        self != TrackLayout::AudioOnly
    }
}

/// Statistics for one recording, from start to stop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSummary {
    /// Unique recording ID
    pub id: Uuid,

    pub layout: TrackLayout,

    /// Wall-clock time the recording was requested
    pub started_at: DateTime<Utc>,

    /// Wall-clock time the recording was stopped
    pub ended_at: Option<DateTime<Utc>>,

    /// Number of pause/resume cycles
    pub pause_count: u32,

    /// Total paused time in microseconds
    pub paused_us: i64,

    pub video_samples: u64,

    pub audio_samples: u64,

    /// Samples the writer rejected
    pub failed_writes: u64,
}

impl RecordingSummary {
    /// Create a new summary starting now
    pub fn new(layout: TrackLayout) -> Self {
        Self {
            id: Uuid::new_v4(),
            layout,
            started_at: Utc::now(),
            ended_at: None,
            pause_count: 0,
            paused_us: 0,
            video_samples: 0,
            audio_samples: 0,
            failed_writes: 0,
        }
    }

    /// End the recording
    pub fn end(&mut self, paused_us: i64) {
        self.paused_us = paused_us;
        self.ended_at = Some(Utc::now());
    }

    /// Wall-clock duration minus paused time, in milliseconds
    pub fn active_duration_ms(&self) -> Option<i64> {
        let ended = self.ended_at?;
        let total = (ended - self.started_at).num_milliseconds();
        Some((total - self.paused_us / 1000).max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&RecordStatus::Resumed).unwrap();
        assert_eq!(json, "\"resumed\"");
        assert_eq!(RecordStatus::default(), RecordStatus::Stopped);
    }

    #[test]
    fn test_layout_tracks() {
        assert!(TrackLayout::AudioVideo.has_audio() && TrackLayout::AudioVideo.has_video());
        assert!(!TrackLayout::VideoOnly.has_audio());
        assert!(!TrackLayout::AudioOnly.has_video());
    }

    #[test]
    fn test_summary_end() {
        let mut summary = RecordingSummary::new(TrackLayout::AudioOnly);
        assert_eq!(summary.active_duration_ms(), None);

        summary.end(0);
        assert!(summary.ended_at.is_some());
        assert!(summary.active_duration_ms().unwrap() >= 0);

        let json = serde_json::to_value(&summary).unwrap();
        assert!(json.get("startedAt").is_some());
        assert!(json.get("failedWrites").is_some());
    }
}
