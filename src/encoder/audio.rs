//! Audio encoding policy
//!
//! PCM input is 16-bit interleaved. Presentation time either follows the
//! capture clock (wall-clock mode) or is derived from the number of PCM
//! bytes consumed so far (elapsed-byte mode), which stays gap-free even when
//! capture callbacks jitter.

use super::format::{AudioParams, MediaFormat, TrackKind, MIME_AAC};
use super::policy::{rank_encoders, FormatPolicy};
use super::pump::EncoderPump;
use super::traits::{CodecInfo, CodecPreference};
use crate::capture::Frame;
use crate::utils::error::{PrepareError, PumpError};
use serde::{Deserialize, Serialize};

const BYTES_PER_SAMPLE: i64 = 2;

/// How audio presentation times are derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PtsMode {
    /// Capture timestamp minus the session baseline
    #[default]
    WallClock,
    /// Bytes consumed so far converted to duration
    ElapsedBytes,
}

/// Audio encoder settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConfig {
    /// Target bitrate in bits per second
    #[serde(default = "default_audio_bitrate")]
    pub bitrate: u32,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_stereo")]
    pub stereo: bool,

    /// Largest PCM chunk in bytes; zero lets the encoder decide
    #[serde(default)]
    pub max_input_size: usize,

    #[serde(default)]
    pub pts_mode: PtsMode,
}

fn default_audio_bitrate() -> u32 {
    192_000
}

fn default_sample_rate() -> u32 {
    44_100
}

fn default_stereo() -> bool {
    true
}

impl AudioConfig {
    pub fn channel_count(&self) -> u16 {
        if self.stereo {
            2
        } else {
            1
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            bitrate: default_audio_bitrate(),
            sample_rate: default_sample_rate(),
            stereo: default_stereo(),
            max_input_size: 0,
            pts_mode: PtsMode::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AudioPolicy {
    config: AudioConfig,
    bytes_read: i64,
}

impl AudioPolicy {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            bytes_read: 0,
        }
    }
}

impl FormatPolicy for AudioPolicy {
    type Config = AudioConfig;

    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn tag(&self) -> &'static str {
        "audio"
    }

    fn mime(&self) -> &str {
        MIME_AAC
    }

    fn configure(&mut self, config: AudioConfig) {
        self.config = config;
    }

    fn config(&self) -> &AudioConfig {
        &self.config
    }

    fn select_codec(
        &mut self,
        candidates: Vec<CodecInfo>,
        preference: CodecPreference,
    ) -> Result<CodecInfo, PrepareError> {
        rank_encoders(candidates, preference, false)
            .into_iter()
            .next()
            .ok_or_else(|| PrepareError::NoEncoderFound {
                mime: MIME_AAC.to_string(),
            })
    }

    fn build_format(&self, _codec: &CodecInfo) -> MediaFormat {
        MediaFormat::audio(
            MIME_AAC,
            AudioParams {
                sample_rate: self.config.sample_rate,
                channel_count: self.config.channel_count(),
                bitrate: self.config.bitrate,
                max_input_size: self.config.max_input_size,
            },
        )
    }

    fn on_stop(&mut self) {
        self.bytes_read = 0;
    }

    fn calculate_pts(&mut self, frame: &Frame, baseline_us: i64) -> i64 {
        match self.config.pts_mode {
            PtsMode::WallClock => (frame.timestamp_us() - baseline_us).max(0),
            PtsMode::ElapsedBytes => {
                let bytes_per_frame = BYTES_PER_SAMPLE * i64::from(self.config.channel_count());
                let sample_rate = i64::from(self.config.sample_rate.max(1));
                let pts = 1_000_000 * self.bytes_read / bytes_per_frame / sample_rate;
                self.bytes_read += frame.data().len() as i64;
                pts
            }
        }
    }
}

pub type AudioEncoderPump = EncoderPump<AudioPolicy>;

impl EncoderPump<AudioPolicy> {
    /// Queue a chunk of PCM; discarded if the pump is not running or is full
    pub fn input_pcm(&self, frame: Frame) -> bool {
        self.offer(frame)
    }

    /// Switch pts derivation; only allowed while not running
    pub fn set_pts_mode(&self, mode: PtsMode) -> Result<(), PumpError> {
        if self.is_running() {
            return Err(PumpError::IllegalState {
                tag: self.tag().to_string(),
                op: "change pts mode",
                state: self.state().to_string(),
            });
        }
        self.with_policy(|policy| policy.config.pts_mode = mode);
        Ok(())
    }

    pub fn audio_config(&self) -> AudioConfig {
        self.with_policy(|policy| policy.config.clone())
    }
}
