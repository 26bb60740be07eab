//! Video encoding policy
//!
//! Picks an encoder and a raw color format, builds the encoder format
//! (even dimensions, CBR when available) and paces input to the configured
//! frame rate.

use super::format::{
    BitrateMode, ColorFormat, MediaFormat, TrackKind, VideoParams, MIME_H264,
    PREFERRED_COLOR_FORMATS,
};
use super::pacing::PacingLimiter;
use super::policy::{rank_encoders, FormatPolicy};
use super::pump::EncoderPump;
use super::traits::{CodecInfo, CodecPreference};
use crate::capture::Frame;
use crate::utils::error::{PrepareError, PumpError};
use serde::{Deserialize, Serialize};

/// How the raw input color format is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColorSelection {
    /// First entry of the preferred order the encoder supports
    #[default]
    Dynamic,
    Fixed(ColorFormat),
}

/// Video encoder settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConfig {
    #[serde(default = "default_mime")]
    pub mime: String,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Target bitrate in bits per second
    #[serde(default = "default_video_bitrate")]
    pub bitrate: u32,

    /// Seconds between sync frames
    #[serde(default = "default_i_frame_interval")]
    pub i_frame_interval: u32,

    #[serde(default)]
    pub color: ColorSelection,

    #[serde(default)]
    pub profile: Option<u32>,

    #[serde(default)]
    pub level: Option<u32>,
}

fn default_mime() -> String {
    MIME_H264.to_string()
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_fps() -> u32 {
    30
}

fn default_video_bitrate() -> u32 {
    2_500_000
}

fn default_i_frame_interval() -> u32 {
    1
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            mime: default_mime(),
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            bitrate: default_video_bitrate(),
            i_frame_interval: default_i_frame_interval(),
            color: ColorSelection::default(),
            profile: None,
            level: None,
        }
    }
}

/// Round down to an even value, never below two
fn even(value: u32) -> u32 {
    (value & !1).max(2)
}

#[derive(Debug, Clone)]
pub struct VideoPolicy {
    config: VideoConfig,
    limiter: PacingLimiter,
    color: Option<ColorFormat>,
}

impl VideoPolicy {
    pub fn new(config: VideoConfig) -> Self {
        let limiter = PacingLimiter::new(config.fps, 0);
        Self {
            config,
            limiter,
            color: None,
        }
    }

    /// Color format chosen by the last encoder selection
    pub fn color_format(&self) -> Option<ColorFormat> {
        self.color
    }
}

impl Default for VideoPolicy {
    fn default() -> Self {
        Self::new(VideoConfig::default())
    }
}

impl FormatPolicy for VideoPolicy {
    type Config = VideoConfig;

    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    fn tag(&self) -> &'static str {
        "video"
    }

    fn mime(&self) -> &str {
        &self.config.mime
    }

    fn configure(&mut self, config: VideoConfig) {
        self.limiter = PacingLimiter::new(config.fps, 0);
        self.config = config;
    }

    fn config(&self) -> &VideoConfig {
        &self.config
    }

    fn select_codec(
        &mut self,
        candidates: Vec<CodecInfo>,
        preference: CodecPreference,
    ) -> Result<CodecInfo, PrepareError> {
        let ranked = rank_encoders(candidates, preference, true);
        let Some(first) = ranked.first().cloned() else {
            return Err(PrepareError::NoEncoderFound {
                mime: self.config.mime.clone(),
            });
        };

        let chosen = match self.config.color {
            ColorSelection::Fixed(color) => ranked
                .into_iter()
                .find(|codec| codec.supports_color(color))
                .map(|codec| (codec, color)),
            ColorSelection::Dynamic => ranked.into_iter().find_map(|codec| {
                PREFERRED_COLOR_FORMATS
                    .iter()
                    .copied()
                    .find(|color| codec.supports_color(*color))
                    .map(|color| (codec, color))
            }),
        };

        match chosen {
            Some((codec, color)) => {
                tracing::info!("video color format {:?} on {}", color, codec.name);
                self.color = Some(color);
                Ok(codec)
            }
            None => Err(PrepareError::ColorFormatUnsupported {
                codec: first.name,
                color: match self.config.color {
                    ColorSelection::Fixed(color) => color,
                    ColorSelection::Dynamic => PREFERRED_COLOR_FORMATS[0],
                },
            }),
        }
    }

    fn build_format(&self, codec: &CodecInfo) -> MediaFormat {
        let bitrate_mode = [BitrateMode::Cbr, BitrateMode::Vbr]
            .into_iter()
            .find(|mode| codec.supports_bitrate_mode(*mode));

        MediaFormat::video(
            self.config.mime.clone(),
            VideoParams {
                width: even(self.config.width),
                height: even(self.config.height),
                frame_rate: self.config.fps,
                bitrate: self.config.bitrate,
                i_frame_interval: self.config.i_frame_interval,
                color_format: self.color.unwrap_or(PREFERRED_COLOR_FORMATS[0]),
                bitrate_mode,
                profile: self.config.profile,
                level: self.config.level,
            },
        )
    }

    fn on_start(&mut self, reset_pts: bool, now_ms: i64) {
        if reset_pts {
            self.limiter.reset(now_ms);
        }
    }

    fn pacing(&mut self) -> Option<&mut PacingLimiter> {
        Some(&mut self.limiter)
    }

    fn calculate_pts(&mut self, frame: &Frame, baseline_us: i64) -> i64 {
        (frame.timestamp_us() - baseline_us).max(0)
    }
}

pub type VideoEncoderPump = EncoderPump<VideoPolicy>;

impl EncoderPump<VideoPolicy> {
    /// Change the pacing rate; only allowed while not running
    pub fn set_fps(&self, fps: u32) -> Result<(), PumpError> {
        if self.is_running() {
            return Err(PumpError::IllegalState {
                tag: self.tag().to_string(),
                op: "change fps",
                state: self.state().to_string(),
            });
        }
        let now_ms = self.session_clock().now_ms();
        self.with_policy(|policy| {
            policy.config.fps = fps;
            policy.limiter.set_fps(fps, now_ms);
        });
        Ok(())
    }

    /// Change the bitrate of the running encoder
    ///
    /// The new value is also kept for encoders rebuilt by recovery.
    pub fn set_bitrate_on_fly(&self, bitrate: u32) -> Result<(), PumpError> {
        match self.with_running_encoder(|encoder| encoder.set_bitrate(bitrate)) {
            None => Err(PumpError::IllegalState {
                tag: self.tag().to_string(),
                op: "change bitrate",
                state: self.state().to_string(),
            }),
            Some(Err(fault)) => Err(PumpError::Codec(format!("{:#}", fault))),
            Some(Ok(())) => {
                self.with_policy(|policy| policy.config.bitrate = bitrate);
                tracing::info!("video bitrate changed to {}", bitrate);
                Ok(())
            }
        }
    }

    /// Raw color format producers must deliver
    pub fn color_format(&self) -> Option<ColorFormat> {
        self.with_policy(|policy| policy.color)
    }

    pub fn video_config(&self) -> VideoConfig {
        self.with_policy(|policy| policy.config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::passthrough::PassthroughRegistry;
    use crate::encoder::session_clock::SessionClock;
    use crate::encoder::testing::{wait_until, CollectingSink};
    use crate::encoder::traits::SampleFlags;
    use crate::encoder::MIME_H265;
    use crate::utils::clock::{ManualClock, MonotonicClock};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn codec(name: &str, hardware: bool, colors: &[ColorFormat], modes: &[BitrateMode]) -> CodecInfo {
        CodecInfo {
            name: name.to_string(),
            mime: MIME_H264.to_string(),
            hardware,
            color_formats: colors.to_vec(),
            bitrate_modes: modes.to_vec(),
        }
    }

    fn video_pump(config: VideoConfig) -> (VideoEncoderPump, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::default());
        let pump = VideoEncoderPump::new(
            VideoPolicy::new(config),
            Arc::new(PassthroughRegistry::new()),
            sink.clone(),
            Arc::new(SessionClock::default()),
        );
        (pump, sink)
    }

    #[test]
    fn test_dynamic_color_follows_preferred_order() {
        let mut policy = VideoPolicy::default();
        let candidates = vec![codec(
            "hw",
            true,
            &[ColorFormat::Yuv420PackedPlanar, ColorFormat::Yuv420Planar],
            &[BitrateMode::Vbr],
        )];

        let chosen = policy
            .select_codec(candidates, CodecPreference::FirstCompatible)
            .unwrap();
        assert_eq!(chosen.name, "hw");
        assert_eq!(policy.color_format(), Some(ColorFormat::Yuv420Planar));
    }

    #[test]
    fn test_dynamic_color_skips_incompatible_encoder() {
        let mut policy = VideoPolicy::default();
        let candidates = vec![
            codec("hw-surface", true, &[ColorFormat::Surface], &[BitrateMode::Cbr]),
            codec("sw", false, &[ColorFormat::Yuv420SemiPlanar], &[]),
        ];

        let chosen = policy
            .select_codec(candidates, CodecPreference::FirstCompatible)
            .unwrap();
        assert_eq!(chosen.name, "sw");
        assert_eq!(policy.color_format(), Some(ColorFormat::Yuv420SemiPlanar));
    }

    #[test]
    fn test_fixed_color_must_be_supported() {
        let mut policy = VideoPolicy::new(VideoConfig {
            color: ColorSelection::Fixed(ColorFormat::Yuv420PackedSemiPlanar),
            ..VideoConfig::default()
        });
        let candidates = vec![codec("hw", true, &[ColorFormat::Yuv420Planar], &[])];

        let err = policy
            .select_codec(candidates, CodecPreference::FirstCompatible)
            .unwrap_err();
        assert!(matches!(
            err,
            PrepareError::ColorFormatUnsupported {
                color: ColorFormat::Yuv420PackedSemiPlanar,
                ..
            }
        ));
    }

    #[test]
    fn test_no_candidates() {
        let mut policy = VideoPolicy::default();
        let err = policy
            .select_codec(Vec::new(), CodecPreference::HardwareOnly)
            .unwrap_err();
        assert!(matches!(err, PrepareError::NoEncoderFound { .. }));
    }

    #[test]
    fn test_format_has_even_size_and_cbr() {
        let mut policy = VideoPolicy::new(VideoConfig {
            width: 1081,
            height: 607,
            profile: Some(8),
            ..VideoConfig::default()
        });
        let hw = codec(
            "hw",
            true,
            &[ColorFormat::Yuv420SemiPlanar],
            &[BitrateMode::Vbr, BitrateMode::Cbr],
        );
        policy
            .select_codec(vec![hw.clone()], CodecPreference::FirstCompatible)
            .unwrap();

        let format = policy.build_format(&hw);
        let params = format.video_params().unwrap();
        assert_eq!((params.width, params.height), (1080, 606));
        assert_eq!(params.bitrate_mode, Some(BitrateMode::Cbr));
        assert_eq!(params.profile, Some(8));

        let vbr_only = codec("sw", false, &[], &[BitrateMode::Vbr]);
        let params = policy.build_format(&vbr_only);
        assert_eq!(params.video_params().unwrap().bitrate_mode, Some(BitrateMode::Vbr));
    }

    #[test]
    fn test_fps_and_bitrate_changes() {
        let (pump, _) = video_pump(VideoConfig {
            width: 16,
            height: 16,
            ..VideoConfig::default()
        });
        pump.set_fps(15).unwrap();
        assert!(pump.set_bitrate_on_fly(1_000_000).is_err());

        pump.prepare(pump.video_config()).unwrap();
        pump.start(true).unwrap();
        assert!(pump.set_fps(60).is_err());
        pump.set_bitrate_on_fly(1_000_000).unwrap();
        pump.stop(true).unwrap();

        let config = pump.video_config();
        assert_eq!(config.fps, 15);
        assert_eq!(config.bitrate, 1_000_000);
    }

    #[test]
    fn test_realtime_source_skips_empty_polls() {
        let (pump, sink) = video_pump(VideoConfig {
            mime: MIME_H265.to_string(),
            width: 16,
            height: 16,
            fps: 100,
            ..VideoConfig::default()
        });
        let marker = vec![0xCD; 8];
        let polls = Arc::new(AtomicUsize::new(0));
        let source_polls = polls.clone();
        let source_marker = marker.clone();
        pump.set_source(Some(Box::new(move || {
            // Every other poll has nothing ready
            if source_polls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                None
            } else {
                Some(Frame::new(source_marker.clone()))
            }
        })));

        pump.prepare(pump.video_config()).unwrap();
        pump.start(true).unwrap();
        assert!(wait_until(|| sink.samples().len() >= 3));
        pump.stop(true).unwrap();

        let samples = sink.samples();
        assert!(polls.load(Ordering::SeqCst) >= 2 * samples.len());
        assert!(samples.iter().all(|s| s.payload.ends_with(&marker)));
        assert!(samples.windows(2).all(|w| w[0].pts <= w[1].pts));
        assert!(samples[0].flags.contains(SampleFlags::KEY_FRAME));
    }

    #[test]
    fn test_ready_source_is_throttled_to_fps() {
        let (pump, sink) = video_pump(VideoConfig {
            width: 16,
            height: 16,
            fps: 20,
            ..VideoConfig::default()
        });
        pump.set_source(Some(Box::new(|| Some(Frame::new(vec![0x10; 8])))));

        pump.prepare(pump.video_config()).unwrap();
        pump.start(true).unwrap();
        std::thread::sleep(Duration::from_millis(1000));
        pump.stop(true).unwrap();

        // 20 fps over one second, first frame after one interval
        let samples = sink.samples();
        assert!(
            (12..=22).contains(&samples.len()),
            "{} frames in one second",
            samples.len()
        );
        assert!(samples.windows(2).all(|w| w[1].pts - w[0].pts >= 40_000));
    }

    #[test]
    fn test_fetch_time_counts_toward_the_interval() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let sink = Arc::new(CollectingSink::default());
        let pump = VideoEncoderPump::new(
            VideoPolicy::new(VideoConfig {
                width: 16,
                height: 16,
                fps: 20,
                ..VideoConfig::default()
            }),
            Arc::new(PassthroughRegistry::new()),
            sink.clone(),
            Arc::new(SessionClock::new(clock.clone())),
        );

        // Each fetch takes 10 ms of session time
        let source_clock = clock.clone();
        pump.set_source(Some(Box::new(move || {
            source_clock.advance_us(10_000);
            Some(Frame::with_timestamp(vec![0x10; 8], source_clock.now_us()))
        })));

        pump.prepare(pump.video_config()).unwrap();
        pump.start(true).unwrap();
        assert!(wait_until(|| sink.samples().len() >= 4));
        pump.stop(true).unwrap();

        // A frame is let through once the 50 ms interval, fetch included, has
        // elapsed since the previous fetch started: every third fetch
        let pts: Vec<i64> = sink.samples().iter().take(4).map(|s| s.pts).collect();
        assert_eq!(pts, vec![40_000, 70_000, 100_000, 130_000]);
    }
}
