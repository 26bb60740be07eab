//! Media format descriptions
//!
//! The configuration handed to an encoder and the output format it reports
//! back once it knows its codec-specific data.

use serde::{Deserialize, Serialize};

pub const MIME_H264: &str = "video/avc";
pub const MIME_H265: &str = "video/hevc";
pub const MIME_AAC: &str = "audio/mp4a-latm";

/// Kind of elementary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Raw pixel layouts an encoder may accept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColorFormat {
    Yuv420SemiPlanar,
    Yuv420Planar,
    Yuv420PackedSemiPlanar,
    Yuv420PackedPlanar,
    Yuv420Flexible,
    Surface,
}

/// Order in which raw color formats are tried when none is forced
pub const PREFERRED_COLOR_FORMATS: [ColorFormat; 4] = [
    ColorFormat::Yuv420SemiPlanar,
    ColorFormat::Yuv420Planar,
    ColorFormat::Yuv420PackedSemiPlanar,
    ColorFormat::Yuv420PackedPlanar,
];

/// Rate-control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitrateMode {
    Cbr,
    Vbr,
    Cq,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub bitrate: u32,
    /// Seconds between sync frames
    pub i_frame_interval: u32,
    pub color_format: ColorFormat,
    pub bitrate_mode: Option<BitrateMode>,
    pub profile: Option<u32>,
    pub level: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub bitrate: u32,
    /// Largest input chunk in bytes; zero lets the encoder decide
    pub max_input_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatParams {
    Video(VideoParams),
    Audio(AudioParams),
}

/// A stream format as negotiated with an encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFormat {
    pub mime: String,
    pub params: FormatParams,
    /// Codec-specific data (parameter sets, AudioSpecificConfig)
    pub codec_config: Vec<Vec<u8>>,
}

impl MediaFormat {
    pub fn video(mime: impl Into<String>, params: VideoParams) -> Self {
        Self {
            mime: mime.into(),
            params: FormatParams::Video(params),
            codec_config: Vec::new(),
        }
    }

    pub fn audio(mime: impl Into<String>, params: AudioParams) -> Self {
        Self {
            mime: mime.into(),
            params: FormatParams::Audio(params),
            codec_config: Vec::new(),
        }
    }

    pub fn with_codec_config(mut self, config: Vec<Vec<u8>>) -> Self {
        self.codec_config = config;
        self
    }

    pub fn kind(&self) -> TrackKind {
        match self.params {
            FormatParams::Video(_) => TrackKind::Video,
            FormatParams::Audio(_) => TrackKind::Audio,
        }
    }

    pub fn video_params(&self) -> Option<&VideoParams> {
        match &self.params {
            FormatParams::Video(params) => Some(params),
            FormatParams::Audio(_) => None,
        }
    }

    pub fn audio_params(&self) -> Option<&AudioParams> {
        match &self.params {
            FormatParams::Audio(params) => Some(params),
            FormatParams::Video(_) => None,
        }
    }
}
