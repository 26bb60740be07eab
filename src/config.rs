//! Pipeline configuration
//!
//! Loaded from JSON. Every field has a default, so `{}` is a valid
//! configuration (video and audio with default settings).

use crate::encoder::{AudioConfig, CodecPreference, VideoConfig};
use crate::recorder::TrackLayout;
use crate::utils::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Video track settings; `null` records audio only
    #[serde(default = "default_video")]
    pub video: Option<VideoConfig>,

    /// Audio track settings; `null` records video only
    #[serde(default = "default_audio")]
    pub audio: Option<AudioConfig>,

    #[serde(default)]
    pub codec_preference: CodecPreference,
}

fn default_video() -> Option<VideoConfig> {
    Some(VideoConfig::default())
}

fn default_audio() -> Option<AudioConfig> {
    Some(AudioConfig::default())
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            video: default_video(),
            audio: default_audio(),
            codec_preference: CodecPreference::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Tracks recorded with this configuration
    pub fn layout(&self) -> Result<TrackLayout, ConfigError> {
        match (&self.video, &self.audio) {
            (Some(_), Some(_)) => Ok(TrackLayout::AudioVideo),
            (Some(_), None) => Ok(TrackLayout::VideoOnly),
            (None, Some(_)) => Ok(TrackLayout::AudioOnly),
            (None, None) => Err(ConfigError::Invalid(
                "at least one of video or audio is required".to_string(),
            )),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.layout()?;
        if let Some(video) = &self.video {
            if video.width < 2 || video.height < 2 {
                return Err(ConfigError::Invalid(format!(
                    "video size {}x{} is too small",
                    video.width, video.height
                )));
            }
            if video.fps == 0 {
                return Err(ConfigError::Invalid("video fps must be positive".to_string()));
            }
            if video.bitrate == 0 {
                return Err(ConfigError::Invalid("video bitrate must be positive".to_string()));
            }
        }
        if let Some(audio) = &self.audio {
            if audio.sample_rate == 0 {
                return Err(ConfigError::Invalid("audio sample rate must be positive".to_string()));
            }
            if audio.bitrate == 0 {
                return Err(ConfigError::Invalid("audio bitrate must be positive".to_string()));
            }
        }
        Ok(())
    }
}
