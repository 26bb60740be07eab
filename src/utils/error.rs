//! Error types and handling
//!
//! Error types shared across the pipeline. Configuration problems surface from
//! `prepare`, lifecycle misuse surfaces as `IllegalState`, and faults raised by
//! an encoder implementation travel as [`EncoderFault`](crate::encoder::EncoderFault).

use crate::encoder::ColorFormat;
use thiserror::Error;

/// Errors returned while preparing an encoder pump
#[derive(Error, Debug)]
pub enum PrepareError {
    #[error("No encoder found for {mime}")]
    NoEncoderFound { mime: String },

    #[error("Encoder {codec} does not support color format {color:?}")]
    ColorFormatUnsupported { codec: String, color: ColorFormat },

    #[error("Failed to configure encoder {codec}: {reason}")]
    ConfigureFailed { codec: String, reason: String },

    #[error("Cannot prepare {tag} pump while {state}")]
    IllegalState { tag: String, state: String },
}

/// Errors returned by encoder pump lifecycle operations
#[derive(Error, Debug)]
pub enum PumpError {
    #[error("Cannot {op} {tag} pump while {state}")]
    IllegalState {
        tag: String,
        op: &'static str,
        state: String,
    },

    #[error(transparent)]
    Prepare(#[from] PrepareError),

    #[error("Encoder error: {0}")]
    Codec(String),
}

/// Errors reported by a container writer
#[derive(Error, Debug)]
pub enum WriterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Writer not started")]
    NotStarted,

    #[error("Writer already started")]
    AlreadyStarted,

    #[error("Unknown track: {0}")]
    UnknownTrack(usize),

    #[error("Writer error: {0}")]
    Other(String),
}

/// Errors returned by the recording controller
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Cannot {op} while {status}")]
    IllegalState { op: &'static str, status: String },

    #[error(transparent)]
    Writer(#[from] WriterError),
}

/// Errors raised while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Pipeline-wide error type
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Prepare(#[from] PrepareError),

    #[error(transparent)]
    Pump(#[from] PumpError),

    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Result type alias using PipelineError
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PrepareError::NoEncoderFound {
            mime: "video/avc".to_string(),
        };
        assert_eq!(err.to_string(), "No encoder found for video/avc");

        let err = PumpError::IllegalState {
            tag: "video".to_string(),
            op: "start",
            state: "idle".to_string(),
        };
        assert_eq!(err.to_string(), "Cannot start video pump while idle");
    }

    #[test]
    fn test_prepare_error_converts_transparently() {
        let err: PipelineError = PumpError::from(PrepareError::NoEncoderFound {
            mime: "audio/mp4a-latm".to_string(),
        })
        .into();
        assert_eq!(err.to_string(), "No encoder found for audio/mp4a-latm");
    }
}
