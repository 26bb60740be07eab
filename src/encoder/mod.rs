//! Encoder pumps
//!
//! This module drives platform encoders:
//! - `EncoderPump` owns one encoder and its worker thread
//! - `AudioPolicy` / `VideoPolicy` supply per-stream behavior
//! - `SessionClock` keeps every pump of a session on one time base
//! - `EncoderErrorHook` decides whether a crashed encoder is rebuilt

pub mod audio;
pub mod format;
pub mod pacing;
pub mod passthrough;
pub mod policy;
pub mod pump;
pub mod recovery;
pub mod session_clock;
pub mod traits;
pub mod video;

#[cfg(test)]
pub(crate) mod testing;

pub use audio::{AudioConfig, AudioEncoderPump, AudioPolicy, PtsMode};
pub use format::{
    AudioParams, BitrateMode, ColorFormat, FormatParams, MediaFormat, TrackKind, VideoParams,
    MIME_AAC, MIME_H264, MIME_H265, PREFERRED_COLOR_FORMATS,
};
pub use pacing::PacingLimiter;
pub use passthrough::{PassthroughEncoder, PassthroughRegistry};
pub use policy::{rank_encoders, FormatPolicy};
pub use pump::{EncoderPump, PumpEvent, PumpState, TimestampRepair, STOP_JOIN_TIMEOUT};
pub use recovery::{AlwaysRecover, EncoderErrorHook};
pub use session_clock::SessionClock;
pub use traits::{
    BufferInfo, CodecInfo, CodecPreference, CodecRegistry, EncodedSample, EncoderCallback,
    EncoderEvent, EncoderFault, HardwareEncoder, SampleFlags, SampleSink,
};
pub use video::{ColorSelection, VideoConfig, VideoEncoderPump, VideoPolicy};
