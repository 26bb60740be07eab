//! Per-stream encoding policy
//!
//! An [`EncoderPump`](super::EncoderPump) owns the lifecycle and event loop;
//! the policy supplies what differs between audio and video: encoder
//! selection, the format handed to the encoder, presentation-time
//! calculation and optional pacing.

use super::format::{BitrateMode, MediaFormat, TrackKind};
use super::pacing::PacingLimiter;
use super::traits::{CodecInfo, CodecPreference};
use crate::capture::Frame;
use crate::utils::error::PrepareError;

pub trait FormatPolicy: Send + 'static {
    type Config: Clone + Send + std::fmt::Debug;

    fn kind(&self) -> TrackKind;

    /// Short name used in logs and thread names
    fn tag(&self) -> &'static str;

    fn mime(&self) -> &str;

    /// Replace the stored configuration; used again on every rebuild
    fn configure(&mut self, config: Self::Config);

    fn config(&self) -> &Self::Config;

    /// Pick an encoder among the registry's candidates
    fn select_codec(
        &mut self,
        candidates: Vec<CodecInfo>,
        preference: CodecPreference,
    ) -> Result<CodecInfo, PrepareError>;

    /// The format to configure the chosen encoder with
    fn build_format(&self, codec: &CodecInfo) -> MediaFormat;

    fn on_start(&mut self, _reset_pts: bool, _now_ms: i64) {}

    fn on_stop(&mut self) {}

    fn pacing(&mut self) -> Option<&mut PacingLimiter> {
        None
    }

    /// Presentation time in microseconds for the next input frame
    fn calculate_pts(&mut self, frame: &Frame, baseline_us: i64) -> i64;
}

/// Filter encoders by preference and order them best first
///
/// Hardware encoders rank ahead of software ones; within each group, CBR
/// capable encoders come first when `prefer_cbr` is set.
pub fn rank_encoders(
    candidates: Vec<CodecInfo>,
    preference: CodecPreference,
    prefer_cbr: bool,
) -> Vec<CodecInfo> {
    let mut ranked: Vec<CodecInfo> = candidates
        .into_iter()
        .filter(|info| match preference {
            CodecPreference::FirstCompatible => true,
            CodecPreference::HardwareOnly => info.hardware,
            CodecPreference::SoftwareOnly => !info.hardware,
        })
        .collect();

    ranked.sort_by_key(|info| {
        let software = if info.hardware { 0 } else { 2 };
        let cbr = if prefer_cbr && info.supports_bitrate_mode(BitrateMode::Cbr) {
            0
        } else {
            1
        };
        software + cbr
    });
    ranked
}
