//! Encoder boundary traits
//!
//! The hardware encoder, the registry that enumerates encoders, and the
//! sink that consumes encoded samples are all collaborators behind traits.
//! Encoders report progress asynchronously through an [`EncoderCallback`],
//! which feeds the owning pump's event loop.

use super::format::{BitrateMode, ColorFormat, MediaFormat, TrackKind};
use bitflags::bitflags;
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

/// Implementation-defined encoder failure
pub type EncoderFault = anyhow::Error;

bitflags! {
    /// Per-buffer flags reported by an encoder
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SampleFlags: u32 {
        const KEY_FRAME = 1;
        const CODEC_CONFIG = 1 << 1;
        const END_OF_STREAM = 1 << 2;
        const PARTIAL_FRAME = 1 << 3;
    }
}

/// Metadata describing one output buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferInfo {
    pub offset: usize,
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: SampleFlags,
}

/// Asynchronous notifications from an encoder
#[derive(Debug)]
pub enum EncoderEvent {
    /// An input buffer slot can be filled
    InputAvailable(usize),
    /// An encoded buffer is ready to be read and released
    OutputAvailable { index: usize, info: BufferInfo },
    /// The output format (with codec-specific data) is known
    FormatChanged(MediaFormat),
    /// The encoder hit an error outside of a direct call
    Error(EncoderFault),
}

#[derive(Debug)]
pub(crate) enum PumpMessage {
    Encoder(EncoderEvent),
    /// Re-check pending work after `running` flips on
    Wake,
    Shutdown,
}

/// Handle an encoder uses to report events to its pump
///
/// Sends never block. They return false once the pump has gone away.
#[derive(Debug, Clone)]
pub struct EncoderCallback {
    tx: Sender<PumpMessage>,
}

impl EncoderCallback {
    pub(crate) fn new(tx: Sender<PumpMessage>) -> Self {
        Self { tx }
    }

    pub fn send(&self, event: EncoderEvent) -> bool {
        self.tx.send(PumpMessage::Encoder(event)).is_ok()
    }

    pub fn input_available(&self, index: usize) -> bool {
        self.send(EncoderEvent::InputAvailable(index))
    }

    pub fn output_available(&self, index: usize, info: BufferInfo) -> bool {
        self.send(EncoderEvent::OutputAvailable { index, info })
    }

    pub fn format_changed(&self, format: MediaFormat) -> bool {
        self.send(EncoderEvent::FormatChanged(format))
    }

    pub fn error(&self, fault: EncoderFault) -> bool {
        self.send(EncoderEvent::Error(fault))
    }
}

/// A callback-driven (hardware) encoder instance
///
/// Mirrors the lifecycle of a platform codec: configure, start, exchange
/// indexed input and output buffers, then flush, stop and release.
pub trait HardwareEncoder: Send {
    fn name(&self) -> &str;

    /// Apply the format and register the event callback
    fn configure(&mut self, format: &MediaFormat, callback: EncoderCallback) -> Result<(), EncoderFault>;

    fn start(&mut self) -> Result<(), EncoderFault>;

    /// Byte capacity of the given input slot
    fn input_capacity(&self, index: usize) -> Result<usize, EncoderFault>;

    fn queue_input(
        &mut self,
        index: usize,
        data: &[u8],
        presentation_time_us: i64,
        flags: SampleFlags,
    ) -> Result<(), EncoderFault>;

    /// Borrow an output buffer; valid until it is released
    fn output_buffer(&self, index: usize) -> Result<&[u8], EncoderFault>;

    fn release_output(&mut self, index: usize) -> Result<(), EncoderFault>;

    /// Change the target bitrate of a running encoder
    fn set_bitrate(&mut self, bitrate: u32) -> Result<(), EncoderFault> {
        Err(anyhow::anyhow!(
            "{} does not support changing bitrate to {} at runtime",
            self.name(),
            bitrate
        ))
    }

    fn flush(&mut self) -> Result<(), EncoderFault>;

    fn stop(&mut self) -> Result<(), EncoderFault>;

    fn release(&mut self);
}

/// Capabilities advertised by an available encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecInfo {
    pub name: String,
    pub mime: String,
    pub hardware: bool,
    pub color_formats: Vec<ColorFormat>,
    pub bitrate_modes: Vec<BitrateMode>,
}

impl CodecInfo {
    pub fn supports_color(&self, color: ColorFormat) -> bool {
        self.color_formats.contains(&color)
    }

    pub fn supports_bitrate_mode(&self, mode: BitrateMode) -> bool {
        self.bitrate_modes.contains(&mode)
    }
}

/// Which encoders may be used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CodecPreference {
    /// Best compatible encoder, hardware first
    #[default]
    FirstCompatible,
    HardwareOnly,
    SoftwareOnly,
}

/// Enumerates and instantiates encoders
pub trait CodecRegistry: Send + Sync {
    fn encoders_for(&self, mime: &str) -> Vec<CodecInfo>;

    fn create(&self, info: &CodecInfo) -> Result<Box<dyn HardwareEncoder>, EncoderFault>;
}

/// A borrowed view of one encoded output buffer
///
/// `data` is the whole output buffer. The payload is the region described
/// by `info.offset` and `info.size`.
#[derive(Debug, Clone, Copy)]
pub struct EncodedSample<'a> {
    pub kind: TrackKind,
    pub data: &'a [u8],
    pub info: BufferInfo,
}

impl<'a> EncodedSample<'a> {
    pub fn payload(&self) -> &'a [u8] {
        let start = self.info.offset.min(self.data.len());
        let end = self
            .info
            .offset
            .saturating_add(self.info.size)
            .min(self.data.len());
        &self.data[start..end]
    }

    pub fn is_flagged_key_frame(&self) -> bool {
        self.info.flags.contains(SampleFlags::KEY_FRAME)
    }

    pub fn is_codec_config(&self) -> bool {
        self.info.flags.contains(SampleFlags::CODEC_CONFIG)
    }
}

/// Consumer of encoded samples and output formats
///
/// Called on the pump's worker thread. The sample's buffer is released back
/// to the encoder as soon as `on_sample` returns.
pub trait SampleSink: Send + Sync {
    fn on_sample(&self, sample: EncodedSample<'_>);

    fn on_format(&self, format: MediaFormat);
}
