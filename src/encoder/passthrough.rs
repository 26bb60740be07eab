//! Software passthrough encoder
//!
//! A [`HardwareEncoder`] that copies each input buffer into an output
//! buffer unchanged. Video payloads are wrapped in a single Annex-B NAL unit
//! (IDR on sync frames) so downstream keyframe detection sees a realistic
//! bitstream. Useful for dry runs and tests where no platform codec exists.

use super::format::{
    BitrateMode, ColorFormat, FormatParams, MediaFormat, MIME_AAC, MIME_H264, MIME_H265,
    PREFERRED_COLOR_FORMATS,
};
use super::traits::{
    BufferInfo, CodecInfo, CodecRegistry, EncoderCallback, EncoderFault, HardwareEncoder,
    SampleFlags,
};
use anyhow::{anyhow, bail};

const INPUT_SLOTS: usize = 2;
const OUTPUT_SLOTS: usize = 8;
const DEFAULT_AUDIO_INPUT_CAPACITY: usize = 64 * 1024;

const START_CODE: [u8; 4] = [0, 0, 0, 1];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NalFlavor {
    H264,
    H265,
}

impl NalFlavor {
    fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            MIME_H264 => Some(Self::H264),
            MIME_H265 => Some(Self::H265),
            _ => None,
        }
    }

    fn header(self, sync: bool) -> &'static [u8] {
        match (self, sync) {
            (Self::H264, true) => &[0x65],
            (Self::H264, false) => &[0x41],
            // IDR_W_RADL and TRAIL_R
            (Self::H265, true) => &[0x26, 0x01],
            (Self::H265, false) => &[0x02, 0x01],
        }
    }

    /// SPS/PPS (and VPS for H.265) in Annex-B framing
    fn parameter_sets(self) -> Vec<Vec<u8>> {
        match self {
            Self::H264 => vec![
                annexb(&[0x67, 0x42, 0x00, 0x1f]),
                annexb(&[0x68, 0xce, 0x3c, 0x80]),
            ],
            Self::H265 => vec![
                annexb(&[0x40, 0x01, 0x0c]),
                annexb(&[0x42, 0x01, 0x01]),
                annexb(&[0x44, 0x01, 0xc1]),
            ],
        }
    }
}

fn annexb(nal: &[u8]) -> Vec<u8> {
    [&START_CODE[..], nal].concat()
}

struct OutputSlot {
    data: Vec<u8>,
}

/// Copies input to output, one output buffer per input buffer
pub struct PassthroughEncoder {
    name: String,
    format: Option<MediaFormat>,
    callback: Option<EncoderCallback>,
    outputs: Vec<Option<OutputSlot>>,
    input_capacity: usize,
    sync_interval: u64,
    flavor: Option<NalFlavor>,
    bitrate: u32,
    produced: u64,
    started: bool,
}

impl PassthroughEncoder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format: None,
            callback: None,
            outputs: (0..OUTPUT_SLOTS).map(|_| None).collect(),
            input_capacity: 0,
            sync_interval: 1,
            flavor: None,
            bitrate: 0,
            produced: 0,
            started: false,
        }
    }

    /// Current target bitrate in bits per second
    pub fn bitrate(&self) -> u32 {
        self.bitrate
    }

    fn callback(&self) -> Result<&EncoderCallback, EncoderFault> {
        self.callback
            .as_ref()
            .ok_or_else(|| anyhow!("{} is not configured", self.name))
    }
}

impl HardwareEncoder for PassthroughEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&mut self, format: &MediaFormat, callback: EncoderCallback) -> Result<(), EncoderFault> {
        match &format.params {
            FormatParams::Video(video) => {
                if video.width == 0 || video.height == 0 {
                    bail!("invalid video size {}x{}", video.width, video.height);
                }
                self.input_capacity = usize::try_from(video.width)
                    .ok()
                    .zip(usize::try_from(video.height).ok())
                    .and_then(|(width, height)| width.checked_mul(height))
                    .and_then(|pixels| pixels.checked_mul(3))
                    .map(|bytes| bytes / 2)
                    .ok_or_else(|| anyhow!("video size {}x{} is too large", video.width, video.height))?;
                self.sync_interval =
                    (u64::from(video.frame_rate) * u64::from(video.i_frame_interval)).max(1);
                self.bitrate = video.bitrate;
            }
            FormatParams::Audio(audio) => {
                if audio.sample_rate == 0 || audio.channel_count == 0 {
                    bail!("invalid audio format {}Hz/{}ch", audio.sample_rate, audio.channel_count);
                }
                self.input_capacity = if audio.max_input_size > 0 {
                    audio.max_input_size
                } else {
                    DEFAULT_AUDIO_INPUT_CAPACITY
                };
                self.sync_interval = 1;
                self.bitrate = audio.bitrate;
            }
        }
        self.flavor = NalFlavor::from_mime(&format.mime);
        self.format = Some(format.clone());
        self.callback = Some(callback);
        Ok(())
    }

    fn start(&mut self) -> Result<(), EncoderFault> {
        let format = self
            .format
            .clone()
            .ok_or_else(|| anyhow!("{} started before configure", self.name))?;
        let codec_config = match self.flavor {
            Some(flavor) => flavor.parameter_sets(),
            // AAC-LC AudioSpecificConfig
            None => vec![vec![0x12, 0x10]],
        };

        self.started = true;
        self.produced = 0;
        let callback = self.callback()?;
        callback.format_changed(format.with_codec_config(codec_config));
        for index in 0..INPUT_SLOTS {
            callback.input_available(index);
        }
        Ok(())
    }

    fn input_capacity(&self, index: usize) -> Result<usize, EncoderFault> {
        if index >= INPUT_SLOTS {
            bail!("input index {} out of range", index);
        }
        Ok(self.input_capacity)
    }

    fn queue_input(
        &mut self,
        index: usize,
        data: &[u8],
        presentation_time_us: i64,
        _flags: SampleFlags,
    ) -> Result<(), EncoderFault> {
        if !self.started {
            bail!("{} is not started", self.name);
        }
        if index >= INPUT_SLOTS {
            bail!("input index {} out of range", index);
        }
        let slot = self
            .outputs
            .iter()
            .position(Option::is_none)
            .ok_or_else(|| anyhow!("{} has no free output buffer", self.name))?;

        let sync = self.produced % self.sync_interval == 0;
        self.produced += 1;

        let payload = match self.flavor {
            Some(flavor) => [&START_CODE[..], flavor.header(sync), data].concat(),
            None => data.to_vec(),
        };
        let info = BufferInfo {
            offset: 0,
            size: payload.len(),
            presentation_time_us,
            flags: if sync {
                SampleFlags::KEY_FRAME
            } else {
                SampleFlags::empty()
            },
        };
        self.outputs[slot] = Some(OutputSlot { data: payload });

        let callback = self.callback()?;
        callback.output_available(slot, info);
        callback.input_available(index);
        Ok(())
    }

    fn output_buffer(&self, index: usize) -> Result<&[u8], EncoderFault> {
        self.outputs
            .get(index)
            .and_then(Option::as_ref)
            .map(|slot| slot.data.as_slice())
            .ok_or_else(|| anyhow!("output buffer {} is not pending", index))
    }

    fn release_output(&mut self, index: usize) -> Result<(), EncoderFault> {
        match self.outputs.get_mut(index).and_then(Option::take) {
            Some(_) => Ok(()),
            None => bail!("output buffer {} released twice", index),
        }
    }

    fn set_bitrate(&mut self, bitrate: u32) -> Result<(), EncoderFault> {
        self.bitrate = bitrate;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), EncoderFault> {
        self.outputs.iter_mut().for_each(|slot| *slot = None);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EncoderFault> {
        self.started = false;
        Ok(())
    }

    fn release(&mut self) {
        self.started = false;
        self.callback = None;
        self.outputs.iter_mut().for_each(|slot| *slot = None);
    }
}

/// Registry offering passthrough encoders for H.264, H.265 and AAC
#[derive(Debug, Clone)]
pub struct PassthroughRegistry {
    codecs: Vec<CodecInfo>,
}

impl PassthroughRegistry {
    pub fn new() -> Self {
        let mut color_formats = PREFERRED_COLOR_FORMATS.to_vec();
        color_formats.push(ColorFormat::Yuv420Flexible);
        let codec = |name: &str, mime: &str, color_formats: Vec<ColorFormat>| CodecInfo {
            name: name.to_string(),
            mime: mime.to_string(),
            hardware: false,
            color_formats,
            bitrate_modes: vec![BitrateMode::Cbr, BitrateMode::Vbr],
        };
        Self {
            codecs: vec![
                codec("passthrough.avc", MIME_H264, color_formats.clone()),
                codec("passthrough.hevc", MIME_H265, color_formats),
                codec("passthrough.aac", MIME_AAC, Vec::new()),
            ],
        }
    }

    /// A registry with no encoders at all
    pub fn empty() -> Self {
        Self { codecs: Vec::new() }
    }

    /// Advertise an additional encoder, created as a passthrough instance
    pub fn with_codec(mut self, info: CodecInfo) -> Self {
        self.codecs.push(info);
        self
    }
}

impl Default for PassthroughRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CodecRegistry for PassthroughRegistry {
    fn encoders_for(&self, mime: &str) -> Vec<CodecInfo> {
        self.codecs
            .iter()
            .filter(|info| info.mime == mime)
            .cloned()
            .collect()
    }

    fn create(&self, info: &CodecInfo) -> Result<Box<dyn HardwareEncoder>, EncoderFault> {
        Ok(Box::new(PassthroughEncoder::new(info.name.clone())))
    }
}
