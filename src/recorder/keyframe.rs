//! Keyframe detection for Annex-B bitstreams
//!
//! An access unit can carry several NAL units (parameter sets, SEI, then the
//! slice), so every NAL header in the buffer is inspected rather than only
//! the first one.

use crate::encoder::format::{MIME_H264, MIME_H265};

const H264_IDR: u8 = 5;
const H265_IDR_W_RADL: u8 = 19;
const H265_IDR_N_LP: u8 = 20;

/// Header bytes of every NAL unit following a 3- or 4-byte start code
fn nal_headers(data: &[u8]) -> impl Iterator<Item = u8> + '_ {
    data.windows(3)
        .enumerate()
        .filter(|(_, window)| window[..] == [0, 0, 1])
        .filter_map(move |(pos, _)| data.get(pos + 3).copied())
}

fn h264_nal_type(header: u8) -> u8 {
    header & 0x1f
}

fn h265_nal_type(header: u8) -> u8 {
    (header >> 1) & 0x3f
}

/// Whether an encoded video buffer contains an IDR picture
pub fn is_key_frame(mime: &str, data: &[u8]) -> bool {
    match mime {
        MIME_H264 => nal_headers(data).any(|header| h264_nal_type(header) == H264_IDR),
        MIME_H265 => nal_headers(data).any(|header| {
            matches!(h265_nal_type(header), H265_IDR_W_RADL | H265_IDR_N_LP)
        }),
        _ => false,
    }
}
