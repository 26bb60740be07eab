//! Raw capture frames
//!
//! A frame is an immutable unit of raw sample data (PCM bytes or a pixel
//! buffer) stamped with the monotonic instant it was captured.

use crate::utils::clock::monotonic_now_us;

/// One captured sample buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    buffer: Vec<u8>,
    offset: usize,
    size: usize,
    timestamp_us: i64,
}

impl Frame {
    /// Wrap a whole buffer, stamped with the current monotonic time
    pub fn new(buffer: Vec<u8>) -> Self {
        Self::with_timestamp(buffer, monotonic_now_us())
    }

    /// Wrap a whole buffer with an explicit capture timestamp
    pub fn with_timestamp(buffer: Vec<u8>, timestamp_us: i64) -> Self {
        let size = buffer.len();
        Self {
            buffer,
            offset: 0,
            size,
            timestamp_us,
        }
    }

    /// Wrap a region of a buffer
    pub fn slice(buffer: Vec<u8>, offset: usize, size: usize, timestamp_us: i64) -> Self {
        Self {
            buffer,
            offset,
            size,
            timestamp_us,
        }
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Capture instant in monotonic microseconds
    pub fn timestamp_us(&self) -> i64 {
        self.timestamp_us
    }

    /// The valid region of the buffer, clamped to the buffer's bounds
    pub fn data(&self) -> &[u8] {
        let start = self.offset.min(self.buffer.len());
        let end = self.offset.saturating_add(self.size).min(self.buffer.len());
        &self.buffer[start..end]
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_data_region() {
        let frame = Frame::slice(vec![0, 1, 2, 3, 4, 5], 2, 3, 42);
        assert_eq!(frame.data(), &[2, 3, 4]);
        assert_eq!(frame.timestamp_us(), 42);
        assert_eq!(frame.size(), 3);
    }

    #[test]
    fn test_frame_region_is_clamped() {
        let frame = Frame::slice(vec![0, 1, 2], 1, 10, 0);
        assert_eq!(frame.data(), &[1, 2]);

        let frame = Frame::slice(vec![0, 1, 2], 7, 1, 0);
        assert!(frame.is_empty());
    }

    #[test]
    fn test_new_frame_is_stamped() {
        let before = monotonic_now_us();
        let frame = Frame::new(vec![9; 16]);
        assert!(frame.timestamp_us() >= before);
        assert_eq!(frame.data().len(), 16);
    }
}
