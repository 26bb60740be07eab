//! Pull-based frame sources

use super::frame::Frame;

/// A real-time frame getter polled by the encoder worker
///
/// When a pump has a source configured it is preferred over the queue.
/// `None` means "nothing ready yet"; the pump keeps polling until a frame
/// arrives or the pump is stopped, so implementations must return promptly.
pub trait SampleSource: Send {
    fn next_frame(&mut self) -> Option<Frame>;
}

impl<F> SampleSource for F
where
    F: FnMut() -> Option<Frame> + Send,
{
    fn next_frame(&mut self) -> Option<Frame> {
        self()
    }
}
