//! Capture-side plumbing
//!
//! Capture devices produce [`Frame`]s and hand them to an encoder either by
//! pushing into a bounded [`FrameQueue`] or by exposing a [`SampleSource`]
//! the encoder pulls from.

pub mod frame;
pub mod queue;
pub mod source;

pub use frame::Frame;
pub use queue::{FrameProducer, FrameQueue, QueueClosed, FRAME_QUEUE_CAPACITY};
pub use source::SampleSource;
