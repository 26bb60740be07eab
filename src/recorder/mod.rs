//! Recording module
//!
//! Turns encoded samples into a container file:
//! - keyframe detection on Annex-B payloads
//! - the [`ContainerWriter`] boundary and an in-memory writer
//! - the keyframe-gated [`RecordController`] state machine
//! - [`RecordPipeline`], which wires encoder pumps to a controller

pub mod controller;
pub mod keyframe;
pub mod pipeline;
pub mod state;
pub mod writer;

pub use controller::RecordController;
pub use keyframe::is_key_frame;
pub use pipeline::RecordPipeline;
pub use state::{RecordStatus, RecordingSummary, TrackLayout};
pub use writer::{ContainerWriter, MemoryWriter, SampleTiming, TrackId, WrittenSample};
