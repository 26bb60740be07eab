//! Shared utilities

pub mod clock;
pub mod error;

pub use clock::{monotonic_now_us, ManualClock, MonotonicClock, SystemClock};
pub use error::{
    ConfigError, PipelineError, PipelineResult, PrepareError, PumpError, RecordError, WriterError,
};
