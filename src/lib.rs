//! Record Pipeline - encode and mux orchestration for screen recordings.
//!
//! Raw frames enter bounded queues, encoder pumps drive hardware codecs
//! through a callback-fed event loop, and the recording controller
//! multiplexes the encoded streams into a container once a keyframe is
//! available.

pub mod capture;
pub mod config;
pub mod encoder;
pub mod recorder;
pub mod utils;

pub use capture::{Frame, FrameProducer, FrameQueue, SampleSource};
pub use config::PipelineConfig;
pub use encoder::{
    AudioEncoderPump, CodecRegistry, EncoderErrorHook, EncoderPump, HardwareEncoder, PumpEvent,
    PumpState, SessionClock, VideoEncoderPump,
};
pub use recorder::{ContainerWriter, RecordController, RecordPipeline, RecordStatus, RecordingSummary};
pub use utils::error::{PipelineError, PipelineResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides the default filter. Calling this more than once is
/// harmless; later calls leave the first subscriber in place.
pub fn init_logging() {
    let result = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "record_pipeline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if result.is_ok() {
        tracing::info!("Record pipeline v{}", env!("CARGO_PKG_VERSION"));
    }
}
