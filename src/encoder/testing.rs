//! Test doubles shared by the encoder and recorder tests

use super::format::MediaFormat;
use super::passthrough::{PassthroughEncoder, PassthroughRegistry};
use super::traits::{
    CodecInfo, CodecRegistry, EncodedSample, EncoderCallback, EncoderFault, HardwareEncoder,
    SampleFlags, SampleSink,
};
use super::TrackKind;
use anyhow::anyhow;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Poll `condition` for up to three seconds
pub(crate) fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[derive(Debug, Clone)]
pub(crate) struct CollectedSample {
    pub kind: TrackKind,
    pub pts: i64,
    pub flags: SampleFlags,
    pub payload: Vec<u8>,
}

#[derive(Default)]
pub(crate) struct CollectingSink {
    samples: Mutex<Vec<CollectedSample>>,
    formats: Mutex<Vec<MediaFormat>>,
}

impl CollectingSink {
    pub fn samples(&self) -> Vec<CollectedSample> {
        self.samples.lock().clone()
    }

    pub fn formats(&self) -> Vec<MediaFormat> {
        self.formats.lock().clone()
    }
}

impl SampleSink for CollectingSink {
    fn on_sample(&self, sample: EncodedSample<'_>) {
        self.samples.lock().push(CollectedSample {
            kind: sample.kind,
            pts: sample.info.presentation_time_us,
            flags: sample.info.flags,
            payload: sample.payload().to_vec(),
        });
    }

    fn on_format(&self, format: MediaFormat) {
        self.formats.lock().push(format);
    }
}

/// Passthrough registry whose encoders fail on the nth submitted input
pub(crate) struct FlakyRegistry {
    inner: PassthroughRegistry,
    fail_at: u64,
    submitted: Arc<AtomicU64>,
    created: AtomicUsize,
    callback: Arc<Mutex<Option<EncoderCallback>>>,
    stop_delay: Duration,
}

impl FlakyRegistry {
    /// Zero never fails
    pub fn failing_input_at(fail_at: u64) -> Self {
        Self {
            inner: PassthroughRegistry::new(),
            fail_at,
            submitted: Arc::new(AtomicU64::new(0)),
            created: AtomicUsize::new(0),
            callback: Arc::new(Mutex::new(None)),
            stop_delay: Duration::ZERO,
        }
    }

    /// Encoders take `delay` to stop
    pub fn with_stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = delay;
        self
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Emit an asynchronous error from the most recently configured encoder
    pub fn report_async_error(&self, message: &str) {
        if let Some(callback) = self.callback.lock().as_ref() {
            callback.error(anyhow!(message.to_string()));
        }
    }
}

impl CodecRegistry for FlakyRegistry {
    fn encoders_for(&self, mime: &str) -> Vec<CodecInfo> {
        self.inner.encoders_for(mime)
    }

    fn create(&self, info: &CodecInfo) -> Result<Box<dyn HardwareEncoder>, EncoderFault> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FlakyEncoder {
            inner: PassthroughEncoder::new(info.name.clone()),
            fail_at: self.fail_at,
            submitted: self.submitted.clone(),
            callback: self.callback.clone(),
            stop_delay: self.stop_delay,
        }))
    }
}

struct FlakyEncoder {
    inner: PassthroughEncoder,
    fail_at: u64,
    submitted: Arc<AtomicU64>,
    callback: Arc<Mutex<Option<EncoderCallback>>>,
    stop_delay: Duration,
}

impl HardwareEncoder for FlakyEncoder {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn configure(&mut self, format: &MediaFormat, callback: EncoderCallback) -> Result<(), EncoderFault> {
        *self.callback.lock() = Some(callback.clone());
        self.inner.configure(format, callback)
    }

    fn start(&mut self) -> Result<(), EncoderFault> {
        self.inner.start()
    }

    fn input_capacity(&self, index: usize) -> Result<usize, EncoderFault> {
        self.inner.input_capacity(index)
    }

    fn queue_input(
        &mut self,
        index: usize,
        data: &[u8],
        presentation_time_us: i64,
        flags: SampleFlags,
    ) -> Result<(), EncoderFault> {
        let submitted = self.submitted.fetch_add(1, Ordering::SeqCst) + 1;
        if submitted == self.fail_at {
            return Err(anyhow!("injected encoder fault on input {}", submitted));
        }
        self.inner.queue_input(index, data, presentation_time_us, flags)
    }

    fn output_buffer(&self, index: usize) -> Result<&[u8], EncoderFault> {
        self.inner.output_buffer(index)
    }

    fn release_output(&mut self, index: usize) -> Result<(), EncoderFault> {
        self.inner.release_output(index)
    }

    fn flush(&mut self) -> Result<(), EncoderFault> {
        self.inner.flush()
    }

    fn stop(&mut self) -> Result<(), EncoderFault> {
        if !self.stop_delay.is_zero() {
            std::thread::sleep(self.stop_delay);
        }
        self.inner.stop()
    }

    fn release(&mut self) {
        self.inner.release()
    }
}
