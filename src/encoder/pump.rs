//! Encoder pump
//!
//! Owns one encoder and drives it from a dedicated worker thread. The
//! encoder reports buffer availability through an [`EncoderCallback`]; the
//! worker turns "input available" into "fetch a frame, stamp it, submit it"
//! and "output available" into "repair the timestamp, hand the sample to the
//! sink, release the buffer".
//!
//! Lifecycle: `Idle -> Prepared -> Running -> Stopped`, with
//! `Running -> Error -> Recovering -> Prepared -> Running` when an encoder
//! fault is recovered. `stop` during `Recovering` cancels the recovery.

use super::format::{MediaFormat, TrackKind};
use super::policy::FormatPolicy;
use super::recovery::{should_recover, EncoderErrorHook};
use super::session_clock::SessionClock;
use super::traits::{
    BufferInfo, CodecInfo, CodecPreference, CodecRegistry, EncodedSample, EncoderCallback,
    EncoderEvent, EncoderFault, HardwareEncoder, PumpMessage, SampleFlags, SampleSink,
};
use crate::capture::{Frame, FrameProducer, FrameQueue, SampleSource};
use crate::utils::error::{PrepareError, PumpError};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::broadcast;

/// Upper bound on waiting for the worker thread during `stop`
pub const STOP_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

const SOURCE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Lifecycle state of a pump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PumpState {
    Idle,
    Prepared,
    Running,
    Error,
    Recovering,
    Stopped,
}

impl std::fmt::Display for PumpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PumpState::Idle => "idle",
            PumpState::Prepared => "prepared",
            PumpState::Running => "running",
            PumpState::Error => "error",
            PumpState::Recovering => "recovering",
            PumpState::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// Events emitted by a pump
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpEvent {
    Prepared,
    Started,
    Stopped,
    /// The encoder was rebuilt after a fault
    Recovered,
    /// The error hook refused recovery; the pump has stopped
    RecoveryVetoed(String),
    /// Recovery was attempted and failed; the pump has stopped
    Failed(String),
    /// The encoder reported an asynchronous error
    CodecError(String),
}

/// Keeps output presentation times from going backwards
#[derive(Debug, Clone, Default)]
pub struct TimestampRepair {
    last_us: i64,
}

impl TimestampRepair {
    /// Clamp `pts` to the highest value seen so far
    pub fn fix(&mut self, pts: i64) -> i64 {
        if self.last_us > pts {
            self.last_us
        } else {
            self.last_us = pts;
            pts
        }
    }

    pub fn reset(&mut self) {
        self.last_us = 0;
    }
}

type SharedEncoder = Arc<Mutex<Box<dyn HardwareEncoder>>>;

struct Worker {
    handle: JoinHandle<()>,
    /// Disconnects when the worker thread exits
    done: Receiver<()>,
}

impl Worker {
    /// Join the worker, giving up after `timeout`
    fn join_timeout(self, timeout: Duration) -> bool {
        if self.handle.thread().id() == thread::current().id() {
            return false;
        }
        match self.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => false,
            _ => self.handle.join().is_ok(),
        }
    }
}

struct PumpControl {
    state: PumpState,
    encoder: Option<SharedEncoder>,
    worker: Option<Worker>,
    events_tx: Option<crossbeam_channel::Sender<PumpMessage>>,
    format: Option<MediaFormat>,
    codec: Option<CodecInfo>,
}

struct PumpInner<P: FormatPolicy> {
    tag: &'static str,
    kind: TrackKind,
    registry: Arc<dyn CodecRegistry>,
    sink: Arc<dyn SampleSink>,
    clock: Arc<SessionClock>,
    running: Arc<AtomicBool>,
    queue: Arc<FrameQueue>,
    policy: Mutex<P>,
    control: Mutex<PumpControl>,
    hook: RwLock<Option<Arc<dyn EncoderErrorHook>>>,
    source: Mutex<Option<Box<dyn SampleSource>>>,
    preference: RwLock<CodecPreference>,
    last_fault: Mutex<Option<String>>,
    recoveries: AtomicU64,
    events: broadcast::Sender<PumpEvent>,
}

/// Drives one encoder for one elementary stream
pub struct EncoderPump<P: FormatPolicy> {
    inner: Arc<PumpInner<P>>,
}

impl<P: FormatPolicy> Clone for EncoderPump<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: FormatPolicy> EncoderPump<P> {
    pub fn new(
        policy: P,
        registry: Arc<dyn CodecRegistry>,
        sink: Arc<dyn SampleSink>,
        clock: Arc<SessionClock>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(PumpInner {
                tag: policy.tag(),
                kind: policy.kind(),
                registry,
                sink,
                clock,
                running: Arc::new(AtomicBool::new(false)),
                queue: Arc::new(FrameQueue::new()),
                policy: Mutex::new(policy),
                control: Mutex::new(PumpControl {
                    state: PumpState::Idle,
                    encoder: None,
                    worker: None,
                    events_tx: None,
                    format: None,
                    codec: None,
                }),
                hook: RwLock::new(None),
                source: Mutex::new(None),
                preference: RwLock::new(CodecPreference::default()),
                last_fault: Mutex::new(None),
                recoveries: AtomicU64::new(0),
                events,
            }),
        }
    }

    pub fn tag(&self) -> &'static str {
        self.inner.tag
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn state(&self) -> PumpState {
        self.inner.control.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Handle capture threads use to push frames
    pub fn producer(&self) -> FrameProducer {
        FrameProducer::new(
            self.inner.tag,
            self.inner.queue.clone(),
            self.inner.running.clone(),
        )
    }

    /// Push one frame; false if the pump is not running or the queue is full
    pub fn offer(&self, frame: Frame) -> bool {
        self.producer().offer(frame)
    }

    /// Frames rejected by the queue in the current session
    pub fn dropped_frames(&self) -> u64 {
        self.inner.queue.dropped()
    }

    /// Install a pull-based source; it takes precedence over the queue
    pub fn set_source(&self, source: Option<Box<dyn SampleSource>>) {
        *self.inner.source.lock() = source;
    }

    pub fn set_error_hook(&self, hook: Option<Arc<dyn EncoderErrorHook>>) {
        *self.inner.hook.write() = hook;
    }

    pub fn set_codec_preference(&self, preference: CodecPreference) {
        *self.inner.preference.write() = preference;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PumpEvent> {
        self.inner.events.subscribe()
    }

    pub fn session_clock(&self) -> &Arc<SessionClock> {
        &self.inner.clock
    }

    /// The format the current encoder was configured with
    pub fn configured_format(&self) -> Option<MediaFormat> {
        self.inner.control.lock().format.clone()
    }

    /// The encoder chosen by the last successful prepare
    pub fn codec(&self) -> Option<CodecInfo> {
        self.inner.control.lock().codec.clone()
    }

    /// Description of the most recent processing fault
    pub fn last_fault(&self) -> Option<String> {
        self.inner.last_fault.lock().clone()
    }

    /// Number of successful crash recoveries
    pub fn recovery_count(&self) -> u64 {
        self.inner.recoveries.load(Ordering::SeqCst)
    }

    /// Select, configure and wire an encoder
    pub fn prepare(&self, config: P::Config) -> Result<(), PrepareError> {
        self.inner
            .prepare(Some(config), &[PumpState::Idle, PumpState::Stopped])
    }

    /// Begin encoding; `reset_pts` establishes the session baseline
    pub fn start(&self, reset_pts: bool) -> Result<(), PumpError> {
        self.inner.start(reset_pts)
    }

    /// Stop encoding and release the encoder; `reset_pts` clears the baseline
    ///
    /// Stopping while a crash recovery is in flight cancels the recovery.
    pub fn stop(&self, reset_pts: bool) -> Result<(), PumpError> {
        self.inner.stop_with(
            reset_pts,
            &[
                PumpState::Prepared,
                PumpState::Running,
                PumpState::Error,
                PumpState::Recovering,
            ],
            PumpState::Stopped,
            "stop",
        )
    }

    /// Rebuild the encoder from the stored configuration, keeping the baseline
    pub fn reset(&self) -> Result<(), PumpError> {
        self.reset_from(&[PumpState::Running, PumpState::Error])
    }

    fn reset_from(&self, allowed: &[PumpState]) -> Result<(), PumpError> {
        self.inner
            .stop_with(false, allowed, PumpState::Recovering, "reset")?;
        self.inner.prepare(None, &[PumpState::Recovering])?;
        self.inner.start(false)
    }

    pub(crate) fn with_policy<R>(&self, f: impl FnOnce(&mut P) -> R) -> R {
        f(&mut self.inner.policy.lock())
    }

    /// Run `f` against the encoder if the pump is running
    pub(crate) fn with_running_encoder<R>(
        &self,
        f: impl FnOnce(&mut dyn HardwareEncoder) -> R,
    ) -> Option<R> {
        let encoder = {
            let control = self.inner.control.lock();
            if control.state != PumpState::Running {
                return None;
            }
            control.encoder.clone()?
        };
        let mut guard = encoder.lock();
        Some(f(&mut **guard))
    }

    fn recover(&self, fault: String) {
        let tag = self.inner.tag;
        tracing::error!("{} encoder crashed, trying to recover it", tag);
        match self.reset_from(&[PumpState::Error]) {
            Ok(()) => {
                self.inner.recoveries.fetch_add(1, Ordering::SeqCst);
                tracing::info!("{} encoder recovered after: {}", tag, fault);
                let _ = self.inner.events.send(PumpEvent::Recovered);
            }
            // Stopped by the caller while recovering
            Err(PumpError::IllegalState { state, .. })
            | Err(PumpError::Prepare(PrepareError::IllegalState { state, .. })) => {
                tracing::debug!("{} recovery abandoned, pump is {}", tag, state);
            }
            Err(err) => {
                tracing::error!("{} encoder recovery failed: {}", tag, err);
                *self.inner.last_fault.lock() = Some(err.to_string());
                self.inner.force_stopped();
                let _ = self.inner.events.send(PumpEvent::Failed(err.to_string()));
            }
        }
    }

    fn abandon(&self, fault: String) {
        tracing::error!("{} encoder recovery vetoed: {}", self.inner.tag, fault);
        let _ = self
            .inner
            .stop_with(false, &[PumpState::Error], PumpState::Stopped, "stop");
        let _ = self.inner.events.send(PumpEvent::RecoveryVetoed(fault));
    }
}

impl<P: FormatPolicy> PumpInner<P> {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn illegal(&self, op: &'static str, state: PumpState) -> PumpError {
        PumpError::IllegalState {
            tag: self.tag.to_string(),
            op,
            state: state.to_string(),
        }
    }

    fn prepare(
        self: &Arc<Self>,
        config: Option<P::Config>,
        allowed: &[PumpState],
    ) -> Result<(), PrepareError> {
        let mut control = self.control.lock();
        if !allowed.contains(&control.state) {
            return Err(PrepareError::IllegalState {
                tag: self.tag.to_string(),
                state: control.state.to_string(),
            });
        }

        let (codec, format) = {
            let mut policy = self.policy.lock();
            if let Some(config) = config {
                policy.configure(config);
            }
            let candidates = self.registry.encoders_for(policy.mime());
            let preference = *self.preference.read();
            let codec = policy.select_codec(candidates, preference)?;
            let format = policy.build_format(&codec);
            (codec, format)
        };

        tracing::info!(
            "{} using encoder {} ({})",
            self.tag,
            codec.name,
            if codec.hardware { "hardware" } else { "software" }
        );

        let configure_failed = |fault: EncoderFault| PrepareError::ConfigureFailed {
            codec: codec.name.clone(),
            reason: format!("{:#}", fault),
        };

        let mut encoder = self.registry.create(&codec).map_err(configure_failed)?;
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        if let Err(fault) = encoder.configure(&format, EncoderCallback::new(events_tx.clone())) {
            encoder.release();
            return Err(configure_failed(fault));
        }

        let encoder: SharedEncoder = Arc::new(Mutex::new(encoder));
        let worker = match self.spawn_worker(encoder.clone(), events_rx) {
            Ok(worker) => worker,
            Err(err) => {
                encoder.lock().release();
                return Err(configure_failed(err.into()));
            }
        };

        self.running.store(false, Ordering::SeqCst);
        control.state = PumpState::Prepared;
        control.encoder = Some(encoder);
        control.worker = Some(worker);
        control.events_tx = Some(events_tx);
        control.format = Some(format);
        control.codec = Some(codec);
        drop(control);

        let _ = self.events.send(PumpEvent::Prepared);
        Ok(())
    }

    fn spawn_worker(
        self: &Arc<Self>,
        encoder: SharedEncoder,
        events_rx: Receiver<PumpMessage>,
    ) -> std::io::Result<Worker> {
        let pump = Arc::downgrade(self);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
        let handle = thread::Builder::new()
            .name(format!("{}-encoder", self.tag))
            .spawn(move || {
                let _done = done_tx;
                run_worker(pump, encoder, events_rx);
            })?;
        Ok(Worker {
            handle,
            done: done_rx,
        })
    }

    fn start(&self, reset_pts: bool) -> Result<(), PumpError> {
        let mut control = self.control.lock();
        if control.state != PumpState::Prepared {
            return Err(self.illegal("start", control.state));
        }
        let Some(encoder) = control.encoder.clone() else {
            return Err(self.illegal("start", control.state));
        };

        if reset_pts {
            self.clock.establish();
        }
        self.policy.lock().on_start(reset_pts, self.clock.now_ms());

        encoder
            .lock()
            .start()
            .map_err(|fault| PumpError::Codec(format!("{:#}", fault)))?;

        self.running.store(true, Ordering::SeqCst);
        control.state = PumpState::Running;
        if let Some(events_tx) = &control.events_tx {
            let _ = events_tx.send(PumpMessage::Wake);
        }
        drop(control);

        tracing::info!("{} encoder started", self.tag);
        let _ = self.events.send(PumpEvent::Started);
        Ok(())
    }

    fn stop_with(
        &self,
        reset_pts: bool,
        allowed: &[PumpState],
        end_state: PumpState,
        op: &'static str,
    ) -> Result<(), PumpError> {
        let (encoder, worker, events_tx) = {
            let mut control = self.control.lock();
            if !allowed.contains(&control.state) {
                return Err(self.illegal(op, control.state));
            }
            if control.state == PumpState::Recovering {
                tracing::info!("{} stop requested during recovery", self.tag);
            }
            self.running.store(false, Ordering::SeqCst);
            control.state = end_state;
            (
                control.encoder.take(),
                control.worker.take(),
                control.events_tx.take(),
            )
        };

        tracing::info!("{} stopping encoder", self.tag);

        // Wake a worker blocked on the queue
        self.queue.close();
        if let Some(events_tx) = events_tx {
            let _ = events_tx.send(PumpMessage::Shutdown);
        }

        if let Some(encoder) = &encoder {
            match encoder.try_lock_for(STOP_JOIN_TIMEOUT) {
                Some(mut encoder) => {
                    if let Err(fault) = encoder.flush() {
                        tracing::debug!("{} flush failed: {:#}", self.tag, fault);
                    }
                }
                None => tracing::warn!("{} encoder busy, skipping flush", self.tag),
            }
        }

        if let Some(worker) = worker {
            if !worker.join_timeout(STOP_JOIN_TIMEOUT) {
                tracing::warn!(
                    "{} worker did not exit within {:?}",
                    self.tag,
                    STOP_JOIN_TIMEOUT
                );
            }
        }

        self.queue.renew();
        self.policy.lock().on_stop();
        if reset_pts {
            self.clock.clear();
        }

        if let Some(encoder) = encoder {
            match encoder.try_lock_for(STOP_JOIN_TIMEOUT) {
                Some(mut encoder) => {
                    if let Err(fault) = encoder.stop() {
                        tracing::error!("{} error stopping encoder: {:#}", self.tag, fault);
                    }
                    encoder.release();
                }
                None => tracing::warn!("{} encoder busy, not released", self.tag),
            }
        }

        if end_state == PumpState::Stopped {
            tracing::info!("{} encoder stopped", self.tag);
            let _ = self.events.send(PumpEvent::Stopped);
        }
        Ok(())
    }

    /// Bring a pump whose recovery failed to a clean `Stopped`
    fn force_stopped(&self) {
        let state = self.control.lock().state;
        match state {
            PumpState::Prepared | PumpState::Running | PumpState::Error => {
                let _ = self.stop_with(false, &[state], PumpState::Stopped, "stop");
            }
            PumpState::Recovering => {
                self.running.store(false, Ordering::SeqCst);
                self.control.lock().state = PumpState::Stopped;
                let _ = self.events.send(PumpEvent::Stopped);
            }
            PumpState::Idle | PumpState::Stopped => {}
        }
    }

    /// Fetch, pace, stamp and submit one frame into input slot `index`
    ///
    /// Returns false when the slot was left unused and must be retried.
    fn process_input(&self, encoder: &SharedEncoder, index: usize) -> Result<bool, EncoderFault> {
        let Some(frame) = self.next_frame() else {
            return Ok(true);
        };
        if !self.is_running() {
            return Ok(true);
        }

        // Only `start(true)` sets the baseline; a cleared one is never re-armed here
        let Some(baseline) = self.clock.baseline() else {
            tracing::debug!("{} frame discarded, session baseline is not set", self.tag);
            return Ok(false);
        };
        let pts = self.policy.lock().calculate_pts(&frame, baseline);

        let mut encoder = encoder.lock();
        let capacity = encoder.input_capacity(index)?;
        let data = frame.data();
        let len = data.len().min(capacity);
        encoder.queue_input(index, &data[..len], pts, SampleFlags::empty())?;
        Ok(true)
    }

    /// Next frame that passes pacing, or `None` once the pump stops
    fn next_frame(&self) -> Option<Frame> {
        loop {
            let fetch_started = self.clock.now_ms();
            let frame = self.fetch_frame()?;

            let mut policy = self.policy.lock();
            let Some(limiter) = policy.pacing() else {
                return Some(frame);
            };
            let wait = limiter.wait_after_fetch(self.clock.now_ms(), fetch_started);
            if wait > 0 {
                drop(policy);
                if !self.is_running() {
                    return None;
                }
                thread::sleep(Duration::from_millis(wait as u64));
                continue;
            }
            limiter.mark_emitted(fetch_started);
            return Some(frame);
        }
    }

    fn fetch_frame(&self) -> Option<Frame> {
        loop {
            if !self.is_running() {
                return None;
            }
            let polled = self.source.lock().as_mut().map(|source| source.next_frame());
            match polled {
                Some(Some(frame)) => return Some(frame),
                Some(None) => thread::sleep(SOURCE_POLL_INTERVAL),
                None => return self.queue.take().ok(),
            }
        }
    }

    fn process_output(
        &self,
        encoder: &SharedEncoder,
        index: usize,
        mut info: BufferInfo,
        repair: &mut TimestampRepair,
    ) -> Result<(), EncoderFault> {
        info.presentation_time_us = repair.fix(info.presentation_time_us);

        let mut encoder = encoder.lock();
        {
            let data = encoder.output_buffer(index)?;
            self.sink.on_sample(EncodedSample {
                kind: self.kind,
                data,
                info,
            });
        }
        encoder.release_output(index)
    }

    fn report_codec_error(&self, fault: &EncoderFault) {
        tracing::error!("{} encoder reported error: {:#}", self.tag, fault);
        if let Some(hook) = self.hook.read().clone() {
            hook.on_codec_error(self.tag, fault);
        }
        let _ = self.events.send(PumpEvent::CodecError(format!("{:#}", fault)));
    }

    /// Route a processing fault to recovery; runs on the worker thread
    fn handle_fault(self: &Arc<Self>, fault: EncoderFault) {
        tracing::warn!("{} encoding error: {:#}", self.tag, fault);
        {
            let mut control = self.control.lock();
            if control.state != PumpState::Running {
                return;
            }
            control.state = PumpState::Error;
        }

        let message = format!("{:#}", fault);
        *self.last_fault.lock() = Some(message.clone());

        let hook = self.hook.read().clone();
        let recover = should_recover(hook.as_ref(), self.tag, &fault);

        // The worker cannot join itself, so teardown happens elsewhere
        let pump = EncoderPump {
            inner: self.clone(),
        };
        let spawned = thread::Builder::new()
            .name(format!("{}-recovery", self.tag))
            .spawn(move || {
                if recover {
                    pump.recover(message)
                } else {
                    pump.abandon(message)
                }
            });
        if let Err(err) = spawned {
            tracing::error!("{} could not spawn recovery thread: {}", self.tag, err);
            self.running.store(false, Ordering::SeqCst);
        }
    }
}

impl<P: FormatPolicy> Drop for PumpInner<P> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.queue.close();
        let control = self.control.get_mut();
        if let Some(events_tx) = control.events_tx.take() {
            let _ = events_tx.send(PumpMessage::Shutdown);
        }
        if let Some(encoder) = control.encoder.take() {
            if let Some(mut encoder) = encoder.try_lock() {
                let _ = encoder.stop();
                encoder.release();
            }
        }
    }
}

/// Worker loop: one per prepared encoder
///
/// Output and format events are handled first; pending input slots are
/// filled only when no other event is waiting.
fn run_worker<P: FormatPolicy>(
    pump: Weak<PumpInner<P>>,
    encoder: SharedEncoder,
    events_rx: Receiver<PumpMessage>,
) {
    let mut pending: VecDeque<usize> = VecDeque::new();
    let mut repair = TimestampRepair::default();

    loop {
        let input_ready = match pump.upgrade() {
            Some(inner) => inner.is_running() && !pending.is_empty(),
            None => break,
        };

        let message = if input_ready {
            match events_rx.try_recv() {
                Ok(message) => message,
                Err(TryRecvError::Empty) => {
                    let Some(inner) = pump.upgrade() else { break };
                    if let Some(index) = pending.pop_front() {
                        match inner.process_input(&encoder, index) {
                            Ok(true) => {}
                            Ok(false) => pending.push_front(index),
                            Err(fault) => {
                                inner.handle_fault(fault);
                                break;
                            }
                        }
                    }
                    continue;
                }
                Err(TryRecvError::Disconnected) => break,
            }
        } else {
            match events_rx.recv() {
                Ok(message) => message,
                Err(_) => break,
            }
        };

        let Some(inner) = pump.upgrade() else { break };
        let outcome = match message {
            PumpMessage::Shutdown => break,
            PumpMessage::Wake => Ok(()),
            PumpMessage::Encoder(EncoderEvent::InputAvailable(index)) => {
                pending.push_back(index);
                Ok(())
            }
            PumpMessage::Encoder(EncoderEvent::OutputAvailable { index, info }) => {
                inner.process_output(&encoder, index, info, &mut repair)
            }
            PumpMessage::Encoder(EncoderEvent::FormatChanged(format)) => {
                tracing::info!("{} output format changed: {}", inner.tag, format.mime);
                inner.sink.on_format(format);
                Ok(())
            }
            PumpMessage::Encoder(EncoderEvent::Error(fault)) => {
                inner.report_codec_error(&fault);
                Ok(())
            }
        };

        if let Err(fault) = outcome {
            inner.handle_fault(fault);
            break;
        }
    }
}
