//! Recording pipeline
//!
//! Wires the encoder pumps of one recording to a [`RecordController`]:
//! encoded samples and output formats flow from each pump's worker straight
//! into the controller, and every pump shares one session clock.

use super::controller::RecordController;
use super::state::{RecordStatus, RecordingSummary};
use super::writer::ContainerWriter;
use crate::capture::FrameProducer;
use crate::config::PipelineConfig;
use crate::encoder::{
    AudioEncoderPump, AudioPolicy, CodecRegistry, EncoderErrorHook, EncoderPump, FormatPolicy,
    PumpState, SampleSink, SessionClock, VideoEncoderPump, VideoPolicy,
};
use crate::utils::clock::{MonotonicClock, SystemClock};
use crate::utils::error::{PipelineResult, PumpError, RecordError};
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct RecordPipeline {
    config: PipelineConfig,
    controller: Arc<RecordController>,
    clock: Arc<SessionClock>,
    video: Option<VideoEncoderPump>,
    audio: Option<AudioEncoderPump>,
}

impl RecordPipeline {
    /// Build a pipeline on the process-wide monotonic clock
    pub fn new(config: PipelineConfig, registry: Arc<dyn CodecRegistry>) -> PipelineResult<Self> {
        Self::with_clock(config, registry, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: PipelineConfig,
        registry: Arc<dyn CodecRegistry>,
        clock: Arc<dyn MonotonicClock>,
    ) -> PipelineResult<Self> {
        config.validate()?;
        let layout = config.layout()?;

        let controller = Arc::new(RecordController::new(clock.clone()));
        controller.set_layout(layout)?;
        let session = Arc::new(SessionClock::new(clock));
        let sink: Arc<dyn SampleSink> = controller.clone();

        let video = config.video.as_ref().map(|video| {
            controller.set_video_mime(video.mime.clone());
            let pump = VideoEncoderPump::new(
                VideoPolicy::new(video.clone()),
                registry.clone(),
                sink.clone(),
                session.clone(),
            );
            pump.set_codec_preference(config.codec_preference);
            pump
        });
        let audio = config.audio.as_ref().map(|audio| {
            let pump = AudioEncoderPump::new(
                AudioPolicy::new(audio.clone()),
                registry.clone(),
                sink.clone(),
                session.clone(),
            );
            pump.set_codec_preference(config.codec_preference);
            pump
        });

        tracing::info!("Recording pipeline created ({:?})", layout);
        Ok(Self {
            config,
            controller,
            clock: session,
            video,
            audio,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn controller(&self) -> &Arc<RecordController> {
        &self.controller
    }

    pub fn video(&self) -> Option<&VideoEncoderPump> {
        self.video.as_ref()
    }

    pub fn audio(&self) -> Option<&AudioEncoderPump> {
        self.audio.as_ref()
    }

    pub fn video_producer(&self) -> Option<FrameProducer> {
        self.video.as_ref().map(EncoderPump::producer)
    }

    pub fn audio_producer(&self) -> Option<FrameProducer> {
        self.audio.as_ref().map(EncoderPump::producer)
    }

    pub fn status(&self) -> RecordStatus {
        self.controller.status()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordStatus> {
        self.controller.subscribe()
    }

    /// Install the same crash hook on every pump
    pub fn set_error_hook(&self, hook: Option<Arc<dyn EncoderErrorHook>>) {
        if let Some(video) = &self.video {
            video.set_error_hook(hook.clone());
        }
        if let Some(audio) = &self.audio {
            audio.set_error_hook(hook);
        }
    }

    /// Prepare every pump that is not prepared yet
    pub fn prepare(&self) -> PipelineResult<()> {
        if let Some(video) = &self.video {
            prepare_pump(video)?;
        }
        if let Some(audio) = &self.audio {
            prepare_pump(audio)?;
        }
        Ok(())
    }

    /// Start a recording into `writer`
    pub fn start(&self, writer: Box<dyn ContainerWriter>) -> PipelineResult<()> {
        if self.controller.is_running() {
            return Err(RecordError::IllegalState {
                op: "start recording",
                status: self.controller.status().to_string(),
            }
            .into());
        }
        // Encoders left running by a failed container start
        self.stop_pumps_if(|state| matches!(state, PumpState::Running | PumpState::Error));
        self.prepare()?;

        // Formats arrive again when the encoders start
        self.controller.reset_formats();
        self.controller.start_record(writer)?;

        // Audio first, so its format is known before the first video keyframe
        let started = self.start_pumps();
        if let Err(err) = started {
            tracing::error!("Failed to start encoders: {}", err);
            self.controller.stop_record();
            self.stop_pumps();
            self.clock.clear();
            return Err(err.into());
        }
        Ok(())
    }

    fn start_pumps(&self) -> Result<(), PumpError> {
        if let Some(audio) = &self.audio {
            audio.start(true)?;
        }
        if let Some(video) = &self.video {
            video.start(true)?;
        }
        Ok(())
    }

    pub fn pause(&self) -> PipelineResult<()> {
        Ok(self.controller.pause_record()?)
    }

    pub fn resume(&self) -> PipelineResult<()> {
        Ok(self.controller.resume_record()?)
    }

    /// Finalize the container and stop every pump
    pub fn stop(&self) -> Option<RecordingSummary> {
        let summary = self.controller.stop_record();
        self.stop_pumps();
        self.clock.clear();
        if let Some(summary) = &summary {
            tracing::info!(
                "Recording {} finished: {} video / {} audio samples",
                summary.id,
                summary.video_samples,
                summary.audio_samples
            );
        }
        summary
    }

    fn stop_pumps(&self) {
        self.stop_pumps_if(|state| !matches!(state, PumpState::Idle | PumpState::Stopped));
    }

    fn stop_pumps_if(&self, should_stop: impl Fn(PumpState) -> bool) {
        if let Some(video) = &self.video {
            stop_pump(video, &should_stop);
        }
        if let Some(audio) = &self.audio {
            stop_pump(audio, &should_stop);
        }
    }
}

fn prepare_pump<P: FormatPolicy>(pump: &EncoderPump<P>) -> PipelineResult<()> {
    if matches!(pump.state(), PumpState::Idle | PumpState::Stopped) {
        let config = pump.with_policy(|policy| policy.config().clone());
        pump.prepare(config)?;
    }
    Ok(())
}

/// Stop without clearing the shared baseline; the caller clears it once
fn stop_pump<P: FormatPolicy>(pump: &EncoderPump<P>, should_stop: &impl Fn(PumpState) -> bool) {
    if !should_stop(pump.state()) {
        return;
    }
    if let Err(err) = pump.stop(false) {
        tracing::warn!("Failed to stop {} pump: {}", pump.tag(), err);
    }
}

impl Drop for RecordPipeline {
    fn drop(&mut self) {
        if self.controller.is_running() {
            self.controller.stop_record();
        }
        self.stop_pumps();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Frame;
    use crate::encoder::testing::wait_until;
    use crate::encoder::{PassthroughRegistry, TrackKind, VideoConfig, MIME_H264};
    use crate::recorder::keyframe::is_key_frame;
    use crate::recorder::writer::MemoryWriter;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            video: Some(VideoConfig {
                width: 16,
                height: 16,
                fps: 10,
                ..VideoConfig::default()
            }),
            ..PipelineConfig::default()
        }
    }

    /// Feed video at ~33 fps and audio every 20 ms until `done` is set
    fn spawn_capture(pipeline: &RecordPipeline, done: Arc<AtomicBool>) -> thread::JoinHandle<()> {
        let video = pipeline.video_producer();
        let audio = pipeline.audio_producer();
        thread::spawn(move || {
            let mut tick = 0u64;
            while !done.load(Ordering::SeqCst) {
                if let Some(audio) = &audio {
                    audio.offer(Frame::new(vec![0; 1024]));
                }
                if let Some(video) = &video {
                    if tick % 3 == 0 {
                        video.offer(Frame::new(vec![0x80; 16 * 16 * 3 / 2]));
                    }
                }
                tick += 1;
                thread::sleep(Duration::from_millis(10));
            }
        })
    }

    #[test]
    fn test_records_audio_and_video() {
        let pipeline =
            RecordPipeline::new(small_config(), Arc::new(PassthroughRegistry::new())).unwrap();
        let writer = MemoryWriter::new();
        pipeline.start(Box::new(writer.clone())).unwrap();
        assert_eq!(pipeline.video().unwrap().state(), PumpState::Running);

        let done = Arc::new(AtomicBool::new(false));
        let capture = spawn_capture(&pipeline, done.clone());
        let recorded = wait_until(|| {
            writer.samples_of(TrackKind::Video).len() >= 2
                && !writer.samples_of(TrackKind::Audio).is_empty()
        });
        done.store(true, Ordering::SeqCst);
        capture.join().unwrap();
        assert!(recorded);

        let summary = pipeline.stop().unwrap();
        assert_eq!(pipeline.status(), RecordStatus::Stopped);
        assert!(writer.is_finalized());
        assert_eq!(writer.tracks().len(), 2);
        assert!(summary.video_samples >= 2);

        let video = writer.samples_of(TrackKind::Video);
        assert!(is_key_frame(MIME_H264, &video[0].data));
        assert!(video
            .windows(2)
            .all(|w| w[0].timing.presentation_time_us <= w[1].timing.presentation_time_us));
        assert_eq!(pipeline.video().unwrap().state(), PumpState::Stopped);
        assert_eq!(pipeline.video().unwrap().session_clock().baseline(), None);
    }

    #[test]
    fn test_audio_only_pipeline() {
        let config = PipelineConfig {
            video: None,
            ..PipelineConfig::default()
        };
        let pipeline = RecordPipeline::new(config, Arc::new(PassthroughRegistry::new())).unwrap();
        assert!(pipeline.video_producer().is_none());

        let writer = MemoryWriter::new();
        pipeline.start(Box::new(writer.clone())).unwrap();
        assert!(wait_until(|| pipeline.status() == RecordStatus::Recording));

        let producer = pipeline.audio_producer().unwrap();
        for _ in 0..5 {
            assert!(producer.offer(Frame::new(vec![0; 512])));
        }
        assert!(wait_until(|| writer.samples_of(TrackKind::Audio).len() == 5));

        pipeline.pause().unwrap();
        pipeline.resume().unwrap();
        assert!(producer.offer(Frame::new(vec![0; 512])));
        assert!(wait_until(|| writer.samples_of(TrackKind::Audio).len() == 6));
        assert_eq!(pipeline.status(), RecordStatus::Recording);

        let summary = pipeline.stop().unwrap();
        assert_eq!(summary.audio_samples, 6);
        assert_eq!(summary.pause_count, 1);
    }

    #[test]
    fn test_restart_after_stop() {
        let pipeline =
            RecordPipeline::new(small_config(), Arc::new(PassthroughRegistry::new())).unwrap();
        pipeline.start(Box::new(MemoryWriter::new())).unwrap();
        pipeline.stop();

        let writer = MemoryWriter::new();
        pipeline.start(Box::new(writer.clone())).unwrap();
        assert_eq!(pipeline.status(), RecordStatus::Started);
        assert_eq!(pipeline.audio().unwrap().state(), PumpState::Running);
        pipeline.stop();
    }

    #[test]
    fn test_missing_encoder_fails_start() {
        let pipeline =
            RecordPipeline::new(small_config(), Arc::new(PassthroughRegistry::empty())).unwrap();
        assert!(pipeline.start(Box::new(MemoryWriter::new())).is_err());
        assert_eq!(pipeline.status(), RecordStatus::Stopped);
    }
}
