use crate::buffer::BufferManager;
use crate::config::RecordingConfig;
use crate::notify::EventBus;
use crate::recording::media::{
    CodecResolver, InputSource, Recorder, RecorderFactory, RecorderSettings, SourceProvider,
    TrackState,
};
use crate::recording::timers::{TimerKind, Timers};
use crate::storage::{BufferStore, SessionState, SessionStore, VideoQuality};
use crate::utils::clock::{Clock, SystemClock};
use crate::Errors;
use anyhow::Result;
use crossbeam::channel::Receiver;
use log::{debug, error, info, warn};
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// Input source, recorder and codec interfaces
///
pub mod media;
/// Deadline table driving the engine
///
pub mod timers;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Inactive,
    Recording,
}

/// Notifications published by [`RecordingEngine`]
///
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StateChanged(RecordingState),
    Segment {
        size: usize,
        timestamp: u64,
        sequence_number: u64,
    },
    Error {
        message: String,
        recoverable: bool,
    },
    TrackRecovered,
    TrackFailed {
        message: String,
    },
    /// internal, not meant for the user
    CircuitBreakerRestart,
    VisibilityChanged {
        hidden: bool,
    },
    /// recording was stopped while in background; a fresh input source is needed
    NeedsResume,
    Timer {
        elapsed_ms: u64,
    },
}

/// Builder for [`RecordingEngine`]
///
pub struct RecordingEngineBuilder<B: BufferStore, Q: SessionStore> {
    buffer: Arc<BufferManager<B>>,
    sessions: Arc<Q>,
    recorders: Arc<dyn RecorderFactory>,
    sources: Arc<dyn SourceProvider>,
    codecs: Arc<dyn CodecResolver>,
    clock: Option<Arc<dyn Clock>>,
    config: RecordingConfig,
}

impl<B: BufferStore, Q: SessionStore> RecordingEngineBuilder<B, Q> {
    /// Creates a new builder
    ///
    /// # Parameters
    /// * `buffer` - receives every flushed segment
    /// * `sessions` - session record used for crash detection
    /// * `recorders` - creates encoders for an input source
    /// * `sources` - reacquires the input source when its track ends
    /// * `codecs` - resolves the output format, asked once per engine
    ///
    pub fn new(
        buffer: Arc<BufferManager<B>>,
        sessions: Arc<Q>,
        recorders: Arc<dyn RecorderFactory>,
        sources: Arc<dyn SourceProvider>,
        codecs: Arc<dyn CodecResolver>,
    ) -> Self {
        Self {
            buffer,
            sessions,
            recorders,
            sources,
            codecs,
            clock: None,
            config: RecordingConfig::default(),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn config(mut self, config: RecordingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> RecordingEngine<B, Q> {
        RecordingEngine {
            quality: self.config.quality,
            buffer: self.buffer,
            sessions: self.sessions,
            recorders: self.recorders,
            sources: self.sources,
            codecs: self.codecs,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            config: self.config,
            codec: OnceCell::new(),
            state: RecordingState::Inactive,
            source: None,
            recorder: None,
            start_time: 0,
            timers: Timers::new(),
            hidden: false,
            was_recording_before_background: false,
            events: EventBus::new(),
        }
    }
}

/// Segmented recording lifecycle: inactive -> recording -> inactive.
///
/// The engine is tick driven: every timer (segment flush, source watchdog, circuit
/// breaker, elapsed-time tick, background grace) is a deadline executed by
/// [`RecordingEngine::poll`]. Failure recovery and circuit-breaker restarts rebuild
/// the recorder while the state stays `Recording` and the elapsed-time origin is kept.
///
pub struct RecordingEngine<B: BufferStore, Q: SessionStore> {
    buffer: Arc<BufferManager<B>>,
    sessions: Arc<Q>,
    recorders: Arc<dyn RecorderFactory>,
    sources: Arc<dyn SourceProvider>,
    codecs: Arc<dyn CodecResolver>,
    clock: Arc<dyn Clock>,
    config: RecordingConfig,
    codec: OnceCell<String>,
    quality: VideoQuality,
    state: RecordingState,
    source: Option<Arc<dyn InputSource>>,
    recorder: Option<Box<dyn Recorder>>,
    start_time: u64,
    timers: Timers,
    hidden: bool,
    was_recording_before_background: bool,
    events: EventBus<EngineEvent>,
}

impl<B: BufferStore, Q: SessionStore> RecordingEngine<B, Q> {
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn quality(&self) -> VideoQuality {
        self.quality
    }

    /// Takes effect on the next recorder creation
    ///
    pub fn set_quality(&mut self, quality: VideoQuality) {
        self.quality = quality;
        info!("Quality set to {}", quality.preset().label);
    }

    pub fn elapsed_ms(&self) -> u64 {
        match self.state {
            RecordingState::Inactive => 0,
            RecordingState::Recording => self.clock.now_ms().saturating_sub(self.start_time),
        }
    }

    pub fn source_id(&self) -> Option<String> {
        self.source.as_ref().map(|s| s.id())
    }

    /// Resolved output format, once the first recording started
    ///
    pub fn codec(&self) -> Option<&str> {
        self.codec.get().map(String::as_str)
    }

    pub fn buffer(&self) -> &Arc<BufferManager<B>> {
        &self.buffer
    }

    fn resolve_codec(&self) -> Result<String> {
        let codec = self.codec.get_or_try_init(|| {
            let codec = self.codecs.resolve().ok_or(Errors::NoSupportedCodec)?;
            info!("Using codec {}", codec);
            Ok::<_, Errors>(codec)
        })?;
        Ok(codec.clone())
    }

    /// Starts recording from `source`.
    ///
    /// Fails unless the engine is inactive, and when no codec is supported or the
    /// recorder cannot be created.
    ///
    pub fn start(&mut self, source: Arc<dyn InputSource>) -> Result<()> {
        if self.state != RecordingState::Inactive {
            return Err(Errors::InvalidRecordingState(self.state).into());
        }
        let now = self.clock.now_ms();
        self.begin(source, now)?;
        self.start_time = now;
        self.state = RecordingState::Recording;
        let preset = self.quality.preset();
        info!(
            "Recording started: {} @ {:.1}Mbps",
            preset.label,
            preset.bitrate as f64 / 1_000_000.0
        );
        self.events
            .emit(EngineEvent::StateChanged(RecordingState::Recording));
        Ok(())
    }

    /// Creates the recorder on `source` and arms the recording timers
    ///
    fn begin(&mut self, source: Arc<dyn InputSource>, now: u64) -> Result<()> {
        let settings = RecorderSettings {
            codec: self.resolve_codec()?,
            bitrate: self.quality.preset().bitrate,
            timeslice_ms: self.config.flush_interval_ms,
        };
        let recorder = self.recorders.create(&source, &settings)?;
        debug!("Recorder created on source {}", source.id());
        self.recorder = Some(recorder);
        self.source = Some(source);

        let c = &self.config;
        self.timers.schedule(TimerKind::Flush, now + c.flush_interval_ms);
        self.timers
            .schedule(TimerKind::Watchdog, now + c.watchdog_interval_ms);
        self.timers
            .schedule(TimerKind::CircuitBreaker, now + c.circuit_breaker_interval_ms);
        self.timers.schedule(TimerKind::Tick, now + c.timer_tick_ms);
        Ok(())
    }

    /// Stops recording. Does nothing when already inactive.
    ///
    /// The recorder's remaining data is stored and the session record cleared.
    ///
    pub fn stop(&mut self) -> Result<()> {
        if self.state == RecordingState::Inactive {
            return Ok(());
        }
        info!("Stopping recording");
        self.halt(true)
    }

    fn halt(&mut self, finish_recorder: bool) -> Result<()> {
        self.timers.cancel_all();
        let recorder = self.recorder.take();
        if finish_recorder {
            self.finish_recorder(recorder);
        }
        self.source = None;
        self.state = RecordingState::Inactive;
        let cleared = self.sessions.clear_session();
        self.events
            .emit(EngineEvent::StateChanged(RecordingState::Inactive));
        cleared
    }

    /// Stops the recorder and keeps its remaining data
    ///
    fn finish_recorder(&mut self, recorder: Option<Box<dyn Recorder>>) {
        if let Some(mut recorder) = recorder {
            match recorder.finish() {
                Ok(data) if !data.is_empty() => self.store_segment(data),
                Ok(_) => (),
                Err(e) => warn!("Recorder did not finish cleanly: {}", e),
            }
        }
    }

    fn store_segment(&mut self, data: Vec<u8>) {
        let res = self.buffer.add_segment(data).and_then(|segment| {
            self.sessions.put_session(SessionState {
                recording: true,
                start_time: self.start_time,
                last_chunk_time: segment.timestamp,
                codec: self.codec.get().cloned().unwrap_or_default(),
                quality: self.quality,
            })?;
            Ok(segment)
        });
        match res {
            Ok(segment) => self.events.emit(EngineEvent::Segment {
                size: segment.size,
                timestamp: segment.timestamp,
                sequence_number: segment.sequence_number,
            }),
            Err(e) => {
                error!("Failed to save recording segment: {}", e);
                self.events.emit(EngineEvent::Error {
                    message: format!("Failed to save recording segment: {}", e),
                    recoverable: true,
                });
            }
        }
    }

    fn fail(&mut self, message: String) {
        error!("{}", message);
        self.events.emit(EngineEvent::Error {
            message,
            recoverable: false,
        });
        if let Err(e) = self.halt(false) {
            warn!("Session record not cleared: {}", e);
        }
    }

    /// Runs every timer due at the current time
    ///
    pub fn poll(&mut self) {
        let now = self.clock.now_ms();
        while let Some((kind, deadline)) = self.timers.pop_due(now) {
            match kind {
                TimerKind::Flush => self.on_flush(deadline, now),
                TimerKind::Watchdog => self.on_watchdog(deadline, now),
                TimerKind::CircuitBreaker => self.on_circuit_breaker(now),
                TimerKind::RestartSettle => self.on_restart_settle(now),
                TimerKind::Background => self.on_background_grace(),
                TimerKind::Tick => {
                    self.events.emit(EngineEvent::Timer {
                        elapsed_ms: now.saturating_sub(self.start_time),
                    });
                    self.timers
                        .reschedule(TimerKind::Tick, deadline, self.config.timer_tick_ms, now);
                }
            }
        }
    }

    fn on_flush(&mut self, deadline: u64, now: u64) {
        let Some(recorder) = self.recorder.as_mut() else {
            return;
        };
        match recorder.flush() {
            Ok(data) => {
                if !data.is_empty() {
                    self.store_segment(data);
                }
                self.timers.reschedule(
                    TimerKind::Flush,
                    deadline,
                    self.config.flush_interval_ms,
                    now,
                );
            }
            Err(e) => self.fail(format!("Recorder error: {}", e)),
        }
    }

    fn on_watchdog(&mut self, deadline: u64, now: u64) {
        let state = self.source.as_ref().map(|s| s.track_state());
        self.timers.reschedule(
            TimerKind::Watchdog,
            deadline,
            self.config.watchdog_interval_ms,
            now,
        );
        match state {
            Some(TrackState::Ended) => {
                warn!("Watchdog detected an ended track");
                self.recover(now);
            }
            Some(TrackState::Missing) => warn!("Input source has no video track"),
            Some(TrackState::Live) | None => (),
        }
    }

    /// Reports that the input track ended, recovery starts immediately
    ///
    pub fn notify_track_ended(&mut self) {
        if self.state == RecordingState::Recording && self.recorder.is_some() {
            warn!("Video track ended");
            let now = self.clock.now_ms();
            self.recover(now);
        }
    }

    fn recover(&mut self, now: u64) {
        warn!("Attempting track recovery");
        let recorder = self.recorder.take();
        self.finish_recorder(recorder);
        for kind in [
            TimerKind::Flush,
            TimerKind::Watchdog,
            TimerKind::CircuitBreaker,
            TimerKind::Tick,
        ] {
            self.timers.cancel(kind);
        }

        let preset = self.quality.preset();
        let res = self
            .sources
            .acquire(&preset)
            .and_then(|source| self.begin(source, now));
        match res {
            Ok(()) => {
                info!("Track recovered on source {}", self.source_id().unwrap_or_default());
                self.events.emit(EngineEvent::TrackRecovered);
            }
            Err(e) => {
                error!("Track recovery failed: {}", e);
                self.timers.cancel_all();
                self.source = None;
                self.state = RecordingState::Inactive;
                self.events.emit(EngineEvent::TrackFailed {
                    message: Errors::SourceUnavailable(e.to_string()).to_string(),
                });
                self.events
                    .emit(EngineEvent::StateChanged(RecordingState::Inactive));
            }
        }
    }

    fn on_circuit_breaker(&mut self, now: u64) {
        info!("Circuit breaker restart");
        self.events.emit(EngineEvent::CircuitBreakerRestart);
        if self.source.is_none() {
            warn!("No input source for the circuit breaker restart");
            return;
        }
        let recorder = self.recorder.take();
        self.finish_recorder(recorder);
        self.timers.cancel(TimerKind::Flush);
        self.timers.cancel(TimerKind::Watchdog);
        self.timers.cancel(TimerKind::Tick);
        self.timers
            .schedule(TimerKind::RestartSettle, now + self.config.restart_settle_ms);
    }

    fn on_restart_settle(&mut self, now: u64) {
        let Some(source) = self.source.clone() else {
            return;
        };
        match self.begin(source, now) {
            Ok(()) => info!("Circuit breaker restart complete"),
            Err(e) => self.fail(format!("Recorder restart failed: {}", e)),
        }
    }

    /// Applies the application visibility.
    ///
    /// Repeated hidden notifications keep the original grace deadline.
    /// While hidden for longer than the background grace period the recording is stopped
    /// with a recoverable error. Becoming visible after such a stop raises
    /// [`EngineEvent::NeedsResume`].
    ///
    pub fn set_visibility(&mut self, hidden: bool) {
        self.events.emit(EngineEvent::VisibilityChanged { hidden });
        let now = self.clock.now_ms();
        let was_hidden = std::mem::replace(&mut self.hidden, hidden);
        if hidden {
            if was_hidden {
                return;
            }
            debug!("Backgrounded");
            self.was_recording_before_background = self.state == RecordingState::Recording;
            self.timers.schedule(
                TimerKind::Background,
                now + self.config.background_grace_ms,
            );
        } else {
            debug!("Foregrounded");
            self.timers.cancel(TimerKind::Background);
            if self.was_recording_before_background && self.state == RecordingState::Inactive {
                info!("Recording needs to be resumed");
                self.events.emit(EngineEvent::NeedsResume);
            }
            self.was_recording_before_background = false;
        }
    }

    fn on_background_grace(&mut self) {
        if !self.hidden || self.state != RecordingState::Recording {
            return;
        }
        warn!("Stopping due to prolonged background state");
        if let Err(e) = self.halt(true) {
            warn!("Session record not cleared: {}", e);
        }
        self.events.emit(EngineEvent::Error {
            message: "Recording stopped - app in background too long".to_string(),
            recoverable: true,
        });
    }

    /// Reports a session that claims to be recording but has not stored a segment for
    /// longer than the crash threshold. Never modifies the record.
    ///
    pub fn check_for_interrupted_session(&self) -> Result<Option<SessionState>> {
        let now = self.clock.now_ms();
        Ok(self.sessions.get_session()?.filter(|s| {
            s.recording && now.saturating_sub(s.last_chunk_time) > self.config.crash_threshold_ms
        }))
    }
}
