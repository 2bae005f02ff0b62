use log::{debug, info, warn};
use std::path::Path;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use crate::audio::decoders::VorbisDecoder;
use crate::audio::engine::{EngineControl, PlaybackEngine, SharedDecoder};
use crate::audio::loop_points::LoopDescriptor;
use crate::audio::{lock, PcmDecoder, SinkFactory};
use crate::config::PlayerConfig;
use crate::error::{AudioError, PlayerError};
use crate::history::PlayHistory;
use crate::models::{PlaybackState, PlayerEvent, TrackSummary};

/// Session currently eligible for interruption
struct InterruptSlot {
    control: Mutex<Option<Arc<EngineControl>>>,
    events: Mutex<Sender<PlayerEvent>>,
}

/// Handle given to output sinks so device-level interruptions (a headset
/// unplugged, a device lost) pause the active session.
#[derive(Clone)]
pub struct InterruptHandle {
    slot: Arc<InterruptSlot>,
}

impl InterruptHandle {
    fn new(events: Sender<PlayerEvent>) -> Self {
        Self {
            slot: Arc::new(InterruptSlot {
                control: Mutex::new(None),
                events: Mutex::new(events),
            }),
        }
    }

    /// A handle not connected to any controller
    pub fn detached() -> Self {
        let (events, _) = std::sync::mpsc::channel();
        Self::new(events)
    }

    /// Pause the registered session if it is playing
    pub fn interrupt(&self) -> bool {
        let control = lock(&self.slot.control).clone();
        match control {
            Some(control) if control.pause() => {
                info!("Playback interrupted by the output device; pausing");
                let _ = lock(&self.slot.events).send(PlayerEvent::StateChanged(PlaybackState::Paused));
                true
            }
            _ => false,
        }
    }

    fn register(&self, control: Option<Arc<EngineControl>>) {
        *lock(&self.slot.control) = control;
    }
}

impl std::fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptHandle")
            .field("registered", &lock(&self.slot.control).is_some())
            .finish()
    }
}

struct LoadedTrack {
    decoder: SharedDecoder,
    summary: TrackSummary,
}

struct TransportInner {
    track: Option<LoadedTrack>,
    session: Option<PlaybackEngine>,
    history: PlayHistory,
}

/// Public playback API.
///
/// Owns the selected track and at most one live playback session. Every
/// `play` from a non-paused state tears the previous session down before the
/// next one claims the output device.
pub struct TransportController {
    config: PlayerConfig,
    sinks: Box<dyn SinkFactory>,
    events: Sender<PlayerEvent>,
    interrupts: InterruptHandle,
    inner: Mutex<TransportInner>,
}

impl TransportController {
    pub fn new(config: PlayerConfig, sinks: Box<dyn SinkFactory>, events: Sender<PlayerEvent>) -> Self {
        let history = PlayHistory::load(&config.history_file, config.history_limit);
        Self::with_history(config, sinks, events, history)
    }

    pub fn with_history(
        config: PlayerConfig,
        sinks: Box<dyn SinkFactory>,
        events: Sender<PlayerEvent>,
        history: PlayHistory,
    ) -> Self {
        Self {
            interrupts: InterruptHandle::new(events.clone()),
            config,
            sinks,
            events,
            inner: Mutex::new(TransportInner {
                track: None,
                session: None,
                history,
            }),
        }
    }

    /// Open `path`, read its loop markers and remember it in the history.
    /// Playback is not started.
    pub fn select_file(&self, path: &Path) -> Result<TrackSummary, PlayerError> {
        let decoder = VorbisDecoder::open(path)?;
        if decoder.sample_rate() != self.config.native_sample_rate {
            warn!(
                "{} is {} Hz; it will play at {} Hz",
                path.display(),
                decoder.sample_rate(),
                self.config.native_sample_rate
            );
        }

        let label = path.display().to_string();
        let mut inner = lock(&self.inner);
        let summary = self.load_source(&mut inner, Box::new(decoder), &label);
        inner.history.record(&label);
        Ok(summary)
    }

    /// Select an already opened decoder, e.g. an in-memory source
    pub fn select_source(&self, decoder: Box<dyn PcmDecoder>, label: &str) -> TrackSummary {
        let mut inner = lock(&self.inner);
        self.load_source(&mut inner, decoder, label)
    }

    fn load_source(
        &self,
        inner: &mut TransportInner,
        decoder: Box<dyn PcmDecoder>,
        label: &str,
    ) -> TrackSummary {
        self.teardown(inner);

        let loop_points =
            LoopDescriptor::from_comments(decoder.comments(), decoder.total_samples()).to_byte_offsets();
        let summary = TrackSummary {
            label: label.to_string(),
            loop_points,
            duration: decoder.total_duration(),
            sample_rate: decoder.sample_rate(),
        };
        info!(
            "Selected {} (loop {}..{}, total {})",
            label, loop_points.start, loop_points.end, loop_points.total
        );

        inner.track = Some(LoadedTrack {
            decoder: Arc::new(Mutex::new(decoder)),
            summary: summary.clone(),
        });
        self.emit(PlayerEvent::Loaded(summary.clone()));
        summary
    }

    /// Resume a paused session, or start a fresh one from the beginning.
    pub fn play(&self) -> Result<(), PlayerError> {
        let mut inner = lock(&self.inner);

        if let Some(session) = &inner.session {
            if session.state() == PlaybackState::Paused && session.resume() {
                self.emit(PlayerEvent::StateChanged(PlaybackState::Playing));
                return Ok(());
            }
        }

        let (decoder, loop_points) = match &inner.track {
            Some(track) => (Arc::clone(&track.decoder), track.summary.loop_points),
            None => return Err(AudioError::NoTrackSelected.into()),
        };

        self.teardown(&mut inner);

        let sink = self.sinks.create(self.interrupts.clone())?;
        let mut engine =
            PlaybackEngine::new(decoder, loop_points, sink, &self.config, self.events.clone())?;
        engine.start()?;
        self.interrupts.register(Some(engine.control()));
        inner.session = Some(engine);

        self.emit(PlayerEvent::StateChanged(PlaybackState::Playing));
        Ok(())
    }

    pub fn pause(&self) -> bool {
        let inner = lock(&self.inner);
        let paused = inner.session.as_ref().map(|s| s.pause()).unwrap_or(false);
        if paused {
            self.emit(PlayerEvent::StateChanged(PlaybackState::Paused));
        }
        paused
    }

    pub fn resume(&self) -> bool {
        let inner = lock(&self.inner);
        let resumed = inner.session.as_ref().map(|s| s.resume()).unwrap_or(false);
        if resumed {
            self.emit(PlayerEvent::StateChanged(PlaybackState::Playing));
        }
        resumed
    }

    /// Ask the active session to finish. Does not wait for it.
    pub fn stop(&self) {
        let inner = lock(&self.inner);
        if let Some(session) = &inner.session {
            session.stop();
            debug!("Stop requested");
        }
    }

    /// Seek the active session to an engine byte offset
    pub fn seek(&self, position: u64) -> bool {
        let inner = lock(&self.inner);
        inner.session.as_ref().map(|s| s.seek(position)).unwrap_or(false)
    }

    pub fn state(&self) -> PlaybackState {
        lock(&self.inner)
            .session
            .as_ref()
            .map(|s| s.state())
            .unwrap_or(PlaybackState::Stopped)
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    /// Read position of the active session in engine byte offsets
    pub fn position(&self) -> Option<u64> {
        lock(&self.inner).session.as_ref().map(|s| s.position())
    }

    pub fn current_track(&self) -> Option<TrackSummary> {
        lock(&self.inner).track.as_ref().map(|t| t.summary.clone())
    }

    pub fn loop_points(&self) -> Option<LoopDescriptor> {
        lock(&self.inner).track.as_ref().map(|t| t.summary.loop_points)
    }

    pub fn history(&self) -> Vec<String> {
        lock(&self.inner).history.entries().map(str::to_string).collect()
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupts.clone()
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Stop and release the active session, waiting for it to wind down
    pub fn shutdown(&self) {
        let mut inner = lock(&self.inner);
        self.teardown(&mut inner);
    }

    fn teardown(&self, inner: &mut TransportInner) {
        self.interrupts.register(None);
        if let Some(mut session) = inner.session.take() {
            session.shutdown(self.config.stop_timeout());
        }
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for TransportController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
