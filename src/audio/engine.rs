use crate::audio::loop_points::{LoopDescriptor, FRAME_SCALE};
use crate::audio::transform::downsample_in_place;
use crate::audio::{lock, OutputFormat, OutputSink, PcmDecoder, BYTES_PER_FRAME};
use crate::config::PlayerConfig;
use crate::error::{AudioError, SessionError};
use crate::models::{PlaybackState, PlayerEvent};

use log::{debug, error, info, trace, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Decoder shared between the engine thread and seek requests
pub type SharedDecoder = Arc<Mutex<Box<dyn PcmDecoder>>>;

#[derive(Debug)]
struct ControlState {
    state: PlaybackState,
    pause_requested: bool,
    finish_requested: bool,
    /// Binary auto-reset latch released by resume and stop
    wake: bool,
}

/// Transport state and control flags of one session.
///
/// Callers on any thread flip the flags; the engine thread observes them at
/// the top of every iteration and parks on the wake latch while paused.
#[derive(Debug)]
pub struct EngineControl {
    inner: Mutex<ControlState>,
    signal: Condvar,
}

impl Default for EngineControl {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineControl {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ControlState {
                state: PlaybackState::Stopped,
                pause_requested: false,
                finish_requested: false,
                wake: false,
            }),
            signal: Condvar::new(),
        }
    }

    pub fn state(&self) -> PlaybackState {
        lock(&self.inner).state
    }

    /// Request a pause. Only honoured while playing.
    pub fn pause(&self) -> bool {
        let mut inner = lock(&self.inner);
        if inner.state != PlaybackState::Playing || inner.finish_requested {
            return false;
        }
        inner.state = PlaybackState::Paused;
        inner.pause_requested = true;
        // A latch left over from an earlier resume must not cut this pause short.
        inner.wake = false;
        true
    }

    /// Clear a pending pause and release a parked engine.
    pub fn resume(&self) -> bool {
        let mut inner = lock(&self.inner);
        if inner.state != PlaybackState::Paused {
            return false;
        }
        inner.pause_requested = false;
        inner.state = PlaybackState::Playing;
        inner.wake = true;
        self.signal.notify_all();
        true
    }

    /// Ask the engine to finish. Always unblocks a paused engine.
    pub fn stop(&self) {
        let mut inner = lock(&self.inner);
        inner.finish_requested = true;
        inner.wake = true;
        self.signal.notify_all();
    }

    pub fn finish_requested(&self) -> bool {
        lock(&self.inner).finish_requested
    }

    fn set_playing(&self) {
        lock(&self.inner).state = PlaybackState::Playing;
    }

    fn set_stopped(&self) {
        let mut inner = lock(&self.inner);
        inner.state = PlaybackState::Stopped;
        inner.pause_requested = false;
        self.signal.notify_all();
    }

    /// Engine side: consume a pending pause request.
    fn take_pause_request(&self) -> bool {
        let mut inner = lock(&self.inner);
        if !inner.pause_requested {
            return false;
        }
        inner.pause_requested = false;
        self.signal.notify_all();
        true
    }

    /// Engine side: park until resumed or stopped. Returns false when the
    /// engine should finish.
    fn wait_for_wake(&self) -> bool {
        let inner = lock(&self.inner);
        let mut inner = self
            .signal
            .wait_while(inner, |s| !s.wake && !s.finish_requested)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.wake = false;
        if inner.finish_requested {
            return false;
        }
        inner.state = PlaybackState::Playing;
        true
    }

    /// Wait until no pause request is in flight. Returns false on timeout.
    fn wait_pause_settled(&self, timeout: Duration) -> bool {
        let inner = lock(&self.inner);
        let (_inner, result) = self
            .signal
            .wait_timeout_while(inner, timeout, |s| s.pause_requested && !s.finish_requested)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        !result.timed_out()
    }

    /// Wait for the engine to report `Stopped`. Returns false on timeout.
    pub fn wait_until_stopped(&self, timeout: Duration) -> bool {
        let inner = lock(&self.inner);
        let (_inner, result) = self
            .signal
            .wait_timeout_while(inner, timeout, |s| s.state != PlaybackState::Stopped)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        !result.timed_out()
    }
}

/// Buffer sizes and timing of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub format: OutputFormat,
    pub compression_rate: usize,
    pub read_buffer_bytes: usize,
    pub device_buffer_bytes: usize,
    pub progress_interval: u32,
    pub seek_debounce: Duration,
    pub stop_timeout: Duration,
}

impl SessionSettings {
    /// Derive session buffers from the device minimum.
    ///
    /// The working buffer is `min_buffer_bytes * buffer_multiplier`; the device
    /// gets four times that and each decoder read a quarter of it divided by
    /// the compression rate, rounded down to whole frames.
    pub fn from_config(config: &PlayerConfig, min_buffer_bytes: usize) -> Self {
        let compression_rate = config.compression_rate.max(2);
        let working = min_buffer_bytes.max(BYTES_PER_FRAME) * config.buffer_multiplier.max(1);
        let read = working / 4 / compression_rate;
        let read_buffer_bytes = (read - read % BYTES_PER_FRAME).max(BYTES_PER_FRAME);

        Self {
            format: Self::output_format(config),
            compression_rate,
            read_buffer_bytes,
            device_buffer_bytes: working * 4,
            progress_interval: config.progress_interval.max(1),
            seek_debounce: config.seek_debounce(),
            stop_timeout: config.stop_timeout(),
        }
    }

    pub fn output_format(config: &PlayerConfig) -> OutputFormat {
        OutputFormat::stereo_16(config.output_sample_rate())
    }
}

/// One playback session: a decoder, its loop boundaries and an output sink,
/// driven by a dedicated engine thread.
pub struct PlaybackEngine {
    control: Arc<EngineControl>,
    decoder: SharedDecoder,
    cursor: Arc<AtomicU64>,
    loop_points: LoopDescriptor,
    settings: SessionSettings,
    events: Sender<PlayerEvent>,
    sink: Option<Box<dyn OutputSink>>,
    worker: Option<thread::JoinHandle<Box<dyn OutputSink>>>,
    last_seek: Mutex<Option<Instant>>,
    started: bool,
}

impl PlaybackEngine {
    /// Build a session, sizing buffers from the sink's minimum buffer.
    ///
    /// `loop_points` must already be in engine byte offsets.
    pub fn new(
        decoder: SharedDecoder,
        loop_points: LoopDescriptor,
        sink: Box<dyn OutputSink>,
        config: &PlayerConfig,
        events: Sender<PlayerEvent>,
    ) -> Result<Self, AudioError> {
        let format = SessionSettings::output_format(config);
        let min_buffer = sink.min_buffer_bytes(&format);
        let settings = SessionSettings::from_config(config, min_buffer);
        Self::with_settings(decoder, loop_points, sink, settings, events)
    }

    pub fn with_settings(
        decoder: SharedDecoder,
        loop_points: LoopDescriptor,
        mut sink: Box<dyn OutputSink>,
        settings: SessionSettings,
        events: Sender<PlayerEvent>,
    ) -> Result<Self, AudioError> {
        sink.configure(&settings.format, settings.device_buffer_bytes)?;
        debug!(
            "Session configured: {} Hz, read buffer {} bytes, device buffer {} bytes",
            settings.format.sample_rate, settings.read_buffer_bytes, settings.device_buffer_bytes
        );

        Ok(Self {
            control: Arc::new(EngineControl::new()),
            decoder,
            cursor: Arc::new(AtomicU64::new(0)),
            loop_points,
            settings,
            events,
            sink: Some(sink),
            worker: None,
            last_seek: Mutex::new(None),
            started: false,
        })
    }

    pub fn control(&self) -> Arc<EngineControl> {
        Arc::clone(&self.control)
    }

    pub fn state(&self) -> PlaybackState {
        self.control.state()
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    /// Current read position in engine byte offsets
    pub fn position(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn loop_points(&self) -> LoopDescriptor {
        self.loop_points
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Spawn the engine thread. A session can only be started once.
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.started || self.control.state() != PlaybackState::Stopped {
            return Err(AudioError::InvalidState("session already started".to_string()));
        }
        let sink = self
            .sink
            .take()
            .ok_or_else(|| AudioError::InvalidState("output sink already released".to_string()))?;

        let worker = SessionWorker {
            control: Arc::clone(&self.control),
            decoder: Arc::clone(&self.decoder),
            cursor: Arc::clone(&self.cursor),
            loop_points: self.loop_points,
            settings: self.settings.clone(),
            events: self.events.clone(),
            sink,
        };

        self.control.set_playing();
        self.started = true;

        let handle = thread::Builder::new()
            .name("playback-engine".to_string())
            .spawn(move || {
                #[cfg(target_os = "macos")]
                raise_thread_priority();
                worker.run()
            })
            .map_err(|e| {
                self.control.set_stopped();
                AudioError::InitializationFailed(format!("Failed to spawn engine thread: {}", e))
            })?;

        self.worker = Some(handle);
        info!(
            "Playback session started (loop {}..{}, looping: {})",
            self.loop_points.start,
            self.loop_points.end,
            self.loop_points.is_looping()
        );
        Ok(())
    }

    pub fn pause(&self) -> bool {
        let paused = self.control.pause();
        if paused {
            debug!("Pause requested at {}", self.position());
        }
        paused
    }

    pub fn resume(&self) -> bool {
        self.control.resume()
    }

    pub fn stop(&self) {
        self.control.stop();
    }

    /// Move the read position to `position` (engine byte offset).
    ///
    /// Ignored while stopped, outside `[0, loop end)`, or within the debounce
    /// window of the previous accepted seek. Returns whether the decoder moved.
    pub fn seek(&self, position: u64) -> bool {
        if self.control.state() == PlaybackState::Stopped {
            return false;
        }
        if !self.loop_points.contains(position) {
            debug!("Seek to {} ignored: loop end is {}", position, self.loop_points.end);
            return false;
        }

        {
            let mut last_seek = lock(&self.last_seek);
            if let Some(previous) = *last_seek {
                if previous.elapsed() < self.settings.seek_debounce {
                    debug!("Seek to {} debounced", position);
                    return false;
                }
            }
            *last_seek = Some(Instant::now());
        }

        if !self.control.wait_pause_settled(self.settings.stop_timeout) {
            warn!("Seek to {} dropped: engine did not acknowledge pause", position);
            return false;
        }

        let mut decoder = lock(&self.decoder);
        if let Err(e) = decoder.seek_pcm(position / FRAME_SCALE) {
            warn!("Seek to {} failed: {}", position, e);
            return false;
        }
        let aligned = position - position % BYTES_PER_FRAME as u64;
        self.cursor.store(aligned, Ordering::Release);
        debug!("Seeked to {}", aligned);
        true
    }

    /// Stop the engine, wait for it to wind down and release the output sink.
    ///
    /// If the engine does not reach `Stopped` within `timeout` it is detached
    /// and left to release its sink on its own.
    pub fn shutdown(&mut self, timeout: Duration) {
        self.control.stop();

        if let Some(handle) = self.worker.take() {
            if !self.control.wait_until_stopped(timeout) {
                warn!(
                    "Playback engine did not stop within {:?}; detaching it",
                    timeout
                );
                return;
            }
            match handle.join() {
                Ok(sink) => self.sink = Some(sink),
                Err(_) => error!("Playback engine thread panicked"),
            }
        }

        if let Some(mut sink) = self.sink.take() {
            dispose_sink(sink.as_mut());
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        let timeout = self.settings.stop_timeout;
        self.shutdown(timeout);
    }
}

fn dispose_sink(sink: &mut dyn OutputSink) {
    if sink.is_running() {
        if let Err(e) = sink.stop() {
            warn!("Failed to stop output sink: {}", e);
        }
    }
    sink.release();
    trace!("Output sink released");
}

#[cfg(target_os = "macos")]
fn raise_thread_priority() {
    unsafe {
        let thread = libc::pthread_self();
        let mut policy: libc::c_int = 0;
        let mut param: libc::sched_param = std::mem::zeroed();

        if libc::pthread_getschedparam(thread, &mut policy, &mut param) == 0 {
            param.sched_priority = 47;
            let _ = libc::pthread_setschedparam(thread, libc::SCHED_RR, &param);
        }
    }
}

/// State owned by the engine thread for the lifetime of a session
struct SessionWorker {
    control: Arc<EngineControl>,
    decoder: SharedDecoder,
    cursor: Arc<AtomicU64>,
    loop_points: LoopDescriptor,
    settings: SessionSettings,
    events: Sender<PlayerEvent>,
    sink: Box<dyn OutputSink>,
}

impl SessionWorker {
    fn run(mut self) -> Box<dyn OutputSink> {
        let played_out = match self.play() {
            Ok(played_out) => {
                if played_out {
                    self.control.stop();
                }
                played_out
            }
            Err(fault) => {
                error!("Playback session failed: {}", fault);
                self.emit(PlayerEvent::Error(fault));
                self.control.stop();
                false
            }
        };

        self.sink.flush();
        if self.sink.is_running() {
            // A track that ran out plays its queued tail; a stop cuts it off
            if played_out {
                if let Err(e) = self.sink.drain() {
                    warn!("Output sink did not drain: {}", e);
                }
            }
            if let Err(e) = self.sink.stop() {
                warn!("Failed to stop output sink: {}", e);
            }
        }
        self.emit(PlayerEvent::Completed);
        self.control.set_stopped();
        info!("Playback session finished");
        self.sink
    }

    /// Returns whether the track played out, as opposed to being stopped.
    fn play(&mut self) -> Result<bool, SessionError> {
        let started_at = Instant::now();
        let mut buffer = vec![0u8; self.settings.read_buffer_bytes];
        let mut iteration: u64 = 0;

        {
            let mut decoder = lock(&self.decoder);
            decoder
                .seek_to_start()
                .map_err(|e| SessionError::Decode(e.code()))?;
            self.cursor.store(0, Ordering::Release);
        }
        self.sink.start().map_err(output_fault)?;

        while !self.control.finish_requested() {
            if self.control.take_pause_request() {
                self.sink.stop().map_err(output_fault)?;
                debug!("Engine paused at {}", self.cursor.load(Ordering::Acquire));
                if !self.control.wait_for_wake() {
                    break;
                }
                self.sink.start().map_err(output_fault)?;
                debug!("Engine resumed");
            }

            let (size, position) = {
                let mut decoder = lock(&self.decoder);
                let read = decoder
                    .read(&mut buffer)
                    .map_err(|e| SessionError::Decode(e.code()))?;
                if read == 0 {
                    debug!("Decoder reached end of stream");
                    return Ok(true);
                }
                if read > buffer.len() {
                    return Err(SessionError::BufferOverflow(read));
                }

                let cursor = self.cursor.load(Ordering::Acquire);
                let remaining = self.loop_points.end.saturating_sub(cursor);
                let size = (read as u64).min(remaining) as usize;
                let position = cursor + size as u64;
                self.cursor.store(position, Ordering::Release);
                (size, position)
            };

            iteration += 1;
            if iteration % self.settings.progress_interval as u64 == 0 {
                self.emit(PlayerEvent::Progress {
                    position,
                    elapsed: started_at.elapsed(),
                });
            }

            let out_len = downsample_in_place(&mut buffer, size, self.settings.compression_rate);
            if size > 0 {
                self.sink.flush();
                self.write_all(&buffer[..out_len])?;
            }

            if self.wrap_at_loop_end()? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn write_all(&mut self, mut data: &[u8]) -> Result<(), SessionError> {
        while !data.is_empty() {
            let written = self.sink.write(data).map_err(output_fault)?;
            if written == 0 {
                return Err(SessionError::Output("sink accepted no data".to_string()));
            }
            data = &data[written.min(data.len())..];
        }
        Ok(())
    }

    /// Wrap to the loop start once the cursor reaches the loop end.
    /// Returns true when the end of a non-looping track was reached instead.
    fn wrap_at_loop_end(&mut self) -> Result<bool, SessionError> {
        let mut decoder = lock(&self.decoder);
        let cursor = self.cursor.load(Ordering::Acquire);
        if cursor < self.loop_points.end {
            return Ok(false);
        }

        if !self.loop_points.is_looping() {
            debug!("Reached track end at {}", cursor);
            return Ok(true);
        }

        let start = self.loop_points.start;
        decoder
            .seek_pcm(start / FRAME_SCALE)
            .map_err(|e| SessionError::Decode(e.code()))?;
        self.cursor.store(start, Ordering::Release);
        drop(decoder);

        debug!("Loop end {} reached, wrapping to {}", cursor, start);
        self.emit(PlayerEvent::Loop {
            reset_position: start,
        });
        Ok(false)
    }

    fn emit(&self, event: PlayerEvent) {
        // Listeners may have gone away; playback carries on regardless.
        let _ = self.events.send(event);
    }
}

fn output_fault(err: AudioError) -> SessionError {
    SessionError::Output(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playing_control() -> Arc<EngineControl> {
        let control = Arc::new(EngineControl::new());
        control.set_playing();
        control
    }

    #[test]
    fn test_control_starts_stopped() {
        let control = EngineControl::new();
        assert_eq!(control.state(), PlaybackState::Stopped);
        assert!(!control.pause());
        assert!(!control.resume());
    }

    #[test]
    fn test_pause_sets_state_immediately() {
        let control = playing_control();

        assert!(control.pause());
        assert_eq!(control.state(), PlaybackState::Paused);
        assert!(!control.pause());
    }

    #[test]
    fn test_resume_before_pause_observed() {
        let control = playing_control();

        control.pause();
        control.resume();

        assert_eq!(control.state(), PlaybackState::Playing);
        assert!(!control.take_pause_request());
    }

    #[test]
    fn test_resume_releases_parked_engine() {
        let control = playing_control();
        control.pause();
        assert!(control.take_pause_request());

        let engine_side = Arc::clone(&control);
        let parked = thread::spawn(move || engine_side.wait_for_wake());

        thread::sleep(Duration::from_millis(20));
        assert!(control.resume());

        assert!(parked.join().unwrap());
        assert_eq!(control.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_stale_wake_does_not_cut_pause_short() {
        let control = playing_control();
        control.pause();
        control.resume();
        // The engine never consumed that wake; a fresh pause must still park.
        control.pause();
        assert!(control.take_pause_request());

        let engine_side = Arc::clone(&control);
        let parked = thread::spawn(move || engine_side.wait_for_wake());
        thread::sleep(Duration::from_millis(50));
        assert!(!parked.is_finished());

        control.stop();
        assert!(!parked.join().unwrap());
    }

    #[test]
    fn test_stop_unblocks_paused_engine() {
        let control = playing_control();
        control.pause();
        control.take_pause_request();

        let engine_side = Arc::clone(&control);
        let parked = thread::spawn(move || engine_side.wait_for_wake());

        control.stop();
        assert!(!parked.join().unwrap());
        assert!(control.finish_requested());
    }

    #[test]
    fn test_wait_until_stopped_times_out() {
        let control = playing_control();
        assert!(!control.wait_until_stopped(Duration::from_millis(10)));

        control.set_stopped();
        assert!(control.wait_until_stopped(Duration::from_millis(10)));
    }

    #[test]
    fn test_pause_settles_when_engine_takes_request() {
        let control = playing_control();
        control.pause();

        let engine_side = Arc::clone(&control);
        let engine = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            engine_side.take_pause_request()
        });

        assert!(control.wait_pause_settled(Duration::from_secs(2)));
        assert!(engine.join().unwrap());
    }

    #[test]
    fn test_session_settings_from_config() {
        let config = PlayerConfig::default();

        let settings = SessionSettings::from_config(&config, 256);

        // 256 * 8 = 2048 working bytes
        assert_eq!(settings.read_buffer_bytes, 256);
        assert_eq!(settings.device_buffer_bytes, 8192);
        assert_eq!(settings.format, OutputFormat::stereo_16(44100));
        assert_eq!(settings.progress_interval, 30);
        assert_eq!(settings.seek_debounce, Duration::from_millis(500));
    }

    #[test]
    fn test_read_buffer_is_frame_aligned() {
        let mut config = PlayerConfig::default();
        config.compression_rate = 6;
        config.buffer_multiplier = 1;

        let settings = SessionSettings::from_config(&config, 1000);

        // 1000 / 4 / 6 = 41, rounded down to 40
        assert_eq!(settings.read_buffer_bytes, 40);
        assert_eq!(settings.format.sample_rate, 14700);
    }
}
