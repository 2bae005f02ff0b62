//! Scripted decoders and recording sinks for driving playback sessions
//! without audio hardware.


use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::audio::engine::{SessionSettings, SharedDecoder};
use crate::audio::{lock, InterruptHandle, OutputFormat, OutputSink, PcmDecoder, SinkFactory};
use crate::error::{AudioError, DecodeError};
use crate::models::PlayerEvent;

/// Decoder producing `max_reads` full buffers of a byte ramp, then end of stream
pub struct PatternDecoder {
    reads: u64,
    max_reads: u64,
    fail_on_read: Option<(u64, i64)>,
    seeks: Arc<Mutex<Vec<u64>>>,
    comments: Vec<String>,
    total_samples: u64,
    sample_rate: u32,
}

impl PatternDecoder {
    pub fn new(max_reads: u64) -> Self {
        Self {
            reads: 0,
            max_reads,
            fail_on_read: None,
            seeks: Arc::new(Mutex::new(Vec::new())),
            comments: Vec::new(),
            total_samples: 0,
            sample_rate: 44_100,
        }
    }

    /// Never runs dry
    pub fn endless() -> Self {
        Self::new(u64::MAX)
    }

    /// Report `code` on the `read_number`-th read (1-based)
    pub fn failing_on(mut self, read_number: u64, code: i64) -> Self {
        self.fail_on_read = Some((read_number, code));
        self
    }

    pub fn with_loop(mut self, start: u64, length: u64, total_samples: u64) -> Self {
        self.comments = vec![
            format!("LOOPSTART={}", start),
            format!("LOOPLENGTH={}", length),
        ];
        self.total_samples = total_samples;
        self
    }

    pub fn at_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Sample offsets passed to `seek_pcm`, shared with the test
    pub fn seek_log(&self) -> Arc<Mutex<Vec<u64>>> {
        Arc::clone(&self.seeks)
    }

    pub fn shared(self) -> SharedDecoder {
        Arc::new(Mutex::new(Box::new(self)))
    }
}

impl PcmDecoder for PatternDecoder {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, DecodeError> {
        self.reads += 1;
        if let Some((read_number, code)) = self.fail_on_read {
            if self.reads == read_number {
                return Err(DecodeError::Native { code });
            }
        }
        if self.reads > self.max_reads {
            return Ok(0);
        }

        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = i as u8;
        }
        Ok(buffer.len())
    }

    fn seek_pcm(&mut self, sample: u64) -> Result<(), DecodeError> {
        lock(&self.seeks).push(sample);
        Ok(())
    }

    fn seek_to_start(&mut self) -> Result<(), DecodeError> {
        Ok(())
    }

    fn total_samples(&self) -> u64 {
        self.total_samples
    }

    fn total_duration(&self) -> Duration {
        Duration::from_secs_f64(self.total_samples as f64 / self.sample_rate as f64)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn comments(&self) -> Vec<String> {
        self.comments.clone()
    }
}

/// Calls observed by a [`RecordingSink`]
#[derive(Debug, Default, Clone)]
pub struct SinkLog {
    pub configured: Option<(OutputFormat, usize)>,
    pub starts: usize,
    pub stops: usize,
    pub flushes: usize,
    pub releases: usize,
    pub bytes_written: usize,
    pub running: bool,
    pub drains: usize,
    /// Written bytes not yet drained
    pub queued: usize,
    /// `queued` at each call to `stop`
    pub queued_at_stop: Vec<usize>,
}

/// Sink that accepts everything and records what the engine did with it
pub struct RecordingSink {
    log: Arc<Mutex<SinkLog>>,
    write_delay: Option<Duration>,
}

impl RecordingSink {
    pub fn new() -> (Self, Arc<Mutex<SinkLog>>) {
        let log = Arc::new(Mutex::new(SinkLog::default()));
        (
            Self {
                log: Arc::clone(&log),
                write_delay: None,
            },
            log,
        )
    }

    /// Sink whose writes take `delay`, keeping a session alive long enough to
    /// poke at it
    pub fn slow(delay: Duration) -> (Self, Arc<Mutex<SinkLog>>) {
        let (mut sink, log) = Self::new();
        sink.write_delay = Some(delay);
        (sink, log)
    }
}

impl OutputSink for RecordingSink {
    fn min_buffer_bytes(&self, _format: &OutputFormat) -> usize {
        256
    }

    fn configure(&mut self, format: &OutputFormat, buffer_bytes: usize) -> Result<(), AudioError> {
        lock(&self.log).configured = Some((*format, buffer_bytes));
        Ok(())
    }

    fn start(&mut self) -> Result<(), AudioError> {
        let mut log = lock(&self.log);
        log.starts += 1;
        log.running = true;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, AudioError> {
        if let Some(delay) = self.write_delay {
            std::thread::sleep(delay);
        }
        let mut log = lock(&self.log);
        log.bytes_written += data.len();
        log.queued += data.len();
        Ok(data.len())
    }

    fn flush(&mut self) {
        lock(&self.log).flushes += 1;
    }

    fn drain(&mut self) -> Result<(), AudioError> {
        let mut log = lock(&self.log);
        log.drains += 1;
        log.queued = 0;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        let mut log = lock(&self.log);
        log.stops += 1;
        let queued = log.queued;
        log.queued_at_stop.push(queued);
        log.running = false;
        Ok(())
    }

    fn release(&mut self) {
        let mut log = lock(&self.log);
        log.releases += 1;
        log.running = false;
    }

    fn is_running(&self) -> bool {
        lock(&self.log).running
    }
}

/// Hands out recording sinks and keeps the log of every one created
#[derive(Default)]
pub struct RecordingSinkFactory {
    write_delay: Option<Duration>,
    logs: Arc<Mutex<Vec<Arc<Mutex<SinkLog>>>>>,
}

impl RecordingSinkFactory {
    pub fn slow(delay: Duration) -> Self {
        Self {
            write_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn logs(&self) -> Arc<Mutex<Vec<Arc<Mutex<SinkLog>>>>> {
        Arc::clone(&self.logs)
    }
}

impl SinkFactory for RecordingSinkFactory {
    fn create(&self, _interrupts: InterruptHandle) -> Result<Box<dyn OutputSink>, AudioError> {
        let (sink, log) = match self.write_delay {
            Some(delay) => RecordingSink::slow(delay),
            None => RecordingSink::new(),
        };
        lock(&self.logs).push(log);
        Ok(Box::new(sink))
    }
}

/// 256-byte reads, a progress report on every iteration and short timeouts
pub fn test_settings() -> SessionSettings {
    SessionSettings {
        format: OutputFormat::stereo_16(44_100),
        compression_rate: 2,
        read_buffer_bytes: 256,
        device_buffer_bytes: 8192,
        progress_interval: 1,
        seek_debounce: Duration::from_millis(500),
        stop_timeout: Duration::from_secs(2),
    }
}

/// Receive events until `Completed` or the deadline passes
pub fn collect_until_completed(events: &Receiver<PlayerEvent>, timeout: Duration) -> Vec<PlayerEvent> {
    let deadline = Instant::now() + timeout;
    let mut collected = Vec::new();

    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(remaining) {
            Ok(event) => {
                let done = event == PlayerEvent::Completed;
                collected.push(event);
                if done {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    collected
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
