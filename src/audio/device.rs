use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, StreamConfig, SupportedBufferSize};
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError};
use std::thread;
use std::time::Duration;

use crate::audio::transport::InterruptHandle;
use crate::audio::{lock, OutputFormat, OutputSink, SinkFactory};
use crate::error::AudioError;

/// Longest a blocking write waits for the device to drain before giving up
const WRITE_STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Minimum device buffer, queried once per process
static MIN_BUFFER_BYTES: OnceLock<usize> = OnceLock::new();

/// Names of all output devices on the default host
pub fn list_output_devices() -> Result<Vec<String>, AudioError> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::InitializationFailed(format!("Failed to enumerate devices: {}", e)))?;

    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

/// Pick the named output device, falling back to the host default
pub fn select_output_device(preferred: Option<&str>) -> Result<Device, AudioError> {
    let host = cpal::default_host();

    if let Some(name) = preferred {
        let devices = host
            .output_devices()
            .map_err(|e| AudioError::InitializationFailed(format!("Failed to enumerate devices: {}", e)))?;
        for device in devices {
            if device.name().map(|n| n == name).unwrap_or(false) {
                return Ok(device);
            }
        }
        warn!("Output device '{}' not found, using the default device", name);
    }

    host.default_output_device()
        .ok_or_else(|| AudioError::DeviceNotFound {
            device: preferred.unwrap_or("default").to_string(),
        })
}

/// Shortest buffer that survives scheduling jitter: 20 ms, at least 256 frames
fn latency_floor_frames(format: &OutputFormat) -> usize {
    (format.sample_rate / 50).max(256) as usize
}

/// Device callback periods the PCM queue holds at minimum
const MIN_QUEUE_PERIODS: usize = 4;

/// The device reports its smallest callback period, which is far below an
/// underrun-free buffer on most hosts, so it only ever raises the floor.
fn min_buffer_frames(reported_min: Option<u32>, format: &OutputFormat) -> usize {
    let floor = latency_floor_frames(format);
    reported_min.map_or(floor, |min| (min as usize).max(floor))
}

fn query_min_buffer_bytes(device: Option<&Device>, format: &OutputFormat) -> usize {
    let reported = device
        .and_then(|d| d.default_output_config().ok())
        .and_then(|config| match config.buffer_size() {
            SupportedBufferSize::Range { min, .. } if *min > 0 => Some(*min),
            _ => None,
        });

    min_buffer_frames(reported, format) * format.bytes_per_frame()
}

/// Queue capacity for a requested device buffer, never below a few periods
fn queue_capacity(format: &OutputFormat, buffer_bytes: usize) -> usize {
    let periods = MIN_QUEUE_PERIODS * latency_floor_frames(format) * format.bytes_per_frame();
    buffer_bytes.max(periods)
}

#[derive(Debug)]
struct PcmQueue {
    bytes: VecDeque<u8>,
    capacity: usize,
    running: bool,
}

/// Byte queue shared between `write` and the device callback
#[derive(Debug)]
struct SinkShared {
    queue: Mutex<PcmQueue>,
    space: Condvar,
}

impl SinkShared {
    fn new() -> Self {
        Self {
            queue: Mutex::new(PcmQueue {
                bytes: VecDeque::new(),
                capacity: 0,
                running: false,
            }),
            space: Condvar::new(),
        }
    }

    /// Queue `data`, blocking while full. Fails when the consumer makes no
    /// room within `stall_timeout`.
    fn push(&self, data: &[u8], stall_timeout: Duration) -> Result<usize, AudioError> {
        let mut written = 0;
        let mut queue = lock(&self.queue);

        while written < data.len() {
            let free = queue.capacity.saturating_sub(queue.bytes.len());
            if free > 0 {
                let count = free.min(data.len() - written);
                queue.bytes.extend(&data[written..written + count]);
                written += count;
                continue;
            }

            let (guard, result) = self
                .space
                .wait_timeout(queue, stall_timeout)
                .unwrap_or_else(PoisonError::into_inner);
            queue = guard;
            if result.timed_out() && queue.bytes.len() >= queue.capacity {
                return Err(AudioError::StreamError("audio device stopped draining".to_string()));
            }
        }

        Ok(written)
    }

    /// Device callback side: fill `data` from the queue, silence when stopped
    /// or starved.
    fn fill<T>(&self, data: &mut [T])
    where
        T: cpal::Sample + cpal::FromSample<i16>,
    {
        let mut queue = lock(&self.queue);
        for sample in data.iter_mut() {
            let value = if queue.running && queue.bytes.len() >= 2 {
                let lo = queue.bytes.pop_front().unwrap_or(0);
                let hi = queue.bytes.pop_front().unwrap_or(0);
                i16::from_le_bytes([lo, hi])
            } else {
                0
            };
            *sample = T::from_sample(value);
        }
        drop(queue);
        self.space.notify_all();
    }

    /// Wait until the callback has consumed every whole sample. Returns false
    /// when the queue is stopped with data left, or makes no progress for
    /// `stall_timeout`.
    fn wait_drained(&self, stall_timeout: Duration) -> bool {
        let mut queue = lock(&self.queue);

        while queue.bytes.len() >= 2 {
            if !queue.running {
                return false;
            }
            let before = queue.bytes.len();
            let (guard, result) = self
                .space
                .wait_timeout(queue, stall_timeout)
                .unwrap_or_else(PoisonError::into_inner);
            queue = guard;
            if result.timed_out() && queue.bytes.len() >= before {
                return false;
            }
        }

        true
    }
}

enum StreamCommand {
    Play,
    Pause,
    Shutdown,
}

/// Output sink backed by a cpal stream.
///
/// The stream lives on its own `audio-output` thread; PCM written here is
/// queued and drained by the device callback.
pub struct CpalSink {
    device: Option<Device>,
    interrupts: InterruptHandle,
    shared: Arc<SinkShared>,
    commands: Option<Sender<StreamCommand>>,
    stream_thread: Option<thread::JoinHandle<()>>,
    released: bool,
}

impl CpalSink {
    pub fn new(device: Device, interrupts: InterruptHandle) -> Self {
        Self {
            device: Some(device),
            interrupts,
            shared: Arc::new(SinkShared::new()),
            commands: None,
            stream_thread: None,
            released: false,
        }
    }

    fn send(&self, command: StreamCommand) -> Result<(), AudioError> {
        let sender = self
            .commands
            .as_ref()
            .ok_or_else(|| AudioError::InvalidState("output sink is not configured".to_string()))?;
        sender
            .send(command)
            .map_err(|_| AudioError::StreamError("audio output thread has exited".to_string()))
    }

    fn start_stream_thread(
        device: Device,
        config: StreamConfig,
        shared: Arc<SinkShared>,
        interrupts: InterruptHandle,
        commands: Receiver<StreamCommand>,
        ready: Sender<Result<(), AudioError>>,
    ) -> Result<thread::JoinHandle<()>, AudioError> {
        thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let stream = match Self::build_stream(&device, &config, &shared, interrupts) {
                    Ok(stream) => {
                        let _ = ready.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready.send(Err(e));
                        return;
                    }
                };

                for command in commands {
                    let result = match command {
                        StreamCommand::Play => stream.play().map_err(|e| e.to_string()),
                        StreamCommand::Pause => stream.pause().map_err(|e| e.to_string()),
                        StreamCommand::Shutdown => break,
                    };
                    if let Err(e) = result {
                        warn!("Audio stream command failed: {}", e);
                    }
                }

                let _ = stream.pause();
                debug!("Audio output thread finished");
            })
            .map_err(|e| AudioError::InitializationFailed(format!("Failed to create audio thread: {}", e)))
    }

    fn build_stream(
        device: &Device,
        config: &StreamConfig,
        shared: &Arc<SinkShared>,
        interrupts: InterruptHandle,
    ) -> Result<cpal::Stream, AudioError> {
        let sample_format = device
            .default_output_config()
            .map_err(|e| AudioError::InitializationFailed(format!("Failed to get default config: {}", e)))?
            .sample_format();

        match sample_format {
            SampleFormat::F32 => Self::create_stream::<f32>(device, config, shared, interrupts),
            SampleFormat::I16 => Self::create_stream::<i16>(device, config, shared, interrupts),
            SampleFormat::U16 => Self::create_stream::<u16>(device, config, shared, interrupts),
            other => Err(AudioError::UnsupportedFormat {
                format: format!("{:?}", other),
            }),
        }
    }

    /// Create a typed output stream draining the shared byte queue
    fn create_stream<T>(
        device: &Device,
        config: &StreamConfig,
        shared: &Arc<SinkShared>,
        interrupts: InterruptHandle,
    ) -> Result<cpal::Stream, AudioError>
    where
        T: cpal::Sample + cpal::SizedSample + cpal::FromSample<i16> + Send + 'static,
    {
        let shared = Arc::clone(shared);

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| shared.fill(data),
                move |err| {
                    error!("Audio stream error: {}", err);
                    if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                        interrupts.interrupt();
                    }
                },
                None,
            )
            .map_err(|e| AudioError::StreamError(format!("Failed to build output stream: {}", e)))?;

        Ok(stream)
    }
}

impl OutputSink for CpalSink {
    fn min_buffer_bytes(&self, format: &OutputFormat) -> usize {
        *MIN_BUFFER_BYTES.get_or_init(|| {
            let bytes = query_min_buffer_bytes(self.device.as_ref(), format);
            debug!("Device minimum buffer: {} bytes", bytes);
            bytes
        })
    }

    fn configure(&mut self, format: &OutputFormat, buffer_bytes: usize) -> Result<(), AudioError> {
        if format.channels != 2 || format.bits_per_sample != 16 {
            return Err(AudioError::UnsupportedFormat {
                format: format!("{} channels / {} bit", format.channels, format.bits_per_sample),
            });
        }
        let device = self
            .device
            .take()
            .ok_or_else(|| AudioError::InvalidState("output sink already configured".to_string()))?;

        let capacity = queue_capacity(format, buffer_bytes);
        lock(&self.shared.queue).capacity = capacity;

        let config = StreamConfig {
            channels: format.channels,
            sample_rate: SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let handle = Self::start_stream_thread(
            device,
            config,
            Arc::clone(&self.shared),
            self.interrupts.clone(),
            command_rx,
            ready_tx,
        )?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(AudioError::InitializationFailed(
                    "audio output thread exited during setup".to_string(),
                ));
            }
        }

        self.commands = Some(command_tx);
        self.stream_thread = Some(handle);
        info!(
            "Output stream ready: {} Hz, {} channels, {} byte buffer",
            format.sample_rate, format.channels, capacity
        );
        Ok(())
    }

    fn start(&mut self) -> Result<(), AudioError> {
        self.send(StreamCommand::Play)?;
        lock(&self.shared.queue).running = true;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, AudioError> {
        self.shared.push(data, WRITE_STALL_TIMEOUT)
    }

    fn flush(&mut self) {
        let mut queue = lock(&self.shared.queue);
        if !queue.running {
            queue.bytes.clear();
            self.shared.space.notify_all();
        }
    }

    fn drain(&mut self) -> Result<(), AudioError> {
        if self.shared.wait_drained(WRITE_STALL_TIMEOUT) {
            debug!("Output queue drained");
            Ok(())
        } else {
            Err(AudioError::StreamError("audio device stopped before the queue drained".to_string()))
        }
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        lock(&self.shared.queue).running = false;
        self.send(StreamCommand::Pause)
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        lock(&self.shared.queue).running = false;

        if let Some(commands) = self.commands.take() {
            let _ = commands.send(StreamCommand::Shutdown);
        }
        if let Some(handle) = self.stream_thread.take() {
            if handle.join().is_err() {
                error!("Audio output thread panicked");
            }
        }
        self.device = None;
        debug!("Output device released");
    }

    fn is_running(&self) -> bool {
        lock(&self.shared.queue).running
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.release();
    }
}

/// Opens a cpal sink on the preferred (or default) output device
#[derive(Debug, Clone, Default)]
pub struct CpalSinkFactory {
    preferred_device: Option<String>,
}

impl CpalSinkFactory {
    pub fn new(preferred_device: Option<String>) -> Self {
        Self { preferred_device }
    }
}

impl SinkFactory for CpalSinkFactory {
    fn create(&self, interrupts: InterruptHandle) -> Result<Box<dyn OutputSink>, AudioError> {
        let device = select_output_device(self.preferred_device.as_deref())?;
        if let Ok(name) = device.name() {
            debug!("Using output device '{}'", name);
        }
        Ok(Box::new(CpalSink::new(device, interrupts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SessionSettings;
    use crate::config::PlayerConfig;

    #[test]
    fn test_min_buffer_fallback_without_device() {
        let format = OutputFormat::stereo_16(44100);

        // 44100 / 50 = 882 frames of 4 bytes
        assert_eq!(query_min_buffer_bytes(None, &format), 882 * 4);
    }

    #[test]
    fn test_min_buffer_fallback_has_floor() {
        let format = OutputFormat::stereo_16(8000);
        assert_eq!(query_min_buffer_bytes(None, &format), 256 * 4);
    }

    #[test]
    fn test_reported_period_never_lowers_the_floor() {
        let format = OutputFormat::stereo_16(44100);

        // Hosts report tiny callback periods as their minimum
        assert_eq!(min_buffer_frames(Some(14), &format), 882);
        assert_eq!(min_buffer_frames(Some(4096), &format), 4096);
        assert_eq!(min_buffer_frames(None, &format), 882);
    }

    #[test]
    fn test_floored_minimum_sizes_a_session_above_one_callback() {
        let format = OutputFormat::stereo_16(44100);
        let min_bytes = min_buffer_frames(Some(14), &format) * format.bytes_per_frame();
        let settings = SessionSettings::from_config(&PlayerConfig::default(), min_bytes);

        // A 512 frame callback fits many times over
        assert!(settings.device_buffer_bytes >= 8 * 512 * 4);
        assert!(settings.read_buffer_bytes >= 64 * 4);
    }

    #[test]
    fn test_queue_capacity_holds_several_periods() {
        let format = OutputFormat::stereo_16(44100);

        assert_eq!(queue_capacity(&format, 1792), MIN_QUEUE_PERIODS * 882 * 4);
        assert_eq!(queue_capacity(&format, 1 << 20), 1 << 20);
    }

    fn running_queue(capacity: usize) -> Arc<SinkShared> {
        let shared = Arc::new(SinkShared::new());
        {
            let mut queue = lock(&shared.queue);
            queue.capacity = capacity;
            queue.running = true;
        }
        shared
    }

    #[test]
    fn test_queued_tail_is_consumed_before_drain_returns() {
        let shared = running_queue(64);
        let pcm: Vec<u8> = (0..200u32).map(|i| i as u8).collect();

        let consumer = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                // Every sample of the ramp is non-zero; zeros are starvation
                let mut played = Vec::new();
                while played.len() < 100 {
                    let mut period = [0i16; 8];
                    shared.fill(&mut period);
                    played.extend(period.iter().copied().filter(|s| *s != 0));
                    thread::sleep(Duration::from_millis(1));
                }
                played
            })
        };

        assert_eq!(shared.push(&pcm, Duration::from_secs(2)).unwrap(), 200);
        assert!(shared.wait_drained(Duration::from_secs(2)));
        assert!(lock(&shared.queue).bytes.is_empty());

        let played = consumer.join().unwrap();
        let expected: Vec<i16> = pcm
            .chunks(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        assert_eq!(played, expected);
    }

    #[test]
    fn test_drain_gives_up_when_device_stalls() {
        let shared = running_queue(64);
        shared.push(&[1, 2, 3, 4], Duration::from_secs(1)).unwrap();

        assert!(!shared.wait_drained(Duration::from_millis(20)));
        assert_eq!(lock(&shared.queue).bytes.len(), 4);
    }

    #[test]
    fn test_stopped_queue_plays_silence_and_keeps_bytes() {
        let shared = running_queue(64);
        shared.push(&[0x10, 0x20], Duration::from_secs(1)).unwrap();
        lock(&shared.queue).running = false;

        let mut period = [7i16; 4];
        shared.fill(&mut period);

        assert_eq!(period, [0; 4]);
        assert_eq!(lock(&shared.queue).bytes.len(), 2);
        assert!(!shared.wait_drained(Duration::from_millis(20)));
    }

    #[test]
    fn test_drain_on_empty_queue_returns_at_once() {
        let shared = running_queue(64);
        assert!(shared.wait_drained(Duration::from_millis(1)));
    }

    #[test]
    fn test_list_output_devices_does_not_panic() {
        // Headless CI machines may have no audio host at all.
        match list_output_devices() {
            Ok(devices) => {
                for name in devices {
                    assert!(!name.is_empty());
                }
            }
            Err(AudioError::InitializationFailed(_)) => {}
            Err(e) => panic!("Unexpected error: {}", e),
        }
    }
}
