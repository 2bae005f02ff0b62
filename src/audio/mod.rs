pub mod engine;
pub mod decoders;
pub mod device;
pub mod loop_points;
pub mod transform;
pub mod transport;

#[cfg(test)]
pub mod tests;

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use crate::error::{AudioError, DecodeError};

pub use decoders::VorbisDecoder;
pub use device::{CpalSink, CpalSinkFactory};
pub use engine::{EngineControl, PlaybackEngine, SessionSettings, SharedDecoder};
pub use loop_points::LoopDescriptor;
pub use transport::{InterruptHandle, TransportController};

/// Bytes per frame of the engine's interleaved stereo 16-bit PCM.
pub const BYTES_PER_FRAME: usize = 4;

/// Source of interleaved stereo 16-bit little-endian PCM
pub trait PcmDecoder: Send {
    /// Fill `buffer` with PCM bytes. `Ok(0)` means the stream has ended.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, DecodeError>;

    /// Position the decoder at an absolute PCM sample (frame) offset
    fn seek_pcm(&mut self, sample: u64) -> Result<(), DecodeError>;

    /// Rewind to the first sample
    fn seek_to_start(&mut self) -> Result<(), DecodeError>;

    /// Total number of samples per channel, 0 when unknown
    fn total_samples(&self) -> u64;

    /// Total playing time of the track
    fn total_duration(&self) -> Duration;

    /// Samples per second per channel
    fn sample_rate(&self) -> u32;

    /// Embedded `KEY=value` annotations
    fn comments(&self) -> Vec<String>;
}

/// PCM layout handed to an output sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl OutputFormat {
    pub fn stereo_16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 2,
            bits_per_sample: 16,
        }
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }
}

/// Audio output device driven by the playback engine.
///
/// Mirrors a streaming audio track: `flush` only discards queued data while
/// the sink is stopped and is a no-op while it is running.
pub trait OutputSink: Send {
    /// Smallest buffer the device accepts for `format`, in bytes
    fn min_buffer_bytes(&self, format: &OutputFormat) -> usize;

    fn configure(&mut self, format: &OutputFormat, buffer_bytes: usize) -> Result<(), AudioError>;

    fn start(&mut self) -> Result<(), AudioError>;

    /// Queue PCM bytes, blocking while the device buffer is full
    fn write(&mut self, data: &[u8]) -> Result<usize, AudioError>;

    fn flush(&mut self);

    /// Block until queued PCM has been played, giving up if the device
    /// stops consuming it. Only meaningful while running.
    fn drain(&mut self) -> Result<(), AudioError>;

    /// Halt output immediately; queued bytes stay queued.
    fn stop(&mut self) -> Result<(), AudioError>;

    /// Give the device back. Called exactly once per session.
    fn release(&mut self);

    fn is_running(&self) -> bool;
}

/// Creates one output sink per playback session
pub trait SinkFactory: Send + Sync {
    fn create(&self, interrupts: InterruptHandle) -> Result<Box<dyn OutputSink>, AudioError>;
}

/// Lock a mutex, recovering the data if another thread panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
