use std::fs::File;
use std::path::Path;
use std::time::Duration;

use log::{debug, warn};
use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision};
use symphonia::core::probe::Hint;

use crate::audio::{PcmDecoder, BYTES_PER_FRAME};
use crate::error::DecodeError;

/// Decoder adapter producing interleaved stereo 16-bit little-endian PCM.
///
/// Ogg/Vorbis is the intended input, but any container and codec symphonia
/// can probe is accepted. Mono sources are duplicated to both channels and
/// channels beyond the first two are dropped.
pub struct VorbisDecoder {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    total_samples: u64,
    comments: Vec<String>,
    pending: Vec<u8>,
    pending_pos: usize,
    /// Frames to drop after an accurate seek landed before the target
    skip_frames: u64,
    finished: bool,
}

impl VorbisDecoder {
    /// Open and probe the file at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DecodeError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            DecodeError::DecodeFailed(format!("Failed to open file: {}", e))
        })?;

        let media_source = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext_str) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext_str);
        }

        let mut probed = symphonia::default::get_probe()
            .format(&hint, media_source, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| DecodeError::UnsupportedFormat {
                format: format!("probe failed: {}", e),
            })?;

        let mut comments = Vec::new();
        if let Some(revision) = probed.metadata.get().as_ref().and_then(|m| m.current()) {
            Self::collect_comments(revision, &mut comments);
        }

        let mut format_reader = probed.format;
        if let Some(revision) = format_reader.metadata().current() {
            Self::collect_comments(revision, &mut comments);
        }

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::UnsupportedFormat {
                format: "no decodable audio track".to_string(),
            })?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
        let total_samples = track.codec_params.n_frames.unwrap_or(0);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::DecodeFailed(format!("Failed to create decoder: {}", e)))?;

        debug!(
            "Opened {}: {} Hz, {} samples, {} comments",
            path.display(),
            sample_rate,
            total_samples,
            comments.len()
        );

        Ok(Self {
            format_reader,
            decoder,
            track_id,
            sample_rate,
            total_samples,
            comments,
            pending: Vec::new(),
            pending_pos: 0,
            skip_frames: 0,
            finished: false,
        })
    }

    fn collect_comments(revision: &MetadataRevision, comments: &mut Vec<String>) {
        for tag in revision.tags() {
            comments.push(format!("{}={}", tag.key, tag.value));
        }
    }

    /// Decode packets until some PCM is pending. Returns false at end of stream.
    fn refill(&mut self) -> Result<bool, DecodeError> {
        loop {
            if self.finished {
                return Ok(false);
            }

            let packet = match self.format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref err))
                    if err.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.finished = true;
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(err) => {
                    return Err(DecodeError::CorruptedFile(format!("Failed to read packet: {}", err)));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(audio_buf) => {
                    interleave_stereo(audio_buf, &mut self.skip_frames, &mut self.pending);
                    self.pending_pos = 0;
                    if !self.pending.is_empty() {
                        return Ok(true);
                    }
                }
                Err(SymphoniaError::DecodeError(msg)) => {
                    // A damaged packet is skipped rather than ending the stream
                    warn!("Skipping undecodable packet: {}", msg);
                }
                Err(err) => {
                    return Err(DecodeError::DecodeFailed(format!("Failed to decode packet: {}", err)));
                }
            }
        }
    }
}

/// Replace `pending` with the decoded packet as stereo s16le, dropping the
/// first `skip_frames` frames
fn interleave_stereo(audio_buf: AudioBufferRef<'_>, skip_frames: &mut u64, pending: &mut Vec<u8>) {
    let spec = *audio_buf.spec();
    let channels = spec.channels.count().max(1);
    let mut samples = SampleBuffer::<i16>::new(audio_buf.capacity() as u64, spec);
    samples.copy_interleaved_ref(audio_buf);

    let frames = samples.samples().chunks_exact(channels);
    let skip = (*skip_frames as usize).min(frames.len());
    *skip_frames -= skip as u64;

    pending.clear();
    for frame in frames.skip(skip) {
        let left = frame[0];
        let right = if channels > 1 { frame[1] } else { left };
        pending.extend_from_slice(&left.to_le_bytes());
        pending.extend_from_slice(&right.to_le_bytes());
    }
}

impl PcmDecoder for VorbisDecoder {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, DecodeError> {
        let mut filled = 0;
        while filled < buffer.len() {
            if self.pending_pos >= self.pending.len() && !self.refill()? {
                break;
            }
            let available = &self.pending[self.pending_pos..];
            let count = available.len().min(buffer.len() - filled);
            buffer[filled..filled + count].copy_from_slice(&available[..count]);
            self.pending_pos += count;
            filled += count;
        }
        Ok(filled)
    }

    fn seek_pcm(&mut self, sample: u64) -> Result<(), DecodeError> {
        let seeked = self
            .format_reader
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: sample,
                    track_id: self.track_id,
                },
            )
            .map_err(|e| DecodeError::SeekError(format!("Seek to sample {} failed: {}", sample, e)))?;

        self.decoder.reset();
        self.pending.clear();
        self.pending_pos = 0;
        self.finished = false;
        self.skip_frames = seeked.required_ts.saturating_sub(seeked.actual_ts);
        Ok(())
    }

    fn seek_to_start(&mut self) -> Result<(), DecodeError> {
        self.seek_pcm(0)
    }

    fn total_samples(&self) -> u64 {
        self.total_samples
    }

    fn total_duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.total_samples as f64 / self.sample_rate as f64)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn comments(&self) -> Vec<String> {
        self.comments.clone()
    }
}

impl std::fmt::Debug for VorbisDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VorbisDecoder")
            .field("track_id", &self.track_id)
            .field("sample_rate", &self.sample_rate)
            .field("total_samples", &self.total_samples)
            .field("pending_frames", &((self.pending.len() - self.pending_pos) / BYTES_PER_FRAME))
            .finish()
    }
}
