use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::audio::loop_points::LoopDescriptor;
use crate::error::SessionError;

/// Playback state enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

impl PlaybackState {
    /// Get a human-readable string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Stopped => "Stopped",
            PlaybackState::Playing => "Playing",
            PlaybackState::Paused => "Paused",
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the controller knows about the selected track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSummary {
    pub label: String,
    /// Loop boundaries in engine byte offsets.
    pub loop_points: LoopDescriptor,
    pub duration: Duration,
    /// Decoder sample rate; seek times convert to offsets at this rate.
    pub sample_rate: u32,
}

impl TrackSummary {
    /// Get the display name for this track (file stem or raw label)
    pub fn display_name(&self) -> String {
        Path::new(&self.label)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.label)
            .to_string()
    }
}

/// Notifications delivered to the UI layer over the event channel.
///
/// Positions are engine byte offsets (four bytes per stereo frame).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    Loaded(TrackSummary),
    StateChanged(PlaybackState),
    Progress { position: u64, elapsed: Duration },
    Loop { reset_position: u64 },
    Completed,
    Error(SessionError),
}

impl PlayerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            PlayerEvent::Loaded(_) => "LOADED",
            PlayerEvent::StateChanged(_) => "STATE_CHANGED",
            PlayerEvent::Progress { .. } => "PROGRESS",
            PlayerEvent::Loop { .. } => "LOOP",
            PlayerEvent::Completed => "COMPLETED",
            PlayerEvent::Error(_) => "ERROR",
        }
    }
}
