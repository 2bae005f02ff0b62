use std::time::Duration;

use crate::cli::CliApp;
use crate::error::{AudioError, DecodeError, ErrorSeverity, PlayerError};
use crate::logging::EventStatistics;
use crate::models::{PlaybackState, PlayerEvent, TrackSummary};

/// Running view of a playback session, fed from the event channel.
///
/// Mirrors what a seek bar and counter label would show: how many times the
/// loop wrapped, the current cursor against the loop end, and wall-clock
/// elapsed time against the track duration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeline {
    pub loops: u64,
    pub position: u64,
    pub loop_end: u64,
    pub total_length: u64,
    pub elapsed: Duration,
    pub total_time: Duration,
    pub state: Option<PlaybackState>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start over for a freshly loaded track
    pub fn reset(&mut self, summary: &TrackSummary) {
        *self = Self {
            loop_end: summary.loop_points.end,
            total_length: summary.loop_points.total,
            total_time: summary.duration,
            ..Self::default()
        };
    }

    /// Fold one event into the view
    pub fn apply(&mut self, event: &PlayerEvent) {
        match event {
            PlayerEvent::Loaded(summary) => self.reset(summary),
            PlayerEvent::StateChanged(state) => self.state = Some(*state),
            PlayerEvent::Progress { position, elapsed } => {
                self.position = *position;
                self.elapsed = *elapsed;
            }
            PlayerEvent::Loop { reset_position } => {
                self.loops += 1;
                self.position = *reset_position;
            }
            PlayerEvent::Completed | PlayerEvent::Error(_) => {
                self.state = Some(PlaybackState::Stopped);
            }
        }
    }

    /// Two-line counter text
    pub fn render(&self) -> String {
        format!(
            "loop: {} / cur: {} / end: {}\ntime: {} / {}",
            self.loops,
            self.position,
            Self::format_offset(self.loop_end),
            CliApp::format_duration(self.elapsed),
            CliApp::format_duration(self.total_time)
        )
    }

    /// Fraction of the track the cursor has reached
    pub fn progress(&self) -> f32 {
        if self.total_length == 0 || self.total_length == u64::MAX {
            0.0
        } else {
            (self.position as f64 / self.total_length as f64).min(1.0) as f32
        }
    }

    fn format_offset(offset: u64) -> String {
        if offset == u64::MAX {
            "-".to_string()
        } else {
            offset.to_string()
        }
    }
}

/// Status display formatter for the CLI
pub struct StatusDisplay;

impl StatusDisplay {
    /// Display the timeline plus the selected track
    pub fn display_full_status(track: Option<&TrackSummary>, timeline: &Timeline, stats: &EventStatistics) {
        println!("┌─ Player Status ─────────────────────────────────────────┐");
        match track {
            Some(track) => {
                println!("│ Track: {}", Self::truncate(&track.display_name(), 50));
                println!(
                    "│ Status: {}",
                    Self::format_playback_state(timeline.state.unwrap_or(PlaybackState::Stopped))
                );
                for line in timeline.render().lines() {
                    println!("│ {}", line);
                }
                println!("│ {}", Self::create_progress_bar(timeline.progress(), 40));
            }
            None => {
                println!("│ No track selected");
            }
        }
        println!("│");
        println!(
            "│ Sessions: {}  Loops: {}  Seeks: {}  Errors: {}",
            stats.sessions, stats.loops, stats.seeks, stats.errors
        );
        println!("└─────────────────────────────────────────────────────────┘");
    }

    /// Display the loop markers of a track
    pub fn display_track_info(track: &TrackSummary) {
        let points = &track.loop_points;
        println!("┌─ Track Information ─────────────────────────────────────┐");
        println!("│ Title: {}", Self::truncate(&track.display_name(), 50));
        println!("│ Path: {}", Self::truncate(&track.label, 51));
        println!("│ Duration: {}", CliApp::format_duration(track.duration));
        if points.is_looping() {
            println!("│ Loop start: {}", points.start);
            println!("│ Loop length: {}", points.length);
            println!("│ Loop end: {}", points.end);
        } else {
            println!("│ Loop: none (plays straight through)");
        }
        println!("└─────────────────────────────────────────────────────────┘");
    }

    /// Display error message with formatting and recovery suggestions
    pub fn display_error(error: &PlayerError) {
        let severity = error.severity();
        let severity_icon = match severity {
            ErrorSeverity::Info => "ℹ",
            ErrorSeverity::Warning => "⚠",
            ErrorSeverity::Error => "✗",
            ErrorSeverity::Critical => "🔥",
        };

        eprintln!("┌─ {} {} ─────────────────────────────────────────────────┐",
            severity_icon, severity.as_str());

        for line in Self::wrap_text(&error.user_message(), 55) {
            eprintln!("│ {}", line);
        }

        let suggestions = error.recovery_suggestions();
        if !suggestions.is_empty() {
            eprintln!("│");
            eprintln!("│ Suggestions:");
            for suggestion in suggestions.iter().take(3) {
                for line in Self::wrap_text(&format!("• {}", suggestion), 53) {
                    eprintln!("│   {}", line);
                }
            }
        }

        Self::display_error_context(error);

        eprintln!("└─────────────────────────────────────────────────────────┘");
    }

    fn display_error_context(error: &PlayerError) {
        match error {
            PlayerError::Audio(AudioError::DeviceNotFound { .. }) => {
                eprintln!("│");
                eprintln!("│ Use 'devices' to see available devices");
            }
            PlayerError::Audio(AudioError::NoTrackSelected) => {
                eprintln!("│");
                eprintln!("│ Select a file first: 'select <path>'");
            }
            PlayerError::Decode(DecodeError::UnsupportedFormat { .. }) => {
                eprintln!("│");
                eprintln!("│ Supported: Ogg/Vorbis with LOOPSTART/LOOPLENGTH tags");
            }
            PlayerError::Config(_) => {
                eprintln!("│");
                eprintln!("│ Configuration will use default values");
            }
            _ => {}
        }
    }

    /// Wrap text to fit within specified width
    fn wrap_text(text: &str, width: usize) -> Vec<String> {
        let mut lines = Vec::new();
        let mut current_line = String::new();

        for word in text.split_whitespace() {
            if current_line.is_empty() {
                current_line = word.to_string();
            } else if current_line.len() + word.len() < width {
                current_line.push(' ');
                current_line.push_str(word);
            } else {
                lines.push(std::mem::take(&mut current_line));
                current_line = word.to_string();
            }
        }

        if !current_line.is_empty() {
            lines.push(current_line);
        }
        lines
    }

    /// Display a simple error message for non-interactive contexts
    pub fn display_simple_error(error: &PlayerError) {
        eprintln!("[{}] {}", error.severity().as_str(), error.user_message());

        if let Some(suggestion) = error.recovery_suggestions().first() {
            eprintln!("Suggestion: {}", suggestion);
        }
    }

    /// Truncate string to fit display width
    pub fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len || max_len <= 3 {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len - 3).collect();
            format!("{}...", kept)
        }
    }

    /// Create a progress bar string
    pub fn create_progress_bar(progress: f32, width: usize) -> String {
        let filled = ((progress.clamp(0.0, 1.0) * width as f32) as usize).min(width);
        format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
    }

    pub fn format_playback_state(state: PlaybackState) -> String {
        match state {
            PlaybackState::Playing => "▶ Playing".to_string(),
            PlaybackState::Paused => "⏸ Paused".to_string(),
            PlaybackState::Stopped => "⏹ Stopped".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::loop_points::LoopDescriptor;
    use crate::error::SessionError;

    fn looping_track() -> TrackSummary {
        TrackSummary {
            label: "/music/stage1.ogg".to_string(),
            loop_points: LoopDescriptor::from_comments(["LOOPSTART=100", "LOOPLENGTH=300"], 1000)
                .to_byte_offsets(),
            duration: Duration::from_secs(83),
            sample_rate: 44_100,
        }
    }

    #[test]
    fn test_timeline_initial_render() {
        let mut timeline = Timeline::new();
        timeline.apply(&PlayerEvent::Loaded(looping_track()));

        assert_eq!(
            timeline.render(),
            "loop: 0 / cur: 0 / end: 1600\ntime: 00:00:00 / 00:01:23"
        );
    }

    #[test]
    fn test_timeline_counts_loops() {
        let mut timeline = Timeline::new();
        timeline.apply(&PlayerEvent::Loaded(looping_track()));
        timeline.apply(&PlayerEvent::Progress {
            position: 1600,
            elapsed: Duration::from_secs(3725),
        });
        timeline.apply(&PlayerEvent::Loop { reset_position: 400 });
        timeline.apply(&PlayerEvent::Loop { reset_position: 400 });

        assert_eq!(timeline.loops, 2);
        assert_eq!(timeline.position, 400);
        assert_eq!(
            timeline.render(),
            "loop: 2 / cur: 400 / end: 1600\ntime: 01:02:05 / 00:01:23"
        );
    }

    #[test]
    fn test_timeline_resets_on_load() {
        let mut timeline = Timeline::new();
        timeline.apply(&PlayerEvent::Loaded(looping_track()));
        timeline.apply(&PlayerEvent::Loop { reset_position: 400 });
        timeline.apply(&PlayerEvent::Loaded(looping_track()));

        assert_eq!(timeline.loops, 0);
        assert_eq!(timeline.position, 0);
    }

    #[test]
    fn test_timeline_tracks_state() {
        let mut timeline = Timeline::new();
        timeline.apply(&PlayerEvent::StateChanged(PlaybackState::Playing));
        assert_eq!(timeline.state, Some(PlaybackState::Playing));

        timeline.apply(&PlayerEvent::Error(SessionError::Decode(-1)));
        assert_eq!(timeline.state, Some(PlaybackState::Stopped));
    }

    #[test]
    fn test_timeline_without_loop_end() {
        let mut timeline = Timeline::new();
        timeline.apply(&PlayerEvent::Loaded(TrackSummary {
            label: "memory".to_string(),
            loop_points: LoopDescriptor::straight_through(0),
            duration: Duration::ZERO,
            sample_rate: 44_100,
        }));

        assert!(timeline.render().starts_with("loop: 0 / cur: 0 / end: -"));
        assert_eq!(timeline.progress(), 0.0);
    }

    #[test]
    fn test_progress_fraction() {
        let mut timeline = Timeline::new();
        timeline.apply(&PlayerEvent::Loaded(looping_track()));
        timeline.apply(&PlayerEvent::Progress {
            position: 2000,
            elapsed: Duration::from_secs(1),
        });

        assert!((timeline.progress() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(StatusDisplay::truncate("short", 10), "short");
        assert_eq!(StatusDisplay::truncate("a very long title", 10), "a very ...");
        assert_eq!(StatusDisplay::truncate("abcdef", 3), "abcdef");
    }

    #[test]
    fn test_create_progress_bar() {
        assert_eq!(StatusDisplay::create_progress_bar(0.0, 4), "░░░░");
        assert_eq!(StatusDisplay::create_progress_bar(0.5, 4), "██░░");
        assert_eq!(StatusDisplay::create_progress_bar(2.0, 4), "████");
    }

    #[test]
    fn test_wrap_text() {
        let lines = StatusDisplay::wrap_text("one two three four", 9);
        assert_eq!(lines, vec!["one two", "three", "four"]);
    }

    #[test]
    fn test_display_functions_dont_panic() {
        let track = looping_track();
        let mut timeline = Timeline::new();
        timeline.reset(&track);

        StatusDisplay::display_full_status(Some(&track), &timeline, &EventStatistics::default());
        StatusDisplay::display_full_status(None, &timeline, &EventStatistics::default());
        StatusDisplay::display_track_info(&track);
        StatusDisplay::display_error(&PlayerError::Audio(AudioError::NoTrackSelected));
        StatusDisplay::display_simple_error(&PlayerError::Audio(AudioError::NoTrackSelected));
    }
}
