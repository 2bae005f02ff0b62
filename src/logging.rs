use log::{debug, error, info, trace, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use chrono::{DateTime, Utc};

use crate::audio::lock;
use crate::models::PlayerEvent;

/// Environment variable selecting the log level
pub const LOG_LEVEL_ENV: &str = "LOOPPLAY_LOG_LEVEL";

/// Journal entry for a player event
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub details: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    TrackLoaded,
    StateChanged,
    Progress,
    LoopWrapped,
    SessionCompleted,
    SessionError,
    SeekRequested,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TrackLoaded => "TRACK_LOADED",
            EventType::StateChanged => "STATE_CHANGED",
            EventType::Progress => "PROGRESS",
            EventType::LoopWrapped => "LOOP_WRAPPED",
            EventType::SessionCompleted => "SESSION_COMPLETED",
            EventType::SessionError => "SESSION_ERROR",
            EventType::SeekRequested => "SEEK_REQUESTED",
        }
    }
}

/// Logger setup plus a bounded journal of recent player events
#[derive(Clone)]
pub struct AudioLogger {
    events: Arc<Mutex<VecDeque<EventRecord>>>,
    max_events: usize,
}

impl Default for AudioLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioLogger {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            max_events: 1000,
        }
    }

    /// Initialize logging, reading the level from `LOOPPLAY_LOG_LEVEL`
    pub fn init(default_level: &str) -> Result<(), Box<dyn std::error::Error>> {
        let log_level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| default_level.to_string());

        let mut builder = env_logger::Builder::new();
        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{}] [{}:{}] {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        });
        builder.filter_level(parse_level(&log_level));
        builder.try_init()?;

        info!("Loop player logging initialized with level: {}", log_level);
        Ok(())
    }

    /// Record an event in the journal and forward it to the logger
    pub fn log_event(&self, event_type: EventType, details: String) {
        match event_type {
            EventType::TrackLoaded | EventType::StateChanged | EventType::SessionCompleted => {
                info!("[{}] {}", event_type.as_str(), details);
            }
            EventType::LoopWrapped | EventType::SeekRequested => {
                debug!("[{}] {}", event_type.as_str(), details);
            }
            EventType::Progress => trace!("[{}] {}", event_type.as_str(), details),
            EventType::SessionError => error!("[{}] {}", event_type.as_str(), details),
        }

        let mut events = lock(&self.events);
        events.push_back(EventRecord {
            timestamp: Utc::now(),
            event_type,
            details,
        });
        while events.len() > self.max_events {
            events.pop_front();
        }
    }

    /// Journal an event received from the playback engine
    pub fn log_player_event(&self, event: &PlayerEvent) {
        match event {
            PlayerEvent::Loaded(summary) => self.log_event(
                EventType::TrackLoaded,
                format!(
                    "{} (loop {}..{}, {:.1}s)",
                    summary.label,
                    summary.loop_points.start,
                    summary.loop_points.end,
                    summary.duration.as_secs_f64()
                ),
            ),
            PlayerEvent::StateChanged(state) => {
                self.log_event(EventType::StateChanged, state.to_string())
            }
            PlayerEvent::Progress { position, elapsed } => self.log_event(
                EventType::Progress,
                format!("position {} after {:.1}s", position, elapsed.as_secs_f64()),
            ),
            PlayerEvent::Loop { reset_position } => {
                self.log_event(EventType::LoopWrapped, format!("reset to {}", reset_position))
            }
            PlayerEvent::Completed => {
                self.log_event(EventType::SessionCompleted, "session finished".to_string())
            }
            PlayerEvent::Error(fault) => self.log_event(EventType::SessionError, fault.to_string()),
        }
    }

    pub fn log_seek(&self, position: u64, accepted: bool) {
        if !accepted {
            warn!("Seek to {} was ignored", position);
        }
        self.log_event(
            EventType::SeekRequested,
            format!("seek to {} ({})", position, if accepted { "accepted" } else { "ignored" }),
        );
    }

    /// Get recent events for debugging
    pub fn get_recent_events(&self, count: usize) -> Vec<EventRecord> {
        let events = lock(&self.events);
        let skip = events.len().saturating_sub(count);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn clear_events(&self) {
        lock(&self.events).clear();
    }

    pub fn get_event_statistics(&self) -> EventStatistics {
        let events = lock(&self.events);
        let mut stats = EventStatistics {
            total_events: events.len(),
            ..EventStatistics::default()
        };

        for event in events.iter() {
            match event.event_type {
                EventType::LoopWrapped => stats.loops += 1,
                EventType::SeekRequested => stats.seeks += 1,
                EventType::SessionError => stats.errors += 1,
                EventType::SessionCompleted => stats.sessions += 1,
                _ => {}
            }
        }
        stats
    }
}

fn parse_level(level: &str) -> log::LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        "off" => log::LevelFilter::Off,
        _ => log::LevelFilter::Info,
    }
}

/// Counters over the journaled events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventStatistics {
    pub total_events: usize,
    pub loops: usize,
    pub seeks: usize,
    pub errors: usize,
    pub sessions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use crate::models::PlaybackState;

    #[test]
    fn test_log_event() {
        let logger = AudioLogger::new();

        logger.log_event(EventType::TrackLoaded, "stage1.ogg".to_string());

        let events = logger.get_recent_events(1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].details, "stage1.ogg");
        assert_eq!(events[0].event_type, EventType::TrackLoaded);
    }

    #[test]
    fn test_event_history_limit() {
        let mut logger = AudioLogger::new();
        logger.max_events = 3;

        for i in 0..5 {
            logger.log_event(EventType::StateChanged, format!("Event {}", i));
        }

        let events = logger.get_recent_events(10);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].details, "Event 2");
        assert_eq!(events[2].details, "Event 4");
    }

    #[test]
    fn test_player_event_statistics() {
        let logger = AudioLogger::new();

        logger.log_player_event(&PlayerEvent::StateChanged(PlaybackState::Playing));
        logger.log_player_event(&PlayerEvent::Loop { reset_position: 400 });
        logger.log_player_event(&PlayerEvent::Loop { reset_position: 400 });
        logger.log_player_event(&PlayerEvent::Error(SessionError::Decode(-1)));
        logger.log_player_event(&PlayerEvent::Completed);
        logger.log_seek(800, true);

        let stats = logger.get_event_statistics();
        assert_eq!(stats.total_events, 6);
        assert_eq!(stats.loops, 2);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.seeks, 1);

        let last_error = logger
            .get_recent_events(10)
            .into_iter()
            .find(|e| e.event_type == EventType::SessionError)
            .unwrap();
        assert_eq!(last_error.details, "decode error: -1");
    }

    #[test]
    fn test_clear_events() {
        let logger = AudioLogger::new();

        logger.log_event(EventType::Progress, "Test".to_string());
        logger.clear_events();

        assert!(logger.get_recent_events(10).is_empty());
        assert_eq!(logger.get_event_statistics(), EventStatistics::default());
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), log::LevelFilter::Debug);
        assert_eq!(parse_level("off"), log::LevelFilter::Off);
        assert_eq!(parse_level("bogus"), log::LevelFilter::Info);
    }

    #[test]
    fn test_event_type_as_str() {
        assert_eq!(EventType::LoopWrapped.as_str(), "LOOP_WRAPPED");
        assert_eq!(EventType::SessionError.as_str(), "SESSION_ERROR");
    }
}
