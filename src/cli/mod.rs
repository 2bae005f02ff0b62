use crate::audio::BYTES_PER_FRAME;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

pub mod status;
pub use status::{StatusDisplay, Timeline};

/// Loop-aware Ogg/Vorbis player
#[derive(Parser)]
#[command(name = "loopplay")]
#[command(about = "A gapless CLI player that honors LOOPSTART/LOOPLENGTH markers")]
#[command(version = "0.1.0")]
pub struct CliApp {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start playback, optionally selecting a file first
    Play {
        /// Optional file to select before playing
        path: Option<PathBuf>,
    },
    /// Select a file without starting playback
    Select {
        /// Path to an Ogg/Vorbis file
        path: PathBuf,
    },
    /// Pause playback while preserving position
    Pause,
    /// Resume playback from paused position
    Resume,
    /// Stop playback
    Stop,
    /// Seek to specific time position
    Seek {
        /// Time offset (e.g., "1:30", "90", "90s")
        position: String,
    },
    /// Display the timeline of the current session
    Status,
    /// List recently selected files
    History,
    /// Show the loop markers and duration of a file
    Info {
        /// Path to an Ogg/Vorbis file
        path: PathBuf,
    },
    /// List available audio output devices
    Devices,
}

impl CliApp {
    /// Parse command line arguments
    pub fn parse() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// Expand tilde (~) in path to home directory
    pub fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            match dirs::home_dir() {
                Some(home_dir) => home_dir.join(rest),
                None => PathBuf::from(path),
            }
        } else if path == "~" {
            dirs::home_dir().unwrap_or_else(|| PathBuf::from(path))
        } else {
            PathBuf::from(path)
        }
    }

    /// Parse command from string (for interactive mode)
    pub fn parse_command(input: &str) -> Result<Commands, ParseError> {
        let args: Vec<&str> = input.split_whitespace().collect();
        if args.is_empty() {
            return Err(ParseError::EmptyCommand);
        }

        match args[0] {
            "play" => {
                if args.len() > 1 {
                    let path = Self::expand_path(&args[1..].join(" "));
                    Ok(Commands::Play { path: Some(path) })
                } else {
                    Ok(Commands::Play { path: None })
                }
            }
            "select" | "open" => {
                if args.len() > 1 {
                    let path = Self::expand_path(&args[1..].join(" "));
                    Ok(Commands::Select { path })
                } else {
                    Err(ParseError::MissingArgument {
                        command: "select".to_string(),
                        argument: "path".to_string(),
                    })
                }
            }
            "pause" => Ok(Commands::Pause),
            "resume" => Ok(Commands::Resume),
            "stop" => Ok(Commands::Stop),
            "seek" => match args.get(1) {
                Some(position) => Ok(Commands::Seek {
                    position: position.to_string(),
                }),
                None => Err(ParseError::MissingArgument {
                    command: "seek".to_string(),
                    argument: "position".to_string(),
                }),
            },
            "status" => Ok(Commands::Status),
            "history" => Ok(Commands::History),
            "info" => {
                if args.len() > 1 {
                    let path = Self::expand_path(&args[1..].join(" "));
                    Ok(Commands::Info { path })
                } else {
                    Err(ParseError::MissingArgument {
                        command: "info".to_string(),
                        argument: "path".to_string(),
                    })
                }
            }
            "devices" => Ok(Commands::Devices),
            "help" => Err(ParseError::HelpRequested),
            _ => Err(ParseError::UnknownCommand {
                command: args[0].to_string(),
            }),
        }
    }

    /// Display help information
    pub fn display_help() {
        println!("loopplay - Available Commands:");
        println!();
        println!("Playback Control:");
        println!("  select <path>   - Select a file and read its loop markers");
        println!("  play [path]     - Start or resume playback (optionally select a file first)");
        println!("  pause           - Pause playback");
        println!("  resume          - Resume playback");
        println!("  stop            - Stop playback");
        println!("  seek <time>     - Seek to position (e.g., '1:30', '90s')");
        println!();
        println!("Information:");
        println!("  status          - Show loop count, cursor and elapsed time");
        println!("  info <path>     - Show the loop markers of a file");
        println!("  history         - List recently selected files");
        println!("  devices         - List available audio devices");
        println!();
        println!("General:");
        println!("  help            - Show this help message");
        println!("  exit, quit      - Exit the player");
    }

    /// Parse time string to Duration
    pub fn parse_time(time_str: &str) -> Result<Duration, ParseError> {
        let trimmed = time_str.trim();
        let invalid = || ParseError::InvalidTimeFormat {
            input: time_str.to_string(),
        };

        if trimmed.is_empty() {
            return Err(invalid());
        }

        // "1:30", "1:30.5", "90", "90s"
        let seconds = if let Some((minutes, seconds)) = trimmed.split_once(':') {
            let minutes: u64 = minutes.parse().map_err(|_| invalid())?;
            let seconds: f64 = seconds.parse().map_err(|_| invalid())?;
            if !(0.0..60.0).contains(&seconds) {
                return Err(invalid());
            }
            minutes as f64 * 60.0 + seconds
        } else {
            let seconds: f64 = trimmed.trim_end_matches('s').parse().map_err(|_| invalid())?;
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(invalid());
            }
            seconds
        };

        Ok(Duration::from_secs_f64(seconds))
    }

    /// Validate seek position against track duration
    pub fn validate_seek_time(position: Duration, duration: Option<Duration>) -> Result<Duration, ParseError> {
        if let Some(track_duration) = duration {
            if position > track_duration {
                return Err(ParseError::SeekBeyondDuration {
                    position: position.as_secs_f64(),
                    duration: track_duration.as_secs_f64(),
                });
            }
        }
        Ok(position)
    }

    /// Convert a time offset into an engine byte offset at the decoder's rate
    pub fn seek_offset(position: Duration, sample_rate: u32) -> u64 {
        let frames = (position.as_secs_f64() * f64::from(sample_rate)) as u64;
        frames * BYTES_PER_FRAME as u64
    }

    /// Format duration as HH:MM:SS
    pub fn format_duration(duration: Duration) -> String {
        let total_seconds = duration.as_secs();
        format!(
            "{:02}:{:02}:{:02}",
            total_seconds / 3600,
            (total_seconds % 3600) / 60,
            total_seconds % 60
        )
    }
}

/// Command parsing errors
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Unknown command: {command}")]
    UnknownCommand { command: String },

    #[error("Missing argument for {command}: {argument}")]
    MissingArgument { command: String, argument: String },

    #[error("Invalid time format: {input}")]
    InvalidTimeFormat { input: String },

    #[error("Seek position {position:.2}s exceeds track duration {duration:.2}s")]
    SeekBeyondDuration { position: f64, duration: f64 },

    #[error("Help requested")]
    HelpRequested,
}
