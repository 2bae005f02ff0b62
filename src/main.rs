use loop_audio_player::audio::{device, CpalSinkFactory, LoopDescriptor, PcmDecoder, TransportController, VorbisDecoder};
use loop_audio_player::cli::{CliApp, Commands, ParseError, StatusDisplay, Timeline};
use loop_audio_player::config::ConfigManager;
use loop_audio_player::error::{AudioError, PlayerError};
use loop_audio_player::logging::AudioLogger;
use loop_audio_player::models::{PlayerEvent, TrackSummary};

use log::{info, log, warn};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What draining the event channel turned up
#[derive(Debug, Default)]
struct DrainOutcome {
    updated: bool,
    finished: bool,
}

/// Main application controller that coordinates all components
pub struct AppController {
    transport: TransportController,
    config_manager: ConfigManager,
    logger: AudioLogger,
    timeline: Timeline,
    events: Receiver<PlayerEvent>,
}

impl AppController {
    /// Create a new application controller
    pub fn new() -> Result<Self, PlayerError> {
        if let Err(e) = AudioLogger::init("warn") {
            eprintln!("Warning: Failed to initialize logging: {}", e);
        }

        let config_manager = ConfigManager::new()?;
        let config = config_manager.get_config().clone();
        let sinks = CpalSinkFactory::new(config.preferred_device.clone());

        let (event_tx, events) = std::sync::mpsc::channel();
        let transport = TransportController::new(config, Box::new(sinks), event_tx);

        info!(
            "Application controller initialized (config: {})",
            config_manager.config_path().display()
        );

        Ok(Self {
            transport,
            config_manager,
            logger: AudioLogger::new(),
            timeline: Timeline::new(),
            events,
        })
    }

    /// Execute a single command
    pub fn execute_command(&mut self, command: Commands) -> Result<(), PlayerError> {
        match command {
            Commands::Play { path } => {
                match path {
                    Some(path) => {
                        self.select(&path)?;
                    }
                    None if self.transport.current_track().is_none() => {
                        // Fall back to the most recently selected file
                        if let Some(recent) = self.transport.history().into_iter().next() {
                            self.select(Path::new(&recent))?;
                        }
                    }
                    None => {}
                }

                self.transport.play()?;
                if let Some(track) = self.transport.current_track() {
                    println!("Playing: {}", track.display_name());
                }
            }
            Commands::Select { path } => {
                let summary = self.select(&path)?;
                StatusDisplay::display_track_info(&summary);
            }
            Commands::Pause => {
                if self.transport.pause() {
                    println!("OK: Paused");
                } else {
                    println!("Nothing is playing");
                }
            }
            Commands::Resume => {
                if self.transport.resume() {
                    println!("OK: Resumed");
                } else {
                    println!("Nothing to resume");
                }
            }
            Commands::Stop => {
                self.transport.stop();
                println!("OK: Stopped");
            }
            Commands::Seek { position } => {
                let track = self
                    .transport
                    .current_track()
                    .ok_or(PlayerError::Audio(AudioError::NoTrackSelected))?;
                let requested = CliApp::parse_time(&position)?;
                let target = CliApp::validate_seek_time(requested, Some(track.duration))?;

                let offset = CliApp::seek_offset(target, track.sample_rate);
                let accepted = self.transport.seek(offset);
                self.logger.log_seek(offset, accepted);

                if accepted {
                    println!("Seeked to: {}", CliApp::format_duration(target));
                } else {
                    println!("Seek ignored (not playing, past the loop end, or too soon after the last seek)");
                }
            }
            Commands::Status => {
                self.drain_events(false);
                let track = self.transport.current_track();
                StatusDisplay::display_full_status(
                    track.as_ref(),
                    &self.timeline,
                    &self.logger.get_event_statistics(),
                );
            }
            Commands::History => {
                let entries = self.transport.history();
                if entries.is_empty() {
                    println!("History is empty");
                } else {
                    println!("Recently selected ({}):", entries.len());
                    for (i, entry) in entries.iter().enumerate() {
                        println!("  {}: {}", i + 1, entry);
                    }
                }
            }
            Commands::Info { path } => {
                let decoder = VorbisDecoder::open(&path)?;
                let summary = TrackSummary {
                    label: path.display().to_string(),
                    loop_points: LoopDescriptor::from_comments(decoder.comments(), decoder.total_samples())
                        .to_byte_offsets(),
                    duration: decoder.total_duration(),
                    sample_rate: decoder.sample_rate(),
                };
                StatusDisplay::display_track_info(&summary);
                println!("Sample rate: {} Hz", summary.sample_rate);
            }
            Commands::Devices => {
                let devices = device::list_output_devices()?;
                if devices.is_empty() {
                    println!("No audio devices found");
                } else {
                    let preferred = self.config_manager.get_config().preferred_device.as_deref();
                    println!("Available audio devices:");
                    for name in devices {
                        let marker = if Some(name.as_str()) == preferred { "*" } else { " " };
                        println!("{} {}", marker, name);
                    }
                }
            }
        }

        Ok(())
    }

    fn select(&mut self, path: &Path) -> Result<TrackSummary, PlayerError> {
        let summary = self.transport.select_file(path)?;
        self.drain_events(false);
        Ok(summary)
    }

    /// Pull every pending engine event into the journal and the timeline
    fn drain_events(&mut self, announce: bool) -> DrainOutcome {
        let mut outcome = DrainOutcome::default();

        loop {
            let event = match self.events.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            };

            self.logger.log_player_event(&event);
            self.timeline.apply(&event);
            outcome.updated = true;

            match &event {
                PlayerEvent::Completed => {
                    outcome.finished = true;
                    if announce {
                        println!("\nPlayback finished");
                    }
                }
                PlayerEvent::Error(fault) => {
                    eprintln!("\nPlayback error: {}", fault);
                }
                _ => {}
            }
        }

        outcome
    }

    /// Keep a one-shot `play` alive until the session ends or Ctrl-C
    pub async fn run_until_finished(&mut self) -> Result<(), PlayerError> {
        let shutdown_flag = install_shutdown_handler();
        let mut interval = tokio::time::interval(POLL_INTERVAL);

        loop {
            interval.tick().await;

            if shutdown_flag.load(Ordering::Relaxed) {
                break;
            }

            let outcome = self.drain_events(false);
            if outcome.updated {
                // Clear screen and redraw the counter
                print!("\x1B[2J\x1B[H");
                if let Some(track) = self.transport.current_track() {
                    println!("{}", track.display_name());
                }
                println!("{}", self.timeline.render());
            }
            if outcome.finished {
                break;
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Run interactive mode
    pub async fn run_interactive_mode(&mut self) -> Result<(), PlayerError> {
        println!("loopplay v0.1.0");
        println!("Type 'help' for available commands, 'exit' or 'quit' to quit.");
        println!();

        let shutdown_flag = install_shutdown_handler();

        // Non-blocking input with 100ms polling using a dedicated stdin thread
        let mut interval = tokio::time::interval(POLL_INTERVAL);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if tx.send(line.trim().to_string()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        let mut awaiting_input = false;

        loop {
            if shutdown_flag.load(Ordering::Relaxed) {
                break;
            }

            if !awaiting_input {
                print!("> ");
                let _ = std::io::Write::flush(&mut std::io::stdout());
                awaiting_input = true;
            }

            tokio::select! {
                biased;

                line = rx.recv() => {
                    awaiting_input = false;
                    match line {
                        Some(line) => {
                            if line.is_empty() {
                                continue;
                            }
                            if line == "exit" || line == "quit" {
                                println!("Goodbye!");
                                break;
                            }
                            match CliApp::parse_command(&line) {
                                Ok(command) => {
                                    if let Err(e) = self.execute_command(command) {
                                        self.handle_error(&e);
                                    }
                                }
                                Err(ParseError::HelpRequested) => CliApp::display_help(),
                                Err(e) => {
                                    eprintln!("Error: {}", e);
                                    println!("Type 'help' for available commands.");
                                }
                            }
                        }
                        None => {
                            // stdin closed
                            println!();
                            break;
                        }
                    }
                }

                _ = interval.tick() => {
                    if self.drain_events(true).finished {
                        awaiting_input = false;
                    }
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Stop the active session and wait for it to release the device
    pub fn shutdown(&mut self) {
        println!("Shutting down...");
        self.transport.shutdown();
        self.drain_events(false);
        info!("Shutdown complete");
    }

    fn handle_error(&self, error: &PlayerError) {
        log!(error.severity().log_level(), "Command failed: {}", error);
        StatusDisplay::display_error(error);
    }
}

fn install_shutdown_handler() -> Arc<AtomicBool> {
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&shutdown_flag);

    if let Err(e) = ctrlc::set_handler(move || {
        println!("\nReceived interrupt signal. Shutting down gracefully...");
        handler_flag.store(true, Ordering::Relaxed);
    }) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }

    shutdown_flag
}

#[tokio::main]
async fn main() -> Result<(), PlayerError> {
    let mut app = match AppController::new() {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Failed to initialize application: {}", e);
            StatusDisplay::display_simple_error(&e);
            std::process::exit(1);
        }
    };

    let cli = CliApp::parse();

    match cli.command {
        Some(command) => {
            let keep_running = matches!(command, Commands::Play { .. });
            if let Err(e) = app.execute_command(command) {
                app.handle_error(&e);
                std::process::exit(1);
            }
            if keep_running {
                app.run_until_finished().await?;
            }
        }
        None => app.run_interactive_mode().await?,
    }

    Ok(())
}
