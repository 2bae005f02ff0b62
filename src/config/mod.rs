use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::error::ConfigError;

const APP_DIR: &str = "loopplay";

/// Player configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Downsampling factor applied to every decoded buffer. Must be even.
    pub compression_rate: usize,
    /// Sample rate of the PCM produced by the decoder.
    pub native_sample_rate: u32,
    /// Device buffer is the device minimum times this factor.
    pub buffer_multiplier: usize,
    /// Engine iterations between two progress reports.
    pub progress_interval: u32,
    pub seek_debounce_ms: u64,
    pub stop_timeout_ms: u64,
    pub history_limit: usize,
    pub preferred_device: Option<String>,
    pub history_file: PathBuf,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            compression_rate: 2,
            native_sample_rate: 44100,
            buffer_multiplier: 8,
            progress_interval: 30,
            seek_debounce_ms: 500,
            stop_timeout_ms: 5000,
            history_limit: 10,
            preferred_device: None,
            history_file: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config")
                .join(APP_DIR)
                .join("history.txt"),
        }
    }
}

impl PlayerConfig {
    /// Sample rate handed to the output sink after downsampling.
    pub fn output_sample_rate(&self) -> u32 {
        self.native_sample_rate / self.compression_rate.max(1) as u32 * 2
    }

    pub fn seek_debounce(&self) -> Duration {
        Duration::from_millis(self.seek_debounce_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Reject values the playback engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compression_rate < 2 || self.compression_rate % 2 != 0 {
            return Err(ConfigError::Invalid(format!(
                "compression_rate must be an even number >= 2, got {}",
                self.compression_rate
            )));
        }
        if self.native_sample_rate == 0 {
            return Err(ConfigError::Invalid("native_sample_rate must be positive".to_string()));
        }
        if self.buffer_multiplier == 0 {
            return Err(ConfigError::Invalid("buffer_multiplier must be positive".to_string()));
        }
        if self.progress_interval == 0 {
            return Err(ConfigError::Invalid("progress_interval must be positive".to_string()));
        }
        if self.history_limit == 0 {
            return Err(ConfigError::Invalid("history_limit must be positive".to_string()));
        }
        Ok(())
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    config: PlayerConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        let config = Self::load_config(&config_path)?;
        config.validate()?;

        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn get_config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn update_config<F>(&mut self, updater: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut PlayerConfig),
    {
        let mut candidate = self.config.clone();
        updater(&mut candidate);
        candidate.validate()?;
        self.config = candidate;
        self.save_config()
    }

    pub fn set_compression_rate(&mut self, rate: usize) -> Result<(), ConfigError> {
        self.update_config(|config| config.compression_rate = rate)
    }

    pub fn set_preferred_device(&mut self, device: Option<String>) -> Result<(), ConfigError> {
        self.update_config(|config| config.preferred_device = device)
    }

    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.config = PlayerConfig::default();
        self.save_config()
    }

    fn get_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::home_dir()
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join(".config")
            .join(APP_DIR);

        std::fs::create_dir_all(&config_dir)?;

        Ok(config_dir.join("config.toml"))
    }

    fn load_config(path: &Path) -> Result<PlayerConfig, ConfigError> {
        if !path.exists() {
            return Ok(PlayerConfig::default());
        }

        let config_content = std::fs::read_to_string(path)?;
        let config: PlayerConfig = toml::from_str(&config_content)?;
        Ok(config)
    }

    fn save_config(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let config_content = toml::to_string_pretty(&self.config)?;
        std::fs::write(&self.config_path, config_content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_config_manager() -> (ConfigManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let config_manager = ConfigManager {
            config: PlayerConfig::default(),
            config_path,
        };

        (config_manager, temp_dir)
    }

    #[test]
    fn test_player_config_default() {
        let config = PlayerConfig::default();

        assert_eq!(config.compression_rate, 2);
        assert_eq!(config.native_sample_rate, 44100);
        assert_eq!(config.buffer_multiplier, 8);
        assert_eq!(config.progress_interval, 30);
        assert_eq!(config.seek_debounce(), Duration::from_millis(500));
        assert_eq!(config.history_limit, 10);
        assert!(config.history_file.to_string_lossy().contains("loopplay"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_output_sample_rate() {
        let mut config = PlayerConfig::default();
        assert_eq!(config.output_sample_rate(), 44100);

        config.compression_rate = 4;
        assert_eq!(config.output_sample_rate(), 22050);
    }

    #[test]
    fn test_validate_rejects_odd_compression_rate() {
        let mut config = PlayerConfig::default();
        config.compression_rate = 3;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.compression_rate = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let mut config = PlayerConfig::default();
        config.progress_interval = 0;
        assert!(config.validate().is_err());

        let mut config = PlayerConfig::default();
        config.history_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_config() {
        let (mut config_manager, _temp_dir) = create_test_config_manager();

        config_manager.config.compression_rate = 4;
        config_manager.config.preferred_device = Some("Test Device".to_string());
        config_manager.save_config().unwrap();

        let loaded_config = ConfigManager::load_config(&config_manager.config_path).unwrap();
        assert_eq!(loaded_config.compression_rate, 4);
        assert_eq!(loaded_config.preferred_device, Some("Test Device".to_string()));
    }

    #[test]
    fn test_load_partial_config_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("partial.toml");
        fs::write(&config_path, "compression_rate = 4\n").unwrap();

        let config = ConfigManager::load_config(&config_path).unwrap();
        assert_eq!(config.compression_rate, 4);
        assert_eq!(config.progress_interval, 30);
        assert_eq!(config.seek_debounce_ms, 500);
    }

    #[test]
    fn test_load_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        fs::write(&config_path, "invalid toml content [[[").unwrap();

        let result = ConfigManager::load_config(&config_path);
        assert!(matches!(result, Err(ConfigError::DeserializationError(_))));
    }

    #[test]
    fn test_update_config_validates_before_saving() {
        let (mut config_manager, _temp_dir) = create_test_config_manager();

        assert!(config_manager.set_compression_rate(5).is_err());
        assert_eq!(config_manager.get_config().compression_rate, 2);
        assert!(!config_manager.config_path().exists());

        config_manager.set_compression_rate(6).unwrap();
        let loaded_config = ConfigManager::load_config(&config_manager.config_path).unwrap();
        assert_eq!(loaded_config.compression_rate, 6);
    }

    #[test]
    fn test_reset_to_defaults() {
        let (mut config_manager, _temp_dir) = create_test_config_manager();

        config_manager
            .set_preferred_device(Some("Custom Device".to_string()))
            .unwrap();
        config_manager.reset_to_defaults().unwrap();

        assert_eq!(config_manager.get_config().preferred_device, None);
    }

    #[test]
    fn test_config_path_creation() {
        let temp_dir = TempDir::new().unwrap();
        let nested_path = temp_dir.path().join("nested").join("config").join("config.toml");

        let config_manager = ConfigManager {
            config: PlayerConfig::default(),
            config_path: nested_path.clone(),
        };
        config_manager.save_config().unwrap();

        assert!(nested_path.exists());
    }
}
