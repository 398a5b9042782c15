// Configuration management for the recorder

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RecordError, Result};
use crate::queue::DEFAULT_CAPACITY;

/// Recorder configuration, stored as TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Directory the `PID<NNN>/` folders are created in
    pub output_root: PathBuf,

    /// Ring capacity of every stream queue (power of two, at least 4)
    pub queue_capacity: usize,

    /// Hardware threads left for capture, tracking and UI
    pub reserved_threads: u32,

    /// Upper bound on encoder threads per image stream
    pub max_threads_per_stream: u32,

    /// Try a hardware H.264 encoder first, falling back to x264
    pub prefer_hardware: bool,

    /// Width colour video is downscaled to before encoding (0 keeps sensor size)
    pub colour_output_width: u32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("."),
            queue_capacity: DEFAULT_CAPACITY,
            reserved_threads: 4,
            max_threads_per_stream: 8,
            prefer_hardware: true,
            colour_output_width: 640,
        }
    }
}

impl RecorderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity < 4 || !self.queue_capacity.is_power_of_two() {
            return Err(RecordError::Config(format!(
                "queue_capacity must be a power of two of at least 4, got {}",
                self.queue_capacity
            )));
        }
        if self.max_threads_per_stream == 0 {
            return Err(RecordError::Config("max_threads_per_stream must be at least 1".into()));
        }
        // 4:2:0 encoders need an even width
        if self.colour_output_width % 2 != 0 {
            return Err(RecordError::Config(format!(
                "colour_output_width must be 0 or an even number, got {}",
                self.colour_output_width
            )));
        }
        Ok(())
    }

    /// Load config from disk or return default
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => {
                        log::warn!("Failed to parse config {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read config file {}: {}", path.display(), e);
                }
            }
        }

        Self::default()
    }

    /// Save config to disk
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        Ok(())
    }
}

/// Get the config file path
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("depth-recorder")
        .join("config.toml")
}
