// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// The window record (width, height, title) plus the renderer knobs the shell
// hands over at startup. Missing keys fall back to sensible defaults.

use anyhow::Context;
use log::LevelFilter;
use serde::Deserialize;
use std::path::Path;

use crate::error::{Error, Result};
use crate::logging::{self, LogSink};
use crate::{sink_debug, sink_info, sink_warn};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Renderer".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Graphics settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraphicsConfig {
    pub clear_color: [f32; 4],
    /// Only honoured in debug builds
    pub validation_layers: bool,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            validation_layers: true,
        }
    }
}

/// Debug settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "debug".to_string(),
            show_fps: false,
        }
    }
}

impl Config {
    /// Defaults with the given window record.
    pub fn with_window(width: u32, height: u32, title: impl Into<String>) -> Self {
        Self {
            window: WindowConfig {
                title: title.into(),
                width,
                height,
            },
            ..Self::default()
        }
    }

    /// Load configuration from config.toml, falling back to defaults on error
    pub fn load(log: &LogSink) -> Self {
        Self::load_from_path("config.toml", log).unwrap_or_else(|e| {
            sink_warn!(log, "Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P, log: &LogSink) -> anyhow::Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            sink_info!(log, "Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        sink_info!(log, "Loaded configuration from {:?}", path);
        sink_debug!(log, "Config: {:?}", config);

        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config: {e}")))
    }

    /// Validation is a debug-build aid; release builds never enable it
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.graphics.validation_layers
    }

    pub fn log_level(&self) -> LevelFilter {
        logging::parse_level(&self.debug.log_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 720);
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [window]
            title = "HelloScreen"
            width = 600
            height = 800

            [graphics]
            clear_color = [1.0, 1.0, 1.0, 1.0]
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "HelloScreen");
        assert_eq!((config.window.width, config.window.height), (600, 800));
        assert_eq!(config.graphics.clear_color, [1.0; 4]);
        assert!(config.graphics.validation_layers);
        assert_eq!(config.debug, DebugConfig::default());
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let result = Config::parse("[window]\nwidth = \"wide\"");
        assert!(matches!(result, Err(Error::Config(ref msg)) if msg.starts_with("Invalid config")));
    }

    #[test]
    fn malformed_file_on_disk_keeps_the_config_error() {
        let log = LogSink::new(std::sync::Arc::new(crate::logging::capture::CaptureLog::default()));
        let path = std::env::temp_dir().join(format!("vk-frame-loop-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "[graphics]\nclear_color = \"white\"\n").unwrap();

        let err = Config::load_from_path(&path, &log).unwrap_err();
        let _ = std::fs::remove_file(&path);

        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Config(_))));
    }

    #[test]
    fn with_window_sets_record() {
        let config = Config::with_window(600, 800, "HelloScreen");
        assert_eq!(config.window.title, "HelloScreen");
        assert_eq!(config.window.width, 600);
        assert_eq!(config.graphics, GraphicsConfig::default());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let log = LogSink::new(std::sync::Arc::new(crate::logging::capture::CaptureLog::default()));
        let path = std::env::temp_dir().join("vk-frame-loop-does-not-exist.toml");
        let config = Config::load_from_path(&path, &log).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_from_disk() {
        let log = LogSink::new(std::sync::Arc::new(crate::logging::capture::CaptureLog::default()));
        let path = std::env::temp_dir().join(format!("vk-frame-loop-{}.toml", std::process::id()));
        std::fs::write(&path, "[debug]\nlog_level = \"warn\"\nshow_fps = true\n").unwrap();

        let config = Config::load_from_path(&path, &log).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(config.log_level(), LevelFilter::Warn);
        assert!(config.debug.show_fps);
    }
}
