//! Configuration system for oxidized-cafe

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{EmulatorError, Result};
use crate::gpu_queue::DEFAULT_QUEUE_CAPACITY;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    pub gpu: GpuConfig,
    pub debug: DebugConfig,
}

/// GPU settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    pub backend: GpuBackend,
    /// Maximum number of command buffers queued ahead of the GPU thread
    pub queue_capacity: usize,
    /// Directory holding the screen-quad programs used for scan-out
    pub shader_resource_dir: PathBuf,
}

/// GPU backend type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum GpuBackend {
    #[default]
    Null,
}

/// Debug settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: LogLevel,
    /// Log every decoded PM4 packet at trace level
    pub trace_pm4: bool,
    /// Dump recompiled shader source at debug level
    pub dump_shaders: bool,
}

/// Logging level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Filter directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            backend: GpuBackend::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            shader_resource_dir: PathBuf::from("resources/shaders"),
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            trace_pm4: false,
            dump_shaders: false,
        }
    }
}

impl Config {
    /// Load configuration from file, or create default if it doesn't exist
    pub fn load() -> Result<Self> {
        let path = Self::config_path();

        if path.exists() {
            Self::load_from(&path)
        } else {
            let config = Self::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| EmulatorError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| EmulatorError::Config(e.to_string()))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("oxidized-cafe")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.gpu.backend, GpuBackend::Null);
        assert_eq!(config.gpu.queue_capacity, 16);
        assert_eq!(config.gpu.shader_resource_dir, PathBuf::from("resources/shaders"));
        assert!(!config.debug.trace_pm4);
        assert_eq!(config.debug.log_level, LogLevel::Info);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.gpu.queue_capacity, config.gpu.queue_capacity);
        assert_eq!(parsed.debug.log_level, config.debug.log_level);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: Config = toml::from_str("[debug]\ndump_shaders = true\n").unwrap();
        assert!(parsed.debug.dump_shaders);
        assert_eq!(parsed.gpu.queue_capacity, 16);
    }

    #[test]
    fn test_load_from_reports_errors() {
        let dir = std::env::temp_dir().join(format!("oxidized-cafe-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let missing = Config::load_from(&dir.join("missing.toml"));
        assert!(matches!(missing, Err(EmulatorError::Io(_))));

        let bad = dir.join("bad.toml");
        std::fs::write(&bad, "[gpu]\nqueue_capacity = \"many\"\n").unwrap();
        assert!(matches!(Config::load_from(&bad), Err(EmulatorError::Config(_))));

        let good = dir.join("good.toml");
        std::fs::write(&good, "[gpu]\nqueue_capacity = 4\n").unwrap();
        assert_eq!(Config::load_from(&good).unwrap().gpu.queue_capacity, 4);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_log_level_filter() {
        assert_eq!(LogLevel::Trace.as_filter(), "trace");
        assert_eq!(LogLevel::Off.as_filter(), "off");
    }
}
