//! Logging configuration shared by the engine and its hosts
//!
//! Console logging goes to stderr so an embedding host's stdout stays
//! untouched. File logging appends.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use tracing::Level;
use tracing_subscriber::layer::Layer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

/// Logging configuration, deserializable from a `[logging]` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log to stderr.
    #[serde(default = "default_true")]
    pub console: bool,

    /// Append to this file as well, when set.
    #[serde(default)]
    pub file: Option<String>,

    /// Level string: trace, debug, info, warn, error.
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Include the module target in each line.
    #[serde(default = "default_true")]
    pub show_target: bool,

    #[serde(default = "default_true")]
    pub ansi: bool,
}

fn default_true() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console: true,
            file: None,
            level: default_level(),
            timestamps: true,
            show_target: true,
            ansi: true,
        }
    }
}

impl LogConfig {
    /// Verbose configuration for troubleshooting a session.
    pub fn debug() -> Self {
        Self {
            level: "debug".to_string(),
            ..Default::default()
        }
    }

    /// Log only to a file, for hosts that own the console.
    pub fn file_only(path: &str) -> Self {
        Self {
            console: false,
            file: Some(path.to_string()),
            ..Default::default()
        }
    }

    pub fn with_level(mut self, level: &str) -> Self {
        self.level = level.to_string();
        self
    }

    /// Parse the level string, defaulting to INFO on anything unknown.
    pub fn parsed_level(&self) -> Level {
        match self.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" | "warning" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

/// Install the global subscriber described by `config`.
///
/// Safe to call more than once; only the first call takes effect.
pub fn init_logging(config: &LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console {
        let layer = fmt::layer()
            .with_ansi(config.ansi)
            .with_target(config.show_target)
            .with_writer(std::io::stderr);
        if config.timestamps {
            layers.push(layer.boxed());
        } else {
            layers.push(layer.without_time().boxed());
        }
    }

    if let Some(path) = &config.file {
        if let Ok(file) = OpenOptions::new().create(true).append(true).open(path) {
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(config.show_target)
                .with_writer(move || -> Box<dyn Write + Send> {
                    match file.try_clone() {
                        Ok(clone) => Box::new(clone),
                        Err(_) => Box::new(std::io::sink()),
                    }
                });
            layers.push(layer.boxed());
        }
    }

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init();
}

/// Initialize logging for a host with default settings.
pub fn init_host_logging() {
    init_logging(&LogConfig::default());
}

/// Initialize logging from the `[logging]` section of a TOML config file.
pub fn init_logging_from_file(path: &str) -> Result<(), String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read config file: {}", e))?;

    #[derive(Deserialize)]
    struct ConfigWrapper {
        #[serde(default)]
        logging: Option<LogConfig>,
    }

    let wrapper: ConfigWrapper =
        toml::from_str(&content).map_err(|e| format!("failed to parse config file: {}", e))?;

    init_logging(&wrapper.logging.unwrap_or_default());
    Ok(())
}
