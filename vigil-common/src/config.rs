//! Configuration loading for Vigil services
//!
//! Resolution order for every setting: CLI argument (handled by the binary)
//! > environment variable > TOML config file > compiled default.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Compiled default buffer delay (ms)
pub const DEFAULT_BUFFER_DELAY_MS: u64 = 5_000;
/// Lower clamp for the buffer delay (ms)
pub const MIN_BUFFER_DELAY_MS: u64 = 3_000;
/// Upper clamp for the buffer delay (ms)
pub const MAX_BUFFER_DELAY_MS: u64 = 10_000;

/// HTTP boundary settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5760,
        }
    }
}

/// Delay buffer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Requested visibility delay between detection and application (ms)
    pub delay_ms: u64,
    /// Maximum pending scheduled filters per stream before oldest-first
    /// eviction kicks in
    pub max_pending_filters: usize,
    /// Maximum retained safety-history entries per stream
    pub history_limit: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            delay_ms: DEFAULT_BUFFER_DELAY_MS,
            max_pending_filters: 256,
            history_limit: 1_024,
        }
    }
}

impl BufferConfig {
    /// Requested delay clamped to the supported window
    pub fn effective_delay_ms(&self) -> u64 {
        self.delay_ms.clamp(MIN_BUFFER_DELAY_MS, MAX_BUFFER_DELAY_MS)
    }
}

/// Detection source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Base URL of the external analyzer; None disables analysis (fail-open)
    pub endpoint: Option<String>,
    /// Per-call timeout before the pipeline gives up and passes through (ms)
    pub timeout_ms: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: 2_000,
        }
    }
}

/// Top-level Vigil configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    pub api: ApiConfig,
    pub buffer: BufferConfig,
    pub analysis: AnalysisConfig,
}

impl VigilConfig {
    /// Load configuration
    ///
    /// Reads `path` when given, otherwise the platform config file if one
    /// exists, otherwise compiled defaults. Environment variables
    /// `VIGIL_BUFFER_DELAY_MS` and `VIGIL_ANALYZER_URL` override the file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match default_config_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("VIGIL_BUFFER_DELAY_MS") {
            if let Ok(ms) = value.parse() {
                self.buffer.delay_ms = ms;
            }
        }
        if let Ok(url) = std::env::var("VIGIL_ANALYZER_URL") {
            if !url.is_empty() {
                self.analysis.endpoint = Some(url);
            }
        }
    }
}

/// Platform config file path (~/.config/vigil/config.toml on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("vigil").join("config.toml"))
}
