use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::export::ExportPreset;

/// Top-level configuration for the stock-meta library.
///
/// Controls the Gemini service, the processing defaults applied when a
/// request omits them, and the server bind address.
///
/// # Loading
///
/// ```rust,no_run
/// use stock_meta::config::Config;
///
/// // From a JSON file
/// let config = Config::load(Some("config.json".as_ref())).unwrap();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.gemini.api_key = "AIza...".into();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Gemini service configuration.
    pub gemini: GeminiConfig,
    /// Batch processing defaults (platform, constraints, concurrency).
    pub processing: ProcessingConfig,
    /// HTTP server bind address.
    pub server: ServerConfig,
}

/// Google Gemini service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// Default API key. Requests that carry their own key override this.
    pub api_key: String,
    pub model: String,
    /// Per-request timeout in seconds. Expiry is reported as a model
    /// request failure for that item only.
    pub timeout_secs: u64,
}

/// Defaults for batch submissions that omit individual fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Target platform preset for prompts and export rendering.
    pub platform: ExportPreset,
    /// Minimum title length the model is asked to reach. Titles at or above
    /// this count as "optimal" in the aggregate counters.
    pub title_min: usize,
    /// Maximum title length requested from the model.
    pub title_max: usize,
    /// Minimum keyword count requested from the model.
    pub keyword_min: usize,
    /// Maximum keyword count; also the post-processing target the keyword
    /// list is padded or truncated to.
    pub keyword_max: usize,
    /// Concurrency limit: how many model requests are in flight per group.
    pub max_workers: usize,
    /// Upper bound on group size regardless of `max_workers`.
    pub batch_size: usize,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini: GeminiConfig {
                api_key: String::new(),
                model: "gemini-2.0-flash".to_string(),
                timeout_secs: 60,
            },
            processing: ProcessingConfig {
                platform: ExportPreset::AdobeStock,
                title_min: 70,
                title_max: 200,
                keyword_min: 25,
                keyword_max: 49,
                max_workers: 5,
                batch_size: 100,
            },
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
        }
    }
}

impl Config {
    /// Resolve the config file path — same directory as the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            log::warn!(
                "Config file not found at {}. Using defaults.",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(())
    }
}
