//! # Configuration Management
//!
//! Loads application configuration from several layered sources:
//! - Built-in defaults (the `Default` impl below)
//! - An optional `config.toml` next to the working directory
//! - Environment variables with the `APP_` prefix
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST`, `PORT` and `DATA_DIR` (common deployment variables)
//! 2. `APP_`-prefixed variables, using `__` between section and key
//!    (e.g. `APP_STORAGE__DATA_DIR`, `APP_ENGINE__MAX_CACHED_PIPELINES`)
//! 3. `config.toml`
//! 4. Defaults
//!
//! ## Sections:
//! - **server**: bind address and the browser origin allowed by CORS
//! - **storage**: where registries keep their state files and folders
//! - **engine**: external ML engine commands and the pipeline cache size

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub engine: EngineConfig,
}

/// HTTP server settings.
///
/// ## Fields:
/// - `host`: IP address to bind (`127.0.0.1` for local use, `0.0.0.0` in containers)
/// - `port`: TCP port
/// - `allowed_origin`: origin of the workbench web client, allowed by CORS
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origin: String,
}

/// Registry persistence settings.
///
/// ## Fields:
/// - `data_dir`: root folder holding `datasets.json`, `models.json`,
///   `transcriptions.json` and their content folders
/// - `reset_on_start`: ignore saved state and start with empty registries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    pub reset_on_start: bool,
}

/// External engine settings.
///
/// Commands are split on whitespace; the first word is the program. The
/// registries append their own arguments (see [`crate::engine::command`]).
///
/// ## Fields:
/// - `cache_dir`: download/cache folder for inference models; empty means
///   `{data_dir}/cache`
/// - `max_cached_pipelines`: how many loaded pipelines stay in memory before
///   the least recently used one is dropped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub preprocess_command: String,
    pub train_command: String,
    pub transcribe_command: String,
    pub cache_dir: String,
    pub max_cached_pipelines: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 5001,
                allowed_origin: "http://localhost:3000".to_string(),
            },
            storage: StorageConfig {
                data_dir: "data".to_string(),
                reset_on_start: false,
            },
            engine: EngineConfig {
                preprocess_command: "elpis-preprocess".to_string(),
                train_command: "elpis-train".to_string(),
                transcribe_command: "elpis-transcribe".to_string(),
                cache_dir: String::new(),
                max_cached_pipelines: 2,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(data_dir) = env::var("DATA_DIR") {
            settings = settings.set_override("storage.data_dir", data_dir)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("Server port cannot be 0"));
        }

        if self.storage.data_dir.trim().is_empty() {
            return Err(anyhow!("Data directory cannot be empty"));
        }

        if self.engine.max_cached_pipelines == 0 {
            return Err(anyhow!("Pipeline cache must hold at least one pipeline"));
        }

        for (name, command) in [
            ("preprocess_command", &self.engine.preprocess_command),
            ("train_command", &self.engine.train_command),
            ("transcribe_command", &self.engine.transcribe_command),
        ] {
            if command.trim().is_empty() {
                return Err(anyhow!("Engine {} cannot be empty", name));
            }
        }

        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.data_dir)
    }

    pub fn cache_dir(&self) -> PathBuf {
        if self.engine.cache_dir.trim().is_empty() {
            self.data_dir().join("cache")
        } else {
            PathBuf::from(&self.engine.cache_dir)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 5001);
        assert_eq!(config.engine.max_cached_pipelines, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.engine.max_cached_pipelines = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.engine.train_command = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cache_dir_defaults_under_data_dir() {
        let mut config = AppConfig::default();
        config.storage.data_dir = "/srv/workbench".to_string();
        assert_eq!(config.cache_dir(), PathBuf::from("/srv/workbench/cache"));

        config.engine.cache_dir = "/var/cache/models".to_string();
        assert_eq!(config.cache_dir(), PathBuf::from("/var/cache/models"));
    }
}
