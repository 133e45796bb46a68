//! Application settings.
//!
//! Loaded from `config.json` in the platform config directory, then
//! overridden by environment variables (a `.env` file is honoured).

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::backend::GenerationEndpoint;
use crate::error::{OpsError, OpsResult};

/// Settings for talking to the backend and pacing the pipelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the generation backend.
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Which endpoint produces diagrams.
    #[serde(default)]
    pub generation_endpoint: GenerationEndpoint,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Quiet period before an edited form is persisted and sent for
    /// instruction generation.
    #[serde(default = "default_snapshot_debounce_ms")]
    pub snapshot_debounce_ms: u64,

    /// Quiet period before instruction text is sent for token counting.
    #[serde(default = "default_token_debounce_ms")]
    pub token_debounce_ms: u64,

    /// Directory holding the persisted form values.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Scale factor applied to PNG exports.
    #[serde(default = "default_raster_scale")]
    pub raster_scale: f32,
}

fn default_backend_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120 // diagram generation runs an LLM round-trip plus mermaid-cli
}

fn default_snapshot_debounce_ms() -> u64 {
    500
}

fn default_token_debounce_ms() -> u64 {
    50
}

fn default_state_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".diagram-forge"))
}

fn default_raster_scale() -> f32 {
    1.0
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "diagram-forge", "dforge")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            generation_endpoint: GenerationEndpoint::default(),
            request_timeout_secs: default_request_timeout_secs(),
            snapshot_debounce_ms: default_snapshot_debounce_ms(),
            token_debounce_ms: default_token_debounce_ms(),
            state_dir: default_state_dir(),
            raster_scale: default_raster_scale(),
        }
    }
}

impl Config {
    /// Every key accepted by [`get`](Self::get) and [`set`](Self::set).
    pub const KEYS: [&'static str; 7] = [
        "backend_url",
        "generation_endpoint",
        "request_timeout_secs",
        "snapshot_debounce_ms",
        "token_debounce_ms",
        "state_dir",
        "raster_scale",
    ];

    /// Load configuration from disk with environment overrides.
    pub fn load() -> OpsResult<Self> {
        // Load .env file if present (silently ignore if missing)
        let _ = dotenvy::dotenv();

        let mut config = match Self::config_file_path() {
            Some(path) if path.exists() => {
                let contents = std::fs::read_to_string(&path)?;
                serde_json::from_str(&contents)?
            }
            _ => Self::default(),
        };

        config.apply_env()?;
        Ok(config)
    }

    /// Override values from `DFORGE_*` environment variables.
    pub fn apply_env(&mut self) -> OpsResult<()> {
        for key in Self::KEYS {
            let var = format!("DFORGE_{}", key.to_ascii_uppercase());
            if let Ok(value) = std::env::var(&var) {
                self.set(key, &value)
                    .map_err(|e| OpsError::Config(format!("{var}: {e}")))?;
            }
        }
        Ok(())
    }

    /// Save configuration to disk.
    pub fn save(&self) -> OpsResult<()> {
        if let Some(path) = Self::config_file_path() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let contents = serde_json::to_string_pretty(self)?;
            std::fs::write(&path, contents)?;
        }
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_file_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.json"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn snapshot_debounce(&self) -> Duration {
        Duration::from_millis(self.snapshot_debounce_ms)
    }

    pub fn token_debounce(&self) -> Duration {
        Duration::from_millis(self.token_debounce_ms)
    }

    /// Get a configuration value by key.
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "backend_url" => Some(self.backend_url.clone()),
            "generation_endpoint" => Some(self.generation_endpoint.to_string()),
            "request_timeout_secs" => Some(self.request_timeout_secs.to_string()),
            "snapshot_debounce_ms" => Some(self.snapshot_debounce_ms.to_string()),
            "token_debounce_ms" => Some(self.token_debounce_ms.to_string()),
            "state_dir" => Some(self.state_dir.display().to_string()),
            "raster_scale" => Some(self.raster_scale.to_string()),
            _ => None,
        }
    }

    /// Set a configuration value by key.
    pub fn set(&mut self, key: &str, value: &str) -> OpsResult<()> {
        fn number<T: std::str::FromStr>(value: &str) -> OpsResult<T> {
            value
                .trim()
                .parse()
                .map_err(|_| OpsError::Config(format!("Invalid number: {}", value)))
        }

        match key {
            "backend_url" => {
                let url = value.trim().trim_end_matches('/');
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(OpsError::Config(format!("Invalid backend URL: {}", value)));
                }
                self.backend_url = url.to_string();
            }
            "generation_endpoint" => {
                self.generation_endpoint = value.parse()?;
            }
            "request_timeout_secs" => {
                self.request_timeout_secs = number(value)?;
            }
            "snapshot_debounce_ms" => {
                self.snapshot_debounce_ms = number(value)?;
            }
            "token_debounce_ms" => {
                self.token_debounce_ms = number(value)?;
            }
            "state_dir" => {
                self.state_dir = PathBuf::from(value);
            }
            "raster_scale" => {
                let scale: f32 = number(value)?;
                if !(scale.is_finite() && scale > 0.0) {
                    return Err(OpsError::Config(format!(
                        "Raster scale must be positive: {}",
                        value
                    )));
                }
                self.raster_scale = scale;
            }
            _ => {
                return Err(OpsError::Config(format!("Unknown config key: {}", key)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.backend_url, "http://localhost:8000");
        assert_eq!(config.snapshot_debounce(), Duration::from_millis(500));
        assert_eq!(config.token_debounce(), Duration::from_millis(50));
        assert_eq!(config.generation_endpoint, GenerationEndpoint::MermaidDesignRequest);
    }

    #[test]
    fn test_set_and_get_round_trip() {
        let mut config = Config::default();
        config.set("backend_url", "http://backend:9000/").unwrap();
        config.set("token_debounce_ms", "75").unwrap();
        config.set("generation_endpoint", "generate_diagram").unwrap();
        config.set("raster_scale", "2").unwrap();

        assert_eq!(config.get("backend_url").as_deref(), Some("http://backend:9000"));
        assert_eq!(config.get("token_debounce_ms").as_deref(), Some("75"));
        assert_eq!(config.get("generation_endpoint").as_deref(), Some("generate_diagram"));
        assert_eq!(config.raster_scale, 2.0);
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut config = Config::default();
        assert!(config.set("token_debounce_ms", "soon").is_err());
        assert!(config.set("backend_url", "localhost:8000").is_err());
        assert!(config.set("raster_scale", "0").is_err());
        assert!(config.set("colour", "blue").is_err());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_every_key_is_readable() {
        let config = Config::default();
        for key in Config::KEYS {
            assert!(config.get(key).is_some(), "missing getter for {key}");
        }
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"backend_url": "http://x:1"}"#).unwrap();
        assert_eq!(config.backend_url, "http://x:1");
        assert_eq!(config.snapshot_debounce_ms, 500);
    }
}
