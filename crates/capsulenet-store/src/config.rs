//! Typed store configuration.
//!
//! Mirrors a small `capsulenet.yaml` file. All fields have defaults, so
//! an absent or empty file yields a working configuration. Environment
//! variables override file values for deployment without editing files:
//!
//! - `CAPSULENET_DATA_DIR` overrides `data_dir`
//! - `CAPSULENET_PRETTY_JSON` overrides `pretty_json`

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Persistence configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Directory holding every record file.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Pretty-print JSON records. Costs bytes, buys diffability.
    #[serde(default = "default_pretty_json")]
    pub pretty_json: bool,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".capsulenet")
}

const fn default_pretty_json() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            pretty_json: default_pretty_json(),
        }
    }
}

impl StoreConfig {
    /// Load configuration from a YAML file, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] when the file cannot be read,
    /// [`ConfigError::Yaml`] when the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yml::from_str(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a YAML string, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Yaml`] when the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Overwrite file values with environment variables when present.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("CAPSULENET_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(pretty) = std::env::var("CAPSULENET_PRETTY_JSON") {
            if let Ok(value) = pretty.parse::<bool>() {
                self.pretty_json = value;
            }
        }
    }
}
