use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;
use crate::keys::DEFAULT_KEY_PREFIX;

pub const DEFAULT_CONFIG_PATH: &str = "config/prompt_config.toml";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_INPUT_DIR: &str = "papers_to_identify";
pub const DEFAULT_OUTPUT_FILE: &str = "output/papers_identified.csv";

/// On-disk TOML configuration structure.
/// Everything except the file itself is optional; absent values fall back to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub system_prompt: Option<String>,
    pub model: Option<ModelConfig>,
    pub paths: Option<PathsConfig>,
    pub run: Option<RunConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: Option<String>,
    pub endpoint: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    pub input_dir: Option<String>,
    pub output_file: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    pub key_prefix: Option<String>,
    pub checkpoint_each_unit: Option<bool>,
}

/// Load a config from `path`.
///
/// Unlike optional tool settings, the prompt config is required: a missing
/// or unparsable file is an error.
pub fn load_from_path(path: &Path) -> Result<ConfigFile, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::Missing(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&content, path)
}

/// Parse TOML `content`; `path` is only used for error messages.
pub fn parse(content: &str, path: &Path) -> Result<ConfigFile, ConfigError> {
    toml::from_str(content).map_err(|source| ConfigError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

impl ConfigFile {
    pub fn model_name(&self) -> String {
        self.model
            .as_ref()
            .and_then(|m| m.name.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn endpoint(&self) -> String {
        self.model
            .as_ref()
            .and_then(|m| m.endpoint.clone())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(
            self.model
                .as_ref()
                .and_then(|m| m.timeout_secs)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        )
    }

    pub fn input_dir(&self) -> PathBuf {
        PathBuf::from(
            self.paths
                .as_ref()
                .and_then(|p| p.input_dir.clone())
                .unwrap_or_else(|| DEFAULT_INPUT_DIR.to_string()),
        )
    }

    pub fn output_file(&self) -> PathBuf {
        PathBuf::from(
            self.paths
                .as_ref()
                .and_then(|p| p.output_file.clone())
                .unwrap_or_else(|| DEFAULT_OUTPUT_FILE.to_string()),
        )
    }

    pub fn key_prefix(&self) -> String {
        self.run
            .as_ref()
            .and_then(|r| r.key_prefix.clone())
            .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string())
    }

    pub fn checkpoint_each_unit(&self) -> bool {
        self.run
            .as_ref()
            .and_then(|r| r.checkpoint_each_unit)
            .unwrap_or(false)
    }
}

/// The system instruction bound into the model at initialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptConfig {
    pub system_prompt: String,
}

impl PromptConfig {
    /// Take the prompt from a loaded config. A missing `system_prompt` key
    /// yields an empty instruction and a warning.
    pub fn from_config(config: &ConfigFile) -> Self {
        match &config.system_prompt {
            Some(prompt) => Self {
                system_prompt: prompt.clone(),
            },
            None => {
                tracing::warn!("'system_prompt' not found in config, using an empty instruction");
                Self::default()
            }
        }
    }
}
