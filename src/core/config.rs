use super::error::{InferenceError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tokenizer repository used when no override is configured.
pub const DEFAULT_TOKENIZER_REPO: &str = "nlptown/bert-base-multilingual-uncased-sentiment";

/// Truncation length of the reference deployment.
pub const DEFAULT_MAX_LENGTH: usize = 512;

/// Settings for the hosting runtime.
///
/// Values come from an optional JSON file (`FINMOOD_CONFIG`) and are then
/// overridden by environment variables, see [`ServeConfig::load`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServeConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,
    #[serde(default = "default_tokenizer_repo")]
    pub tokenizer_repo: String,
    /// Local `tokenizer.json` used instead of `tokenizer_repo`.
    #[serde(default)]
    pub tokenizer_file: Option<PathBuf>,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    /// `auto`, `cpu` or `cuda:<index>`.
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            model_dir: default_model_dir(),
            tokenizer_repo: default_tokenizer_repo(),
            tokenizer_file: None,
            max_length: default_max_length(),
            device: default_device(),
            log_level: default_log_level(),
        }
    }
}

impl ServeConfig {
    /// Read the optional config file, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let base = match std::env::var("FINMOOD_CONFIG") {
            Ok(path) => {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    InferenceError::load(format!("failed to read config file {path}: {e}"))
                })?;
                serde_json::from_str(&content).map_err(|e| {
                    InferenceError::load(format!("failed to parse config file {path}: {e}"))
                })?
            }
            Err(_) => ServeConfig::default(),
        };
        base.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a variable lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("SM_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(host) = lookup("FINMOOD_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("SAGEMAKER_BIND_TO_PORT").or_else(|| lookup("PORT")) {
            self.port = port
                .parse()
                .map_err(|_| InferenceError::load(format!("invalid port: '{port}'")))?;
        }
        if let Some(repo) = lookup("FINMOOD_TOKENIZER_REPO") {
            self.tokenizer_repo = repo;
        }
        if let Some(file) = lookup("FINMOOD_TOKENIZER_FILE") {
            self.tokenizer_file = Some(PathBuf::from(file));
        }
        if let Some(max_length) = lookup("FINMOOD_MAX_LENGTH") {
            self.max_length = max_length.parse().map_err(|_| {
                InferenceError::load(format!("invalid max length: '{max_length}'"))
            })?;
        }
        if let Some(device) = lookup("FINMOOD_DEVICE") {
            self.device = device;
        }
        if let Some(level) = lookup("FINMOOD_LOG_LEVEL") {
            self.log_level = level;
        }

        if self.max_length == 0 {
            return Err(InferenceError::load("max length must be at least 1"));
        }
        Ok(self)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("/opt/ml/model")
}

fn default_tokenizer_repo() -> String {
    DEFAULT_TOKENIZER_REPO.to_string()
}

fn default_max_length() -> usize {
    DEFAULT_MAX_LENGTH
}

fn default_device() -> String {
    "auto".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
