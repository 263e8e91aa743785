//! Configuration for the Koan tutor.

use std::path::Path;

use koan_session::SamplingConfig;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkflowError};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "koan.json";

/// Default model file path.
fn default_model_path() -> String {
    "models/qwen2.5-0.5b-instruct-q8_0.gguf".to_string()
}

/// Default interpreter used by the subprocess judge.
fn default_interpreter() -> String {
    "python3".to_string()
}

/// Default per-run execution timeout in seconds.
const fn default_run_timeout() -> u32 {
    10
}

/// Default time to wait for the model instance to become ready, in seconds.
const fn default_ready_timeout() -> u32 {
    60
}

/// Main configuration for the Koan tutor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KoanConfig {
    /// Path to the GGUF model file.
    #[serde(default = "default_model_path")]
    pub model_path: String,

    /// Sampling parameters for the model session.
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Path to a JSON questions file; `None` uses the built-in set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub questions: Option<String>,

    /// Interpreter binary the judge runs user code with.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Timeout for one judged execution, in seconds.
    #[serde(default = "default_run_timeout")]
    pub run_timeout: u32,

    /// Timeout for model readiness before an assist request fails, in
    /// seconds.
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout: u32,
}

impl Default for KoanConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            sampling: SamplingConfig::default(),
            questions: None,
            interpreter: default_interpreter(),
            run_timeout: default_run_timeout(),
            ready_timeout: default_ready_timeout(),
        }
    }
}

impl KoanConfig {
    /// Loads configuration from `koan.json` in the given directory,
    /// falling back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON or
    /// invalid values.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::ConfigParseError` for unreadable or invalid
    /// JSON and `WorkflowError::ConfigValidationError` for out-of-range
    /// values.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(WorkflowError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| WorkflowError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::ConfigValidationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        if self.model_path.trim().is_empty() {
            return Err(WorkflowError::config_validation(
                "modelPath must not be empty",
                "Point modelPath at a GGUF model file in your koan.json",
            ));
        }

        if self.interpreter.trim().is_empty() {
            return Err(WorkflowError::config_validation(
                "interpreter must not be empty",
                "Set interpreter to a runnable binary such as 'python3'",
            ));
        }

        if self.run_timeout == 0 {
            return Err(WorkflowError::config_validation(
                "runTimeout must be greater than 0",
                "Set runTimeout to at least 1 second in your koan.json",
            ));
        }

        if self.ready_timeout == 0 {
            return Err(WorkflowError::config_validation(
                "readyTimeout must be greater than 0",
                "Set readyTimeout to at least 1 second in your koan.json",
            ));
        }

        self.sampling.validate().map_err(|e| {
            WorkflowError::config_validation(
                e.to_string(),
                "Fix the sampling section of your koan.json",
            )
        })
    }
}
