//! Sampling configuration for generative sessions.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Default token budget per reply.
const fn default_max_tokens() -> u32 {
    1024
}

/// Default top-k cutoff.
const fn default_top_k() -> u32 {
    40
}

/// Default nucleus-sampling threshold.
const fn default_top_p() -> f32 {
    0.9
}

/// Default sampling temperature.
const fn default_temperature() -> f32 {
    1.0
}

/// Sampling parameters applied when a session is opened.
///
/// A reset reopens the session with `SamplingConfig::default()` regardless
/// of what the instance was initialized with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingConfig {
    /// Maximum number of tokens generated per reply. Must be greater than 0.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Top-k sampling cutoff. Must be greater than 0.
    #[serde(default = "default_top_k")]
    pub top_k: u32,

    /// Top-p (nucleus) sampling threshold. Must be in (0, 1].
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Sampling temperature. Must be non-negative; 0 selects greedy decoding.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            top_k: default_top_k(),
            top_p: default_top_p(),
            temperature: default_temperature(),
        }
    }
}

impl SamplingConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidSampling` if any parameter is out of
    /// range.
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(SessionError::invalid_sampling(
                "maxTokens must be greater than 0",
                "Set maxTokens to at least 1 in your koan.json",
            ));
        }

        if self.top_k == 0 {
            return Err(SessionError::invalid_sampling(
                "topK must be greater than 0",
                "Set topK to at least 1 in your koan.json",
            ));
        }

        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(SessionError::invalid_sampling(
                format!("topP must be in (0, 1], got {}", self.top_p),
                "Set topP to a value like 0.9 in your koan.json",
            ));
        }

        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(SessionError::invalid_sampling(
                format!("temperature must be non-negative, got {}", self.temperature),
                "Set temperature to 0 for greedy decoding or a value like 1.0 for sampling",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = SamplingConfig::default();
        assert_eq!(config.max_tokens, 1024);
        assert_eq!(config.top_k, 40);
        assert!((config.top_p - 0.9).abs() < f32::EPSILON);
        assert!((config.temperature - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_default_config_validates() {
        assert!(SamplingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_max_tokens_rejected() {
        let config = SamplingConfig {
            max_tokens: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("maxTokens"));
    }

    #[test]
    fn test_top_p_bounds() {
        let too_high = SamplingConfig {
            top_p: 1.5,
            ..Default::default()
        };
        assert!(too_high.validate().is_err());

        let zero = SamplingConfig {
            top_p: 0.0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let boundary = SamplingConfig {
            top_p: 1.0,
            ..Default::default()
        };
        assert!(boundary.validate().is_ok());
    }

    #[test]
    fn test_negative_temperature_rejected() {
        let config = SamplingConfig {
            temperature: -0.1,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let greedy = SamplingConfig {
            temperature: 0.0,
            ..Default::default()
        };
        assert!(greedy.validate().is_ok());
    }

    #[test]
    fn test_deserialization_with_defaults() {
        let config: SamplingConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_tokens, 1024);
        assert_eq!(config.top_k, 40);
    }

    #[test]
    fn test_deserialization_with_overrides() {
        let config: SamplingConfig =
            serde_json::from_str(r#"{"maxTokens": 256, "temperature": 0.2}"#).unwrap();
        assert_eq!(config.max_tokens, 256);
        assert!((config.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.top_k, 40);
    }
}
