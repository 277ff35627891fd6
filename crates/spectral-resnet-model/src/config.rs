use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while reading an [`AudioCnnConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Construction parameters of an [`AudioCnn`](crate::AudioCnn).
///
/// The stage topology is fixed; only the head width, regularisation and
/// normalisation constants vary. Missing JSON fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioCnnConfig {
    pub num_classes: usize,
    /// Dropout probability in front of the classifier head.
    pub dropout: f64,
    pub bn_eps: f64,
    pub bn_momentum: f64,
    /// Seed for weight initialisation and dropout masks; `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for AudioCnnConfig {
    fn default() -> Self {
        AudioCnnConfig {
            num_classes: 50,
            dropout: 0.5,
            bn_eps: 1e-5,
            bn_momentum: 0.1,
            seed: Some(42),
        }
    }
}

impl AudioCnnConfig {
    pub fn new(num_classes: usize) -> Self {
        Self::default().with_num_classes(num_classes)
    }

    pub fn with_num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = num_classes;
        self
    }

    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Reject values no model could be built from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_classes == 0 {
            return Err(ConfigError::Invalid("num_classes must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ConfigError::Invalid(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if !(self.bn_eps > 0.0) {
            return Err(ConfigError::Invalid(format!("bn_eps must be positive, got {}", self.bn_eps)));
        }
        if !(0.0..=1.0).contains(&self.bn_momentum) {
            return Err(ConfigError::Invalid(format!(
                "bn_momentum must be in [0, 1], got {}",
                self.bn_momentum
            )));
        }
        Ok(())
    }

    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: AudioCnnConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AudioCnnConfig::default();
        assert_eq!(config.num_classes, 50);
        assert_eq!(config.dropout, 0.5);
        assert!(config.validate().is_ok());
        assert_eq!(AudioCnnConfig::new(10).num_classes, 10);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = AudioCnnConfig::from_json_str(r#"{ "num_classes": 10, "seed": null }"#).unwrap();
        assert_eq!(config.num_classes, 10);
        assert_eq!(config.seed, None);
        assert_eq!(config.bn_momentum, 0.1);
    }

    #[test]
    fn test_json_round_trip() {
        let config = AudioCnnConfig::new(7).with_dropout(0.25).with_seed(Some(9));
        let json = config.to_json_string().unwrap();
        assert_eq!(AudioCnnConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            AudioCnnConfig::from_json_str(r#"{ "num_classes": 0 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            AudioCnnConfig::from_json_str(r#"{ "dropout": 1.0 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            AudioCnnConfig::from_json_str(r#"{ "num_classes": "ten" }"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "num_classes": 12, "dropout": 0.3 }}"#).unwrap();
        let config = AudioCnnConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.num_classes, 12);
        assert_eq!(config.dropout, 0.3);

        assert!(matches!(
            AudioCnnConfig::from_json_file(file.path().with_extension("missing")),
            Err(ConfigError::Io(_))
        ));
    }
}
