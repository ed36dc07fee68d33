//! Top-level configuration, loadable from TOML.
//!
//! ```toml
//! [metrics]
//! percentile_capacity = 1000
//!
//! [metrics.default_slo]
//! target = 0.99
//! latency_threshold_seconds = 1.0
//!
//! [circuit_breaker]
//! failure_rate_threshold = 0.5
//! evaluation_window_size = 10
//! cooldown_seconds = 30.0
//!
//! [retry]
//! max_attempts = 3
//!
//! [learning]
//! mode = "active"
//!
//! [sampling]
//! default_rate = 0.1
//! ```
//!
//! Every section and field is optional; omitted values take their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    adaptive::{CircuitBreakerConfig, LearningConfig, RetryConfig},
    error::{ConfigError, ValidationError},
    metrics::MetricsConfig,
    sampling::SamplingConfig,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    pub metrics: MetricsConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub learning: LearningConfig,
    pub sampling: SamplingConfig,
}

impl CoreConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.metrics.validate()?;
        self.circuit_breaker.validate()?;
        self.retry.validate()?;
        self.learning.validate()?;
        self.sampling.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::LearningMode;

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(CoreConfig::from_toml_str("").unwrap(), CoreConfig::default());
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let cfg = CoreConfig::from_toml_str(
            r#"
            [learning]
            mode = "active"
            latency_tolerance = 1.25

            [circuit_breaker]
            evaluation_window_size = 4
            "#,
        )
        .unwrap();
        assert_eq!(cfg.learning.mode, LearningMode::Active);
        assert_eq!(cfg.learning.latency_tolerance, 1.25);
        assert_eq!(cfg.learning.validation_window, 20);
        assert_eq!(cfg.circuit_breaker.evaluation_window_size, 4);
        assert_eq!(cfg.circuit_breaker.cooldown_seconds, 30.0);
    }

    #[test]
    fn test_invalid_value_rejected() {
        let err = CoreConfig::from_toml_str("[sampling]\ndefault_rate = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_unknown_section_rejected() {
        let err = CoreConfig::from_toml_str("[exporter]\nurl = \"x\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(CoreConfig::load("/definitely/not/here.toml"), Err(ConfigError::Io(_))));
    }
}
