//! # Engine Configuration
//!
//! Loaded from TOML or built in code. Every field has a default, so an empty
//! document is a valid configuration.
//!
//! ```toml
//! verification_timeout_ms = 10000
//! finish_rejected_transactions = true
//!
//! [[validation_servers]]
//! endpoint = "https://verify.example.com/receipt"
//! priority = 0
//!
//! [[validation_servers]]
//! endpoint = "https://backup.example.com/receipt"
//! priority = 1
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::model::ValidationServer;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deadline for a single validation server attempt.
    pub verification_timeout_ms: u64,
    /// Servers registered when the manager starts.
    pub validation_servers: Vec<ValidationServer>,
    /// Finish records whose receipt was rejected. When off they stay
    /// outstanding with the store for a later session to pick up.
    pub finish_rejected_transactions: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            verification_timeout_ms: 30_000,
            validation_servers: Vec::new(),
            finish_rejected_transactions: true,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.verification_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "verification_timeout_ms must be greater than zero".into(),
            ));
        }
        if let Some(server) = self
            .validation_servers
            .iter()
            .find(|server| server.endpoint.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "validation server with priority {} has an empty endpoint",
                server.priority
            )));
        }
        Ok(())
    }

    pub fn verification_timeout(&self) -> Duration {
        Duration::from_millis(self.verification_timeout_ms)
    }

    pub fn with_validation_servers(mut self, servers: Vec<ValidationServer>) -> Self {
        self.validation_servers = servers;
        self
    }

    pub fn with_verification_timeout(mut self, timeout: Duration) -> Self {
        self.verification_timeout_ms = timeout.as_millis() as u64;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.verification_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_parses_servers() {
        let config = EngineConfig::from_toml_str(
            r#"
            verification_timeout_ms = 500
            finish_rejected_transactions = false

            [[validation_servers]]
            endpoint = "https://b.example.com"
            priority = 1

            [[validation_servers]]
            endpoint = "https://a.example.com"
            "#,
        )
        .unwrap();

        assert_eq!(config.verification_timeout_ms, 500);
        assert!(!config.finish_rejected_transactions);
        assert_eq!(config.validation_servers[1], ValidationServer::new("https://a.example.com", 0));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let err = EngineConfig::from_toml_str("verification_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_blank_endpoint() {
        let config = EngineConfig::default().with_validation_servers(vec![ValidationServer::new(" ", 0)]);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_malformed_toml() {
        let err = EngineConfig::from_toml_str("verification_timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
