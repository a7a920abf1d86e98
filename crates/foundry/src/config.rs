//! Engine configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::limits::JobLimits;

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration JSON.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// Settings of the orchestration engine. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Template new sandboxes start from.
    pub sandbox_template: String,
    /// Port the generated app listens on inside the sandbox.
    pub app_port: u16,
    /// Model driving the coding agent.
    pub coding_model: String,
    /// Sampling temperature of the coding agent.
    pub temperature: f32,
    /// Model used by the title and response summarizers.
    pub summarizer_model: String,
    /// Per-run bounds.
    pub limits: JobLimits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sandbox_template: "caffeine".to_string(),
            app_port: 3000,
            coding_model: "gpt-4.1".to_string(),
            temperature: 0.1,
            summarizer_model: "gpt-4o-mini".to_string(),
            limits: JobLimits::default(),
        }
    }
}

impl EngineConfig {
    /// Parse configuration JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load configuration from a JSON file.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_json(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.sandbox_template, "caffeine");
        assert_eq!(config.app_port, 3000);
        assert_eq!(config.limits.max_iterations, 12);
        assert_eq!(config.limits.history_limit, 6);
        assert_eq!(config.limits.sandbox_timeout, Duration::from_secs(1800));
    }

    #[test]
    fn test_partial_json() {
        let config =
            EngineConfig::from_json(r#"{"app_port": 8080, "limits": {"max_iterations": 4}}"#)
                .unwrap();
        assert_eq!(config.app_port, 8080);
        assert_eq!(config.limits.max_iterations, 4);
        assert_eq!(config.limits.history_limit, 6);
        assert_eq!(config.coding_model, "gpt-4.1");
    }

    #[tokio::test]
    async fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("foundry.json");
        tokio::fs::write(&path, r#"{"limits": {"sandbox_timeout": 60000}}"#)
            .await
            .unwrap();

        let config = EngineConfig::from_file(&path).await.unwrap();
        assert_eq!(config.limits.sandbox_timeout, Duration::from_secs(60));

        let missing = EngineConfig::from_file(dir.path().join("nope.json")).await;
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[tokio::test]
    async fn test_invalid_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("foundry.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        assert!(matches!(
            EngineConfig::from_file(&path).await,
            Err(ConfigError::Parse { .. })
        ));
    }
}
