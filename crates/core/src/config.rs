//! Engine configuration.
//!
//! Read from TOML; every key is optional and falls back to its default.
//!
//! ```toml
//! [learning]
//! threshold = 0.0001
//! max_runs = 100
//!
//! [inference]
//! max_depth = 256
//! ```

use std::fs::read_to_string;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CausalError;

/// Stopping rule for the EM parameter learner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Iteration stops once the mean CPT change is at or below this value.
    pub threshold: f32,
    /// Upper bound on E/M iterations per initialization.
    pub max_runs: u32,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            threshold: 1e-4,
            max_runs: 100,
        }
    }
}

/// Bounds on probability evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Deepest ancestor chain followed before reporting a cycle.
    pub max_depth: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self { max_depth: 256 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub learning: LearningConfig,
    pub inference: InferenceConfig,
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, CausalError> {
        toml::from_str(text).map_err(|e| CausalError::InvalidConfig {
            reason: e.to_string(),
        })
    }

    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CausalError> {
        let path = path.as_ref();
        tracing::debug!("Attempting to read engine config from: {:?}", path);
        if !path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(Self::default());
        }
        let content = read_to_string(path).map_err(|e| CausalError::unreadable(path, &e))?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, CausalError> {
        toml::to_string(self).map_err(|e| CausalError::InvalidConfig {
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_defaults_when_keys_missing() {
        let cfg = EngineConfig::from_toml_str("[learning]\nmax_runs = 7\n").unwrap();
        assert_eq!(cfg.learning.max_runs, 7);
        assert_eq!(cfg.learning.threshold, 1e-4);
        assert_eq!(cfg.inference, InferenceConfig::default());
    }

    #[test]
    fn test_empty_document() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_invalid_document() {
        let err = EngineConfig::from_toml_str("[learning]\nmax_runs = \"many\"\n").unwrap_err();
        assert!(matches!(err, CausalError::InvalidConfig { .. }));
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        let mut cfg = EngineConfig::default();
        cfg.inference.max_depth = 12;
        std::fs::write(&path, cfg.to_toml_string().unwrap()).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), cfg);
        assert_eq!(
            EngineConfig::load(dir.path().join("absent.toml")).unwrap(),
            EngineConfig::default()
        );
    }
}
