use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::{AnalysisError, Result};

/// How far the devirtualization pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DevirtLevel {
    /// Skip the whole analysis.
    #[serde(rename = "off")]
    Off,
    /// Analyze and report call sites, leave the IR untouched.
    #[serde(rename = "analyze")]
    Analyze,
    /// Analyze and rewrite single-callee private calls.
    #[serde(rename = "rewrite")]
    Rewrite,
}

impl Default for DevirtLevel {
    fn default() -> Self {
        DevirtLevel::Rewrite
    }
}

/// Options that control the analysis driver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisConfig {
    /// Pipeline depth (default: rewrite)
    #[serde(default)]
    pub level: DevirtLevel,

    /// Pretty-print diagnostics (default: true)
    #[serde(default = "default_true")]
    pub pretty: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            level: DevirtLevel::Rewrite,
            pretty: true,
        }
    }
}

impl AnalysisConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AnalysisConfig =
            serde_json::from_str(&content).map_err(|e| AnalysisError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Create a default configuration and write it to a file
    pub fn init_file(path: &Path) -> Result<()> {
        let config = AnalysisConfig::default();
        let json = serde_json::to_string_pretty(&config)
            .map_err(|e| AnalysisError::Config(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AnalysisConfig::default();
        assert_eq!(config.level, DevirtLevel::Rewrite);
        assert!(config.pretty);
    }

    #[test]
    fn test_level_ordering() {
        assert!(DevirtLevel::Off < DevirtLevel::Analyze);
        assert!(DevirtLevel::Analyze < DevirtLevel::Rewrite);
    }

    #[test]
    fn test_deserialize_config() {
        let json = r#"{
            "level": "analyze",
            "pretty": false
        }"#;
        let config: AnalysisConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.level, DevirtLevel::Analyze);
        assert!(!config.pretty);
    }
}
