//! Kernel configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What happens to the descendants of a cell that was just run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Descendants are re-run in the same batch.
    #[default]
    Autorun,
    /// Descendants are only marked stale.
    Lazy,
}

/// Kernel configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Reaction to upstream changes.
    pub mode: ExecutionMode,
    /// Re-submit runnable stale cells once a batch completes.
    pub auto_rerun_stale: bool,
    /// Bound on blocking input reads, in milliseconds. `None` blocks until a
    /// response or an interrupt arrives.
    pub input_timeout_ms: Option<u64>,
    /// Enter the built-in post-mortem debugger on uncaught failures when no
    /// other debugger is installed.
    pub post_mortem: bool,
}

impl KernelConfig {
    /// Input read bound as a `Duration`.
    pub fn input_timeout(&self) -> Option<Duration> {
        self.input_timeout_ms.map(Duration::from_millis)
    }

    /// Parse a configuration from JSON. Missing fields take defaults.
    pub fn from_json(source: &str) -> Result<Self> {
        Ok(serde_json::from_str(source)?)
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_json(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KernelConfig::default();
        assert_eq!(config.mode, ExecutionMode::Autorun);
        assert!(!config.auto_rerun_stale);
        assert_eq!(config.input_timeout(), None);
        assert!(!config.post_mortem);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = KernelConfig::from_json(r#"{"mode": "lazy", "input_timeout_ms": 250}"#).unwrap();
        assert_eq!(config.mode, ExecutionMode::Lazy);
        assert_eq!(config.input_timeout(), Some(Duration::from_millis(250)));
        assert!(!config.auto_rerun_stale);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.json");
        std::fs::write(&path, r#"{"auto_rerun_stale": true, "post_mortem": true}"#).unwrap();

        let config = KernelConfig::load(&path).unwrap();
        assert!(config.auto_rerun_stale);
        assert!(config.post_mortem);
        assert_eq!(config.mode, ExecutionMode::Autorun);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            KernelConfig::load(dir.path().join("absent.json")),
            Err(crate::error::Error::Io(_))
        ));
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(KernelConfig::from_json(r#"{"mode": "sometimes"}"#).is_err());
    }
}
