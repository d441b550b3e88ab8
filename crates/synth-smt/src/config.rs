use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::SmtError;

pub const DEFAULT_Z3: &str = "z3";
pub const DEFAULT_COLLECTION_DEPTH: usize = 2;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Solver executable; resolved through `PATH` when relative.
    pub z3_path: PathBuf,
    /// Hard solver timeout; a query that runs out of time reports `unknown`.
    pub timeout_seconds: Option<u64>,
    /// When set, every query script is written here before it is run.
    pub artifact_dir: Option<PathBuf>,
    /// Number of element slots allocated for each free collection variable.
    pub collection_depth: usize,
    pub validate_model: bool,
    /// Break slot symmetry: a present slot is followed only by present
    /// slots.
    pub order_slots: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            z3_path: PathBuf::from(DEFAULT_Z3),
            timeout_seconds: None,
            artifact_dir: None,
            collection_depth: DEFAULT_COLLECTION_DEPTH,
            validate_model: true,
            order_slots: true,
        }
    }
}

impl SolverConfig {
    /// Defaults overridden by `SYNTH_Z3`, `SYNTH_SMT_TIMEOUT` and
    /// `SYNTH_SMT_ARTIFACTS`.
    pub fn from_env() -> Result<Self, SmtError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SmtError> {
        let mut config = Self::default();
        if let Some(path) = lookup("SYNTH_Z3").filter(|s| !s.trim().is_empty()) {
            config.z3_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup("SYNTH_SMT_TIMEOUT") {
            config.timeout_seconds = Some(raw.trim().parse().map_err(|_| SmtError::Config {
                message: format!("SYNTH_SMT_TIMEOUT must be a whole number of seconds, got {raw:?}"),
            })?);
        }
        if let Some(dir) = lookup("SYNTH_SMT_ARTIFACTS").filter(|s| !s.trim().is_empty()) {
            config.artifact_dir = Some(PathBuf::from(dir));
        }
        Ok(config)
    }

    pub fn with_collection_depth(mut self, depth: usize) -> Self {
        self.collection_depth = depth;
        self
    }

    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_overrides_defaults() {
        let config = SolverConfig::from_lookup(|key| match key {
            "SYNTH_Z3" => Some("/opt/z3/bin/z3".to_string()),
            "SYNTH_SMT_TIMEOUT" => Some(" 5 ".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.z3_path, PathBuf::from("/opt/z3/bin/z3"));
        assert_eq!(config.timeout_seconds, Some(5));
        assert_eq!(config.artifact_dir, None);
        assert_eq!(config.collection_depth, DEFAULT_COLLECTION_DEPTH);
    }

    #[test]
    fn rejects_malformed_timeout() {
        let err = SolverConfig::from_lookup(|key| {
            (key == "SYNTH_SMT_TIMEOUT").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("SYNTH_SMT_TIMEOUT"));
    }

    #[test]
    fn deserializes_partial_json() {
        let config: SolverConfig =
            serde_json::from_str(r#"{"collection_depth": 3, "validate_model": false}"#).unwrap();
        assert_eq!(config.collection_depth, 3);
        assert!(!config.validate_model);
        assert!(config.order_slots);
        assert_eq!(config.timeout_seconds, None);
    }
}
