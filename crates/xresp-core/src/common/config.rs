//! Engine configuration.
//!
//! Every field has a default so a configuration file only needs to name the
//! values it overrides.

use super::constants::{DEFAULT_UNCERTAINTY, GRID_MATCH_TOLERANCE};
use crate::numerics::grid::GridUnit;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_ARF_EXTENSION: &str = "SPECRESP";

/// How grouped statistical errors are derived from the original bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatErrPolicy {
    /// `sqrt(sum(err^2))` over the merged bins.
    #[default]
    Quadrature,
    /// `sqrt(sum(counts))`, floored at the default uncertainty.
    Poisson,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum EvalGridConfig {
    #[default]
    Separate,
    Merged,
    UserDefined {
        lo: Vec<f64>,
        hi: Vec<f64>,
        #[serde(default)]
        unit: GridUnit,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub grid_match_tolerance: f64,
    pub matrix_rebin_threshold: f64,
    pub use_ideal_arf: bool,
    pub use_ideal_rmf: bool,
    pub arf_extension_names: Vec<String>,
    pub stat_err_policy: StatErrPolicy,
    pub default_uncertainty: f64,
    pub rebin_matrix_with_data: bool,
    pub eval_grid: EvalGridConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grid_match_tolerance: GRID_MATCH_TOLERANCE,
            matrix_rebin_threshold: 0.0,
            use_ideal_arf: false,
            use_ideal_rmf: false,
            arf_extension_names: vec![DEFAULT_ARF_EXTENSION.to_string()],
            stat_err_policy: StatErrPolicy::default(),
            default_uncertainty: DEFAULT_UNCERTAINTY,
            rebin_matrix_with_data: true,
            eval_grid: EvalGridConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Registers an alternate ARF extension name, keeping the search order stable.
    pub fn register_arf_extension(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self
            .arf_extension_names
            .iter()
            .any(|existing| existing.eq_ignore_ascii_case(&name))
        {
            self.arf_extension_names.push(name);
        }
    }

    pub fn arf_extension_candidates(&self) -> Vec<&str> {
        self.arf_extension_names.iter().map(String::as_str).collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read engine config '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse engine config '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub fn load_engine_config(config_path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
    let config_path = config_path.as_ref();
    let source = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
        path: config_path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&source).map_err(|source| ConfigError::Parse {
        path: config_path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::{load_engine_config, ConfigError, EngineConfig, EvalGridConfig, StatErrPolicy};
    use crate::numerics::grid::GridUnit;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn partial_config_keeps_defaults_for_missing_fields() {
        let config: EngineConfig = serde_json::from_str(
            r#"{ "use_ideal_rmf": true, "stat_err_policy": "poisson" }"#,
        )
        .unwrap();
        assert!(config.use_ideal_rmf);
        assert!(!config.use_ideal_arf);
        assert_eq!(config.stat_err_policy, StatErrPolicy::Poisson);
        assert_eq!(config.arf_extension_names, vec!["SPECRESP".to_string()]);
        assert_eq!(config.eval_grid, EvalGridConfig::Separate);
    }

    #[test]
    fn user_defined_eval_grid_parses_with_unit() {
        let config: EngineConfig = serde_json::from_str(
            r#"{ "eval_grid": { "method": "user_defined", "lo": [1.0, 2.0], "hi": [2.0, 3.0], "unit": "angstrom" } }"#,
        )
        .unwrap();
        match config.eval_grid {
            EvalGridConfig::UserDefined { lo, hi, unit } => {
                assert_eq!(lo, vec![1.0, 2.0]);
                assert_eq!(hi, vec![2.0, 3.0]);
                assert_eq!(unit, GridUnit::Angstrom);
            }
            other => panic!("unexpected eval grid {other:?}"),
        }
    }

    #[test]
    fn registering_alternate_arf_extension_is_idempotent() {
        let mut config = EngineConfig::default();
        config.register_arf_extension("AREA");
        config.register_arf_extension("area");
        assert_eq!(config.arf_extension_candidates(), vec!["SPECRESP", "AREA"]);
    }

    #[test]
    fn load_reports_parse_errors_with_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("engine.json");
        fs::write(&path, "{ not json").unwrap();
        let error = load_engine_config(&path).unwrap_err();
        assert!(matches!(error, ConfigError::Parse { .. }));
        assert!(error.to_string().contains("engine.json"));
    }
}
