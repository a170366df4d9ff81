//! Processing configuration, read from TOML.
//!
//! ```toml
//! leg = "ascent"
//! validity = "inclusive"
//!
//! [coefficients]
//! backend = "local"
//! coefs_path = "coefs"
//!
//! [regrid]
//! resolution = 10.0
//! axis = "altitude"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::legs::Leg;
use crate::quality_filters::QcRules;
use crate::regrid::GridAxis;
use crate::resolver::ValidityRule;
use crate::store::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_timeout_secs() -> u64 {
    30
}

/// Where coefficient tables are read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum CoefficientSource {
    /// Directory holding `copterID.csv`, `scoop<ID>.csv` and `MasterCoefList.csv`.
    Local { coefs_path: PathBuf },
    Remote {
        account: String,
        sas_token: String,
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
        #[serde(default)]
        retry: RetryPolicy,
    },
}

impl Default for CoefficientSource {
    fn default() -> Self {
        CoefficientSource::Local {
            coefs_path: PathBuf::from("coefs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegridConfig {
    /// Grid spacing in metres or seconds, depending on `axis`.
    pub resolution: f64,
    pub axis: GridAxis,
    /// How far past the data a level may lie and still be filled.
    pub tolerance: f64,
    /// Fixed `[min, max]` for the grid instead of the data extent.
    pub bounds: Option<[f64; 2]>,
}

impl Default for RegridConfig {
    fn default() -> Self {
        Self {
            resolution: 10.0,
            axis: GridAxis::Altitude,
            tolerance: 5.0,
            bounds: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub coefficients: CoefficientSource,
    pub regrid: RegridConfig,
    pub qc: QcRules,
    pub leg: Leg,
    pub validity: ValidityRule,
}

impl ProcessingConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ProcessingConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let regrid = &self.regrid;
        if !regrid.resolution.is_finite() || regrid.resolution <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "regrid.resolution must be positive, got {}",
                regrid.resolution
            )));
        }
        if !regrid.tolerance.is_finite() || regrid.tolerance < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "regrid.tolerance must not be negative, got {}",
                regrid.tolerance
            )));
        }
        if let Some([min, max]) = regrid.bounds {
            if min > max {
                return Err(ConfigError::Invalid(format!(
                    "regrid.bounds [{min}, {max}] is empty"
                )));
            }
        }
        for (name, bounds) in [
            ("qc.temperature_k", self.qc.temperature_k),
            ("qc.rh_pct", self.qc.rh_pct),
            ("qc.wind_speed_ms", self.qc.wind_speed_ms),
        ] {
            if bounds.min > bounds.max {
                return Err(ConfigError::Invalid(format!(
                    "{name} min {} exceeds max {}",
                    bounds.min, bounds.max
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = ProcessingConfig::from_toml_str("").expect("defaults");
        assert_eq!(config, ProcessingConfig::default());
        assert_eq!(config.leg, Leg::Ascent);
        assert_eq!(config.validity, ValidityRule::Inclusive);
    }

    #[test]
    fn remote_backend_with_retry_overrides() {
        let config = ProcessingConfig::from_toml_str(
            r#"
            validity = "exclusive"
            leg = "descent"

            [coefficients]
            backend = "remote"
            account = "oucass"
            sas_token = "sv=2020&sig=abc"

            [coefficients.retry]
            max_attempts = 2

            [regrid]
            resolution = 5.0
            axis = "time"

            [qc.temperature_k]
            min = 210.0
            max = 320.0
            "#,
        )
        .expect("config");

        assert_eq!(config.validity, ValidityRule::Exclusive);
        assert_eq!(config.leg, Leg::Descent);
        assert_eq!(config.regrid.axis, GridAxis::Time);
        assert_eq!(config.qc.temperature_k.min, 210.0);
        match config.coefficients {
            CoefficientSource::Remote {
                timeout_secs,
                retry,
                endpoint,
                ..
            } => {
                assert_eq!(timeout_secs, 30);
                assert_eq!(retry.max_attempts, 2);
                assert_eq!(retry.initial_backoff_ms, RetryPolicy::default().initial_backoff_ms);
                assert!(endpoint.is_none());
            }
            other => panic!("expected remote backend, got {other:?}"),
        }
    }

    #[test]
    fn non_positive_resolution_is_rejected() {
        let err = ProcessingConfig::from_toml_str("[regrid]\nresolution = 0.0\n")
            .expect_err("zero spacing");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
