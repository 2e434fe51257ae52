//! Configuration loading and database path resolution
//!
//! Matcher tolerances and thresholds are read from TOML and handed to the
//! matcher at construction. Nothing here is written back to disk.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "AFM_CONFIG";

/// Environment variable overriding the catalog database path
pub const DATABASE_ENV_VAR: &str = "AFM_DATABASE";

/// How flats are selected for a light session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlatMatchMode {
    /// Only flats captured on the session date count
    #[default]
    Strict,
    /// Same-date flats first, otherwise the most recent matching flats
    Fallback,
}

/// Tolerances and frame-count thresholds used by the calibration matcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Count master frames alongside raw calibration frames
    pub include_masters: bool,
    /// Exposure tolerance in seconds (strict less-than)
    pub exposure_tolerance: f64,
    /// Dark temperature tolerance in °C (inclusive)
    pub temp_tolerance_darks: f64,
    /// Flat temperature tolerance in °C (inclusive)
    pub temp_tolerance_flats: f64,
    /// Bias temperature tolerance in °C (inclusive)
    pub temp_tolerance_bias: f64,
    pub min_frames_recommended: u32,
    pub min_frames_acceptable: u32,
    pub flat_match_mode: FlatMatchMode,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            include_masters: true,
            exposure_tolerance: 0.1,
            temp_tolerance_darks: 1.0,
            temp_tolerance_flats: 3.0,
            temp_tolerance_bias: 1.0,
            min_frames_recommended: 20,
            min_frames_acceptable: 10,
            flat_match_mode: FlatMatchMode::Strict,
        }
    }
}

impl MatcherConfig {
    /// Reject tolerances and thresholds the matcher cannot work with
    pub fn validate(&self) -> Result<()> {
        let tolerances = [
            ("exposure_tolerance", self.exposure_tolerance),
            ("temp_tolerance_darks", self.temp_tolerance_darks),
            ("temp_tolerance_flats", self.temp_tolerance_flats),
            ("temp_tolerance_bias", self.temp_tolerance_bias),
        ];
        for (name, value) in tolerances {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::Config(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }

        if self.min_frames_acceptable == 0 || self.min_frames_recommended == 0 {
            return Err(Error::Config(
                "Frame thresholds must be greater than zero".to_string(),
            ));
        }

        if self.min_frames_acceptable > self.min_frames_recommended {
            return Err(Error::Config(format!(
                "min_frames_acceptable ({}) exceeds min_frames_recommended ({})",
                self.min_frames_acceptable, self.min_frames_recommended
            )));
        }

        Ok(())
    }
}

/// Top-level engine configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Catalog database location (None = OS default)
    pub database_path: Option<PathBuf>,
    /// Maximum time to keep retrying a busy store, in milliseconds
    pub max_lock_wait_ms: u64,
    pub matcher: MatcherConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            max_lock_wait_ms: 5000,
            matcher: MatcherConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid config TOML: {}", e)))?;
        config.matcher.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!("Config file not found: {:?}", path)));
        }
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }
}

/// Configuration resolution priority:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. User config file (`<config_dir>/afm/config.toml`)
/// 4. Compiled defaults (fallback)
pub fn resolve_config(cli_arg: Option<&Path>, env_var_name: &str) -> Result<EngineConfig> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return EngineConfig::load(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        return EngineConfig::load(Path::new(&path));
    }

    // Priority 3: User config file, only when present
    if let Some(path) = default_config_path() {
        if path.exists() {
            return EngineConfig::load(&path);
        }
    }

    // Priority 4: Compiled defaults
    debug!("No config file found, using defaults");
    Ok(EngineConfig::default())
}

/// Resolve the catalog database path: CLI > environment > config file > OS default
pub fn resolve_database_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    config: &EngineConfig,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        return PathBuf::from(path);
    }

    if let Some(path) = &config.database_path {
        return path.clone();
    }

    default_database_path()
}

/// Per-user config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("afm").join("config.toml"))
}

/// OS-dependent default catalog location
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("afm").join("catalog.db"))
        .unwrap_or_else(|| PathBuf::from("./afm_data/catalog.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = MatcherConfig::default();
        assert!(config.include_masters);
        assert_eq!(config.exposure_tolerance, 0.1);
        assert_eq!(config.temp_tolerance_darks, 1.0);
        assert_eq!(config.temp_tolerance_flats, 3.0);
        assert_eq!(config.temp_tolerance_bias, 1.0);
        assert_eq!(config.min_frames_recommended, 20);
        assert_eq!(config.min_frames_acceptable, 10);
        assert_eq!(config.flat_match_mode, FlatMatchMode::Strict);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [matcher]
            temp_tolerance_darks = 2.0
            flat_match_mode = "fallback"
            "#,
        )
        .unwrap();

        assert_eq!(config.matcher.temp_tolerance_darks, 2.0);
        assert_eq!(config.matcher.flat_match_mode, FlatMatchMode::Fallback);
        assert_eq!(config.matcher.min_frames_recommended, 20);
        assert_eq!(config.max_lock_wait_ms, 5000);
    }

    #[test]
    fn test_acceptable_above_recommended_rejected() {
        let result = EngineConfig::from_toml_str(
            r#"
            [matcher]
            min_frames_acceptable = 30
            "#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_negative_tolerance_rejected() {
        let config = MatcherConfig {
            exposure_tolerance: -0.5,
            ..MatcherConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
