//! Pipeline configuration.
//!
//! This module provides the settings of a pipeline run: where the data and
//! the external programs live, how large the simulated samples are, and the
//! policy constants of the artifact prober and the scheduling loop.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::artifacts::{ProbePolicy, DEFAULT_MIN_FILE_SIZE, DEFAULT_REQUIRED_FRACTION};

/// Default number of simulation output files per file-list bunch.
pub const DEFAULT_FILES_PER_BUNCH: usize = 10;

/// Default pause between two scheduling rounds.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(600);

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Locations
    /// Base directory searched for scenarios and receiving simulation output.
    pub base_output_data_dir: PathBuf,
    /// Build directory of the fit software; binaries live in `<build>/bin`.
    pub build_path: PathBuf,
    /// Directory holding the python utilities.
    pub script_dir: PathBuf,
    /// Fit configuration file, relative to the lmdfit directory unless absolute.
    pub fit_config: PathBuf,
    /// Python interpreter used for the utilities.
    pub python: String,
    /// User whose batch jobs are counted when probing.
    pub queue_user: Option<String>,

    // Sample sizes
    /// Events per box-generator sample for acceptance/resolution data.
    pub box_num_events_per_sample: u64,
    /// Number of box-generator samples.
    pub box_num_samples: u64,
    /// Cap on reconstructed elastic samples; `None` means all.
    pub num_samples: Option<u64>,
    /// Submit to the development queue.
    pub use_devel_queue: bool,

    // Policy
    /// Simulation output files per file-list bunch.
    pub files_per_bunch: usize,
    /// Pause between two scheduling rounds.
    pub poll_interval: Duration,
    /// Fraction of expected output files required for READY.
    pub required_file_fraction: f64,
    /// Files at or below this size (bytes) count as broken.
    pub min_file_size: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_output_data_dir: PathBuf::new(),
            build_path: PathBuf::from("./build"),
            script_dir: PathBuf::from("./scripts"),
            fit_config: PathBuf::from("fitconfig-fast.json"),
            python: "python".to_string(),
            queue_user: None,

            box_num_events_per_sample: 500_000,
            box_num_samples: 100,
            num_samples: Some(100),
            use_devel_queue: false,

            files_per_bunch: DEFAULT_FILES_PER_BUNCH,
            poll_interval: DEFAULT_POLL_INTERVAL,
            required_file_fraction: DEFAULT_REQUIRED_FRACTION,
            min_file_size: DEFAULT_MIN_FILE_SIZE,
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `LMDFIT_BUILD_PATH`: Build directory of the fit software (required)
    /// - `LMDFIT_DATA_DIR`: Base output data directory
    /// - `LMDFIT_SCRIPT_PATH`: Directory of the python utilities (default: ./scripts)
    /// - `LMDFIT_POLL_INTERVAL_SECS`: Pause between rounds (default: 600)
    /// - `LMDFIT_REQUIRED_FILE_FRACTION`: Required output fraction (default: 0.8)
    /// - `LMDFIT_MIN_FILE_SIZE`: Good-file size threshold in bytes (default: 20000)
    /// - `LMDFIT_FILES_PER_BUNCH`: Files per bunch (default: 10)
    /// - `LMDFIT_PYTHON`: Python interpreter (default: python)
    /// - `LMDFIT_QUEUE_USER`: Batch user to count jobs for (default: $USER)
    ///
    /// The result is not validated, since command-line overrides are usually
    /// applied afterwards; call [`validate`](Self::validate) once they are.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or have invalid values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        config.build_path = lookup("LMDFIT_BUILD_PATH")
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::MissingEnvVar("LMDFIT_BUILD_PATH".to_string()))?;

        if let Some(val) = lookup("LMDFIT_DATA_DIR") {
            config.base_output_data_dir = PathBuf::from(val);
        }

        if let Some(val) = lookup("LMDFIT_SCRIPT_PATH") {
            config.script_dir = PathBuf::from(val);
        }

        if let Some(val) = lookup("LMDFIT_POLL_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "LMDFIT_POLL_INTERVAL_SECS")?;
            config.poll_interval = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("LMDFIT_REQUIRED_FILE_FRACTION") {
            config.required_file_fraction =
                parse_env_value(&val, "LMDFIT_REQUIRED_FILE_FRACTION")?;
        }

        if let Some(val) = lookup("LMDFIT_MIN_FILE_SIZE") {
            config.min_file_size = parse_env_value(&val, "LMDFIT_MIN_FILE_SIZE")?;
        }

        if let Some(val) = lookup("LMDFIT_FILES_PER_BUNCH") {
            config.files_per_bunch = parse_env_value(&val, "LMDFIT_FILES_PER_BUNCH")?;
        }

        if let Some(val) = lookup("LMDFIT_PYTHON") {
            config.python = val;
        }

        config.queue_user = lookup("LMDFIT_QUEUE_USER").or_else(|| lookup("USER"));

        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_output_data_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "base_output_data_dir cannot be empty (set LMDFIT_DATA_DIR)".to_string(),
            ));
        }

        if self.files_per_bunch == 0 {
            return Err(ConfigError::ValidationFailed(
                "files_per_bunch must be greater than 0".to_string(),
            ));
        }

        if !(self.required_file_fraction > 0.0 && self.required_file_fraction <= 1.0) {
            return Err(ConfigError::ValidationFailed(
                "required_file_fraction must be in (0.0, 1.0]".to_string(),
            ));
        }

        if self.box_num_samples == 0 || self.box_num_events_per_sample == 0 {
            return Err(ConfigError::ValidationFailed(
                "box_num_samples and box_num_events_per_sample must be greater than 0"
                    .to_string(),
            ));
        }

        if self.python.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "python cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Directory containing the lmdfit configuration files (parent of the
    /// script directory).
    pub fn lmdfit_dir(&self) -> PathBuf {
        self.script_dir
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".."))
    }

    /// Directory of the compiled binaries.
    pub fn bin_dir(&self) -> PathBuf {
        self.build_path.join("bin")
    }

    /// Fit configuration passed to the luminosity fit.
    pub fn fit_config_path(&self) -> PathBuf {
        self.lmdfit_dir().join(&self.fit_config)
    }

    /// Data-object configuration passed to the data construction utility.
    pub fn data_config_path(&self) -> PathBuf {
        self.lmdfit_dir().join("dataconfig_xy.json")
    }

    /// Fit configuration of the interaction-point determination.
    pub fn vertex_fit_config_path(&self) -> PathBuf {
        self.lmdfit_dir().join("vertex_fitconfig.json")
    }

    /// Probe thresholds derived from this configuration.
    pub fn probe_policy(&self) -> ProbePolicy {
        ProbePolicy {
            required_fraction: self.required_file_fraction,
            min_file_size: self.min_file_size,
        }
    }

    /// Builder method to set the base output data directory.
    pub fn with_base_output_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_output_data_dir = path.into();
        self
    }

    /// Builder method to set the build path.
    pub fn with_build_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.build_path = path.into();
        self
    }

    /// Builder method to set the script directory.
    pub fn with_script_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.script_dir = path.into();
        self
    }

    /// Builder method to set the fit configuration.
    pub fn with_fit_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.fit_config = path.into();
        self
    }

    /// Builder method to set the box-generator sample size.
    pub fn with_box_samples(mut self, num_samples: u64, events_per_sample: u64) -> Self {
        self.box_num_samples = num_samples;
        self.box_num_events_per_sample = events_per_sample;
        self
    }

    /// Builder method to set the elastic sample cap; zero or negative means all.
    pub fn with_num_samples(mut self, num_samples: i64) -> Self {
        self.num_samples = u64::try_from(num_samples).ok().filter(|&n| n > 0);
        self
    }

    /// Builder method to enable the development queue.
    pub fn with_devel_queue(mut self, enabled: bool) -> Self {
        self.use_devel_queue = enabled;
        self
    }

    /// Builder method to set the files per bunch.
    pub fn with_files_per_bunch(mut self, files: usize) -> Self {
        self.files_per_bunch = files;
        self
    }

    /// Builder method to set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Builder method to set the required output fraction.
    pub fn with_required_file_fraction(mut self, fraction: f64) -> Self {
        self.required_file_fraction = fraction;
        self
    }

    /// Builder method to set the good-file size threshold.
    pub fn with_min_file_size(mut self, bytes: u64) -> Self {
        self.min_file_size = bytes;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.box_num_events_per_sample, 500_000);
        assert_eq!(config.box_num_samples, 100);
        assert_eq!(config.num_samples, Some(100));
        assert_eq!(config.files_per_bunch, 10);
        assert_eq!(config.poll_interval, Duration::from_secs(600));
        assert!((config.required_file_fraction - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.min_file_size, 20_000);
        assert!(!config.use_devel_queue);
    }

    #[test]
    fn test_from_lookup_reads_variables() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("LMDFIT_BUILD_PATH", "/opt/lmdfit/build"),
            ("LMDFIT_DATA_DIR", "/data/lmd"),
            ("LMDFIT_SCRIPT_PATH", "/opt/lmdfit/scripts"),
            ("LMDFIT_POLL_INTERVAL_SECS", "30"),
            ("LMDFIT_REQUIRED_FILE_FRACTION", "0.9"),
            ("USER", "panda"),
        ]))
        .expect("config");

        assert_eq!(config.build_path, PathBuf::from("/opt/lmdfit/build"));
        assert_eq!(config.bin_dir(), PathBuf::from("/opt/lmdfit/build/bin"));
        assert_eq!(config.base_output_data_dir, PathBuf::from("/data/lmd"));
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert!((config.required_file_fraction - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.queue_user.as_deref(), Some("panda"));
        assert_eq!(
            config.fit_config_path(),
            PathBuf::from("/opt/lmdfit/fitconfig-fast.json")
        );
        assert_eq!(
            config.data_config_path(),
            PathBuf::from("/opt/lmdfit/dataconfig_xy.json")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_requires_build_path() {
        let result = PipelineConfig::from_lookup(lookup_from(&[("LMDFIT_DATA_DIR", "/data")]));
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(ref v)) if v == "LMDFIT_BUILD_PATH"));
    }

    #[test]
    fn test_from_lookup_rejects_bad_number() {
        let result = PipelineConfig::from_lookup(lookup_from(&[
            ("LMDFIT_BUILD_PATH", "/build"),
            ("LMDFIT_FILES_PER_BUNCH", "many"),
        ]));
        let err = result.unwrap_err();
        assert!(err.to_string().contains("LMDFIT_FILES_PER_BUNCH"));
    }

    #[test]
    fn test_validation_requires_data_dir() {
        let result = PipelineConfig::default().validate();
        assert!(result.unwrap_err().to_string().contains("base_output_data_dir"));
    }

    #[test]
    fn test_validation_invalid_fraction() {
        let config = PipelineConfig::default()
            .with_base_output_data_dir("/data")
            .with_required_file_fraction(0.0);
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("required_file_fraction"));
    }

    #[test]
    fn test_validation_invalid_files_per_bunch() {
        let config = PipelineConfig::default()
            .with_base_output_data_dir("/data")
            .with_files_per_bunch(0);
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("files_per_bunch"));
    }

    #[test]
    fn test_num_samples_negative_means_all() {
        let config = PipelineConfig::default().with_num_samples(-1);
        assert_eq!(config.num_samples, None);
        let config = PipelineConfig::default().with_num_samples(20);
        assert_eq!(config.num_samples, Some(20));
    }

    #[test]
    fn test_probe_policy_follows_config() {
        let policy = PipelineConfig::default()
            .with_required_file_fraction(0.5)
            .with_min_file_size(10)
            .probe_policy();
        assert!((policy.required_fraction - 0.5).abs() < f64::EPSILON);
        assert_eq!(policy.min_file_size, 10);
    }
}
