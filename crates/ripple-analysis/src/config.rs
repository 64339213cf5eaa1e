//! Analysis configuration
//!
//! Loaded from TOML or YAML; every field has a default so partial files work.
//!
//! ```toml
//! run_timeout_ms = 10000
//! parallel_traversal = false
//!
//! [intake]
//! allow_partial_contracts = true
//! ```

use crate::error::ConfigError;
use crate::intake::IntakePolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Settings for an analysis run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Deadline for a whole run, in milliseconds
    pub run_timeout_ms: u64,
    /// Deadline for one contract retrieval, in milliseconds
    pub retrieval_timeout_ms: u64,
    /// Which intake failures may be skipped
    pub intake: IntakePolicy,
    /// Traverse independent components on rayon workers
    pub parallel_traversal: bool,
    /// Minimum number of components before traversal goes parallel
    pub parallel_threshold: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            run_timeout_ms: 30_000,
            retrieval_timeout_ms: 5_000,
            intake: IntakePolicy::default(),
            parallel_traversal: true,
            parallel_threshold: 2,
        }
    }
}

impl AnalysisConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With run deadline
    #[inline]
    #[must_use]
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With retrieval deadline
    #[inline]
    #[must_use]
    pub fn with_retrieval_timeout(mut self, timeout: Duration) -> Self {
        self.retrieval_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With intake policy
    #[inline]
    #[must_use]
    pub fn with_intake_policy(mut self, policy: IntakePolicy) -> Self {
        self.intake = policy;
        self
    }

    /// With parallel traversal on or off
    #[inline]
    #[must_use]
    pub fn with_parallel_traversal(mut self, parallel: bool) -> Self {
        self.parallel_traversal = parallel;
        self
    }

    /// Run deadline
    #[inline]
    #[must_use]
    pub fn run_timeout(&self) -> Duration {
        Duration::from_millis(self.run_timeout_ms)
    }

    /// Retrieval deadline
    #[inline]
    #[must_use]
    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_millis(self.retrieval_timeout_ms)
    }

    /// Parse TOML
    ///
    /// # Errors
    /// Syntax errors or invalid values
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()
    }

    /// Parse YAML
    ///
    /// # Errors
    /// Syntax errors or invalid values
    pub fn from_yaml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(input)?;
        config.validate()
    }

    /// Load from a `.toml`, `.yaml` or `.yml` file
    ///
    /// # Errors
    /// I/O, syntax, unsupported extension or invalid values
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let content = std::fs::read_to_string(path)?;
        match extension.as_str() {
            "toml" => Self::from_toml_str(&content),
            "yaml" | "yml" => Self::from_yaml_str(&content),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.run_timeout_ms == 0 {
            return Err(ConfigError::Invalid("run_timeout_ms must be positive".into()));
        }
        if self.retrieval_timeout_ms == 0 {
            return Err(ConfigError::Invalid("retrieval_timeout_ms must be positive".into()));
        }
        Ok(self)
    }
}
