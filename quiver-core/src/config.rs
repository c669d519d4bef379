//! Configuration types for Quiver

use crate::error::{QuiverError, Result};
use crate::tools::{BatchMode, ErrorMode, OutputValidationMode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for a Quiver registry
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct QuiverConfig {
    /// Execution engine defaults
    pub execution: ExecutionConfig,

    /// Built-in risk policy
    pub policy: PolicyConfig,

    /// Session budget for registry batches
    pub budget: BudgetConfig,

    /// Batch execution defaults
    pub batch: BatchConfig,

    /// Search ranking weights
    pub search: SearchConfig,
}

/// Execution engine defaults
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Timeout applied when neither the call nor the tool sets one
    #[serde(with = "humantime_serde")]
    pub default_timeout: Option<Duration>,

    /// Output validation mode for tools that do not choose one
    pub output_validation: OutputValidationMode,
}

/// Built-in risk policy flags
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Deny every mutating tool
    pub read_only: bool,

    /// Allow mutating tools
    pub allow_mutation: bool,

    /// Allow tools flagged as dangerous
    pub allow_dangerous: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            allow_mutation: true,
            allow_dangerous: false,
        }
    }
}

/// Session budget; unset limits are unlimited
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct BudgetConfig {
    /// Maximum calls admitted per session
    pub max_calls: Option<u64>,

    /// Maximum wall-clock time per session
    #[serde(with = "humantime_serde")]
    pub max_duration: Option<Duration>,
}

/// Batch execution defaults
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct BatchConfig {
    /// Run calls in parallel or one after another
    pub mode: BatchMode,

    /// Keep going after a failure, or abort the rest
    pub error_mode: ErrorMode,

    /// Batch-level concurrency limit
    pub concurrency: Option<usize>,
}

/// Search ranking weights
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    /// Score per matched tag
    #[serde(default = "default_weight")]
    pub tag_weight: f64,

    /// Multiplier for the text score
    #[serde(default = "default_weight")]
    pub text_weight: f64,

    /// Multiplier for embedding similarity
    #[serde(default = "default_weight")]
    pub embedding_weight: f64,

    /// Minimum fuzzy similarity for a text field to count
    #[serde(default = "default_text_threshold")]
    pub text_threshold: f64,
}

fn default_weight() -> f64 {
    1.0
}

fn default_text_threshold() -> f64 {
    0.3
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            tag_weight: default_weight(),
            text_weight: default_weight(),
            embedding_weight: default_weight(),
            text_threshold: default_text_threshold(),
        }
    }
}

/// Builder for QuiverConfig
pub struct ConfigBuilder {
    config: QuiverConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            config: QuiverConfig::default(),
        }
    }

    /// Set execution configuration
    pub fn execution(mut self, config: ExecutionConfig) -> Self {
        self.config.execution = config;
        self
    }

    /// Set policy configuration
    pub fn policy(mut self, config: PolicyConfig) -> Self {
        self.config.policy = config;
        self
    }

    /// Set budget configuration
    pub fn budget(mut self, config: BudgetConfig) -> Self {
        self.config.budget = config;
        self
    }

    /// Set batch configuration
    pub fn batch(mut self, config: BatchConfig) -> Self {
        self.config.batch = config;
        self
    }

    /// Set search configuration
    pub fn search(mut self, config: SearchConfig) -> Self {
        self.config.search = config;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<QuiverConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QuiverConfig {
    /// Load configuration from files and environment variables.
    ///
    /// Loads in this order, later sources overriding earlier ones:
    /// 1. Default configuration
    /// 2. `quiver.toml` in the working directory
    /// 3. The file named by `QUIVER_CONFIG_PATH`
    /// 4. `QUIVER_`-prefixed environment variables, nested with `__`
    ///    (e.g. `QUIVER_POLICY__READ_ONLY=true`)
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result is invalid.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Toml},
        };

        let mut figment = Figment::new().merge(Toml::file("quiver.toml"));

        if let Ok(path) = std::env::var("QUIVER_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: QuiverConfig = figment
            .merge(Env::prefixed("QUIVER_").split("__"))
            .extract()
            .map_err(|e| {
                QuiverError::Configuration(format!("Failed to load configuration: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or is invalid.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Toml},
        };

        let config: QuiverConfig = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .extract()
            .map_err(|e| {
                QuiverError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a weight is negative or non-finite, the text
    /// threshold is outside `[0, 1]`, or a budget limit is zero.
    pub fn validate(&self) -> Result<()> {
        let weights = [
            ("search.tag_weight", self.search.tag_weight),
            ("search.text_weight", self.search.text_weight),
            ("search.embedding_weight", self.search.embedding_weight),
        ];
        for (name, weight) in weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(QuiverError::Configuration(format!(
                    "{} must be a finite, non-negative number, got {}",
                    name, weight
                )));
            }
        }

        let threshold = self.search.text_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(QuiverError::Configuration(format!(
                "search.text_threshold must be within [0, 1], got {}",
                threshold
            )));
        }

        if self.budget.max_calls == Some(0) {
            return Err(QuiverError::Configuration(
                "budget.max_calls must be greater than zero when set".to_string(),
            ));
        }

        if self.batch.concurrency == Some(0) {
            return Err(QuiverError::Configuration(
                "batch.concurrency must be greater than zero when set".to_string(),
            ));
        }

        Ok(())
    }
}
