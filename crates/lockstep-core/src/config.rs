//! Configuration management for lockstep
//!
//! Handles loading and validation of `lockstep.toml` files. Every field has a
//! default, so an empty file (or no file) yields a usable configuration.
//!
//! ```toml
//! [property]
//! max_trials = 200
//! seed = 1234
//! max_shrink_steps = 5000
//! shrink_policy = "same_kind"
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logging::LogConfig;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Property driver settings
    #[serde(default)]
    pub property: PropertyConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LogConfig,
}

impl Config {
    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::ReadFailed(path.display().to_string(), e.to_string())
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.property.validate()?;
        Ok(config)
    }
}

/// Settings recognized by the property driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyConfig {
    /// Number of trials to attempt before declaring success
    #[serde(default = "default_max_trials")]
    pub max_trials: u32,

    /// Root seed; a fresh random seed is drawn when absent
    #[serde(default)]
    pub seed: Option<u64>,

    /// Budget of candidate evaluations during shrink search
    #[serde(default = "default_max_shrink_steps")]
    pub max_shrink_steps: u32,

    /// Shortest generated command sequence
    #[serde(default)]
    pub min_sequence_len: usize,

    /// Longest generated command sequence (reached by the final trial)
    #[serde(default = "default_max_sequence_len")]
    pub max_sequence_len: usize,

    /// Initial states rejected by the initial precondition before a trial
    /// gives up
    #[serde(default = "default_max_discard_ratio")]
    pub max_discard_ratio: u32,

    /// Which failures count as "the same bug" while shrinking
    #[serde(default)]
    pub shrink_policy: ShrinkPolicy,

    /// Trials executed concurrently by [`crate::property::Property::check_parallel`]
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Abort the run after this many milliseconds
    #[serde(default)]
    pub time_limit_ms: Option<u64>,
}

impl Default for PropertyConfig {
    fn default() -> Self {
        Self {
            max_trials: default_max_trials(),
            seed: None,
            max_shrink_steps: default_max_shrink_steps(),
            min_sequence_len: 0,
            max_sequence_len: default_max_sequence_len(),
            max_discard_ratio: default_max_discard_ratio(),
            shrink_policy: ShrinkPolicy::default(),
            workers: default_workers(),
            time_limit_ms: None,
        }
    }
}

fn default_max_trials() -> u32 {
    100
}

fn default_max_shrink_steps() -> u32 {
    1000
}

fn default_max_sequence_len() -> usize {
    64
}

fn default_max_discard_ratio() -> u32 {
    10
}

fn default_workers() -> usize {
    1
}

impl PropertyConfig {
    /// Use a fixed root seed
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    #[must_use]
    pub fn with_max_trials(mut self, max_trials: u32) -> Self {
        self.max_trials = max_trials;
        self
    }

    #[must_use]
    pub fn with_max_shrink_steps(mut self, steps: u32) -> Self {
        self.max_shrink_steps = steps;
        self
    }

    #[must_use]
    pub fn with_sequence_len(mut self, min: usize, max: usize) -> Self {
        self.min_sequence_len = min;
        self.max_sequence_len = max;
        self
    }

    #[must_use]
    pub fn with_shrink_policy(mut self, policy: ShrinkPolicy) -> Self {
        self.shrink_policy = policy;
        self
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Reject settings the driver cannot honor
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_trials == 0 {
            return Err(ConfigError::ValidationError(
                "max_trials must be at least 1".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(ConfigError::ValidationError(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.min_sequence_len > self.max_sequence_len {
            return Err(ConfigError::ValidationError(format!(
                "min_sequence_len ({}) exceeds max_sequence_len ({})",
                self.min_sequence_len, self.max_sequence_len
            )));
        }
        Ok(())
    }
}

/// Policy deciding whether a shrink candidate reproduces the original failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShrinkPolicy {
    /// Any failure is accepted
    AnyFailure,
    /// The failure must be of the same kind (postcondition, run error, panic, ...)
    #[default]
    SameKind,
    /// Same kind, raised by a command with the same name
    SameCommand,
}

impl std::fmt::Display for ShrinkPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AnyFailure => write!(f, "any_failure"),
            Self::SameKind => write!(f, "same_kind"),
            Self::SameCommand => write!(f, "same_command"),
        }
    }
}

impl std::str::FromStr for ShrinkPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "any" | "any_failure" => Ok(Self::AnyFailure),
            "same_kind" => Ok(Self::SameKind),
            "same_command" => Ok(Self::SameCommand),
            _ => Err(format!(
                "unknown shrink policy: {s}. Expected one of: any_failure, same_kind, same_command"
            )),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-friendly colored output
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected one of: pretty, json")),
        }
    }
}
