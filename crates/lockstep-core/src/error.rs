//! Error types for lockstep-core
//!
//! Property falsifications are *not* errors: they are reported through
//! [`crate::report::Report`]. The types here cover configuration problems,
//! generator exhaustion and failures raised by user-supplied commands or
//! factories.

use std::fmt::Write;
use thiserror::Error;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a suggested command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for lockstep-core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Command generation errors
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    /// Logging initialization errors
    #[error("Logging error: {0}")]
    Logging(#[from] crate::logging::LogError),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Config(err) => Some(err.remediation()),
            Self::Generation(err) => Some(err.remediation()),
            Self::Logging(_) => Some(
                Remediation::new("Initialize logging once per process.")
                    .alternative("Set RUST_LOG to adjust verbosity instead of re-initializing."),
            ),
            Self::Json(_) => Some(
                Remediation::new("Serializing the report failed.")
                    .alternative("Use --format human to print the plain-text report."),
            ),
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::ReadFailed(path, _) => Remediation::new(format!(
                "Failed to read config file: {path}. Check permissions."
            ))
            .command("Check permissions", format!("ls -l \"{path}\""))
            .alternative("Pass --config with the correct path."),
            Self::ParseFailed(_) => Remediation::new("Config parse failed. Fix the TOML syntax.")
                .alternative("Keys live under the [property] and [logging] tables."),
            Self::ValidationError(_) => {
                Remediation::new("A config value is out of range. Adjust it and retry.")
                    .alternative("max_trials and workers must be at least 1.")
                    .alternative("min_sequence_len must not exceed max_sequence_len.")
            }
        }
    }
}

/// Errors raised while generating trials
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// No sub-generator could produce a command whose precondition holds.
    #[error("no legal command for state {state} (offered: {})", offered.join(", "))]
    Exhausted { state: String, offered: Vec<String> },

    /// Every generated initial state failed the initial precondition.
    #[error("initial precondition rejected {attempts} generated states")]
    InitialStateRejected { attempts: u32 },

    /// A factory or generator hook panicked while building a trial.
    #[error("trial generation panicked: {message}")]
    Panicked { message: String },
}

impl GenerationError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Exhausted { .. } => Remediation::new(
                "The command generator has no legal command for a reachable state.",
            )
            .alternative("Add a command whose precondition holds in that state.")
            .alternative("Tighten the preconditions of earlier commands so the state is unreachable."),
            Self::InitialStateRejected { .. } => Remediation::new(
                "The initial-state generator rarely satisfies the initial precondition.",
            )
            .alternative("Generate initial states that satisfy the precondition by construction.")
            .alternative("Raise max_discard_ratio in the [property] config."),
            Self::Panicked { .. } => Remediation::new(
                "A generator hook panicked. Fix the factory or command generator.",
            )
            .alternative("Replay the reported seed with RUST_LOG=debug to see the failing trial."),
        }
    }
}

/// A failure raised by a command's run action or by a commands factory.
///
/// Distinct from a postcondition returning false: the runner reports these
/// as infrastructure errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CommandError {
    pub message: String,
}

impl CommandError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_plain_includes_commands() {
        let r = Remediation::new("Fix it").command("Check", "ls -l cfg.toml");
        let output = r.render_plain();
        assert!(output.contains("To fix:"));
        assert!(output.contains("Commands:"));
        assert!(output.contains("- Check: ls -l cfg.toml"));
    }

    #[test]
    fn render_plain_omits_empty_sections() {
        let r = Remediation::new("Fix it");
        let output = r.render_plain();
        assert!(!output.contains("Commands:"));
        assert!(!output.contains("Alternatives:"));
    }

    #[test]
    fn remediation_serde_roundtrip() {
        let r = Remediation::new("Fix it")
            .command("Run", "lockstep run")
            .alternative("Manual fix");
        let json = serde_json::to_string(&r).unwrap();
        let back: Remediation = serde_json::from_str(&json).unwrap();
        assert_eq!(back.summary, "Fix it");
        assert_eq!(back.commands.len(), 1);
        assert_eq!(back.alternatives, vec!["Manual fix"]);
    }

    #[test]
    fn exhausted_display_lists_offered_generators() {
        let err = GenerationError::Exhausted {
            state: "Empty".to_string(),
            offered: vec!["get".to_string(), "pop".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("Empty"));
        assert!(msg.contains("get, pop"));
    }

    #[test]
    fn from_generation_error() {
        let err: Error = GenerationError::InitialStateRejected { attempts: 10 }.into();
        assert!(matches!(
            err,
            Error::Generation(GenerationError::InitialStateRejected { attempts: 10 })
        ));
        assert!(err.remediation().is_some());
    }

    #[test]
    fn from_config_error() {
        let err: Error = ConfigError::ValidationError("workers".to_string()).into();
        assert!(err.to_string().contains("workers"));
        let text = err.remediation().unwrap().render_plain();
        assert!(text.contains("out of range"));
    }

    #[test]
    fn json_error_has_remediation() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = parse.into();
        assert!(err.to_string().starts_with("JSON error"));
        assert!(err.remediation().unwrap().render_plain().contains("--format human"));
    }

    #[test]
    fn generation_panic_has_remediation() {
        let err = GenerationError::Panicked {
            message: "generator blew up".to_string(),
        };
        assert_eq!(err.to_string(), "trial generation panicked: generator blew up");
        assert!(err.remediation().summary.contains("panicked"));
    }

    #[test]
    fn command_error_displays_message() {
        let err = CommandError::new("index 9 out of bounds");
        assert_eq!(err.to_string(), "index 9 out of bounds");
    }
}
