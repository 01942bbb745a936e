//! Structured result of a property check.
//!
//! [`Report`] is what the driver hands to a reporter. It serializes to JSON
//! as-is; [`Report::render_plain`] gives the human-readable form used by the
//! CLI.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::error::GenerationError;
use crate::runner::{Failure, FailureCategory, Trial};
use crate::shrink::ShrinkOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Passed,
    /// A postcondition failed.
    Falsified,
    /// A replayed sequence broke a precondition.
    Malformed,
    /// The factory or a command raised.
    Errored,
    /// Generation could not produce a legal trial.
    Exhausted,
    /// Cancelled before a verdict.
    Aborted,
}

impl Status {
    fn for_failure(failure: &Failure) -> Self {
        match failure.category() {
            FailureCategory::Falsified => Self::Falsified,
            FailureCategory::MalformedSequence => Self::Malformed,
            FailureCategory::Infrastructure => Self::Errored,
        }
    }
}

/// A failing trial, rendered for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialReport {
    pub initial_state: String,
    pub sequence: Vec<String>,
    pub fail_index: Option<usize>,
    pub failure: Failure,
}

impl TrialReport {
    pub fn from_trial<C: Command>(trial: &Trial<C>, failure: &Failure) -> Self {
        Self {
            initial_state: format!("{:?}", trial.initial_state),
            sequence: trial.sequence.iter().map(ToString::to_string).collect(),
            fail_index: failure.step,
            failure: failure.clone(),
        }
    }

    /// Commands as one line, in the form accepted by `lockstep replay`.
    pub fn commands_line(&self) -> String {
        format!("[{}]", self.sequence.join(" "))
    }

    fn render_into(&self, out: &mut String) {
        let _ = writeln!(out, "  initial state: {}", self.initial_state);
        let _ = writeln!(out, "  commands: {}", self.commands_line());
        match (self.fail_index, &self.failure.command) {
            (Some(step), Some(command)) => {
                let _ = writeln!(out, "  step {step} ({command}): {}", self.failure.kind);
            }
            _ => {
                let _ = writeln!(out, "  {}", self.failure.kind);
            }
        }
        if let Some(state) = &self.failure.state_before {
            let _ = writeln!(out, "  model before step: {state}");
        }
        if let Some(error) = &self.failure.teardown_error {
            let _ = writeln!(out, "  destroying the system under test also failed: {error}");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub property: String,
    pub status: Status,
    /// Trials executed, including the failing one.
    pub trials_run: u32,
    pub seed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failing_trial: Option<TrialReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shrunk_trial: Option<TrialReport>,
    pub shrink_steps: u32,
    /// Shrinking stopped on budget or cancellation rather than at a local
    /// minimum.
    #[serde(default)]
    pub shrink_interrupted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Report {
    fn bare(property: &str, status: Status, seed: u64, trials_run: u32) -> Self {
        Self {
            property: property.to_string(),
            status,
            trials_run,
            seed,
            failing_trial: None,
            shrunk_trial: None,
            shrink_steps: 0,
            shrink_interrupted: false,
            error: None,
        }
    }

    pub fn passed(property: &str, seed: u64, trials_run: u32) -> Self {
        Self::bare(property, Status::Passed, seed, trials_run)
    }

    pub fn failed<C: Command>(
        property: &str,
        seed: u64,
        trials_run: u32,
        original: &Trial<C>,
        failure: &Failure,
        shrunk: &ShrinkOutcome<C>,
    ) -> Self {
        Self {
            failing_trial: Some(TrialReport::from_trial(original, failure)),
            shrunk_trial: Some(TrialReport::from_trial(&shrunk.trial, &shrunk.failure)),
            shrink_steps: shrunk.steps,
            shrink_interrupted: shrunk.budget_exhausted || shrunk.aborted,
            ..Self::bare(property, Status::for_failure(failure), seed, trials_run)
        }
    }

    /// Trial generation failed. A panicking generator is an infrastructure
    /// error; anything else means the generator ran out of legal input.
    pub fn gave_up(property: &str, seed: u64, trials_run: u32, error: &GenerationError) -> Self {
        let status = match error {
            GenerationError::Panicked { .. } => Status::Errored,
            _ => Status::Exhausted,
        };
        Self {
            error: Some(error.to_string()),
            ..Self::bare(property, status, seed, trials_run)
        }
    }

    pub fn aborted(property: &str, seed: u64, trials_run: u32) -> Self {
        Self::bare(property, Status::Aborted, seed, trials_run)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == Status::Passed
    }

    /// Trials that passed before the verdict.
    #[must_use]
    pub fn passed_trials(&self) -> u32 {
        if self.failing_trial.is_some() {
            self.trials_run.saturating_sub(1)
        } else {
            self.trials_run
        }
    }

    /// Human-readable rendering.
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut out = String::new();
        let name = &self.property;
        let passed = self.passed_trials();
        match self.status {
            Status::Passed => {
                let _ = writeln!(out, "+ {name}: OK, passed {passed} tests.");
            }
            Status::Falsified | Status::Malformed | Status::Errored => {
                let verdict = match self.status {
                    Status::Falsified => "Falsified",
                    Status::Malformed => "Malformed sequence",
                    _ => "Error",
                };
                let _ = writeln!(
                    out,
                    "! {name}: {verdict} after {passed} passed tests (seed {}).",
                    self.seed
                );
                if let Some(error) = &self.error {
                    let _ = writeln!(out, "  {error}");
                }
                if let Some(shrunk) = &self.shrunk_trial {
                    shrunk.render_into(&mut out);
                }
                if let Some(original) = &self.failing_trial {
                    let _ = write!(
                        out,
                        "  original: {} commands, shrunk in {} steps",
                        original.sequence.len(),
                        self.shrink_steps
                    );
                    if self.shrink_interrupted {
                        out.push_str(" (interrupted)");
                    }
                    out.push('\n');
                    let _ = writeln!(out, "  original commands: {}", original.commands_line());
                }
            }
            Status::Exhausted => {
                let _ = writeln!(
                    out,
                    "! {name}: Gave up after {passed} passed tests (seed {}).",
                    self.seed
                );
                if let Some(error) = &self.error {
                    let _ = writeln!(out, "  {error}");
                }
            }
            Status::Aborted => {
                let _ = writeln!(
                    out,
                    "! {name}: Aborted after {passed} passed tests (seed {}).",
                    self.seed
                );
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue_model::{QueueCommand, QueueState};
    use crate::runner::FailureKind;
    use QueueCommand::{Get, Put};

    fn get_failure() -> Failure {
        Failure {
            kind: FailureKind::PostCondition {
                expected: "1".to_string(),
                actual: "2".to_string(),
            },
            step: Some(3),
            command: Some("Get".to_string()),
            command_name: Some("Get".to_string()),
            state_before: Some("QueueState { capacity: 1, elements: [1] }".to_string()),
            teardown_error: None,
        }
    }

    fn falsified_report() -> Report {
        let trial = Trial::new(QueueState::with_capacity(1), vec![Put(0), Get, Put(1), Get]);
        let failure = get_failure();
        let shrunk = ShrinkOutcome {
            trial: trial.clone(),
            failure: failure.clone(),
            steps: 12,
            accepted: 0,
            budget_exhausted: false,
            aborted: false,
        };
        Report::failed("queue", 7, 5, &trial, &failure, &shrunk)
    }

    #[test]
    fn trial_report_renders_commands() {
        let trial = Trial::new(QueueState::with_capacity(1), vec![Put(0), Get]);
        let report = TrialReport::from_trial(&trial, &get_failure());
        assert_eq!(report.sequence, vec!["Put(0)", "Get"]);
        assert_eq!(report.commands_line(), "[Put(0) Get]");
        assert_eq!(report.fail_index, Some(3));
        assert_eq!(
            report.initial_state,
            "QueueState { capacity: 1, elements: [] }"
        );
    }

    #[test]
    fn failed_report_status_follows_category() {
        let report = falsified_report();
        assert_eq!(report.status, Status::Falsified);
        assert_eq!(report.passed_trials(), 4);
        assert!(!report.is_success());

        let trial = Trial::new(QueueState::with_capacity(1), vec![Put(0)]);
        let failure = Failure {
            kind: FailureKind::CommandError {
                message: "boom".to_string(),
            },
            ..get_failure()
        };
        let shrunk = ShrinkOutcome {
            trial: trial.clone(),
            failure: failure.clone(),
            steps: 0,
            accepted: 0,
            budget_exhausted: true,
            aborted: false,
        };
        let report = Report::failed("queue", 7, 1, &trial, &failure, &shrunk);
        assert_eq!(report.status, Status::Errored);
        assert!(report.shrink_interrupted);
    }

    #[test]
    fn plain_rendering() {
        let passed = Report::passed("queue", 1, 100);
        assert_eq!(passed.render_plain(), "+ queue: OK, passed 100 tests.\n");

        let text = falsified_report().render_plain();
        assert!(text.starts_with("! queue: Falsified after 4 passed tests (seed 7)."));
        assert!(text.contains("commands: [Put(0) Get Put(1) Get]"));
        assert!(text.contains("step 3 (Get): postcondition failed: expected 1, actual 2"));
        assert!(text.contains("shrunk in 12 steps"));

        let exhausted = Report::gave_up(
            "queue",
            3,
            2,
            &GenerationError::InitialStateRejected { attempts: 11 },
        );
        assert!(exhausted.render_plain().contains("Gave up after 2 passed tests"));
        assert!(Report::aborted("queue", 3, 9).render_plain().contains("Aborted after 9"));
    }

    #[test]
    fn generation_panic_is_an_error() {
        let report = Report::gave_up(
            "queue",
            3,
            0,
            &GenerationError::Panicked {
                message: "generator blew up".to_string(),
            },
        );
        assert_eq!(report.status, Status::Errored);
        assert!(report.failing_trial.is_none());
        let text = report.render_plain();
        assert!(text.starts_with("! queue: Error after 0 passed tests (seed 3)."));
        assert!(text.contains("trial generation panicked: generator blew up"));
    }

    #[test]
    fn teardown_error_is_rendered() {
        let trial = Trial::new(QueueState::with_capacity(1), vec![Put(0), Get, Put(1), Get]);
        let failure = Failure {
            teardown_error: Some("device busy".to_string()),
            ..get_failure()
        };
        let report = TrialReport::from_trial(&trial, &failure);
        let mut text = String::new();
        report.render_into(&mut text);
        assert!(text.contains("destroying the system under test also failed: device busy"));

        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["teardown_error"], "device busy");
        assert!(serde_json::to_value(get_failure()).unwrap().get("teardown_error").is_none());
    }

    #[test]
    fn json_shape() {
        let json = serde_json::to_value(falsified_report()).unwrap();
        assert_eq!(json["status"], "falsified");
        assert_eq!(json["trials_run"], 5);
        assert_eq!(json["seed"], 7);
        assert_eq!(json["failing_trial"]["fail_index"], 3);
        assert_eq!(json["shrunk_trial"]["failure"]["kind"], "post_condition");
        assert_eq!(json["shrink_steps"], 12);
        assert!(json.get("error").is_none());

        let passed = serde_json::to_value(Report::passed("queue", 1, 100)).unwrap();
        assert!(passed.get("failing_trial").is_none());
    }
}
