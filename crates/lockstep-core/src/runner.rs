//! Sequential runner: executes one trial against the system under test and
//! the model in lockstep.
//!
//! For every command, in order: check the precondition on the model, run the
//! command against the SUT, check the postcondition against the *pre*-step
//! model, then advance the model. The first failing step ends the trial. The
//! SUT is destroyed exactly once whatever the outcome, including panics
//! raised by user code.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::command::{Command, PostCondition};
use crate::config::ShrinkPolicy;
use crate::factory::CommandsFactory;

/// An initial model state and the command sequence replayed from it.
#[derive(Debug, Clone)]
pub struct Trial<C: Command> {
    pub initial_state: C::State,
    pub sequence: Vec<C>,
}

impl<C: Command> Trial<C> {
    #[must_use]
    pub fn new(initial_state: C::State, sequence: Vec<C>) -> Self {
        Self {
            initial_state,
            sequence,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }
}

/// What went wrong in a failed trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// The SUT disagreed with the model.
    PostCondition { expected: String, actual: String },
    /// A replayed sequence reached a command whose precondition is false.
    PreConditionViolated,
    /// A command's run action returned an error.
    CommandError { message: String },
    /// User code panicked while executing a step.
    Panicked { message: String },
    /// The factory failed to build the SUT.
    Setup { message: String },
    /// The factory failed to destroy the SUT.
    Teardown { message: String },
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PostCondition { expected, actual } => {
                write!(f, "postcondition failed: expected {expected}, actual {actual}")
            }
            Self::PreConditionViolated => write!(f, "precondition violated"),
            Self::CommandError { message } => write!(f, "command error: {message}"),
            Self::Panicked { message } => write!(f, "panicked: {message}"),
            Self::Setup { message } => write!(f, "creating the system under test failed: {message}"),
            Self::Teardown { message } => {
                write!(f, "destroying the system under test failed: {message}")
            }
        }
    }
}

/// The three failure families that are never conflated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// A postcondition returned false.
    Falsified,
    /// The sequence itself broke a precondition (engine or generator bug).
    MalformedSequence,
    /// The factory or a command raised.
    Infrastructure,
}

impl FailureKind {
    #[must_use]
    pub fn category(&self) -> FailureCategory {
        match self {
            Self::PostCondition { .. } => FailureCategory::Falsified,
            Self::PreConditionViolated => FailureCategory::MalformedSequence,
            Self::CommandError { .. }
            | Self::Panicked { .. }
            | Self::Setup { .. }
            | Self::Teardown { .. } => FailureCategory::Infrastructure,
        }
    }
}

/// A failed trial: the failing step and enough context to reproduce it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    #[serde(flatten)]
    pub kind: FailureKind,
    /// Index of the failing command; `None` for setup/teardown failures.
    pub step: Option<usize>,
    /// Rendered failing command.
    pub command: Option<String>,
    /// Name of the failing command, see [`Command::name`].
    pub command_name: Option<String>,
    /// Model state just before the failing command.
    pub state_before: Option<String>,
    /// Destroying the SUT also failed after this failure was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teardown_error: Option<String>,
}

impl Failure {
    fn outside_steps(kind: FailureKind) -> Self {
        Self {
            kind,
            step: None,
            command: None,
            command_name: None,
            state_before: None,
            teardown_error: None,
        }
    }

    #[must_use]
    pub fn category(&self) -> FailureCategory {
        self.kind.category()
    }

    /// Whether this failure counts as the same bug as `original` under
    /// `policy`.
    #[must_use]
    pub fn reproduces(&self, original: &Self, policy: ShrinkPolicy) -> bool {
        let same_kind =
            std::mem::discriminant(&self.kind) == std::mem::discriminant(&original.kind);
        match policy {
            ShrinkPolicy::AnyFailure => true,
            ShrinkPolicy::SameKind => same_kind,
            ShrinkPolicy::SameCommand => same_kind && self.command_name == original.command_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrialOutcome {
    Passed { steps: usize },
    Failed(Failure),
    /// Cancelled after `completed` commands; the SUT was still released.
    Aborted { completed: usize },
}

impl TrialOutcome {
    #[must_use]
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Run one trial from a freshly built SUT.
pub fn run_trial<F: CommandsFactory>(
    factory: &F,
    trial: &Trial<F::Command>,
    cancel: &CancelToken,
) -> TrialOutcome {
    let built = capture(|| factory.new_system_under_test(&trial.initial_state));
    let mut sut = match built {
        Ok(Ok(sut)) => sut,
        Ok(Err(err)) => {
            return TrialOutcome::Failed(Failure::outside_steps(FailureKind::Setup {
                message: err.message,
            }));
        }
        Err(message) => {
            return TrialOutcome::Failed(Failure::outside_steps(FailureKind::Setup { message }));
        }
    };

    let outcome = execute(&mut sut, trial, cancel);

    let teardown_error = match capture(|| factory.destroy_system_under_test(sut)) {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err.message),
        Err(message) => Some(message),
    };

    match (outcome, teardown_error) {
        (outcome, None) => outcome,
        (TrialOutcome::Failed(mut failure), Some(message)) => {
            warn!(error = %message, "destroying the system under test failed");
            failure.teardown_error = Some(message);
            TrialOutcome::Failed(failure)
        }
        (TrialOutcome::Passed { .. }, Some(message)) => {
            TrialOutcome::Failed(Failure::outside_steps(FailureKind::Teardown { message }))
        }
        (aborted @ TrialOutcome::Aborted { .. }, Some(message)) => {
            warn!(error = %message, "destroying the system under test failed");
            aborted
        }
    }
}

fn execute<C: Command>(sut: &mut C::Sut, trial: &Trial<C>, cancel: &CancelToken) -> TrialOutcome {
    let mut model = trial.initial_state.clone();

    for (step, command) in trial.sequence.iter().enumerate() {
        if cancel.is_cancelled() {
            return TrialOutcome::Aborted { completed: step };
        }

        let kind = match capture(|| run_step(command, &mut *sut, &mut model)) {
            Ok(None) => continue,
            Ok(Some(kind)) => kind,
            Err(message) => FailureKind::Panicked { message },
        };

        debug!(step, command = %command, ?kind, "trial failed");
        return TrialOutcome::Failed(Failure {
            kind,
            step: Some(step),
            command: Some(command.to_string()),
            command_name: Some(command.name()),
            state_before: Some(format!("{model:?}")),
            teardown_error: None,
        });
    }

    TrialOutcome::Passed {
        steps: trial.sequence.len(),
    }
}

fn run_step<C: Command>(command: &C, sut: &mut C::Sut, model: &mut C::State) -> Option<FailureKind> {
    if !command.pre_condition(model) {
        return Some(FailureKind::PreConditionViolated);
    }
    let output = match command.run(sut) {
        Ok(output) => output,
        Err(err) => {
            return Some(FailureKind::CommandError {
                message: err.message,
            });
        }
    };
    if let PostCondition::Fail { expected, actual } = command.post_condition(model, &output) {
        return Some(FailureKind::PostCondition { expected, actual });
    }
    command.next_state(model);
    None
}

/// Replay preconditions only: true when every command is legal where it is
/// reached from `initial`.
pub fn is_valid_sequence<C: Command>(initial: &C::State, sequence: &[C]) -> bool {
    let mut state = initial.clone();
    for command in sequence {
        if !command.pre_condition(&state) {
            return false;
        }
        command.next_state(&mut state);
    }
    true
}

/// Run user code, turning a panic into its message.
pub(crate) fn capture<R>(f: impl FnOnce() -> R) -> Result<R, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

thread_local! {
    static QUIET: Cell<bool> = const { Cell::new(false) };
}

static QUIET_HOOK: Once = Once::new();

/// Run `f` with the panic hook muted on this thread.
///
/// Panics are still caught and reported; only the hook's stderr message is
/// suppressed. Other threads keep the previously installed hook.
pub(crate) fn quiet_panics<R>(f: impl FnOnce() -> R) -> R {
    QUIET_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if !QUIET.with(Cell::get) {
                previous(info);
            }
        }));
    });
    let was_quiet = QUIET.with(|quiet| quiet.replace(true));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    QUIET.with(|quiet| quiet.set(was_quiet));
    result.unwrap_or_else(|payload| panic::resume_unwind(payload))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue_model::{QueueCommand, QueueCommands, QueueFault, QueueState};
    use QueueCommand::{Get, Put, Size};

    fn trial(capacity: usize, sequence: Vec<QueueCommand>) -> Trial<QueueCommand> {
        Trial::new(QueueState::with_capacity(capacity), sequence)
    }

    #[test]
    fn correct_queue_passes() {
        let factory = QueueCommands::new(8, QueueFault::None);
        let outcome = run_trial(
            &factory,
            &trial(2, vec![Put(3), Size, Put(4), Get, Put(5), Get, Get, Size]),
            &CancelToken::new(),
        );
        assert_eq!(outcome, TrialOutcome::Passed { steps: 8 });
    }

    #[test]
    fn wraparound_defect_fails_on_get() {
        let factory = QueueCommands::new(8, QueueFault::Wrap);
        let outcome = run_trial(
            &factory,
            &trial(1, vec![Put(0), Get, Put(1), Get]),
            &CancelToken::new(),
        );
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.step, Some(3));
        assert_eq!(failure.command.as_deref(), Some("Get"));
        assert_eq!(
            failure.kind,
            FailureKind::PostCondition {
                expected: "1".to_string(),
                actual: "2".to_string(),
            }
        );
        assert_eq!(
            failure.state_before.as_deref(),
            Some("QueueState { capacity: 1, elements: [1] }")
        );
        assert_eq!(failure.category(), FailureCategory::Falsified);
    }

    #[test]
    fn illegal_step_is_a_malformed_sequence() {
        let factory = QueueCommands::new(8, QueueFault::None);
        let outcome = run_trial(&factory, &trial(1, vec![Size, Get]), &CancelToken::new());
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::PreConditionViolated);
        assert_eq!(failure.step, Some(1));
        assert_eq!(failure.category(), FailureCategory::MalformedSequence);
    }

    #[test]
    fn cancelled_trial_aborts_before_first_command() {
        let factory = QueueCommands::new(8, QueueFault::None);
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = run_trial(&factory, &trial(1, vec![Put(1), Get]), &cancel);
        assert_eq!(outcome, TrialOutcome::Aborted { completed: 0 });
    }

    #[test]
    fn valid_sequence_check_follows_the_model() {
        let initial = QueueState::with_capacity(1);
        assert!(is_valid_sequence(&initial, &[Put(1), Get, Put(2)]));
        assert!(!is_valid_sequence(&initial, &[Put(1), Put(2)]));
        assert!(!is_valid_sequence(&initial, &[Get]));
        assert!(is_valid_sequence::<QueueCommand>(&initial, &[]));
    }

    #[test]
    fn reproduces_honours_policy() {
        let post = Failure {
            kind: FailureKind::PostCondition {
                expected: "1".to_string(),
                actual: "2".to_string(),
            },
            step: Some(3),
            command: Some("Get".to_string()),
            command_name: Some("Get".to_string()),
            state_before: None,
            teardown_error: None,
        };
        let other_post = Failure {
            kind: FailureKind::PostCondition {
                expected: "0".to_string(),
                actual: "1".to_string(),
            },
            command: Some("Size".to_string()),
            command_name: Some("Size".to_string()),
            ..post.clone()
        };
        let raised = Failure::outside_steps(FailureKind::Setup {
            message: "boom".to_string(),
        });

        assert!(other_post.reproduces(&post, ShrinkPolicy::SameKind));
        assert!(!other_post.reproduces(&post, ShrinkPolicy::SameCommand));
        assert!(!raised.reproduces(&post, ShrinkPolicy::SameKind));
        assert!(raised.reproduces(&post, ShrinkPolicy::AnyFailure));
    }

    #[test]
    fn failure_serializes_with_flattened_kind() {
        let failure = Failure::outside_steps(FailureKind::CommandError {
            message: "boom".to_string(),
        });
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "command_error");
        assert_eq!(json["message"], "boom");
        assert!(json["step"].is_null());
    }

    #[test]
    fn failure_kind_display() {
        let kind = FailureKind::PostCondition {
            expected: "1".to_string(),
            actual: "2".to_string(),
        };
        assert_eq!(kind.to_string(), "postcondition failed: expected 1, actual 2");
        assert_eq!(
            FailureKind::PreConditionViolated.to_string(),
            "precondition violated"
        );
    }

    #[test]
    fn quiet_panics_is_scoped_to_the_call() {
        let caught = quiet_panics(|| {
            assert!(QUIET.with(Cell::get));
            capture(|| -> u8 { panic!("muted") })
        });
        assert_eq!(caught, Err("muted".to_string()));
        assert!(!QUIET.with(Cell::get));
    }

    #[test]
    fn quiet_panics_rethrows_uncaught_panics() {
        let escaped = std::panic::catch_unwind(|| quiet_panics(|| -> u8 { panic!("loud") }));
        assert!(escaped.is_err());
        assert!(!QUIET.with(Cell::get));
    }

    #[test]
    fn panic_message_extracts_strings() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert!(panic_message(payload.as_ref()).contains("non-string"));
    }
}
