//! Property driver: the outer trial loop.
//!
//! Runs up to `max_trials` trials, each generated from its own random
//! sub-stream of `(seed, trial index)`, stops at the first failing trial,
//! shrinks it, and returns a [`Report`]. Sequence length grows with the trial
//! index, so early trials are short.
//!
//! [`Property::check_parallel`] runs trials on several threads in fixed-size
//! batches. It picks the first failure by trial index and shrinks it on the
//! calling thread, so its report matches [`Property::check`] for the same
//! seed.

use std::panic;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::command::Command;
use crate::config::PropertyConfig;
use crate::error::GenerationError;
use crate::factory::{CommandsFactory, StateOf, generate_initial_state, generate_sequence};
use crate::report::Report;
use crate::rng::{fresh_seed, trial_rng};
use crate::runner::{Failure, Trial, TrialOutcome, capture, run_trial};
use crate::shrink::ShrinkSearch;

enum Attempt<C: Command> {
    Passed,
    Failed(Trial<C>, Failure),
    GaveUp(GenerationError),
    Aborted,
}

enum Verdict<C: Command> {
    Passed { trials: u32 },
    Failed {
        index: u32,
        trial: Trial<C>,
        failure: Failure,
    },
    GaveUp { index: u32, error: GenerationError },
    Aborted { trials: u32 },
}

impl<C: Command> Verdict<C> {
    fn from_attempt(index: u32, attempt: Attempt<C>) -> Option<Self> {
        match attempt {
            Attempt::Passed => None,
            Attempt::Failed(trial, failure) => Some(Self::Failed {
                index,
                trial,
                failure,
            }),
            Attempt::GaveUp(error) => Some(Self::GaveUp { index, error }),
            Attempt::Aborted => Some(Self::Aborted { trials: index }),
        }
    }
}

/// A named stateful property over a commands factory.
pub struct Property<F: CommandsFactory> {
    name: String,
    factory: F,
    config: PropertyConfig,
    cancel: CancelToken,
}

impl<F: CommandsFactory> Property<F> {
    pub fn new(name: impl Into<String>, factory: F) -> Self {
        Self {
            name: name.into(),
            factory,
            config: PropertyConfig::default(),
            cancel: CancelToken::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: PropertyConfig) -> Self {
        self.config = config;
        self
    }

    /// Abort the run when `cancel` fires. Checked between trials, between
    /// commands, and between shrink candidates.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn config(&self) -> &PropertyConfig {
        &self.config
    }

    /// Rebuild trial `index` of a run rooted at `seed`.
    ///
    /// A panic in the factory or command generator is returned as
    /// [`GenerationError::Panicked`].
    pub fn generate_trial(
        &self,
        seed: u64,
        index: u32,
    ) -> Result<Trial<F::Command>, GenerationError> {
        capture(|| self.build_trial(seed, index))
            .unwrap_or_else(|message| Err(GenerationError::Panicked { message }))
    }

    fn build_trial(&self, seed: u64, index: u32) -> Result<Trial<F::Command>, GenerationError> {
        let mut rng = trial_rng(seed, index);
        let initial =
            generate_initial_state(&self.factory, &mut rng, self.config.max_discard_ratio)?;
        let min = self.config.min_sequence_len;
        let len = rng.random_range(min..=self.length_bound(index));
        let sequence = generate_sequence(&self.factory, &initial, len, &mut rng)?;
        Ok(Trial::new(initial, sequence))
    }

    /// Run an explicit trial, e.g. one copied out of a report.
    pub fn replay(&self, initial: StateOf<F>, sequence: Vec<F::Command>) -> TrialOutcome {
        run_trial(&self.factory, &Trial::new(initial, sequence), &self.cancel)
    }

    /// Check the property on the calling thread.
    pub fn check(&self) -> Report {
        let seed = self.config.seed.unwrap_or_else(fresh_seed);
        let cancel = self.run_token();
        self.log_start(seed, 1);

        let mut verdict = Verdict::Passed {
            trials: self.config.max_trials,
        };
        for index in 0..self.config.max_trials {
            if cancel.is_cancelled() {
                verdict = Verdict::Aborted { trials: index };
                break;
            }
            if let Some(found) = Verdict::from_attempt(index, self.attempt(seed, index, &cancel))
            {
                verdict = found;
                break;
            }
        }

        self.conclude(seed, verdict, &cancel)
    }

    fn length_bound(&self, index: u32) -> usize {
        let min = self.config.min_sequence_len;
        let span = self.config.max_sequence_len.saturating_sub(min);
        let trials = self.config.max_trials.max(1) as usize;
        let grown = span.saturating_mul(index as usize + 1) / trials;
        min + grown.min(span)
    }

    fn run_token(&self) -> CancelToken {
        match self.config.time_limit_ms {
            Some(ms) => self.cancel.with_timeout(Duration::from_millis(ms)),
            None => self.cancel.clone(),
        }
    }

    fn log_start(&self, seed: u64, workers: usize) {
        info!(
            property = %self.name,
            seed,
            max_trials = self.config.max_trials,
            workers,
            "checking property"
        );
    }

    fn attempt(&self, seed: u64, index: u32, cancel: &CancelToken) -> Attempt<F::Command> {
        let span = crate::lockstep_span!("trial", seed = seed, trial = index);
        let _guard = span.enter();
        let trial = match self.generate_trial(seed, index) {
            Ok(trial) => trial,
            Err(error) => return Attempt::GaveUp(error),
        };
        match run_trial(&self.factory, &trial, cancel) {
            TrialOutcome::Passed { steps } => {
                debug!(trial = index, steps, "trial passed");
                Attempt::Passed
            }
            TrialOutcome::Failed(failure) => Attempt::Failed(trial, failure),
            TrialOutcome::Aborted { completed } => {
                debug!(trial = index, completed, "trial aborted");
                Attempt::Aborted
            }
        }
    }

    fn conclude(&self, seed: u64, verdict: Verdict<F::Command>, cancel: &CancelToken) -> Report {
        let name = self.name.as_str();
        match verdict {
            Verdict::Passed { trials } => {
                info!(property = name, seed, trials, "property passed");
                Report::passed(name, seed, trials)
            }
            Verdict::Failed {
                index,
                trial,
                failure,
            } => {
                warn!(
                    property = name,
                    seed,
                    trial = index,
                    step = ?failure.step,
                    len = trial.len(),
                    failure = %failure.kind,
                    "property failed, shrinking"
                );
                let shrunk = ShrinkSearch::new(&self.factory, cancel)
                    .with_policy(self.config.shrink_policy)
                    .with_max_steps(self.config.max_shrink_steps)
                    .run(trial.clone(), failure.clone());
                Report::failed(name, seed, index + 1, &trial, &failure, &shrunk)
            }
            Verdict::GaveUp { index, error } => {
                warn!(property = name, seed, trial = index, %error, "trial generation gave up");
                Report::gave_up(name, seed, index, &error)
            }
            Verdict::Aborted { trials } => {
                warn!(property = name, seed, trials, "property check aborted");
                Report::aborted(name, seed, trials)
            }
        }
    }
}

impl<F> Property<F>
where
    F: CommandsFactory + Sync,
    F::Command: Send,
    StateOf<F>: Send,
{
    /// Check the property with `workers` threads (from the config).
    pub fn check_parallel(&self) -> Report {
        let workers = self.config.workers.max(1);
        if workers == 1 {
            return self.check();
        }

        let seed = self.config.seed.unwrap_or_else(fresh_seed);
        let cancel = self.run_token();
        self.log_start(seed, workers);

        let max_trials = self.config.max_trials;
        let batch = u32::try_from(workers).unwrap_or(u32::MAX);
        let mut verdict = Verdict::Passed { trials: max_trials };
        let mut start = 0;
        'batches: while start < max_trials {
            if cancel.is_cancelled() {
                verdict = Verdict::Aborted { trials: start };
                break;
            }
            let end = start.saturating_add(batch).min(max_trials);
            let attempts = self.run_batch(seed, start..end, &cancel);
            for (index, attempt) in (start..end).zip(attempts) {
                if let Some(found) = Verdict::from_attempt(index, attempt) {
                    verdict = found;
                    break 'batches;
                }
            }
            start = end;
        }

        self.conclude(seed, verdict, &cancel)
    }

    fn run_batch(
        &self,
        seed: u64,
        indices: std::ops::Range<u32>,
        cancel: &CancelToken,
    ) -> Vec<Attempt<F::Command>> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = indices
                .map(|index| scope.spawn(move || self.attempt(seed, index, cancel)))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|payload| panic::resume_unwind(payload)))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::tests::{MockLogWriter, json_subscriber};
    use crate::queue_model::{QueueCommand, QueueCommands, QueueFault, QueueState};
    use crate::report::Status;
    use crate::runner::is_valid_sequence;

    fn queue_property(fault: QueueFault) -> Property<QueueCommands> {
        Property::new("circular queue", QueueCommands::new(8, fault)).with_config(
            PropertyConfig::default()
                .with_seed(1234)
                .with_max_trials(200)
                .with_sequence_len(0, 64),
        )
    }

    #[test]
    fn correct_queue_passes_all_trials() {
        let report = queue_property(QueueFault::None).check();
        assert_eq!(report.status, Status::Passed);
        assert_eq!(report.trials_run, 200);
        assert_eq!(report.seed, 1234);
        assert!(report.failing_trial.is_none());
    }

    #[test]
    fn wrap_fault_is_found_and_shrunk() {
        let report = queue_property(QueueFault::Wrap).check();
        assert_eq!(report.status, Status::Falsified);
        let original = report.failing_trial.as_ref().unwrap();
        let shrunk = report.shrunk_trial.as_ref().unwrap();
        assert!(shrunk.sequence.len() <= original.sequence.len());
        assert_eq!(shrunk.failure.command.as_deref(), Some("Get"));
        assert!(report.shrink_steps > 0);
    }

    #[test]
    fn same_seed_same_report() {
        let first = queue_property(QueueFault::Wrap).check();
        let second = queue_property(QueueFault::Wrap).check();
        assert_eq!(first, second);
    }

    #[test]
    fn parallel_matches_sequential() {
        let sequential = queue_property(QueueFault::Wrap).check();
        let property = queue_property(QueueFault::Wrap);
        let config = property.config().clone().with_workers(4);
        let parallel = property.with_config(config).check_parallel();
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn oversized_worker_count_is_clamped() {
        let workers = usize::try_from(1_u64 << 32).unwrap_or(usize::MAX);
        let config = PropertyConfig::default()
            .with_seed(3)
            .with_max_trials(5)
            .with_workers(workers);
        assert!(config.validate().is_ok());

        let (sender, receiver) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let report = Property::new("circular queue", QueueCommands::new(4, QueueFault::None))
                .with_config(config)
                .check_parallel();
            let _ = sender.send(report);
        });
        let report = receiver
            .recv_timeout(Duration::from_secs(30))
            .expect("check_parallel should finish");
        assert_eq!(report.status, Status::Passed);
        assert_eq!(report.trials_run, 5);
    }

    #[test]
    fn generated_trials_are_reproducible_and_legal() {
        let property = queue_property(QueueFault::None);
        for index in 0..20 {
            let a = property.generate_trial(9, index).unwrap();
            let b = property.generate_trial(9, index).unwrap();
            assert_eq!(a.initial_state, b.initial_state);
            assert_eq!(a.sequence, b.sequence);
            assert!(is_valid_sequence(&a.initial_state, &a.sequence));
        }
    }

    #[test]
    fn sequence_length_grows_with_trial_index() {
        let property = queue_property(QueueFault::None);
        assert_eq!(property.length_bound(0), 0);
        assert_eq!(property.length_bound(99), 32);
        assert_eq!(property.length_bound(199), 64);
        assert!(property.generate_trial(1, 0).unwrap().is_empty());
    }

    #[test]
    fn replay_reports_the_failing_step() {
        let property = queue_property(QueueFault::Wrap);
        let outcome = property.replay(
            QueueState::with_capacity(1),
            vec![
                QueueCommand::Put(0),
                QueueCommand::Get,
                QueueCommand::Put(1),
                QueueCommand::Get,
            ],
        );
        assert_eq!(outcome.failure().and_then(|f| f.step), Some(3));
    }

    #[test]
    fn cancelled_run_is_aborted() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = queue_property(QueueFault::None)
            .with_cancel_token(cancel)
            .check();
        assert_eq!(report.status, Status::Aborted);
        assert_eq!(report.trials_run, 0);
    }

    #[test]
    fn zero_time_limit_aborts() {
        let property = queue_property(QueueFault::None);
        let mut config = property.config().clone();
        config.time_limit_ms = Some(0);
        let report = property.with_config(config).check();
        assert_eq!(report.status, Status::Aborted);
    }

    #[test]
    fn check_logs_structured_events() {
        let writer = MockLogWriter::new();
        let subscriber = json_subscriber(writer.clone(), "debug");
        let report = tracing::subscriber::with_default(subscriber, || {
            queue_property(QueueFault::Wrap).check()
        });
        assert_eq!(report.status, Status::Falsified);

        let logs = writer.contents();
        assert!(logs.contains("checking property"));
        assert!(logs.contains("property failed, shrinking"));
        assert!(logs.contains("shrink search finished"));
        assert!(logs.contains("\"seed\":1234"));
    }
}
