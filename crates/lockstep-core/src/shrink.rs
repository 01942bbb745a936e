//! Shrink search: greedy reduction of a failing trial.
//!
//! Each round plans an explicit worklist of reduction moves against the
//! current smallest failing trial, in a fixed order:
//!
//! 1. drop everything after the failing step,
//! 2. remove runs of commands at every offset (half the trial, then half
//!    again rounding up, down to single commands),
//! 3. simplify the initial state,
//! 4. simplify individual commands, the failing one first.
//!
//! Moves expand lazily into candidate trials. Candidates that break the
//! precondition chain are skipped without running. The first candidate that
//! reproduces the failure (under the configured [`ShrinkPolicy`]) becomes the
//! new best and a fresh round starts from it. The search ends when a full
//! round finds nothing, when `max_steps` candidates have been run, or when
//! the cancel token fires.
//!
//! User hooks run during the search (`Command::shrink`, the factory's
//! initial-state shrinker, preconditions) may panic. A panicking move is
//! abandoned and the search carries on with the next one. The panic hook is
//! muted on the searching thread while the search runs, since a panicking
//! command would otherwise print once per candidate.

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::command::Command;
use crate::config::ShrinkPolicy;
use crate::factory::CommandsFactory;
use crate::runner::{
    Failure, Trial, TrialOutcome, capture, is_valid_sequence, quiet_panics, run_trial,
};

/// Result of a shrink search.
#[derive(Debug, Clone)]
pub struct ShrinkOutcome<C: Command> {
    /// Smallest failing trial found.
    pub trial: Trial<C>,
    /// Failure raised by `trial`.
    pub failure: Failure,
    /// Candidates run against a fresh SUT.
    pub steps: u32,
    /// Candidates adopted as the new best.
    pub accepted: u32,
    /// The step budget ran out before a local minimum was confirmed.
    pub budget_exhausted: bool,
    pub aborted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Move {
    Truncate { keep: usize },
    RemoveChunk { start: usize, len: usize },
    ShrinkInitialState,
    ShrinkCommand { index: usize },
}

type Candidates<'a, C> = Box<dyn Iterator<Item = Trial<C>> + 'a>;

pub struct ShrinkSearch<'a, F: CommandsFactory> {
    factory: &'a F,
    cancel: &'a CancelToken,
    policy: ShrinkPolicy,
    max_steps: u32,
}

impl<'a, F: CommandsFactory> ShrinkSearch<'a, F> {
    #[must_use]
    pub fn new(factory: &'a F, cancel: &'a CancelToken) -> Self {
        Self {
            factory,
            cancel,
            policy: ShrinkPolicy::default(),
            max_steps: 1000,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ShrinkPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Shrink `trial`, which failed with `failure`.
    pub fn run(&self, trial: Trial<F::Command>, failure: Failure) -> ShrinkOutcome<F::Command> {
        quiet_panics(|| self.search(trial, failure))
    }

    fn search(&self, trial: Trial<F::Command>, failure: Failure) -> ShrinkOutcome<F::Command> {
        let original_len = trial.len();
        let mut outcome = ShrinkOutcome {
            trial,
            failure,
            steps: 0,
            accepted: 0,
            budget_exhausted: false,
            aborted: false,
        };

        'rounds: loop {
            let mut worklist = plan(&outcome.trial, &outcome.failure);
            let mut improved = false;

            'moves: while let Some(next) = worklist.pop_front() {
                let base = outcome.trial.clone();
                let mut candidates = match capture(|| self.expand(base, next)) {
                    Ok(candidates) => candidates,
                    Err(message) => {
                        debug!(reduction = ?next, %message, "shrink move panicked");
                        continue;
                    }
                };
                loop {
                    let candidate = match capture(|| candidates.next()) {
                        Ok(Some(candidate)) => candidate,
                        Ok(None) => break,
                        Err(message) => {
                            debug!(reduction = ?next, %message, "shrink move panicked");
                            break;
                        }
                    };
                    let valid = capture(|| {
                        is_valid_sequence(&candidate.initial_state, &candidate.sequence)
                    });
                    if valid != Ok(true) {
                        continue;
                    }
                    if outcome.steps >= self.max_steps {
                        outcome.budget_exhausted = true;
                        break 'rounds;
                    }
                    if self.cancel.is_cancelled() {
                        outcome.aborted = true;
                        break 'rounds;
                    }

                    outcome.steps += 1;
                    match run_trial(self.factory, &candidate, self.cancel) {
                        TrialOutcome::Failed(found)
                            if found.reproduces(&outcome.failure, self.policy) =>
                        {
                            debug!(
                                shrink_steps = outcome.steps,
                                len = candidate.len(),
                                reduction = ?next,
                                "accepted shrink candidate"
                            );
                            outcome.trial = candidate;
                            outcome.failure = found;
                            outcome.accepted += 1;
                            improved = true;
                            break 'moves;
                        }
                        TrialOutcome::Aborted { .. } => {
                            outcome.aborted = true;
                            break 'rounds;
                        }
                        _ => {}
                    }
                }
            }

            if !improved {
                break;
            }
        }

        info!(
            shrink_steps = outcome.steps,
            accepted = outcome.accepted,
            original_len,
            shrunk_len = outcome.trial.len(),
            budget_exhausted = outcome.budget_exhausted,
            aborted = outcome.aborted,
            "shrink search finished"
        );
        outcome
    }

    fn expand(&self, base: Trial<F::Command>, next: Move) -> Candidates<'a, F::Command> {
        match next {
            Move::Truncate { keep } => {
                let sequence = base.sequence[..keep].to_vec();
                Box::new(std::iter::once(Trial::new(base.initial_state, sequence)))
            }
            Move::RemoveChunk { start, len } => {
                let mut sequence = base.sequence;
                sequence.drain(start..start + len);
                Box::new(std::iter::once(Trial::new(base.initial_state, sequence)))
            }
            Move::ShrinkInitialState => {
                let factory = self.factory;
                let sequence = base.sequence;
                Box::new(
                    factory
                        .shrink_initial_state(&base.initial_state)
                        .filter(move |state| factory.initial_pre_condition(state))
                        .map(move |state| Trial::new(state, sequence.clone())),
                )
            }
            Move::ShrinkCommand { index } => {
                let simpler = base.sequence[index].shrink();
                Box::new(simpler.map(move |command| {
                    let mut sequence = base.sequence.clone();
                    sequence[index] = command;
                    Trial::new(base.initial_state.clone(), sequence)
                }))
            }
        }
    }
}

fn plan<C: Command>(best: &Trial<C>, failure: &Failure) -> VecDeque<Move> {
    let len = best.len();
    let mut moves = VecDeque::new();

    if let Some(step) = failure.step {
        if step + 1 < len {
            moves.push_back(Move::Truncate { keep: step + 1 });
        }
    }

    if len > 0 {
        let mut size = (len / 2).max(1);
        loop {
            for start in 0..=len - size {
                moves.push_back(Move::RemoveChunk { start, len: size });
            }
            if size == 1 {
                break;
            }
            size = size.div_ceil(2);
        }
    }

    moves.push_back(Move::ShrinkInitialState);

    let failing = failure.step.filter(|&step| step < len);
    if let Some(step) = failing {
        moves.push_back(Move::ShrinkCommand { index: step });
    }
    for index in (0..len).filter(|&i| Some(i) != failing) {
        moves.push_back(Move::ShrinkCommand { index });
    }

    moves
}
