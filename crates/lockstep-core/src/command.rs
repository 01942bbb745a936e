//! Commands and command generators.
//!
//! A [`Command`] is one operation of the system under test together with its
//! model semantics. Test authors usually implement it on an enum with one
//! variant per operation, each variant carrying its own payload.
//!
//! A [`CommandGen`] is a weighted one-of over command sources. It only ever
//! returns commands whose precondition holds for the state it was asked
//! about, so generated sequences are legal by construction.

use std::fmt;

use rand::Rng;
use rand::rngs::StdRng;

use crate::error::{CommandError, GenerationError};
use crate::values::Shrinks;

/// One operation with run / transition / pre / post behaviors.
///
/// The runner calls, for each step:
/// `pre_condition(state)` → `run(sut)` → `post_condition(state, output)` →
/// `next_state(state)`. The postcondition therefore sees the model state
/// *before* the transition.
pub trait Command: Clone + fmt::Debug + fmt::Display + PartialEq + 'static {
    /// Abstract model of the system under test.
    type State: Clone + fmt::Debug + 'static;
    /// Live handle to the system under test.
    type Sut;
    /// Value returned by [`Command::run`].
    type Output: fmt::Debug;

    /// Execute against the system under test.
    ///
    /// An `Err` is an infrastructure failure, not a falsification.
    fn run(&self, sut: &mut Self::Sut) -> Result<Self::Output, CommandError>;

    /// Advance the model past this command.
    fn next_state(&self, state: &mut Self::State);

    fn pre_condition(&self, _state: &Self::State) -> bool {
        true
    }

    fn post_condition(&self, _state: &Self::State, _output: &Self::Output) -> PostCondition {
        PostCondition::Pass
    }

    /// Simpler variants of this command (e.g. a smaller payload).
    fn shrink(&self) -> Shrinks<Self> {
        Box::new(std::iter::empty())
    }

    /// Name used to compare failures across commands, e.g. `Put` for `Put(7)`.
    fn name(&self) -> String {
        let text = self.to_string();
        match text.find(['(', ' ', '{']) {
            Some(end) => text[..end].to_string(),
            None => text,
        }
    }
}

/// Outcome of a postcondition check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostCondition {
    Pass,
    Fail { expected: String, actual: String },
}

impl PostCondition {
    /// Pass when `actual == expected`, otherwise record both sides.
    pub fn expect_eq<T: PartialEq + fmt::Debug + ?Sized>(expected: &T, actual: &T) -> Self {
        if expected == actual {
            Self::Pass
        } else {
            Self::Fail {
                expected: format!("{expected:?}"),
                actual: format!("{actual:?}"),
            }
        }
    }

    #[must_use]
    pub fn from_bool(holds: bool) -> Self {
        if holds {
            Self::Pass
        } else {
            Self::Fail {
                expected: "postcondition to hold".to_string(),
                actual: "false".to_string(),
            }
        }
    }

    #[must_use]
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// Default number of samples drawn from one source before it is declared
/// inapplicable to a state. Sources whose precondition depends only on the
/// command kind pass or fail on the first draw; payload-dependent ones get a
/// few tries. Sources whose legal payloads are rare need a larger budget,
/// see [`CommandGen::with_draws`].
pub const DRAWS_PER_SOURCE: usize = 8;

type Source<C> = Box<dyn Fn(&mut StdRng) -> C>;

struct Entry<C> {
    label: &'static str,
    weight: u32,
    draws: usize,
    source: Source<C>,
}

/// Weighted one-of over command sources.
pub struct CommandGen<C: Command> {
    entries: Vec<Entry<C>>,
}

impl<C: Command> Default for CommandGen<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Command> fmt::Debug for CommandGen<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| (e.label, e.weight)))
            .finish()
    }
}

impl<C: Command> CommandGen<C> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add a source drawing commands from the random stream.
    /// Entries with weight 0 are never offered.
    ///
    /// The source is dropped for a state after [`DRAWS_PER_SOURCE`] draws
    /// without a legal command, even if a later draw would have produced one.
    #[must_use]
    pub fn with(
        self,
        label: &'static str,
        weight: u32,
        source: impl Fn(&mut StdRng) -> C + 'static,
    ) -> Self {
        self.with_draws(label, weight, DRAWS_PER_SOURCE, source)
    }

    /// Like [`CommandGen::with`], with an explicit draw budget per state.
    /// A budget of 0 is treated as 1.
    #[must_use]
    pub fn with_draws(
        mut self,
        label: &'static str,
        weight: u32,
        draws: usize,
        source: impl Fn(&mut StdRng) -> C + 'static,
    ) -> Self {
        self.entries.push(Entry {
            label,
            weight,
            draws: draws.max(1),
            source: Box::new(source),
        });
        self
    }

    /// Add a constant command.
    #[must_use]
    pub fn just(self, label: &'static str, weight: u32, command: C) -> Self {
        self.with(label, weight, move |_| command.clone())
    }

    pub fn labels(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|e| e.label)
    }

    /// Pick a command legal in `state`.
    ///
    /// Sources are chosen by weight among those not yet ruled out; a source
    /// that yields no legal command within its draw budget is removed from
    /// the choice for this state.
    pub fn pick(&self, state: &C::State, rng: &mut StdRng) -> Result<C, GenerationError> {
        let mut live: Vec<usize> = (0..self.entries.len())
            .filter(|&i| self.entries[i].weight > 0)
            .collect();

        while !live.is_empty() {
            let total: u64 = live
                .iter()
                .map(|&i| u64::from(self.entries[i].weight))
                .sum();
            let mut roll = rng.random_range(0..total);
            let slot = live
                .iter()
                .position(|&i| {
                    let weight = u64::from(self.entries[i].weight);
                    if roll < weight {
                        true
                    } else {
                        roll -= weight;
                        false
                    }
                })
                .unwrap_or(live.len() - 1);

            let entry = &self.entries[live[slot]];
            for _ in 0..entry.draws {
                let command = (entry.source)(rng);
                if command.pre_condition(state) {
                    return Ok(command);
                }
            }
            live.remove(slot);
        }

        Err(GenerationError::Exhausted {
            state: format!("{state:?}"),
            offered: self.labels().map(str::to_string).collect(),
        })
    }
}
