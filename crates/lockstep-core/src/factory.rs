//! Commands factory: lifecycle owner for a stateful property.
//!
//! The factory produces initial model states, builds and destroys the system
//! under test, and supplies the command generator for each reachable state.

use rand::rngs::StdRng;

use crate::command::{Command, CommandGen};
use crate::error::{CommandError, GenerationError};
use crate::values::Shrinks;

/// Model state type of a factory.
pub type StateOf<F> = <<F as CommandsFactory>::Command as Command>::State;
/// System-under-test type of a factory.
pub type SutOf<F> = <<F as CommandsFactory>::Command as Command>::Sut;

pub trait CommandsFactory: Sized {
    type Command: Command;

    fn gen_initial_state(&self, rng: &mut StdRng) -> StateOf<Self>;

    /// Generated initial states failing this are discarded and re-drawn.
    fn initial_pre_condition(&self, _state: &StateOf<Self>) -> bool {
        true
    }

    /// Simpler initial states, tried by the shrink search.
    fn shrink_initial_state(&self, _state: &StateOf<Self>) -> Shrinks<StateOf<Self>> {
        Box::new(std::iter::empty())
    }

    /// Build a live system consistent with `state`.
    fn new_system_under_test(&self, state: &StateOf<Self>) -> Result<SutOf<Self>, CommandError>;

    /// Release a system built by [`CommandsFactory::new_system_under_test`].
    /// Called exactly once per built system.
    fn destroy_system_under_test(&self, sut: SutOf<Self>) -> Result<(), CommandError>;

    fn command_generator(&self, state: &StateOf<Self>) -> CommandGen<Self::Command>;
}

/// Draw an initial state, re-sampling while the initial precondition rejects
/// it. Gives up after `max_discards` rejections.
pub fn generate_initial_state<F: CommandsFactory>(
    factory: &F,
    rng: &mut StdRng,
    max_discards: u32,
) -> Result<StateOf<F>, GenerationError> {
    let mut attempts = 0;
    loop {
        let state = factory.gen_initial_state(rng);
        if factory.initial_pre_condition(&state) {
            return Ok(state);
        }
        attempts += 1;
        if attempts > max_discards {
            return Err(GenerationError::InitialStateRejected { attempts });
        }
    }
}

/// Generate `len` commands starting from `initial`, threading the model state
/// through each command so every step is legal where it is executed.
pub fn generate_sequence<F: CommandsFactory>(
    factory: &F,
    initial: &StateOf<F>,
    len: usize,
    rng: &mut StdRng,
) -> Result<Vec<F::Command>, GenerationError> {
    let mut state = initial.clone();
    let mut sequence = Vec::with_capacity(len);
    for _ in 0..len {
        let command = factory.command_generator(&state).pick(&state, rng)?;
        command.next_state(&mut state);
        sequence.push(command);
    }
    Ok(sequence)
}
