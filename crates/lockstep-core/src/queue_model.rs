//! Bounded circular queue, its model, and the matching commands factory.
//!
//! Used by the `lockstep` CLI demo and by the engine's own tests. The queue
//! can be built with a deliberate defect ([`QueueFault`]) so the property has
//! something to find:
//!
//! - `wrap`: when the write index wraps around, the last slot is multiplied
//!   by `value + 1`, corrupting it for any non-zero value.
//! - `size`: `size()` over-reports by one whenever the queue is non-empty.

use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandGen, PostCondition};
use crate::error::CommandError;
use crate::factory::CommandsFactory;
use crate::values::{Generator, IntRange, Shrinks, shrink_toward};

/// Deliberate defect compiled into a [`CircularQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueFault {
    #[default]
    None,
    Wrap,
    Size,
}

impl fmt::Display for QueueFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Wrap => write!(f, "wrap"),
            Self::Size => write!(f, "size"),
        }
    }
}

impl FromStr for QueueFault {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "wrap" => Ok(Self::Wrap),
            "size" => Ok(Self::Size),
            _ => Err(format!("unknown fault: {s}. Expected one of: none, wrap, size")),
        }
    }
}

/// Ring of `capacity + 1` slots; one slot stays free to tell full from empty.
#[derive(Debug, Clone)]
pub struct CircularQueue {
    inp: usize,
    outp: usize,
    slots: usize,
    buf: Vec<i64>,
    fault: QueueFault,
}

impl CircularQueue {
    #[must_use]
    pub fn new(capacity: usize, fault: QueueFault) -> Self {
        Self {
            inp: 0,
            outp: 0,
            slots: capacity + 1,
            buf: vec![0; capacity + 1],
            fault,
        }
    }

    /// Append `value`, returning it.
    pub fn put(&mut self, value: i64) -> i64 {
        self.buf[self.inp] = value;
        self.inp = (self.inp + 1) % self.slots;
        if self.fault == QueueFault::Wrap && self.inp == 0 {
            let last = self.slots - 1;
            self.buf[last] = self.buf[last].wrapping_mul(value.wrapping_add(1));
        }
        value
    }

    /// Remove and return the oldest value; `None` when empty.
    pub fn get(&mut self) -> Option<i64> {
        if self.inp == self.outp {
            return None;
        }
        let value = self.buf[self.outp];
        self.outp = (self.outp + 1) % self.slots;
        Some(value)
    }

    #[must_use]
    pub fn size(&self) -> usize {
        let len = (self.inp + self.slots - self.outp) % self.slots;
        if self.fault == QueueFault::Size && len > 0 {
            len + 1
        } else {
            len
        }
    }

    pub fn reset(&mut self) {
        self.inp = 0;
        self.outp = 0;
    }
}

/// Expected contents of the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueState {
    pub capacity: usize,
    pub elements: Vec<i64>,
}

impl QueueState {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            elements: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueCommand {
    Get,
    Put(i64),
    Size,
}

impl fmt::Display for QueueCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "Get"),
            Self::Put(value) => write!(f, "Put({value})"),
            Self::Size => write!(f, "Size"),
        }
    }
}

impl FromStr for QueueCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "Get" => return Ok(Self::Get),
            "Size" => return Ok(Self::Size),
            _ => {}
        }
        s.strip_prefix("Put(")
            .and_then(|rest| rest.strip_suffix(')'))
            .and_then(|value| value.trim().parse::<i64>().ok())
            .map(Self::Put)
            .ok_or_else(|| format!("unknown command: {s}. Expected Get, Size or Put(<int>)"))
    }
}

/// Parse a whitespace- or comma-separated command list, e.g.
/// `"[Put(0) Get, Size]"`.
pub fn parse_sequence(text: &str) -> Result<Vec<QueueCommand>, String> {
    text.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
        .map(str::parse)
        .collect()
}

impl Command for QueueCommand {
    type State = QueueState;
    type Sut = CircularQueue;
    type Output = i64;

    fn run(&self, sut: &mut CircularQueue) -> Result<i64, CommandError> {
        match self {
            Self::Get => sut
                .get()
                .ok_or_else(|| CommandError::new("get on an empty queue")),
            Self::Put(value) => Ok(sut.put(*value)),
            Self::Size => i64::try_from(sut.size())
                .map_err(|_| CommandError::new("queue size exceeds i64")),
        }
    }

    fn next_state(&self, state: &mut QueueState) {
        match self {
            Self::Get => {
                if !state.elements.is_empty() {
                    state.elements.remove(0);
                }
            }
            Self::Put(value) => state.elements.push(*value),
            Self::Size => {}
        }
    }

    fn pre_condition(&self, state: &QueueState) -> bool {
        match self {
            Self::Get => !state.elements.is_empty(),
            Self::Put(_) => state.elements.len() < state.capacity,
            Self::Size => true,
        }
    }

    fn post_condition(&self, state: &QueueState, output: &i64) -> PostCondition {
        match self {
            Self::Get => match state.elements.first() {
                Some(front) => PostCondition::expect_eq(front, output),
                None => PostCondition::Fail {
                    expected: "an element".to_string(),
                    actual: format!("{output:?}"),
                },
            },
            Self::Put(value) => PostCondition::expect_eq(value, output),
            Self::Size => {
                let len = i64::try_from(state.elements.len()).unwrap_or(i64::MAX);
                PostCondition::expect_eq(&len, output)
            }
        }
    }

    fn shrink(&self) -> Shrinks<Self> {
        match self {
            Self::Put(value) => Box::new(shrink_toward(*value, 0).map(Self::Put)),
            Self::Get | Self::Size => Box::new(std::iter::empty()),
        }
    }
}

/// Factory for the queue property: capacities in `1..=max_capacity`, empty
/// initial contents, and `Get`/`Put`/`Size` with equal weights.
#[derive(Debug, Clone)]
pub struct QueueCommands {
    capacities: IntRange,
    values: IntRange,
    fault: QueueFault,
}

impl QueueCommands {
    /// # Panics
    ///
    /// Panics if `max_capacity` is 0.
    #[must_use]
    pub fn new(max_capacity: usize, fault: QueueFault) -> Self {
        let max = i64::try_from(max_capacity).unwrap_or(i64::MAX);
        Self {
            capacities: IntRange::new(1, max),
            values: IntRange::i32s(),
            fault,
        }
    }

    #[must_use]
    pub fn fault(&self) -> QueueFault {
        self.fault
    }
}

impl CommandsFactory for QueueCommands {
    type Command = QueueCommand;

    fn gen_initial_state(&self, rng: &mut StdRng) -> QueueState {
        let capacity = usize::try_from(self.capacities.generate(rng)).unwrap_or(1);
        QueueState::with_capacity(capacity)
    }

    fn initial_pre_condition(&self, state: &QueueState) -> bool {
        state.capacity > 0 && state.elements.len() <= state.capacity
    }

    fn shrink_initial_state(&self, state: &QueueState) -> Shrinks<QueueState> {
        let elements = state.elements.clone();
        let capacity = i64::try_from(state.capacity).unwrap_or(i64::MAX);
        Box::new(
            self.capacities
                .shrink(&capacity)
                .filter_map(|c| usize::try_from(c).ok())
                .map(move |capacity| QueueState {
                    capacity,
                    elements: elements.clone(),
                }),
        )
    }

    fn new_system_under_test(&self, state: &QueueState) -> Result<CircularQueue, CommandError> {
        let mut queue = CircularQueue::new(state.capacity, self.fault);
        for &value in &state.elements {
            queue.put(value);
        }
        Ok(queue)
    }

    fn destroy_system_under_test(&self, mut sut: CircularQueue) -> Result<(), CommandError> {
        sut.reset();
        Ok(())
    }

    fn command_generator(&self, _state: &QueueState) -> CommandGen<QueueCommand> {
        let values = self.values;
        CommandGen::new()
            .just("get", 1, QueueCommand::Get)
            .with("put", 1, move |rng| QueueCommand::Put(values.generate(rng)))
            .just("size", 1, QueueCommand::Size)
    }
}
