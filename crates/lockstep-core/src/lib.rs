//! lockstep-core: stateful model-based property testing
//!
//! A test author describes a system under test (SUT) with a model state and a
//! set of commands. The engine generates random command sequences that are
//! legal according to the model, runs each one against a fresh SUT and the
//! model side by side, and shrinks the first failing sequence to a small
//! counterexample.
//!
//! # Architecture
//!
//! ```text
//! CommandsFactory → (initial state, SUT) → CommandGen(state) → Command
//!        ↓
//! runner (SUT + model in lockstep) → Property driver → shrink search → Report
//! ```
//!
//! # Modules
//!
//! - `command`: the `Command` trait, postcondition verdicts, weighted command generator
//! - `factory`: `CommandsFactory` lifecycle hooks and sequence generation
//! - `runner`: executes one trial, classifies failures
//! - `shrink`: greedy worklist reduction of a failing trial
//! - `property`: the trial loop (sequential or parallel), replay
//! - `report`: structured results and plain-text rendering
//! - `values`: value generators and integer shrinking
//! - `rng`: per-trial deterministic random streams
//! - `cancel`: manual and deadline-based abort
//! - `config`: `lockstep.toml` loading and validation
//! - `logging`: tracing subscriber setup
//! - `queue_model`: bundled circular queue with selectable defects
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod cancel;
pub mod command;
pub mod config;
pub mod error;
pub mod factory;
pub mod logging;
pub mod property;
pub mod queue_model;
pub mod report;
pub mod rng;
pub mod runner;
pub mod shrink;
pub mod values;

pub use cancel::CancelToken;
pub use command::{Command, CommandGen, PostCondition};
pub use config::{Config, PropertyConfig, ShrinkPolicy};
pub use error::{CommandError, Error, Result};
pub use factory::CommandsFactory;
pub use property::Property;
pub use report::{Report, Status};
pub use runner::{Failure, FailureKind, Trial, TrialOutcome};

/// Version of lockstep-core
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
