//! lockstep: model-based property checks for a bounded circular queue
//!
//! `lockstep run` generates random command sequences against the bundled
//! queue (optionally built with a defect), shrinks the first failure and
//! prints the report. `lockstep replay` runs one explicit sequence, e.g. a
//! shrunk counterexample copied from a report.
//!
//! Exit codes: 0 when the property holds (or the replay passes), 1 otherwise.
//! Usage errors exit with clap's code 2.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::json;

use lockstep_core::config::{Config, LogFormat, PropertyConfig, ShrinkPolicy};
use lockstep_core::logging::{LogLevel, init_logging};
use lockstep_core::queue_model::{QueueCommands, QueueFault, QueueState, parse_sequence};
use lockstep_core::{Property, TrialOutcome};

const PROPERTY_NAME: &str = "circular queue";

#[derive(Parser)]
#[command(name = "lockstep", version)]
#[command(about = "Model-based property checks for a bounded circular queue", long_about = None)]
struct Cli {
    /// Path to a lockstep.toml config file
    #[arg(long, global = true, value_name = "FILE", env = "LOCKSTEP_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    /// Log format (pretty, json)
    #[arg(long, global = true, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the queue property over random command sequences
    Run(RunArgs),

    /// Replay an explicit command sequence against a fresh queue
    Replay(ReplayArgs),
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    #[default]
    Human,
    Json,
}

#[derive(Args)]
struct RunArgs {
    /// Root seed; random when omitted (the report always prints it)
    #[arg(long)]
    seed: Option<u64>,

    /// Trials to attempt before declaring success
    #[arg(long)]
    max_trials: Option<u32>,

    /// Shrink candidates to evaluate before giving up on minimality
    #[arg(long)]
    max_shrink_steps: Option<u32>,

    /// Longest generated command sequence
    #[arg(long)]
    max_sequence_len: Option<usize>,

    /// When a shrink candidate counts as the same failure
    #[arg(long, value_name = "POLICY")]
    shrink_policy: Option<ShrinkPolicy>,

    /// Worker threads for trial execution
    #[arg(long)]
    workers: Option<usize>,

    /// Abort the run after this many milliseconds
    #[arg(long, value_name = "MS")]
    time_limit_ms: Option<u64>,

    /// Largest queue capacity to generate
    #[arg(long, default_value_t = 8)]
    max_capacity: usize,

    /// Defect compiled into the queue (none, wrap, size)
    #[arg(long, default_value_t = QueueFault::None)]
    fault: QueueFault,

    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
}

#[derive(Args)]
struct ReplayArgs {
    /// Queue capacity of the initial state
    #[arg(long)]
    capacity: usize,

    /// Commands such as "Put(0) Get Put(1) Get" (brackets and commas allowed)
    #[arg(long)]
    commands: String,

    /// Defect compiled into the queue (none, wrap, size)
    #[arg(long, default_value_t = QueueFault::None)]
    fault: QueueFault,

    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            if let Some(remediation) = err
                .chain()
                .find_map(|cause| cause.downcast_ref::<lockstep_core::Error>())
                .and_then(lockstep_core::Error::remediation)
            {
                eprint!("{}", remediation.render_plain());
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(level) = cli.log_level {
        config.logging.level = level.as_str().to_string();
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    init_logging(&config.logging)
        .map_err(lockstep_core::Error::from)
        .context("initializing logging")?;

    match cli.command {
        Commands::Run(args) => run_property(args, config.property),
        Commands::Replay(args) => replay(&args),
    }
}

fn run_property(args: RunArgs, mut config: PropertyConfig) -> Result<ExitCode> {
    if args.max_capacity == 0 {
        bail!("--max-capacity must be at least 1");
    }
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    if let Some(max_trials) = args.max_trials {
        config.max_trials = max_trials;
    }
    if let Some(steps) = args.max_shrink_steps {
        config.max_shrink_steps = steps;
    }
    if let Some(len) = args.max_sequence_len {
        config.max_sequence_len = len;
    }
    if let Some(policy) = args.shrink_policy {
        config.shrink_policy = policy;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(ms) = args.time_limit_ms {
        config.time_limit_ms = Some(ms);
    }
    config
        .validate()
        .map_err(lockstep_core::Error::from)
        .context("invalid property settings")?;
    tracing::debug!(?config, fault = %args.fault, max_capacity = args.max_capacity, "effective settings");

    let property = Property::new(PROPERTY_NAME, QueueCommands::new(args.max_capacity, args.fault))
        .with_config(config);
    let report = property.check_parallel();

    match args.format {
        OutputFormat::Human => print!("{}", report.render_plain()),
        OutputFormat::Json => println!("{}", to_json(&report)?),
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn replay(args: &ReplayArgs) -> Result<ExitCode> {
    if args.capacity == 0 {
        bail!("--capacity must be at least 1");
    }
    let commands = parse_sequence(&args.commands)
        .map_err(anyhow::Error::msg)
        .context("parsing --commands")?;
    let rendered: Vec<String> = commands.iter().map(ToString::to_string).collect();

    let property = Property::new(PROPERTY_NAME, QueueCommands::new(args.capacity, args.fault));
    let outcome = property.replay(QueueState::with_capacity(args.capacity), commands);

    match args.format {
        OutputFormat::Human => match &outcome {
            TrialOutcome::Passed { steps } => {
                println!("+ replay passed: {steps} commands.");
            }
            TrialOutcome::Failed(failure) => {
                match (failure.step, &failure.command) {
                    (Some(step), Some(command)) => {
                        println!("! replay failed at step {step} ({command}): {}", failure.kind);
                    }
                    _ => println!("! replay failed: {}", failure.kind),
                }
                if let Some(state) = &failure.state_before {
                    println!("  model before step: {state}");
                }
            }
            TrialOutcome::Aborted { completed } => {
                println!("! replay aborted after {completed} commands.");
            }
        },
        OutputFormat::Json => {
            let body = match &outcome {
                TrialOutcome::Passed { steps } => json!({ "status": "passed", "steps": steps }),
                TrialOutcome::Failed(failure) => json!({ "status": "failed", "failure": failure }),
                TrialOutcome::Aborted { completed } => {
                    json!({ "status": "aborted", "completed": completed })
                }
            };
            let document = json!({
                "capacity": args.capacity,
                "fault": args.fault.to_string(),
                "commands": rendered,
                "outcome": body,
            });
            println!("{}", to_json(&document)?);
        }
    }

    Ok(match outcome {
        TrialOutcome::Passed { .. } => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

fn to_json(value: &impl serde::Serialize) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(lockstep_core::Error::from)
        .context("rendering JSON output")
}
