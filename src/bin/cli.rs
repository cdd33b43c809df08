//! CLI binary for the call-sequence guard

use anyhow::Context;
use callguard::{
    automaton::persist,
    config::GuardConfig,
    error::GuardError,
    policy::PolicyFile,
    utils::debug::DebugLogger,
    CallLabel, VERSION,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Exit code when a traced call is rejected
const EXIT_VIOLATION: i32 = 2;

#[derive(Parser)]
#[command(name = "callguard")]
#[command(about = "Build, verify and replay call-sequence policy automata", long_about = None)]
#[command(version = VERSION)]
struct Cli {
    /// Path to settings file
    #[arg(short, long, env = "CALLGUARD_SETTINGS", global = true)]
    settings: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Region size in bytes (overrides settings)
    #[arg(long, global = true)]
    capacity: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a region from a JSON policy and store it
    Build {
        /// JSON policy description
        #[arg(short, long)]
        policy: PathBuf,

        /// Output blob
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Load a stored region and verify it
    Verify {
        /// Stored blob
        blob: PathBuf,
    },

    /// Print the header and states of a stored region
    Inspect {
        /// Stored blob
        blob: PathBuf,

        /// Emit JSON
        #[arg(long)]
        json: bool,
    },

    /// Replay a sequence of call labels from the initial state
    Trace {
        /// Stored blob
        blob: PathBuf,

        /// Call labels, in order
        #[arg(required = true)]
        labels: Vec<CallLabel>,
    },
}

fn main() {
    let cli = Cli::parse();

    // Initialize logger
    DebugLogger::init(cli.debug);

    // Run and exit with appropriate code
    let exit_code = run(cli).unwrap_or_else(|e| {
        eprintln!("Error: {:#}", e);
        1
    });

    std::process::exit(exit_code);
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    // Load configuration
    let mut config = if let Some(settings_path) = &cli.settings {
        GuardConfig::from_file(settings_path)
            .with_context(|| format!("reading settings {}", settings_path.display()))?
    } else {
        let default_path = GuardConfig::default_settings_path();
        if default_path.exists() {
            GuardConfig::from_file(&default_path)?
        } else {
            GuardConfig::default()
        }
    };

    // Override with CLI arguments
    if let Some(capacity) = cli.capacity {
        config.arena.capacity = capacity;
    }
    config.validate()?;

    let env = config.environment.build();

    match cli.command {
        Command::Build { policy, out } => {
            let source = PolicyFile::from_file(&policy)
                .with_context(|| format!("reading policy {}", policy.display()))?;
            let automaton = source.build(&config.arena, env)?;
            persist::store_file(&automaton, &out)
                .with_context(|| format!("writing {}", out.display()))?;

            let layout = automaton.layout();
            println!(
                "built {} states, {} transitions, {} of {} bytes used",
                layout.states,
                layout.transitions,
                layout.end,
                automaton.as_bytes().len()
            );
            Ok(0)
        }

        Command::Verify { blob } => {
            let automaton = persist::load_file(&blob, &config.arena, env)
                .with_context(|| format!("verifying {}", blob.display()))?;
            let layout = automaton.layout();
            println!(
                "ok: {} states, {} transitions",
                layout.states, layout.transitions
            );
            Ok(0)
        }

        Command::Inspect { blob, json } => {
            let automaton = persist::load_file(&blob, &config.arena, env)
                .with_context(|| format!("loading {}", blob.display()))?;
            let policy = PolicyFile::from_automaton(&automaton)?;

            if json {
                let report = serde_json::json!({
                    "header": automaton.header(),
                    "layout": automaton.layout(),
                    "policy": policy,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(0);
            }

            let header = automaton.header();
            println!("version:     {}", header.version);
            println!("total size:  {}", header.total_size);
            println!("states:      {}", header.num_states);
            println!(
                "table:       {} bytes at offset {}",
                header.state_table_size, header.state_table_offset
            );
            for state in &policy.states {
                let edges: Vec<String> = state
                    .transitions
                    .iter()
                    .map(|t| format!("{}->{}", t.call, t.target))
                    .collect();
                println!("state {}: [{}]", state.id, edges.join(", "));
            }
            Ok(0)
        }

        Command::Trace { blob, labels } => {
            let mut automaton = persist::load_file(&blob, &config.arena, env)
                .with_context(|| format!("loading {}", blob.display()))?;
            let start = automaton.reset()?;
            println!("start: {}", start);

            for label in labels {
                match automaton.commit(label) {
                    Ok(state) => println!("{}: {}", label, state),
                    Err(GuardError::PolicyViolation { state, label }) => {
                        println!("violation: call {} not permitted from state {}", label, state);
                        return Ok(EXIT_VIOLATION);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(0)
        }
    }
}
