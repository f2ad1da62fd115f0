//! Fabric command-line tools.
//!
//! Provides the `fabric` binary. `check` builds an in-memory tree with one
//! UI per branch and verifies the permanent graph; `simulate` runs
//! concurrent sessions of random tree operations through the coordinator.
//! Both print a JSON report to stdout and log to stderr.

mod ops;
mod sim;
mod tree;

use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;

use fabric_core::OrderingScope;
use fabric_sync::CoordinatorConfig;

use crate::sim::SimulateOptions;

/// Fabric dependency-graph tools.
#[derive(Parser)]
#[command(name = "fabric", about = "Fabric dependency-graph tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify acyclicity, totality and coverage of a generated graph.
    Check {
        /// Subtrees under the tree root, one UI each.
        #[arg(short, long, default_value_t = 3)]
        branches: usize,

        /// Levels per subtree.
        #[arg(short, long, default_value_t = 3)]
        depth: usize,
    },
    /// Run concurrent sessions of random tree operations.
    Simulate {
        #[arg(short, long, default_value_t = 4)]
        sessions: usize,

        /// Operations per session.
        #[arg(short, long, default_value_t = 8)]
        ops: usize,

        #[arg(short, long, default_value_t = 3)]
        branches: usize,

        #[arg(short, long, default_value_t = 3)]
        depth: usize,

        /// global or subspace (overrides FABRIC_ORDERING).
        #[arg(long)]
        ordering: Option<OrderingScope>,

        /// Fail every k-th operation of each session after it mutates.
        #[arg(long)]
        fail_every: Option<usize>,

        /// Bound on each dependency wait (overrides FABRIC_WAIT_TIMEOUT_MS).
        #[arg(long)]
        wait_timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Check { branches, depth } => run_check(branches, depth),
        Commands::Simulate {
            sessions,
            ops,
            branches,
            depth,
            ordering,
            fail_every,
            wait_timeout_ms,
        } => {
            let options = SimulateOptions {
                sessions,
                ops,
                branches,
                depth,
                fail_every,
            };
            run_simulate(&options, ordering, wait_timeout_ms).await
        }
    };
    process::exit(exit_code);
}

/// Returns exit code: 0 = graph sound, 1 = verification failed,
/// 2 = graph could not be built.
fn run_check(branches: usize, depth: usize) -> i32 {
    match sim::check(branches, depth) {
        Ok(report) => {
            print_json(&report);
            if report.passed() {
                0
            } else {
                1
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            2
        }
    }
}

/// Returns exit code: 0 = every session ran and the graph is sound,
/// 1 = an operation errored or verification failed, 2 = configuration or
/// coordinator error.
async fn run_simulate(
    options: &SimulateOptions,
    ordering: Option<OrderingScope>,
    wait_timeout_ms: Option<u64>,
) -> i32 {
    let mut config = match CoordinatorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 2;
        }
    };
    if let Some(ordering) = ordering {
        config.ordering = ordering;
    }
    if let Some(ms) = wait_timeout_ms {
        config.wait_timeout = Some(Duration::from_millis(ms));
    }
    tracing::info!(?config, sessions = options.sessions, ops = options.ops, "starting simulation");

    match sim::simulate(options, config).await {
        Ok(report) => {
            print_json(&report);
            if report.passed() {
                0
            } else {
                1
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            2
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    let json = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize report: {}\"}}", e));
    println!("{}", json);
}
