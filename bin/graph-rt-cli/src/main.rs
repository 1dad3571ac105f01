// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # graph-rt
//!
//! Command-line interface for the graph-rt execution layer.
//!
//! ## Usage
//! ```bash
//! # Finalize and run the demo network for 8 iterations
//! graph-rt run --iterations 8 --memory-budget 64M
//!
//! # Compare against independent allocation of every intermediate
//! graph-rt run --no-transition-memory --json
//!
//! # Print the rewritten graph as Graphviz DOT
//! graph-rt inspect --finalize --dot > demo.dot
//! ```

mod commands;

use clap::{Parser, Subcommand};
use memory_manager::MemoryBudget;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "graph-rt",
    about = "Graph finalization and execution on pluggable compute backends",
    version,
    author
)]
struct Cli {
    /// Path to a TOML configuration file (overrides CLI arguments).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Finalize the demo network and run it.
    Run {
        /// Target backend: neon or cl. Falls back when unavailable.
        #[arg(short, long, default_value = "neon")]
        target: String,

        /// Number of input batches fed to the network.
        #[arg(short, long, default_value_t = 4)]
        iterations: usize,

        /// Allocator ceiling per target (e.g., "64M"). Unbounded if omitted.
        #[arg(short = 'b', long)]
        memory_budget: Option<MemoryBudget>,

        /// Allocate every intermediate tensor independently.
        #[arg(long)]
        no_transition_memory: bool,

        /// Passes to disable (repeatable), e.g. NodeFusionMutator.
        #[arg(long = "disable-pass")]
        disabled_passes: Vec<String>,

        /// Print metrics as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the demo network's structure.
    Inspect {
        /// Run the pass pipeline and finalize before printing.
        #[arg(short, long)]
        finalize: bool,

        /// Emit Graphviz DOT instead of a table.
        #[arg(long)]
        dot: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging based on verbosity.
    commands::init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            target,
            iterations,
            memory_budget,
            no_transition_memory,
            disabled_passes,
            json,
        } => {
            let overrides = commands::run::RunOptions {
                target,
                iterations,
                memory_budget,
                use_transition_memory_manager: !no_transition_memory,
                disabled_passes,
                json,
            };
            commands::run::execute(cli.config.as_deref(), overrides)
        }
        Commands::Inspect { finalize, dot } => commands::inspect::execute(cli.config.as_deref(), finalize, dot),
    }
}
