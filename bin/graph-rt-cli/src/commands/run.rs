// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `graph-rt run` command: finalize the demo network and execute it.
//!
//! ```text
//! build graph → finalize (passes, validate, configure, memory) → run
//! ```

use super::{backends, build_demo_network, load_config};
use memory_manager::MemoryBudget;
use runtime::{ExecutionMetrics, Stream};
use std::path::Path;

/// Command-line settings that override the configuration file.
pub struct RunOptions {
    pub target: String,
    pub iterations: usize,
    pub memory_budget: Option<MemoryBudget>,
    pub use_transition_memory_manager: bool,
    pub disabled_passes: Vec<String>,
    pub json: bool,
}

pub fn execute(config_path: Option<&Path>, options: RunOptions) -> anyhow::Result<()> {
    // ── Configuration ──────────────────────────────────────────
    let mut config = load_config(config_path)?;
    if config_path.is_none() {
        config.target = options.target;
        config.use_transition_memory_manager = options.use_transition_memory_manager;
        config.disabled_passes = options.disabled_passes;
        if options.memory_budget.is_some() {
            config.memory_budget = options.memory_budget;
        }
    }
    config.enable_profiling = true;

    if !options.json {
        println!("╔══════════════════════════════════════════════════════╗");
        println!("║              graph-rt · Graph Runner                 ║");
        println!("╚══════════════════════════════════════════════════════╝");
        println!();
        println!("  Config:");
        println!("   Target:            {}", config.target);
        println!(
            "   Budget:            {}",
            config.memory_budget.map_or_else(|| "unbounded".to_string(), |b| b.to_string())
        );
        println!("   Transition memory: {}", config.use_transition_memory_manager);
        println!("   Iterations:        {}", options.iterations);
        println!();
    }

    // ── Build and finalize ─────────────────────────────────────
    let mut stream = Stream::new("demo", backends());
    let capture = build_demo_network(&mut stream, options.iterations)?;
    stream.finalize(None, &config)?;

    let tasks = stream
        .manager()
        .workload(stream.graph().id())
        .map_or(0, |w| w.num_tasks());
    tracing::info!(nodes = stream.graph().num_nodes(), tasks, "demo network finalized");

    // ── Execute ────────────────────────────────────────────────
    let metrics = stream.run()?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
        return Ok(());
    }

    println!("  Graph: {} nodes, {} tasks", stream.graph().num_nodes(), tasks);
    println!();
    if let Some(last) = capture.sink().borrow().last() {
        let (class, p) = last
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, &p)| if p > best.1 { (i, p) } else { best });
        println!("  Last batch: class {class} (p = {p:.3})");
        println!();
    }
    print_metrics(&metrics);
    Ok(())
}

fn print_metrics(metrics: &ExecutionMetrics) {
    println!("  Metrics:");
    println!("   {}", metrics.summary());
    println!("   {}", metrics.allocation.summary());
    println!();
    println!("  Slowest tasks:");
    for task in metrics.slowest_tasks(5) {
        println!(
            "   {:<24} {:>8.3} ms over {} runs",
            task.node_name,
            task.total_duration.as_secs_f64() * 1000.0,
            task.runs,
        );
    }
    println!();
}
