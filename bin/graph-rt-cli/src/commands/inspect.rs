// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `graph-rt inspect` command: display the demo network's structure.
//!
//! With `--finalize` the graph is printed after the pass pipeline has
//! rewritten it, which shows fused activations, lowered grouped
//! convolutions and disabled split/concatenation nodes.

use super::{backends, build_demo_network, load_config};
use graph_ir::{DotGraphPrinter, Graph};
use runtime::Stream;
use std::path::Path;

pub fn execute(config_path: Option<&Path>, finalize: bool, dot: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let mut stream = Stream::new("demo", backends());
    build_demo_network(&mut stream, 1)?;
    if finalize {
        stream.finalize(None, &config)?;
    }

    if dot {
        print!("{}", DotGraphPrinter::print(stream.graph()));
        return Ok(());
    }

    println!("╔══════════════════════════════════════════════════════╗");
    println!("║              graph-rt · Graph Inspector              ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();
    println!("  {}", stream.graph());
    println!();
    print_nodes(stream.graph());

    if let Some(workload) = stream.manager().workload(stream.graph().id()) {
        println!();
        println!("  Execution order:");
        for (idx, nid) in workload.task_nodes().into_iter().enumerate() {
            let name = stream.graph().node(nid).map_or("?", |n| n.name());
            println!("   {idx:>3}. {name}");
        }
        for mm in stream.context().memory_managers() {
            let cross = mm.cross_mm.as_ref().map_or(0, |m| m.pool_size_bytes());
            let intra = mm.intra_mm.as_ref().map_or(0, |m| m.pool_size_bytes());
            println!();
            println!(
                "  {} pools: transition {:.1} KB, scratch {:.1} KB",
                mm.target,
                cross as f64 / 1024.0,
                intra as f64 / 1024.0
            );
        }
    }
    Ok(())
}

fn print_nodes(graph: &Graph) {
    println!("  {:<4} {:<22} {:<20} {:<8} {:<18}", "Id", "Name", "Type", "Target", "Output");
    println!("  {}", "-".repeat(76));
    for node in graph.nodes() {
        let output = node
            .output_id(0)
            .and_then(|tid| graph.tensor(tid))
            .map_or_else(|| "-".to_string(), |t| t.desc().shape.to_string());
        let enabled = if node.kind().is_enabled() { "" } else { " (view)" };
        println!(
            "  {:<4} {:<22} {:<20} {:<8} {:<18}",
            node.id().to_string(),
            truncate(node.name(), 22),
            format!("{}{enabled}", node.node_type()),
            node.assigned_target().to_string(),
            output,
        );
    }
}

/// Truncates a string with ellipsis.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{head}...")
    }
}
