// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Graphviz rendering of a graph.

use crate::{Graph, NodeKind};
use std::fmt::Write;

/// Renders a [`Graph`] as a DOT digraph.
///
/// Nodes show their kind, name and assigned target; edges are labelled
/// with the shape they carry. Disabled concatenations and splits are drawn
/// dashed.
#[derive(Debug, Default)]
pub struct DotGraphPrinter;

impl DotGraphPrinter {
    pub fn print(graph: &Graph) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = Self::write(graph, &mut out);
        out
    }

    pub fn write(graph: &Graph, w: &mut impl Write) -> std::fmt::Result {
        writeln!(w, "digraph \"{}\" {{", escape(graph.name()))?;
        writeln!(w, "  node [shape=box];")?;
        for node in graph.nodes() {
            let detail = match node.kind() {
                NodeKind::Convolution(info) if info.num_groups > 1 => format!("\\ngroups={}", info.num_groups),
                NodeKind::Convolution(info) => format!("\\nmethod={}", info.method.as_str()),
                NodeKind::Activation(info) => format!("\\n{info}"),
                _ => String::new(),
            };
            let style = if node.kind().is_enabled() { "solid" } else { "dashed" };
            writeln!(
                w,
                "  {} [label=\"{}\\n{}{}\\n@{}\", style={}];",
                node.id(),
                node.node_type(),
                escape(node.name()),
                detail,
                node.assigned_target(),
                style
            )?;
        }
        for edge in graph.edges() {
            let shape = graph
                .tensor(edge.tensor())
                .map(|t| t.desc().shape.to_string())
                .unwrap_or_default();
            writeln!(
                w,
                "  {} -> {} [label=\"{}\"];",
                edge.producer(),
                edge.consumer(),
                shape
            )?;
        }
        writeln!(w, "}}")
    }
}

fn escape(s: &str) -> String {
    s.replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NodeKind, NodeParams};
    use tensor_core::{DType, TensorDescriptor};

    #[test]
    fn test_dot_output() {
        let mut g = Graph::new("net");
        let desc = TensorDescriptor::new([1, 3], DType::F32);
        let i = g.add_node(NodeParams::new("in"), NodeKind::Input { desc });
        let o = g.add_node(NodeParams::new("out"), NodeKind::Output);
        g.add_connection(i, 0, o, 0).unwrap();

        let dot = DotGraphPrinter::print(&g);
        assert!(dot.starts_with("digraph \"net\" {"));
        assert!(dot.contains("n0 -> n1"));
        assert!(dot.contains("Input\\nin"));
        assert!(dot.trim_end().ends_with('}'));
    }
}
