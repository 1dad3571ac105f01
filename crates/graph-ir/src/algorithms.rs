// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Graph traversals.

use crate::{Graph, GraphError, NodeId, NodeIdxPair, NodeType};
use std::collections::BTreeSet;

/// Topological order by depth-first traversal.
///
/// Inputs and constants seed the traversal, followed by any other node
/// with no connected input. A consumer is pushed only once every producer
/// feeding it has been emitted, so producers always precede their
/// consumers.
///
/// # Errors
/// [`GraphError::InvalidGraph`] if some nodes can never be scheduled,
/// which only happens when the graph contains a cycle.
pub fn dfs(graph: &Graph) -> Result<Vec<NodeId>, GraphError> {
    let mut queued = BTreeSet::new();
    let mut emitted = BTreeSet::new();
    let mut stack = Vec::new();

    let seeds = graph
        .nodes_of(NodeType::Input)
        .into_iter()
        .chain(graph.nodes_of(NodeType::Const))
        .chain(
            graph
                .nodes()
                .filter(|n| n.input_edges().iter().all(Option::is_none))
                .map(|n| n.id()),
        );
    for nid in seeds {
        if queued.insert(nid) {
            stack.push(nid);
        }
    }
    // Pop order should match insertion order for the seeds.
    stack.reverse();

    let mut order = Vec::with_capacity(graph.num_nodes());
    while let Some(nid) = stack.pop() {
        order.push(nid);
        emitted.insert(nid);
        let Some(node) = graph.node(nid) else {
            continue;
        };
        for eid in node.output_edges() {
            let Some(consumer) = graph.edge(*eid).map(|e| e.consumer()) else {
                continue;
            };
            if !queued.contains(&consumer) && all_producers_emitted(graph, consumer, &emitted) {
                queued.insert(consumer);
                stack.push(consumer);
            }
        }
    }

    if order.len() != graph.num_nodes() {
        return Err(GraphError::InvalidGraph(format!(
            "graph '{}' contains a cycle: {} of {} nodes could be ordered",
            graph.name(),
            order.len(),
            graph.num_nodes()
        )));
    }
    Ok(order)
}

fn all_producers_emitted(graph: &Graph, nid: NodeId, emitted: &BTreeSet<NodeId>) -> bool {
    let Some(node) = graph.node(nid) else {
        return false;
    };
    node.input_edges()
        .iter()
        .flatten()
        .filter_map(|eid| graph.edge(*eid))
        .all(|edge| emitted.contains(&edge.producer()))
}

/// Consumers of `nid`'s outputs, as (consumer, input slot) pairs.
pub fn get_driving_nodes(graph: &Graph, nid: NodeId) -> Vec<NodeIdxPair> {
    let Some(node) = graph.node(nid) else {
        return Vec::new();
    };
    node.output_edges()
        .iter()
        .filter_map(|eid| graph.edge(*eid))
        .map(|e| NodeIdxPair::new(e.consumer(), e.consumer_idx()))
        .collect()
}

/// Producers feeding `nid`, as (producer, output slot) pairs.
pub fn get_driver_nodes(graph: &Graph, nid: NodeId) -> Vec<NodeIdxPair> {
    let Some(node) = graph.node(nid) else {
        return Vec::new();
    };
    node.input_edges()
        .iter()
        .flatten()
        .filter_map(|eid| graph.edge(*eid))
        .map(|e| NodeIdxPair::new(e.producer(), e.producer_idx()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActivationFunction, ActivationInfo, EltwiseOperation, NodeKind, NodeParams};
    use tensor_core::{DType, TensorDescriptor};

    fn position(order: &[NodeId], nid: NodeId) -> usize {
        order.iter().position(|n| *n == nid).unwrap()
    }

    #[test]
    fn test_dfs_diamond_respects_dependencies() {
        let mut g = Graph::new("diamond");
        let desc = TensorDescriptor::new([1, 2, 2, 2], DType::F32);
        let input = g.add_node(NodeParams::new("in"), NodeKind::Input { desc });
        let relu = NodeKind::Activation(ActivationInfo::new(ActivationFunction::Relu));
        let left = g.add_node(NodeParams::new("left"), relu.clone());
        let right = g.add_node(NodeParams::new("right"), relu.clone());
        let deep = g.add_node(NodeParams::new("deep"), relu);
        let add = g.add_node(NodeParams::new("add"), NodeKind::Eltwise(EltwiseOperation::Add));
        let out = g.add_node(NodeParams::new("out"), NodeKind::Output);

        g.add_connection(input, 0, left, 0).unwrap();
        g.add_connection(input, 0, right, 0).unwrap();
        g.add_connection(right, 0, deep, 0).unwrap();
        g.add_connection(left, 0, add, 0).unwrap();
        g.add_connection(deep, 0, add, 1).unwrap();
        g.add_connection(add, 0, out, 0).unwrap();

        let order = dfs(&g).unwrap();
        assert_eq!(order.len(), 6);
        // The join waits for the short branch even though the long one ran first.
        assert_eq!(order, vec![input, right, deep, left, add, out]);
        for edge in g.edges() {
            assert!(position(&order, edge.producer()) < position(&order, edge.consumer()));
        }
        assert_eq!(get_driving_nodes(&g, input).len(), 2);
        assert_eq!(
            get_driver_nodes(&g, add),
            vec![NodeIdxPair::new(left, 0), NodeIdxPair::new(deep, 0)]
        );
    }

    #[test]
    fn test_dfs_detects_cycle() {
        let mut g = Graph::new("cycle");
        let relu = NodeKind::Activation(ActivationInfo::new(ActivationFunction::Relu));
        let a = g.add_node(NodeParams::new("a"), relu.clone());
        let b = g.add_node(NodeParams::new("b"), relu);
        g.add_connection(a, 0, b, 0).unwrap();
        g.add_connection(b, 0, a, 0).unwrap();
        assert!(matches!(dfs(&g), Err(GraphError::InvalidGraph(_))));
    }
}
