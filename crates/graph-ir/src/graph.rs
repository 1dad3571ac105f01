// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The graph arena: nodes, edges and tensors addressed by id.
//!
//! ```text
//!   nodes:   [ Some(n0) | Some(n1) | None | Some(n3) ]   ◄── removed n2
//!   edges:   [ Some(e0) | None     | Some(e2) ]
//!   tensors: [ Some(t0) | Some(t1) | Some(t2) ]
//!
//!   n0 ──e0 (t0)──► n1 ──e2 (t1)──► n3
//! ```
//!
//! Removal leaves a hole, so ids held by passes stay valid (or dangling)
//! and are never reused. Every connection change re-infers descriptors
//! downstream of the consumer.

use crate::{
    Edge, EdgeId, GraphError, GraphId, Node, NodeId, NodeKind, NodeParams, NodeType, Tensor, TensorId,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use tensor_core::{Target, TensorDescriptor};

/// A network description owned by the application.
///
/// Built with [`crate::GraphBuilder`] (or directly through
/// [`Graph::add_node`] and [`Graph::add_connection`]), rewritten by passes
/// and finalized by the graph manager.
#[derive(Debug)]
pub struct Graph {
    id: GraphId,
    name: String,
    nodes: Vec<Option<Node>>,
    edges: Vec<Option<Edge>>,
    tensors: Vec<Option<Tensor>>,
    tagged: BTreeMap<NodeType, Vec<NodeId>>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: GraphId::next(),
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            tensors: Vec::new(),
            tagged: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ── Construction ───────────────────────────────────────────────

    /// Adds a node and one fresh tensor per output.
    pub fn add_node(&mut self, params: NodeParams, kind: NodeKind) -> NodeId {
        let nid = NodeId::new(self.nodes.len());
        let node_type = kind.node_type();
        let num_outputs = kind.num_outputs();

        let mut node = Node {
            id: nid,
            assigned_target: params.target,
            params,
            input_edges: vec![None; kind.num_input_slots()],
            outputs: Vec::with_capacity(num_outputs),
            output_edges: BTreeSet::new(),
            kind,
        };
        for _ in 0..num_outputs {
            node.outputs.push(Some(self.create_tensor(TensorDescriptor::default())));
        }

        self.nodes.push(Some(node));
        self.tagged.entry(node_type).or_default().push(nid);
        self.forward_descriptors(nid);
        nid
    }

    /// Adds a tensor not yet produced by any node.
    pub fn create_tensor(&mut self, desc: TensorDescriptor) -> TensorId {
        let tid = TensorId::new(self.tensors.len());
        self.tensors.push(Some(Tensor::new(tid, desc)));
        tid
    }

    /// Connects `producer`'s output `producer_idx` to `consumer`'s input
    /// `consumer_idx`, replacing any edge already in that input slot.
    pub fn add_connection(
        &mut self,
        producer: NodeId,
        producer_idx: usize,
        consumer: NodeId,
        consumer_idx: usize,
    ) -> Result<EdgeId, GraphError> {
        if producer == consumer {
            return Err(GraphError::InvalidConnection(format!(
                "{producer} cannot consume its own output"
            )));
        }
        let tensor = self
            .node(producer)
            .ok_or_else(|| GraphError::InvalidConnection(format!("no producer node {producer}")))?
            .output_id(producer_idx)
            .ok_or_else(|| {
                GraphError::InvalidConnection(format!("{producer} has no output {producer_idx}"))
            })?;
        let consumer_node = self
            .node(consumer)
            .ok_or_else(|| GraphError::InvalidConnection(format!("no consumer node {consumer}")))?;
        if consumer_idx >= consumer_node.num_inputs() {
            return Err(GraphError::InvalidConnection(format!(
                "{consumer} has {} inputs, cannot connect slot {consumer_idx}",
                consumer_node.num_inputs()
            )));
        }
        if let Some(old) = consumer_node.input_edge(consumer_idx) {
            self.remove_connection(old);
        }

        let eid = EdgeId::new(self.edges.len());
        self.edges.push(Some(Edge {
            id: eid,
            producer,
            producer_idx,
            consumer,
            consumer_idx,
            tensor,
        }));
        if let Some(node) = self.node_mut(producer) {
            node.output_edges.insert(eid);
        }
        if let Some(node) = self.node_mut(consumer) {
            node.input_edges[consumer_idx] = Some(eid);
        }
        if let Some(t) = self.tensor_mut(tensor) {
            t.bound_edges.insert(eid);
        }

        self.forward_descriptors(consumer);
        Ok(eid)
    }

    /// Removes an edge. Returns `false` if it did not exist.
    pub fn remove_connection(&mut self, eid: EdgeId) -> bool {
        let Some(edge) = self.edges.get_mut(eid.index()).and_then(Option::take) else {
            return false;
        };
        if let Some(node) = self.node_mut(edge.producer) {
            node.output_edges.remove(&eid);
        }
        if let Some(node) = self.node_mut(edge.consumer) {
            if let Some(slot) = node.input_edges.get_mut(edge.consumer_idx) {
                if *slot == Some(eid) {
                    *slot = None;
                }
            }
        }
        if let Some(t) = self.tensor_mut(edge.tensor) {
            t.bound_edges.remove(&eid);
        }
        true
    }

    /// Removes a node, its edges and any output tensor left unreferenced.
    pub fn remove_node(&mut self, nid: NodeId) -> bool {
        let Some(node) = self.node(nid) else {
            return false;
        };
        let node_type = node.node_type();
        let outputs: Vec<TensorId> = node.outputs.iter().flatten().copied().collect();
        let edges: Vec<EdgeId> = node
            .input_edges
            .iter()
            .flatten()
            .chain(node.output_edges.iter())
            .copied()
            .collect();

        for eid in edges {
            self.remove_connection(eid);
        }
        if let Some(tagged) = self.tagged.get_mut(&node_type) {
            tagged.retain(|n| *n != nid);
        }
        self.nodes[nid.index()] = None;
        for tid in outputs {
            self.remove_tensor_if_orphaned(tid);
        }
        true
    }

    /// Makes `tid` the tensor of `nid`'s output `idx` and rebinds the
    /// edges leaving that output to it.
    pub fn set_output_tensor(&mut self, nid: NodeId, idx: usize, tid: TensorId) -> bool {
        if self.tensor(tid).is_none() {
            return false;
        }
        let Some(node) = self.node_mut(nid) else {
            return false;
        };
        let Some(slot) = node.outputs.get_mut(idx) else {
            return false;
        };
        let old = slot.replace(tid);
        let output_edges: Vec<EdgeId> = node.output_edges.iter().copied().collect();

        for eid in output_edges {
            let previous = match self.edges.get_mut(eid.index()).and_then(Option::as_mut) {
                Some(edge) if edge.producer_idx == idx => std::mem::replace(&mut edge.tensor, tid),
                _ => continue,
            };
            if let Some(t) = self.tensor_mut(previous) {
                t.bound_edges.remove(&eid);
            }
            if let Some(t) = self.tensor_mut(tid) {
                t.bound_edges.insert(eid);
            }
        }
        if let Some(old) = old.filter(|old| *old != tid) {
            self.remove_tensor_if_orphaned(old);
        }
        true
    }

    fn remove_tensor_if_orphaned(&mut self, tid: TensorId) {
        let Some(tensor) = self.tensor(tid) else {
            return;
        };
        let referenced = !tensor.bound_edges.is_empty()
            || self.nodes().any(|n| n.outputs.contains(&Some(tid)));
        if !referenced {
            self.tensors[tid.index()] = None;
        }
    }

    /// Re-infers output descriptors of `nid` and of every node downstream.
    ///
    /// Outputs whose descriptor cannot be inferred keep their previous one;
    /// validation reports them later.
    pub fn forward_descriptors(&mut self, nid: NodeId) {
        let mut queue = VecDeque::from([nid]);
        let mut steps_left = self.nodes.len() * self.nodes.len() + 1;

        while let Some(current) = queue.pop_front() {
            if steps_left == 0 {
                tracing::warn!(graph = %self.name, "descriptor propagation did not settle; graph may contain a cycle");
                break;
            }
            steps_left -= 1;

            let Some(node) = self.node(current) else {
                continue;
            };
            let updates: Vec<(TensorId, TensorDescriptor)> = (0..node.num_outputs())
                .filter_map(|idx| Some((node.output_id(idx)?, self.configure_output(current, idx)?)))
                .collect();
            let consumers: Vec<NodeId> = node
                .output_edges
                .iter()
                .filter_map(|eid| self.edge(*eid))
                .map(Edge::consumer)
                .collect();

            for (tid, desc) in updates {
                if let Some(t) = self.tensor_mut(tid) {
                    t.desc = desc;
                }
            }
            for consumer in consumers {
                if !queue.contains(&consumer) {
                    queue.push_back(consumer);
                }
            }
        }
    }

    /// Infers the descriptor of `nid`'s output `idx` from its inputs.
    pub fn configure_output(&self, nid: NodeId, idx: usize) -> Option<TensorDescriptor> {
        let node = self.node(nid)?;
        node.kind.infer_output(idx, &self.input_descriptors(nid))
    }

    /// Assigns `target` to every node and tensor descriptor.
    pub fn force_target(&mut self, target: Target) {
        for node in self.nodes.iter_mut().flatten() {
            node.assigned_target = target;
            if let NodeKind::Input { desc } | NodeKind::Const { desc } = &mut node.kind {
                desc.target = target;
            }
        }
        for tensor in self.tensors.iter_mut().flatten() {
            tensor.desc.target = target;
        }
    }

    // ── Lookup ─────────────────────────────────────────────────────

    pub fn node(&self, nid: NodeId) -> Option<&Node> {
        self.nodes.get(nid.index()).and_then(Option::as_ref)
    }

    pub fn node_mut(&mut self, nid: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(nid.index()).and_then(Option::as_mut)
    }

    pub fn edge(&self, eid: EdgeId) -> Option<&Edge> {
        self.edges.get(eid.index()).and_then(Option::as_ref)
    }

    pub fn tensor(&self, tid: TensorId) -> Option<&Tensor> {
        self.tensors.get(tid.index()).and_then(Option::as_ref)
    }

    pub fn tensor_mut(&mut self, tid: TensorId) -> Option<&mut Tensor> {
        self.tensors.get_mut(tid.index()).and_then(Option::as_mut)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().flatten()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().flatten()
    }

    pub fn tensors(&self) -> impl Iterator<Item = &Tensor> {
        self.tensors.iter().flatten()
    }

    pub fn tensors_mut(&mut self) -> impl Iterator<Item = &mut Tensor> {
        self.tensors.iter_mut().flatten()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes().map(Node::id).collect()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes().count()
    }

    pub fn num_edges(&self) -> usize {
        self.edges().count()
    }

    pub fn num_tensors(&self) -> usize {
        self.tensors().count()
    }

    /// Ids of the live nodes of `node_type`, in insertion order.
    pub fn nodes_of(&self, node_type: NodeType) -> Vec<NodeId> {
        self.tagged.get(&node_type).cloned().unwrap_or_default()
    }

    /// Tensor carried into `nid`'s input `idx`, if connected.
    pub fn node_input_tensor(&self, nid: NodeId, idx: usize) -> Option<TensorId> {
        let eid = self.node(nid)?.input_edge(idx)?;
        Some(self.edge(eid)?.tensor)
    }

    pub fn node_output_tensor(&self, nid: NodeId, idx: usize) -> Option<TensorId> {
        self.node(nid)?.output_id(idx)
    }

    /// Descriptors of every input slot; `None` where unconnected.
    pub fn input_descriptors(&self, nid: NodeId) -> Vec<Option<&TensorDescriptor>> {
        let Some(node) = self.node(nid) else {
            return Vec::new();
        };
        (0..node.num_inputs())
            .map(|idx| {
                self.node_input_tensor(nid, idx)
                    .and_then(|tid| self.tensor(tid))
                    .map(Tensor::desc)
            })
            .collect()
    }

    pub fn output_descriptors(&self, nid: NodeId) -> Vec<Option<&TensorDescriptor>> {
        let Some(node) = self.node(nid) else {
            return Vec::new();
        };
        node.outputs
            .iter()
            .map(|tid| tid.and_then(|tid| self.tensor(tid)).map(Tensor::desc))
            .collect()
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Graph '{}' ({}): {} nodes, {} edges, {} tensors",
            self.name,
            self.id,
            self.num_nodes(),
            self.num_edges(),
            self.num_tensors()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActivationFunction, ActivationInfo};
    use tensor_core::DType;

    fn relu() -> NodeKind {
        NodeKind::Activation(ActivationInfo::new(ActivationFunction::Relu))
    }

    /// input -> relu -> output
    fn chain() -> (Graph, NodeId, NodeId, NodeId) {
        let mut g = Graph::new("chain");
        let desc = TensorDescriptor::new([1, 2, 4, 4], DType::F32);
        let input = g.add_node(NodeParams::new("in"), NodeKind::Input { desc });
        let act = g.add_node(NodeParams::new("act"), relu());
        let output = g.add_node(NodeParams::new("out"), NodeKind::Output);
        g.add_connection(input, 0, act, 0).unwrap();
        g.add_connection(act, 0, output, 0).unwrap();
        (g, input, act, output)
    }

    #[test]
    fn test_descriptors_forward_on_connect() {
        let (g, _, act, _) = chain();
        let out = g.node_output_tensor(act, 0).unwrap();
        assert_eq!(g.tensor(out).unwrap().desc().shape.dims(), &[1, 2, 4, 4]);
        assert_eq!(g.num_edges(), 2);
        assert_eq!(g.nodes_of(NodeType::Activation), vec![act]);
    }

    #[test]
    fn test_invalid_connections() {
        let (mut g, input, act, output) = chain();
        assert!(matches!(
            g.add_connection(input, 1, act, 0),
            Err(GraphError::InvalidConnection(_))
        ));
        assert!(matches!(
            g.add_connection(input, 0, output, 3),
            Err(GraphError::InvalidConnection(_))
        ));
        assert!(g.add_connection(act, 0, act, 0).is_err());
    }

    #[test]
    fn test_reconnecting_slot_replaces_edge() {
        let (mut g, input, _act, output) = chain();
        let old = g.node(output).unwrap().input_edge(0).unwrap();
        let new = g.add_connection(input, 0, output, 0).unwrap();
        assert!(g.edge(old).is_none());
        assert_eq!(g.node(output).unwrap().input_edge(0), Some(new));
        assert_eq!(g.num_edges(), 2);
    }

    #[test]
    fn test_remove_node_keeps_ids_stable() {
        let (mut g, input, act, output) = chain();
        let act_out = g.node_output_tensor(act, 0).unwrap();
        assert!(g.remove_node(act));
        assert!(!g.remove_node(act));

        assert!(g.node(act).is_none());
        assert_eq!(g.node(output).unwrap().id(), output);
        assert_eq!(g.num_edges(), 0);
        assert!(g.tensor(act_out).is_none());
        assert!(g.node(input).unwrap().output_edges().is_empty());
        assert!(g.nodes_of(NodeType::Activation).is_empty());
    }

    #[test]
    fn test_set_output_tensor_rebinds_edges() {
        let (mut g, input, act, output) = chain();
        let input_tensor = g.node_output_tensor(input, 0).unwrap();
        let old = g.node_output_tensor(act, 0).unwrap();

        assert!(g.set_output_tensor(act, 0, input_tensor));
        assert_eq!(g.node_input_tensor(output, 0), Some(input_tensor));
        assert_eq!(g.tensor(input_tensor).unwrap().bound_edges().len(), 2);
        assert!(g.tensor(old).is_none());
    }

    #[test]
    fn test_force_target() {
        let (mut g, input, _, _) = chain();
        g.force_target(Target::Neon);
        assert!(g.nodes().all(|n| n.assigned_target() == Target::Neon));
        assert!(g.tensors().all(|t| t.desc().target == Target::Neon));
        match g.node(input).unwrap().kind() {
            NodeKind::Input { desc } => assert_eq!(desc.target, Target::Neon),
            other => panic!("unexpected kind {other:?}"),
        }
    }
}
