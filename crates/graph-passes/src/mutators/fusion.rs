// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Activation fusion.
//!
//! A bounded or plain ReLU that directly follows a convolution or batch
//! normalization is folded into its producer:
//!
//! ```text
//!   conv ──▶ relu ──▶ pool        conv[+relu] ──▶ pool
//! ```

use crate::mutators::{GraphMutator, MutationType};
use crate::PassError;
use graph_ir::algorithms::get_driving_nodes;
use graph_ir::{ActivationFunction, BackendRegistry, Graph, NodeId, NodeKind, NodeType, Tensor};

const FUSABLE: [ActivationFunction; 3] = [
    ActivationFunction::Relu,
    ActivationFunction::BoundedRelu,
    ActivationFunction::LuBoundedRelu,
];

/// Folds activations into the convolution or batch normalization feeding
/// them.
#[derive(Debug, Clone, Default)]
pub struct NodeFusionMutator;

impl NodeFusionMutator {
    pub fn new() -> Self {
        Self
    }
}

impl GraphMutator for NodeFusionMutator {
    fn name(&self) -> &str {
        "NodeFusionMutator"
    }

    fn mutation_type(&self) -> MutationType {
        MutationType::Ir
    }

    fn mutate(&self, graph: &mut Graph, _backends: &BackendRegistry) -> Result<(), PassError> {
        for act in graph.nodes_of(NodeType::Activation) {
            if let Some(producer) = fusable_producer(graph, act) {
                fuse(graph, producer, act)?;
            }
        }
        Ok(())
    }
}

fn fusable_producer(graph: &Graph, act: NodeId) -> Option<NodeId> {
    let node = graph.node(act)?;
    let NodeKind::Activation(info) = node.kind() else {
        return None;
    };
    if !FUSABLE.contains(&info.function) {
        return None;
    }
    let producer = graph.node(graph.edge(node.input_edge(0)?)?.producer())?;
    if !matches!(producer.node_type(), NodeType::Convolution | NodeType::BatchNormalization)
        || producer.kind().fused_activation().is_some()
    {
        return None;
    }
    if producer.output_edges().len() != 1 {
        tracing::debug!(node = producer.name(), "fusion skipped: output has several consumers");
        return None;
    }
    if graph.tensor(producer.output_id(0)?)?.has_accessor() {
        tracing::debug!(node = producer.name(), "fusion skipped: output has an accessor");
        return None;
    }
    if producer.assigned_target() != node.assigned_target() {
        return None;
    }
    Some(producer.id())
}

fn fuse(graph: &mut Graph, producer: NodeId, act: NodeId) -> Result<(), PassError> {
    let Some(NodeKind::Activation(info)) = graph.node(act).map(|n| n.kind().clone()) else {
        return Ok(());
    };
    let accessor = graph
        .node_output_tensor(act, 0)
        .and_then(|tid| graph.tensor_mut(tid))
        .and_then(Tensor::take_accessor);
    let consumers = get_driving_nodes(graph, act);

    if let Some(node) = graph.node_mut(producer) {
        match node.kind_mut() {
            NodeKind::Convolution(conv) => conv.fused_activation = Some(info),
            NodeKind::BatchNormalization {
                fused_activation, ..
            } => *fused_activation = Some(info),
            _ => {}
        }
    }
    graph.remove_node(act);
    for consumer in consumers {
        graph.add_connection(producer, 0, consumer.node, consumer.index)?;
    }
    if accessor.is_some() {
        if let Some(t) = graph.node_output_tensor(producer, 0).and_then(|tid| graph.tensor_mut(tid)) {
            t.set_accessor(accessor);
        }
    }

    tracing::debug!(
        producer = %producer,
        activation = info.function.as_str(),
        "activation fused"
    );
    Ok(())
}
