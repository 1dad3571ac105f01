// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! In-place execution of element-preserving operations.
//!
//! An activation or batch normalization whose input feeds nothing else
//! writes its result over that input. The node's output tensor is
//! replaced by its input tensor, and the output accessor (if any) moves
//! with it.

use crate::mutators::{GraphMutator, MutationType};
use crate::PassError;
use graph_ir::{BackendRegistry, Graph, NodeId, NodeType, Tensor};

/// Rebinds activations and batch normalizations onto their input tensor.
#[derive(Debug, Clone, Default)]
pub struct InPlaceOperationMutator;

impl InPlaceOperationMutator {
    pub fn new() -> Self {
        Self
    }
}

impl GraphMutator for InPlaceOperationMutator {
    fn name(&self) -> &str {
        "InPlaceOperationMutator"
    }

    fn mutation_type(&self) -> MutationType {
        MutationType::Backend
    }

    fn mutate(&self, graph: &mut Graph, _backends: &BackendRegistry) -> Result<(), PassError> {
        let candidates: Vec<NodeId> = graph
            .nodes_of(NodeType::Activation)
            .into_iter()
            .chain(graph.nodes_of(NodeType::BatchNormalization))
            .collect();

        for nid in candidates {
            let Some(input) = in_place_input(graph, nid) else {
                continue;
            };
            let Some(output) = graph.node_output_tensor(nid, 0) else {
                continue;
            };
            let accessor = graph.tensor_mut(output).and_then(Tensor::take_accessor);
            graph.set_output_tensor(nid, 0, input);
            if accessor.is_some() {
                if let Some(t) = graph.tensor_mut(input) {
                    t.set_accessor(accessor);
                }
            }
            tracing::debug!(node = %nid, tensor = %input, "operation runs in place");
        }
        Ok(())
    }
}

/// The input tensor `nid` may overwrite, if any.
fn in_place_input(graph: &Graph, nid: NodeId) -> Option<graph_ir::TensorId> {
    let node = graph.node(nid)?;
    let edge = graph.edge(node.input_edge(0)?)?;
    let input = edge.tensor();
    let output = node.output_id(0)?;
    if input == output {
        return None;
    }

    let producer = graph.node(edge.producer())?;
    // Inputs and constants are refilled by accessors or not at all.
    if matches!(producer.node_type(), NodeType::Input | NodeType::Const) {
        return None;
    }
    if producer.output_edges().len() != 1 {
        return None;
    }

    let (input_tensor, output_tensor) = (graph.tensor(input)?, graph.tensor(output)?);
    if input_tensor.has_accessor() {
        tracing::debug!(node = node.name(), "in-place prevented: input has an accessor");
        return None;
    }
    if input_tensor.desc().quant_info != output_tensor.desc().quant_info {
        tracing::debug!(node = node.name(), "in-place prevented: quantization differs");
        return None;
    }
    Some(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutators::test_util::{create_handles, registry};
    use graph_ir::{
        ActivationFunction, ActivationInfo, DummyAccessor, GraphBuilder, NodeIdxPair, NodeParams, PoolingInfo,
        PoolingType,
    };
    use tensor_core::{DType, Target, TensorDescriptor};

    fn pool_relu_graph(tap_pool_output: bool) -> (Graph, NodeId, NodeId) {
        let mut g = Graph::new("in_place");
        let desc = TensorDescriptor::new([1, 2, 4, 4], DType::F32);
        let input = GraphBuilder::add_input_node(&mut g, NodeParams::new("in"), desc, None);
        let pool = GraphBuilder::add_pooling_node(
            &mut g,
            NodeParams::new("pool"),
            NodeIdxPair::new(input, 0),
            PoolingInfo::global(PoolingType::Avg),
        )
        .unwrap();
        let relu = GraphBuilder::add_activation_node(
            &mut g,
            NodeParams::new("relu"),
            NodeIdxPair::new(pool, 0),
            ActivationInfo::new(ActivationFunction::Relu),
        )
        .unwrap();
        GraphBuilder::add_output_node(
            &mut g,
            NodeParams::new("out"),
            NodeIdxPair::new(relu, 0),
            Some(Box::new(DummyAccessor::unlimited())),
        )
        .unwrap();
        if tap_pool_output {
            GraphBuilder::add_output_node(&mut g, NodeParams::new("tap"), NodeIdxPair::new(pool, 0), None).unwrap();
        }
        g.force_target(Target::Neon);
        (g, pool, relu)
    }

    #[test]
    fn test_activation_rebound_to_input() {
        let (mut g, pool, relu) = pool_relu_graph(false);
        let backends = registry();
        let _ctx = create_handles(&mut g, &backends);
        let tensors_before = g.num_tensors();

        InPlaceOperationMutator::new().mutate(&mut g, &backends).unwrap();

        let shared = g.node_output_tensor(pool, 0).unwrap();
        assert_eq!(g.node_output_tensor(relu, 0), Some(shared));
        assert_eq!(g.num_tensors(), tensors_before - 1);
        assert!(g.tensor(shared).unwrap().has_accessor());
        let out = g.nodes_of(NodeType::Output)[0];
        assert_eq!(g.node_input_tensor(out, 0), Some(shared));
    }

    #[test]
    fn test_shared_input_not_overwritten() {
        let (mut g, pool, relu) = pool_relu_graph(true);
        let backends = registry();
        let _ctx = create_handles(&mut g, &backends);

        InPlaceOperationMutator::new().mutate(&mut g, &backends).unwrap();
        assert_ne!(g.node_output_tensor(relu, 0), g.node_output_tensor(pool, 0));
    }

    #[test]
    fn test_in_place_is_idempotent() {
        let (mut g, _, relu) = pool_relu_graph(false);
        let backends = registry();
        let _ctx = create_handles(&mut g, &backends);
        let mutator = InPlaceOperationMutator::new();
        mutator.mutate(&mut g, &backends).unwrap();
        let bound = g.node_output_tensor(relu, 0);
        mutator.mutate(&mut g, &backends).unwrap();
        assert_eq!(g.node_output_tensor(relu, 0), bound);
    }
}
