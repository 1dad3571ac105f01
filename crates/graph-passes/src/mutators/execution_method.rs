// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Falls back to the backend's default convolution method when an
//! explicitly requested one is rejected.

use crate::mutators::{GraphMutator, MutationType};
use crate::PassError;
use graph_ir::{BackendRegistry, ConvolutionInfo, ConvolutionMethod, Graph, NodeKind, NodeType};

/// Resets rejected convolution methods to [`ConvolutionMethod::Default`].
#[derive(Debug, Clone, Default)]
pub struct NodeExecutionMethodMutator;

impl NodeExecutionMethodMutator {
    pub fn new() -> Self {
        Self
    }
}

impl GraphMutator for NodeExecutionMethodMutator {
    fn name(&self) -> &str {
        "NodeExecutionMethodMutator"
    }

    fn mutation_type(&self) -> MutationType {
        MutationType::Backend
    }

    fn mutate(&self, graph: &mut Graph, backends: &BackendRegistry) -> Result<(), PassError> {
        for nid in graph.nodes_of(NodeType::Convolution) {
            let Some(node) = graph.node(nid) else {
                continue;
            };
            let NodeKind::Convolution(info) = *node.kind() else {
                continue;
            };
            if info.method == ConvolutionMethod::Default {
                continue;
            }
            let backend = backends.get_backend(node.assigned_target())?;
            let Err(rejection) = backend.validate_node(graph, nid) else {
                continue;
            };

            let fallback = NodeKind::Convolution(ConvolutionInfo {
                method: ConvolutionMethod::Default,
                ..info
            });
            let inputs = graph.input_descriptors(nid);
            let outputs = graph.output_descriptors(nid);
            if backend.validate_operation(&fallback, &inputs, &outputs).is_err() {
                continue;
            }

            tracing::debug!(
                node = node.name(),
                method = info.method.as_str(),
                reason = %rejection,
                "convolution method falls back to default"
            );
            if let Some(node) = graph.node_mut(nid) {
                *node.kind_mut() = fallback;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutators::test_util::registry;
    use graph_ir::{GraphBuilder, NodeIdxPair, NodeParams, PadStrideInfo};
    use tensor_core::{DType, Target, TensorDescriptor};

    fn conv_graph(method: ConvolutionMethod) -> (Graph, graph_ir::NodeId) {
        let mut g = Graph::new("method");
        let desc = TensorDescriptor::new([1, 2, 5, 5], DType::F32);
        let input = GraphBuilder::add_input_node(&mut g, NodeParams::new("in"), desc, None);
        let conv = GraphBuilder::add_convolution_node(
            &mut g,
            NodeParams::new("conv"),
            NodeIdxPair::new(input, 0),
            (3, 3),
            2,
            PadStrideInfo::new(1, 1, 0, 0),
            1,
            method,
            None,
            None,
        )
        .unwrap();
        g.force_target(Target::Neon);
        (g, conv)
    }

    fn method_of(g: &Graph, nid: graph_ir::NodeId) -> ConvolutionMethod {
        match g.node(nid).unwrap().kind() {
            NodeKind::Convolution(info) => info.method,
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_rejected_method_falls_back() {
        let (mut g, conv) = conv_graph(ConvolutionMethod::Winograd);
        let backends = registry();
        let mutator = NodeExecutionMethodMutator::new();
        mutator.mutate(&mut g, &backends).unwrap();
        assert_eq!(method_of(&g, conv), ConvolutionMethod::Default);

        mutator.mutate(&mut g, &backends).unwrap();
        assert_eq!(method_of(&g, conv), ConvolutionMethod::Default);
    }

    #[test]
    fn test_accepted_method_kept() {
        let (mut g, conv) = conv_graph(ConvolutionMethod::Gemm);
        NodeExecutionMethodMutator::new().mutate(&mut g, &registry()).unwrap();
        assert_eq!(method_of(&g, conv), ConvolutionMethod::Gemm);
    }
}
