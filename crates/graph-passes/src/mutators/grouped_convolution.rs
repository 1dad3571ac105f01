// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Grouped convolution lowering.
//!
//! A convolution with `G > 1` groups that its backend cannot run is
//! rewritten into `G` single-group convolutions:
//!
//! ```text
//!                ┌─▶ conv_g0 ─┐
//!   in ─▶ split ─┤            ├─▶ concat(channel) ─▶ consumers
//!                └─▶ conv_g1 ─┘
//!   weights ─▶ split(ofm) ─▶ conv_g*      bias ─▶ split ─▶ conv_g*
//! ```
//!
//! Every candidate is checked before the first rewrite, so a failure
//! leaves the graph untouched.

use crate::mutators::{GraphMutator, MutationType};
use crate::PassError;
use graph_ir::algorithms::get_driving_nodes;
use graph_ir::{
    BackendRegistry, ConvolutionInfo, ConvolutionMethod, Graph, GraphBuilder, NodeId, NodeIdxPair, NodeKind,
    NodeParams, NodeType, Tensor,
};
use tensor_core::{DataLayoutDimension, Shape, Target};

/// Splits grouped convolutions that their backend rejects.
#[derive(Debug, Clone, Default)]
pub struct GroupedConvolutionMutator;

impl GroupedConvolutionMutator {
    pub fn new() -> Self {
        Self
    }

    fn check(&self, graph: &Graph, backends: &BackendRegistry, nid: NodeId) -> Result<Option<Lowering>, PassError> {
        let Some(node) = graph.node(nid) else {
            return Ok(None);
        };
        let NodeKind::Convolution(info) = node.kind() else {
            return Ok(None);
        };
        if info.num_groups <= 1 {
            return Ok(None);
        }
        let backend = backends.get_backend(node.assigned_target())?;
        if backend.validate_node(graph, nid).is_ok() {
            tracing::debug!(node = node.name(), "grouped convolution supported natively");
            return Ok(None);
        }

        let fail = |detail: String| PassError::RewriteFailed {
            pass: self.name().to_string(),
            node: node.name().to_string(),
            detail,
        };
        let groups = info.num_groups;
        let inputs = graph.input_descriptors(nid);
        let (Some(src), Some(weights)) = (inputs[0], inputs[1]) else {
            return Err(fail("input or weights not connected".into()));
        };
        let bias = inputs.get(2).copied().flatten();

        let channel_idx = src
            .dimension_idx(DataLayoutDimension::Channel)
            .map_err(|e| fail(e.to_string()))?;
        let channels = src.shape.dim(channel_idx).unwrap_or(0);
        if channels % groups != 0 {
            return Err(fail(format!("{channels} input channels do not divide into {groups} groups")));
        }
        let ofm = weights.shape.dim(0).unwrap_or(0);
        if ofm % groups != 0 {
            return Err(fail(format!("{ofm} output feature maps do not divide into {groups} groups")));
        }

        let group_src = src
            .shape
            .with_dim(channel_idx, channels / groups)
            .map(|s| src.clone().with_shape(s))
            .map_err(|e| fail(e.to_string()))?;
        let group_weights = weights
            .shape
            .with_dim(0, ofm / groups)
            .map(|s| weights.clone().with_shape(s))
            .map_err(|e| fail(e.to_string()))?;
        let group_bias = bias.map(|b| b.clone().with_shape(Shape::vector(ofm / groups)));
        let group_info = ConvolutionInfo {
            num_groups: 1,
            ..*info
        };
        let group_kind = NodeKind::Convolution(group_info);
        let group_inputs = [Some(&group_src), Some(&group_weights), group_bias.as_ref()];
        let group_output = group_kind
            .infer_output(0, &group_inputs)
            .ok_or_else(|| fail("cannot infer the output of a single group".into()))?;
        let group_outputs = [Some(&group_output)];
        if let Err(rejection) = backend.validate_operation(&group_kind, &group_inputs, &group_outputs) {
            // An explicit method is left for the execution method pass to reset.
            let default_kind = NodeKind::Convolution(group_info.with_method(ConvolutionMethod::Default));
            if group_info.method == ConvolutionMethod::Default
                || backend.validate_operation(&default_kind, &group_inputs, &group_outputs).is_err()
            {
                return Err(fail(format!("single-group convolution rejected: {rejection}")));
            }
            tracing::debug!(
                node = node.name(),
                method = group_info.method.as_str(),
                "single-group convolution only valid with the default method"
            );
        }

        Ok(Some(Lowering {
            node: nid,
            name: node.name().to_string(),
            target: node.assigned_target(),
            groups,
            channel_idx,
            info: group_info,
        }))
    }
}

impl GraphMutator for GroupedConvolutionMutator {
    fn name(&self) -> &str {
        "GroupedConvolutionMutator"
    }

    fn mutation_type(&self) -> MutationType {
        MutationType::Ir
    }

    fn mutate(&self, graph: &mut Graph, backends: &BackendRegistry) -> Result<(), PassError> {
        let mut lowerings = Vec::new();
        for nid in graph.nodes_of(NodeType::Convolution) {
            match self.check(graph, backends, nid) {
                Ok(Some(lowering)) => lowerings.push(lowering),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "grouped convolution lowering prevented");
                    return Err(e);
                }
            }
        }
        for lowering in lowerings {
            lowering.apply(graph)?;
        }
        Ok(())
    }
}

/// A checked rewrite of one grouped convolution.
#[derive(Debug)]
struct Lowering {
    node: NodeId,
    name: String,
    target: Target,
    groups: usize,
    channel_idx: usize,
    info: ConvolutionInfo,
}

impl Lowering {
    fn params(&self, suffix: &str) -> NodeParams {
        NodeParams::new(format!("{}{suffix}", self.name)).with_target(self.target)
    }

    fn driver(graph: &Graph, nid: NodeId, slot: usize) -> Option<NodeIdxPair> {
        let edge = graph.edge(graph.node(nid)?.input_edge(slot)?)?;
        Some(NodeIdxPair::new(edge.producer(), edge.producer_idx()))
    }

    fn apply(self, graph: &mut Graph) -> Result<(), PassError> {
        let nid = self.node;
        let (Some(input), Some(weights)) = (Self::driver(graph, nid, 0), Self::driver(graph, nid, 1)) else {
            return Ok(());
        };
        let bias = Self::driver(graph, nid, 2);
        let consumers = get_driving_nodes(graph, nid);
        let accessor = graph
            .node_output_tensor(nid, 0)
            .and_then(|tid| graph.tensor_mut(tid))
            .and_then(Tensor::take_accessor);

        let input_split = GraphBuilder::add_split_node(
            graph,
            self.params("_input_split"),
            input,
            self.groups,
            self.channel_idx,
        )?;
        let weights_split = GraphBuilder::add_split_node(graph, self.params("_weights_split"), weights, self.groups, 0)?;
        let bias_split = bias
            .map(|b| GraphBuilder::add_split_node(graph, self.params("_bias_split"), b, self.groups, 0))
            .transpose()?;

        let mut convs = Vec::with_capacity(self.groups);
        for group in 0..self.groups {
            let conv = graph.add_node(self.params(&format!("_g{group}")), NodeKind::Convolution(self.info));
            graph.add_connection(input_split, group, conv, 0)?;
            graph.add_connection(weights_split, group, conv, 1)?;
            if let Some(split) = bias_split {
                graph.add_connection(split, group, conv, 2)?;
            }
            convs.push(NodeIdxPair::new(conv, 0));
        }
        let concat = GraphBuilder::add_concatenate_node(
            graph,
            self.params("_concat"),
            &convs,
            DataLayoutDimension::Channel,
        )?;

        graph.remove_node(nid);
        for consumer in consumers {
            graph.add_connection(concat, 0, consumer.node, consumer.index)?;
        }
        if accessor.is_some() {
            if let Some(t) = graph.node_output_tensor(concat, 0).and_then(|tid| graph.tensor_mut(tid)) {
                t.set_accessor(accessor);
            }
        }

        tracing::debug!(node = %self.name, groups = self.groups, "grouped convolution lowered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutators::test_util::registry;
    use crate::NodeExecutionMethodMutator;
    use graph_ir::{DummyAccessor, PadStrideInfo};
    use reference_backend::ReferenceBackend;
    use tensor_core::{DType, DataLayout, TensorDescriptor};

    fn grouped_graph(desc: TensorDescriptor, groups: usize) -> (Graph, NodeId) {
        grouped_graph_with_method(desc, groups, ConvolutionMethod::Default)
    }

    fn grouped_graph_with_method(desc: TensorDescriptor, groups: usize, method: ConvolutionMethod) -> (Graph, NodeId) {
        let mut g = Graph::new("grouped");
        let input = GraphBuilder::add_input_node(&mut g, NodeParams::new("in"), desc, None);
        let conv = GraphBuilder::add_convolution_node(
            &mut g,
            NodeParams::new("conv"),
            NodeIdxPair::new(input, 0),
            (3, 3),
            4,
            PadStrideInfo::new(1, 1, 1, 1),
            groups,
            method,
            Some(Box::new(DummyAccessor::unlimited())),
            Some(Box::new(DummyAccessor::unlimited())),
        )
        .unwrap();
        GraphBuilder::add_output_node(
            &mut g,
            NodeParams::new("out"),
            NodeIdxPair::new(conv, 0),
            Some(Box::new(DummyAccessor::unlimited())),
        )
        .unwrap();
        g.force_target(Target::Neon);
        (g, conv)
    }

    #[test]
    fn test_grouped_convolution_lowered() {
        let desc = TensorDescriptor::new([1, 8, 8, 4], DType::F32).with_layout(DataLayout::Nhwc);
        let (mut g, conv) = grouped_graph(desc, 2);
        let out_shape = g.tensor(g.node_output_tensor(conv, 0).unwrap()).unwrap().desc().shape.clone();

        GroupedConvolutionMutator::new().mutate(&mut g, &registry()).unwrap();

        assert!(g.node(conv).is_none());
        let convs = g.nodes_of(NodeType::Convolution);
        assert_eq!(convs.len(), 2);
        for c in &convs {
            match g.node(*c).unwrap().kind() {
                NodeKind::Convolution(info) => assert_eq!(info.num_groups, 1),
                other => panic!("unexpected kind {other:?}"),
            }
            assert_eq!(g.node(*c).unwrap().assigned_target(), Target::Neon);
        }
        assert_eq!(g.nodes_of(NodeType::Split).len(), 3);

        let concats = g.nodes_of(NodeType::Concatenate);
        assert_eq!(concats.len(), 1);
        let concat_out = g.tensor(g.node_output_tensor(concats[0], 0).unwrap()).unwrap();
        assert_eq!(concat_out.desc().shape, out_shape);
        assert!(concat_out.has_accessor());

        let out = g.nodes_of(NodeType::Output)[0];
        assert_eq!(g.node_input_tensor(out, 0), g.node_output_tensor(concats[0], 0));
    }

    #[test]
    fn test_indivisible_channels_leave_graph_untouched() {
        let desc = TensorDescriptor::new([1, 3, 8, 8], DType::F32).with_layout(DataLayout::Nchw);
        let (mut g, conv) = grouped_graph(desc, 2);
        let (nodes, edges) = (g.num_nodes(), g.num_edges());

        let err = GroupedConvolutionMutator::new().mutate(&mut g, &registry()).unwrap_err();
        assert!(matches!(err, PassError::RewriteFailed { ref node, .. } if node == "conv"));
        assert!(g.node(conv).is_some());
        assert_eq!((g.num_nodes(), g.num_edges()), (nodes, edges));
    }

    #[test]
    fn test_rejected_method_still_lowers_and_falls_back() {
        let desc = TensorDescriptor::new([1, 8, 8, 4], DType::F32).with_layout(DataLayout::Nhwc);
        let (mut g, conv) = grouped_graph_with_method(desc, 2, ConvolutionMethod::Winograd);
        let backends = registry();

        GroupedConvolutionMutator::new().mutate(&mut g, &backends).unwrap();
        assert!(g.node(conv).is_none());
        let convs = g.nodes_of(NodeType::Convolution);
        assert_eq!(convs.len(), 2);

        NodeExecutionMethodMutator::new().mutate(&mut g, &backends).unwrap();
        for c in &convs {
            assert!(matches!(
                g.node(*c).unwrap().kind(),
                NodeKind::Convolution(info) if info.method == ConvolutionMethod::Default && info.num_groups == 1
            ));
            assert!(backends.get_backend(Target::Neon).unwrap().validate_node(&g, *c).is_ok());
        }
    }

    #[test]
    fn test_native_grouped_backend_skips_lowering() {
        let desc = TensorDescriptor::new([1, 8, 8, 4], DType::F32).with_layout(DataLayout::Nhwc);
        let (mut g, conv) = grouped_graph(desc, 2);
        let mut backends = BackendRegistry::new();
        backends.add_backend(Target::Neon, ReferenceBackend::new(Target::Neon).with_grouped_convolution(true));

        GroupedConvolutionMutator::new().mutate(&mut g, &backends).unwrap();
        assert!(g.node(conv).is_some());
        assert!(g.nodes_of(NodeType::Split).is_empty());
    }

    #[test]
    fn test_lowering_is_idempotent() {
        let desc = TensorDescriptor::new([1, 8, 8, 4], DType::F32).with_layout(DataLayout::Nhwc);
        let (mut g, _) = grouped_graph(desc, 2);
        let backends = registry();
        let mutator = GroupedConvolutionMutator::new();
        mutator.mutate(&mut g, &backends).unwrap();
        let (nodes, edges) = (g.num_nodes(), g.num_edges());
        mutator.mutate(&mut g, &backends).unwrap();
        assert_eq!((g.num_nodes(), g.num_edges()), (nodes, edges));
    }
}
