// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Concatenation by aliasing.
//!
//! When each input occupies one contiguous slice of the concatenated
//! output, producers can write straight into that slice:
//!
//! ```text
//!   output buffer  [ in0 ........ | in1 ........ | in2 ........ ]
//!                    ▲ view @0      ▲ view @|in0|  ▲ view @|in0|+|in1|
//! ```
//!
//! The concatenation is disabled and produces no task. Nodes are visited
//! in reverse topological order so an inner concatenation becomes a view
//! of the outer one before its own inputs are rebound; views of views
//! resolve to the outermost buffer.

use crate::mutators::{require_handle, GraphMutator, MutationType};
use crate::PassError;
use graph_ir::algorithms::dfs;
use graph_ir::{BackendRegistry, Graph, NodeId, NodeKind, NodeType, TensorId};
use std::collections::BTreeSet;
use tensor_core::{DataLayoutDimension, TensorDescriptor};

/// Turns the inputs of contiguous concatenations into views of the
/// output.
#[derive(Debug, Clone, Default)]
pub struct ConcatSubTensorMutator;

impl ConcatSubTensorMutator {
    pub fn new() -> Self {
        Self
    }
}

impl GraphMutator for ConcatSubTensorMutator {
    fn name(&self) -> &str {
        "ConcatSubTensorMutator"
    }

    fn mutation_type(&self) -> MutationType {
        MutationType::Backend
    }

    fn mutate(&self, graph: &mut Graph, backends: &BackendRegistry) -> Result<(), PassError> {
        for nid in dfs(graph)?.into_iter().rev() {
            let Some(NodeKind::Concatenate {
                axis, enabled: true, ..
            }) = graph.node(nid).map(|n| n.kind().clone())
            else {
                continue;
            };
            let Some((output, slices)) = plan_slices(graph, nid, axis) else {
                continue;
            };
            let target = graph.tensor(output).map(|t| t.desc().target).unwrap_or_default();
            if !backends.is_target_supported(target) {
                continue;
            }
            let backend = backends.get_backend(target)?;
            let parent = require_handle(graph, output)?;

            for (tid, desc, byte_offset) in slices {
                let view = backend.create_subtensor(&parent, desc, byte_offset)?;
                if let Some(t) = graph.tensor_mut(tid) {
                    t.set_handle(Some(view));
                }
            }
            if let Some(NodeKind::Concatenate { enabled, .. }) = graph.node_mut(nid).map(|n| n.kind_mut()) {
                *enabled = false;
            }
            tracing::debug!(node = %nid, "concatenation replaced by sub-tensors");
        }
        Ok(())
    }
}

/// The output tensor and, per input, the tensor, its descriptor and its
/// byte offset in the output. `None` if the inputs cannot alias it.
fn plan_slices(
    graph: &Graph,
    nid: NodeId,
    axis: DataLayoutDimension,
) -> Option<(TensorId, Vec<(TensorId, TensorDescriptor, usize)>)> {
    let node = graph.node(nid)?;
    let output = node.output_id(0)?;
    let out_tensor = graph.tensor(output)?;
    out_tensor.handle()?;
    let out_desc = out_tensor.desc();
    let axis_idx = out_desc.dimension_idx(axis).ok()?;
    if !out_desc.shape.is_contiguous_along(axis_idx) {
        tracing::debug!(node = node.name(), "sub-tensors skipped: slices are not contiguous");
        return None;
    }

    let elem_size = out_desc.data_type.size_bytes();
    let mut seen = BTreeSet::new();
    let mut slices = Vec::with_capacity(node.num_inputs());
    let mut start = 0;
    for slot in 0..node.num_inputs() {
        let edge = graph.edge(node.input_edge(slot)?)?;
        let tid = edge.tensor();
        let tensor = graph.tensor(tid)?;
        let producer = graph.node(edge.producer())?;
        let desc = tensor.desc();

        let blocked = if matches!(producer.node_type(), NodeType::Input | NodeType::Const) {
            Some("input is a graph input or constant")
        } else if tensor.has_accessor() {
            Some("input has an accessor")
        } else if tensor.handle().map_or(true, |h| h.is_subtensor()) {
            Some("input is already a view")
        } else if desc.data_type != out_desc.data_type
            || desc.quant_info != out_desc.quant_info
            || desc.target != out_desc.target
        {
            Some("input type differs from output")
        } else if !seen.insert(tid) {
            Some("input tensor appears twice")
        } else {
            None
        };
        if let Some(reason) = blocked {
            tracing::debug!(node = node.name(), slot, reason, "sub-tensors skipped");
            return None;
        }

        let byte_offset = out_desc.shape.slice_offset(axis_idx, start).ok()? * elem_size;
        start += desc.shape.dim(axis_idx)?;
        slices.push((tid, desc.clone(), byte_offset));
    }
    Some((output, slices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutators::test_util::{create_handles, registry};
    use graph_ir::{
        ActivationFunction, ActivationInfo, DummyAccessor, GraphBuilder, NodeIdxPair, NodeParams, TensorHandle,
    };
    use std::rc::Rc;
    use tensor_core::{DType, Target};

    fn relu(g: &mut Graph, name: &str, input: NodeId) -> NodeId {
        GraphBuilder::add_activation_node(
            g,
            NodeParams::new(name),
            NodeIdxPair::new(input, 0),
            ActivationInfo::new(ActivationFunction::Relu),
        )
        .unwrap()
    }

    fn handle_of(g: &Graph, nid: NodeId) -> Rc<dyn TensorHandle> {
        g.tensor(g.node_output_tensor(nid, 0).unwrap())
            .unwrap()
            .handle()
            .cloned()
            .unwrap()
    }

    fn concat(g: &mut Graph, name: &str, inputs: &[NodeId]) -> NodeId {
        let pairs: Vec<NodeIdxPair> = inputs.iter().map(|n| NodeIdxPair::new(*n, 0)).collect();
        GraphBuilder::add_concatenate_node(g, NodeParams::new(name), &pairs, DataLayoutDimension::Channel).unwrap()
    }

    fn input(g: &mut Graph) -> NodeId {
        let desc = TensorDescriptor::new([1, 2, 4, 4], DType::F32);
        GraphBuilder::add_input_node(g, NodeParams::new("in"), desc, Some(Box::new(DummyAccessor::unlimited())))
    }

    #[test]
    fn test_concat_inputs_become_views() {
        let mut g = Graph::new("concat");
        let src = input(&mut g);
        let a = relu(&mut g, "a", src);
        let b = relu(&mut g, "b", src);
        let cat = concat(&mut g, "cat", &[a, b]);
        GraphBuilder::add_output_node(&mut g, NodeParams::new("out"), NodeIdxPair::new(cat, 0), None).unwrap();
        g.force_target(Target::Neon);
        let backends = registry();
        let _ctx = create_handles(&mut g, &backends);

        ConcatSubTensorMutator::new().mutate(&mut g, &backends).unwrap();

        assert!(!g.node(cat).unwrap().kind().is_enabled());
        let parent = handle_of(&g, cat);
        let (ha, hb) = (handle_of(&g, a), handle_of(&g, b));
        assert!(ha.is_subtensor() && hb.is_subtensor());
        assert_eq!(ha.byte_offset(), 0);
        assert_eq!(hb.byte_offset(), 2 * 4 * 4 * 4);
        assert_eq!(ha.parent_handle().unwrap().id(), parent.id());
    }

    #[test]
    fn test_graph_input_blocks_views() {
        let mut g = Graph::new("concat_input");
        let src = input(&mut g);
        let a = relu(&mut g, "a", src);
        let cat = concat(&mut g, "cat", &[src, a]);
        g.force_target(Target::Neon);
        let backends = registry();
        let _ctx = create_handles(&mut g, &backends);

        ConcatSubTensorMutator::new().mutate(&mut g, &backends).unwrap();
        assert!(g.node(cat).unwrap().kind().is_enabled());
        assert!(!handle_of(&g, a).is_subtensor());
    }

    #[test]
    fn test_nested_concat_resolves_to_outer_buffer() {
        let mut g = Graph::new("nested");
        let src = input(&mut g);
        let a = relu(&mut g, "a", src);
        let b = relu(&mut g, "b", src);
        let c = relu(&mut g, "c", src);
        let inner = concat(&mut g, "inner", &[a, b]);
        let outer = concat(&mut g, "outer", &[c, inner]);
        g.force_target(Target::Neon);
        let backends = registry();
        let _ctx = create_handles(&mut g, &backends);

        let mutator = ConcatSubTensorMutator::new();
        mutator.mutate(&mut g, &backends).unwrap();

        let root = handle_of(&g, outer);
        for (nid, offset) in [(c, 0), (inner, 128), (a, 128), (b, 256)] {
            let h = handle_of(&g, nid);
            assert_eq!(h.parent_handle().unwrap().id(), root.id(), "{nid}");
            assert_eq!(h.byte_offset(), offset, "{nid}");
        }
        assert!(!g.node(inner).unwrap().kind().is_enabled());

        let handle_ids: Vec<_> = [a, b, c].iter().map(|n| handle_of(&g, *n).id()).collect();
        mutator.mutate(&mut g, &backends).unwrap();
        let again: Vec<_> = [a, b, c].iter().map(|n| handle_of(&g, *n).id()).collect();
        assert_eq!(handle_ids, again);
    }
}
