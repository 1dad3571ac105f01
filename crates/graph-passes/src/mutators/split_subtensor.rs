// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Split by aliasing: each output of a contiguous split becomes a view of
//! the split's input, and the split produces no task.

use crate::mutators::{require_handle, GraphMutator, MutationType};
use crate::PassError;
use graph_ir::{BackendRegistry, Graph, NodeId, NodeKind, NodeType, TensorId};
use tensor_core::TensorDescriptor;

/// Turns the outputs of contiguous splits into views of the input.
#[derive(Debug, Clone, Default)]
pub struct SplitSubTensorMutator;

impl SplitSubTensorMutator {
    pub fn new() -> Self {
        Self
    }
}

impl GraphMutator for SplitSubTensorMutator {
    fn name(&self) -> &str {
        "SplitSubTensorMutator"
    }

    fn mutation_type(&self) -> MutationType {
        MutationType::Backend
    }

    fn mutate(&self, graph: &mut Graph, backends: &BackendRegistry) -> Result<(), PassError> {
        for nid in graph.nodes_of(NodeType::Split) {
            let Some(NodeKind::Split {
                axis, enabled: true, ..
            }) = graph.node(nid).map(|n| n.kind().clone())
            else {
                continue;
            };
            let Some((input, slices)) = plan_slices(graph, nid, axis) else {
                continue;
            };
            let target = graph.tensor(input).map(|t| t.desc().target).unwrap_or_default();
            if !backends.is_target_supported(target) {
                continue;
            }
            let backend = backends.get_backend(target)?;
            let parent = require_handle(graph, input)?;

            for (tid, desc, byte_offset) in slices {
                let view = backend.create_subtensor(&parent, desc, byte_offset)?;
                if let Some(t) = graph.tensor_mut(tid) {
                    t.set_handle(Some(view));
                }
            }
            if let Some(NodeKind::Split { enabled, .. }) = graph.node_mut(nid).map(|n| n.kind_mut()) {
                *enabled = false;
            }
            tracing::debug!(node = %nid, "split replaced by sub-tensors");
        }
        Ok(())
    }
}

fn plan_slices(graph: &Graph, nid: NodeId, axis: usize) -> Option<(TensorId, Vec<(TensorId, TensorDescriptor, usize)>)> {
    let node = graph.node(nid)?;
    let input = graph.node_input_tensor(nid, 0)?;
    let in_tensor = graph.tensor(input)?;
    in_tensor.handle()?;
    let in_desc = in_tensor.desc();
    if !in_desc.shape.is_contiguous_along(axis) {
        tracing::debug!(node = node.name(), "sub-tensors skipped: slices are not contiguous");
        return None;
    }

    let elem_size = in_desc.data_type.size_bytes();
    let mut slices = Vec::with_capacity(node.num_outputs());
    let mut start = 0;
    for idx in 0..node.num_outputs() {
        let tid = node.output_id(idx)?;
        let tensor = graph.tensor(tid)?;
        if tensor.has_accessor() {
            tracing::debug!(node = node.name(), output = idx, "sub-tensors skipped: output has an accessor");
            return None;
        }
        if tensor.desc().target != in_desc.target || tensor.handle().is_some_and(|h| h.is_subtensor()) {
            return None;
        }
        let byte_offset = in_desc.shape.slice_offset(axis, start).ok()? * elem_size;
        start += tensor.desc().shape.dim(axis)?;
        slices.push((tid, tensor.desc().clone(), byte_offset));
    }
    Some((input, slices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutators::test_util::{create_handles, registry};
    use graph_ir::{DummyAccessor, GraphBuilder, NodeIdxPair, NodeParams};
    use tensor_core::{DType, DataLayout, Target};

    fn split_graph(desc: TensorDescriptor, axis: usize) -> (Graph, NodeId, NodeId) {
        let mut g = Graph::new("split");
        let src = GraphBuilder::add_input_node(&mut g, NodeParams::new("in"), desc, None);
        let split = GraphBuilder::add_split_node(&mut g, NodeParams::new("split"), NodeIdxPair::new(src, 0), 2, axis)
            .unwrap();
        for idx in 0..2 {
            GraphBuilder::add_output_node(
                &mut g,
                NodeParams::new(format!("out{idx}")),
                NodeIdxPair::new(split, idx),
                None,
            )
            .unwrap();
        }
        g.force_target(Target::Neon);
        (g, src, split)
    }

    #[test]
    fn test_contiguous_split_becomes_views() {
        let desc = TensorDescriptor::new([1, 4, 3, 3], DType::F32);
        let (mut g, src, split) = split_graph(desc, 1);
        let backends = registry();
        let _ctx = create_handles(&mut g, &backends);

        let mutator = SplitSubTensorMutator::new();
        mutator.mutate(&mut g, &backends).unwrap();

        assert!(!g.node(split).unwrap().kind().is_enabled());
        let parent = g.tensor(g.node_output_tensor(src, 0).unwrap()).unwrap().handle().cloned().unwrap();
        for (idx, offset) in [(0, 0), (1, 2 * 9 * 4)] {
            let h = g.tensor(g.node_output_tensor(split, idx).unwrap()).unwrap().handle().cloned().unwrap();
            assert!(h.is_subtensor());
            assert_eq!(h.byte_offset(), offset);
            assert_eq!(h.parent_handle().unwrap().id(), parent.id());
        }

        mutator.mutate(&mut g, &backends).unwrap();
        assert!(!g.node(split).unwrap().kind().is_enabled());
    }

    #[test]
    fn test_strided_split_keeps_task() {
        let desc = TensorDescriptor::new([1, 3, 3, 4], DType::F32).with_layout(DataLayout::Nhwc);
        let (mut g, _, split) = split_graph(desc, 3);
        let backends = registry();
        let _ctx = create_handles(&mut g, &backends);

        SplitSubTensorMutator::new().mutate(&mut g, &backends).unwrap();
        assert!(g.node(split).unwrap().kind().is_enabled());
    }

    #[test]
    fn test_output_accessor_blocks_views() {
        let desc = TensorDescriptor::new([4, 8], DType::F32);
        let (mut g, _, split) = split_graph(desc, 0);
        let out = g.node_output_tensor(split, 1).unwrap();
        g.tensor_mut(out).unwrap().set_accessor(Some(Box::new(DummyAccessor::unlimited())));
        let backends = registry();
        let _ctx = create_handles(&mut g, &backends);

        SplitSubTensorMutator::new().mutate(&mut g, &backends).unwrap();
        assert!(g.node(split).unwrap().kind().is_enabled());
    }
}
