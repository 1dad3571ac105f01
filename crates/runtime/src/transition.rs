// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Cross-layer memory management of transition tensors.
//!
//! Transition tensors are the intermediates that flow between tasks; the
//! graph's inputs, outputs and constants are not among them. Walking the
//! tasks in execution order, each transition handle starts its lifetime
//! in its target's cross group when a task first touches it and ends it
//! once the last task that reads it has run:
//!
//! ```text
//!   task:     conv1      relu1      conv2      relu2
//!   t1        ├─start────┤end
//!   t2                   ├─start────┤end
//!   t3                              ├─start────┤end
//!             blob A: t1, t3        blob B: t2
//! ```
//!
//! Handles whose lifetimes never overlap share a blob, so the pool holds
//! far less than the sum of all intermediates. The groups stay open for
//! the whole walk and are finalized once it ends, so a handle starting
//! after every earlier one has ended still reuses their blobs.

use crate::helpers::const_tensors;
use graph_ir::{root_handle, ExecutionWorkload, Graph, GraphContext, GraphError, HandleId, TensorHandle, TensorId};
use memory_manager::MemoryGroup;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use tensor_core::Target;

/// Root handles a task reads and writes, without duplicates.
struct TaskHandles {
    inputs: Vec<Rc<dyn TensorHandle>>,
    outputs: Vec<Rc<dyn TensorHandle>>,
}

/// Tracks which handles are in flight during the walk.
#[derive(Default)]
struct LifetimeWalk {
    in_flight: BTreeMap<HandleId, Rc<dyn TensorHandle>>,
    ended: BTreeSet<HandleId>,
}

impl LifetimeWalk {
    fn start(&mut self, handle: &Rc<dyn TensorHandle>, group: Option<&MemoryGroup>) -> Result<(), GraphError> {
        let id = handle.id();
        if self.in_flight.contains_key(&id) || self.ended.contains(&id) {
            return Ok(());
        }
        if let Some(group) = group {
            handle.manage(group)?;
        }
        self.in_flight.insert(id, Rc::clone(handle));
        Ok(())
    }

    fn end(&mut self, id: HandleId) -> Result<(), GraphError> {
        if let Some(handle) = self.in_flight.remove(&id) {
            handle.allocate()?;
            self.ended.insert(id);
        }
        Ok(())
    }

    fn end_remaining(&mut self) -> Result<(), GraphError> {
        let ids: Vec<HandleId> = self.in_flight.keys().copied().collect();
        for id in ids {
            self.end(id)?;
        }
        Ok(())
    }
}

/// Registers every transition tensor of `workload` with the cross group of
/// its target and records those groups on the workload.
///
/// Targets whose context has no cross group get their transition tensors
/// allocated directly.
pub fn configure_transition_manager(
    graph: &Graph,
    ctx: &GraphContext,
    workload: &mut ExecutionWorkload,
) -> Result<(), GraphError> {
    let excluded: BTreeSet<HandleId> = const_tensors(graph)
        .into_iter()
        .filter_map(|tid| graph.tensor(tid).and_then(|t| t.handle()).map(|h| root_handle(h).id()))
        .collect();

    let mut tasks = Vec::with_capacity(workload.num_tasks());
    for task in &workload.tasks {
        let nid = task.node();
        let node = graph
            .node(nid)
            .ok_or_else(|| GraphError::InvalidGraph(format!("task node {nid} does not exist")))?;
        let inputs = (0..node.num_inputs()).filter_map(|idx| graph.node_input_tensor(nid, idx));
        let outputs = node.outputs().iter().flatten().copied();
        tasks.push(TaskHandles {
            inputs: transition_handles(graph, inputs, &excluded)?,
            outputs: transition_handles(graph, outputs, &excluded)?,
        });
    }

    let mut groups: BTreeMap<Target, Option<MemoryGroup>> = BTreeMap::new();
    for handle in tasks.iter().flat_map(|t| t.inputs.iter().chain(&t.outputs)) {
        let device = handle.target();
        if groups.contains_key(&device) {
            continue;
        }
        let mm_ctx = ctx
            .memory_management_ctx(device)
            .ok_or_else(|| GraphError::Resource(format!("no memory context for target {device}")))?;
        if mm_ctx.allocator.is_none() {
            return Err(GraphError::Resource(format!("memory context of {device} has no allocator")));
        }
        groups.insert(device, mm_ctx.cross_group.clone());
    }

    let mut consumers: BTreeMap<HandleId, usize> = BTreeMap::new();
    for handle in tasks.iter().flat_map(|t| &t.inputs) {
        *consumers.entry(handle.id()).or_default() += 1;
    }

    let mut walk = LifetimeWalk::default();
    for task in &tasks {
        for handle in task.inputs.iter().chain(&task.outputs) {
            let group = groups.get(&handle.target()).and_then(Option::as_ref);
            walk.start(handle, group)?;
        }
        for handle in &task.inputs {
            if let Some(count) = consumers.get_mut(&handle.id()) {
                *count -= 1;
                if *count == 0 {
                    walk.end(handle.id())?;
                }
            }
        }
        for handle in &task.outputs {
            if consumers.get(&handle.id()).copied().unwrap_or(0) == 0 {
                walk.end(handle.id())?;
            }
        }
    }
    walk.end_remaining()?;

    let groups: Vec<MemoryGroup> = groups.into_values().flatten().collect();
    for group in &groups {
        group.finalize()?;
    }

    let managed = walk.ended.len();
    workload.transition_groups.extend(groups);
    tracing::debug!(
        graph = %graph.name(),
        transition_tensors = managed,
        groups = workload.transition_groups.len(),
        "cross-layer memory configured"
    );
    Ok(())
}

/// Deduplicated root handles of `tensors`, skipping excluded, unused and
/// already allocated ones.
fn transition_handles(
    graph: &Graph,
    tensors: impl Iterator<Item = TensorId>,
    excluded: &BTreeSet<HandleId>,
) -> Result<Vec<Rc<dyn TensorHandle>>, GraphError> {
    let mut seen = BTreeSet::new();
    let mut handles = Vec::new();
    for tid in tensors {
        let handle = graph
            .tensor(tid)
            .and_then(|t| t.handle())
            .ok_or_else(|| GraphError::Resource(format!("tensor {tid} has no handle")))?;
        let root = root_handle(handle);
        let id = root.id();
        if excluded.contains(&id) || !root.is_used() || root.is_allocated() || !seen.insert(id) {
            continue;
        }
        handles.push(root);
    }
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::{allocate_const_tensors, configure_all_nodes, configure_all_tensors};
    use graph_ir::{
        ActivationFunction, ActivationInfo, BackendRegistry, GraphBuilder, GraphConfig, NodeId, NodeIdxPair,
        NodeParams,
    };
    use reference_backend::ReferenceBackend;
    use tensor_core::{DType, TensorDescriptor};

    /// Configures `g` up to the workload, with constants allocated.
    fn configure(mut g: Graph, config: GraphConfig) -> (Graph, GraphContext, ExecutionWorkload) {
        g.force_target(Target::Neon);
        let mut backends = BackendRegistry::new();
        backends.add_backend(Target::Neon, ReferenceBackend::new(Target::Neon));
        let mut ctx = GraphContext::new(config);
        backends.get_backend(Target::Neon).unwrap().setup_backend_context(&mut ctx).unwrap();
        configure_all_tensors(&mut g, &backends, &ctx).unwrap();
        let order = graph_ir::algorithms::dfs(&g).unwrap();
        let workload = configure_all_nodes(&g, &backends, &ctx, &order).unwrap();
        allocate_const_tensors(&g).unwrap();
        (g, ctx, workload)
    }

    fn relu(g: &mut Graph, name: &str, input: NodeId) -> NodeId {
        GraphBuilder::add_activation_node(
            g,
            NodeParams::new(name),
            NodeIdxPair::new(input, 0),
            ActivationInfo::new(ActivationFunction::Relu),
        )
        .unwrap()
    }

    /// in → relu × `depth` → out, configured up to the workload.
    fn relu_chain(depth: usize, config: GraphConfig) -> (Graph, GraphContext, ExecutionWorkload) {
        let mut g = Graph::new("relus");
        let desc = TensorDescriptor::new([1, 2, 2, 2], DType::F32);
        let mut tail = GraphBuilder::add_input_node(&mut g, NodeParams::new("in"), desc, None);
        for i in 0..depth {
            tail = relu(&mut g, &format!("relu{i}"), tail);
        }
        GraphBuilder::add_output_node(&mut g, NodeParams::new("out"), NodeIdxPair::new(tail, 0), None).unwrap();
        configure(g, config)
    }

    #[test]
    fn test_disjoint_lifetimes_share_blobs() {
        let (g, mut ctx, mut workload) = relu_chain(4, GraphConfig::default());
        configure_transition_manager(&g, &ctx, &mut workload).unwrap();
        assert_eq!(workload.transition_groups.len(), 1);

        let cross = ctx.memory_management_ctx(Target::Neon).unwrap().cross_mm.clone().unwrap();
        // Three 32-byte intermediates, at most two alive at once.
        assert_eq!(cross.pool_size_bytes(), 64);

        ctx.finalize().unwrap();
        let scope = crate::TransitionScope::acquire(&workload).unwrap();
        let intermediate = g.node_output_tensor(workload.tasks[0].node(), 0).unwrap();
        assert!(g.tensor(intermediate).unwrap().handle().unwrap().is_allocated());
        drop(scope);
        assert!(!g.tensor(intermediate).unwrap().handle().unwrap().is_allocated());
    }

    #[test]
    fn test_branches_run_back_to_back_share_blob() {
        // in ─► a1 ─► a2 ─► out_a
        //  └──► b1 ─► b2 ─► out_b
        // One branch's intermediate ends before the other's starts.
        let mut g = Graph::new("branches");
        let desc = TensorDescriptor::new([1, 2, 2, 2], DType::F32);
        let input = GraphBuilder::add_input_node(&mut g, NodeParams::new("in"), desc, None);
        for branch in ["a", "b"] {
            let first = relu(&mut g, &format!("{branch}1"), input);
            let second = relu(&mut g, &format!("{branch}2"), first);
            GraphBuilder::add_output_node(
                &mut g,
                NodeParams::new(format!("out_{branch}")),
                NodeIdxPair::new(second, 0),
                None,
            )
            .unwrap();
        }
        let (g, mut ctx, mut workload) = configure(g, GraphConfig::default());
        configure_transition_manager(&g, &ctx, &mut workload).unwrap();

        let group = workload.transition_groups[0].clone();
        assert!(group.is_finalized());
        let mappings = group.mappings();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].blob, mappings[1].blob);
        let cross = ctx.memory_management_ctx(Target::Neon).unwrap().cross_mm.clone().unwrap();
        assert_eq!(cross.pool_size_bytes(), 32);

        // Both intermediates are bound only while the scope is held.
        let intermediates: Vec<_> = ["a1", "b1"]
            .iter()
            .map(|name| {
                let nid = g.nodes().find(|n| n.name() == *name).unwrap().id();
                let tid = g.node_output_tensor(nid, 0).unwrap();
                g.tensor(tid).unwrap().handle().cloned().unwrap()
            })
            .collect();
        assert!(intermediates.iter().all(|h| !h.is_allocated()));
        ctx.finalize().unwrap();
        let scope = crate::TransitionScope::acquire(&workload).unwrap();
        assert!(intermediates.iter().all(|h| h.is_allocated()));
        drop(scope);
    }

    #[test]
    fn test_graph_io_is_never_managed() {
        let (g, ctx, mut workload) = relu_chain(1, GraphConfig::default());
        configure_transition_manager(&g, &ctx, &mut workload).unwrap();

        let cross = ctx.memory_management_ctx(Target::Neon).unwrap().cross_mm.clone().unwrap();
        assert_eq!(cross.pool_size_bytes(), 0);
        for tid in workload.inputs.iter().chain(&workload.outputs) {
            assert!(g.tensor(*tid).unwrap().handle().unwrap().is_allocated());
        }
    }

    #[test]
    fn test_missing_memory_context_is_an_error() {
        let (g, mut ctx, mut workload) = relu_chain(2, GraphConfig::default());
        ctx.remove_memory_management_ctx(Target::Neon);
        let err = configure_transition_manager(&g, &ctx, &mut workload).unwrap_err();
        assert!(matches!(err, GraphError::Resource(_)));
    }
}
