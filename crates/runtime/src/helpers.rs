// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The phases [`GraphManager`](crate::GraphManager) composes: tensor and
//! node configuration, validation, constant allocation, task preparation
//! and the per-iteration accessor and task calls.

use crate::metrics::ExecutionMetrics;
use graph_ir::{
    root_handle, BackendRegistry, ExecutionTask, ExecutionWorkload, Graph, GraphContext, GraphError, NodeId,
    NodeType, TensorHandle, TensorId,
};
use memory_manager::MemoryGroupScope;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Instant;

// ── Finalization ───────────────────────────────────────────────

/// Creates a backend handle for every tensor that has none.
pub fn configure_all_tensors(graph: &mut Graph, backends: &BackendRegistry, ctx: &GraphContext) -> Result<(), GraphError> {
    let pending: Vec<TensorId> = graph.tensors().filter(|t| t.handle().is_none()).map(|t| t.id()).collect();
    for tid in pending {
        let Some(tensor) = graph.tensor_mut(tid) else {
            continue;
        };
        let backend = backends.get_backend(tensor.desc().target)?;
        let handle = backend.create_tensor(tensor.desc(), ctx)?;
        tensor.set_handle(Some(handle));
    }
    Ok(())
}

/// Structural checks, then the assigned backend's own validation.
///
/// Stops at the first failure.
pub fn validate_all_nodes(graph: &Graph, backends: &BackendRegistry, order: &[NodeId]) -> Result<(), GraphError> {
    for &nid in order {
        let Some(node) = graph.node(nid) else {
            continue;
        };
        let fail = |detail: String| GraphError::Validation {
            node: node.name().to_string(),
            detail,
        };
        let kind = node.kind();

        if let Some(idx) = (0..kind.num_required_inputs()).find(|idx| node.input_edge(*idx).is_none()) {
            return Err(fail(format!("required input {idx} is not connected")));
        }
        if node.num_outputs() != kind.num_outputs() {
            return Err(fail(format!(
                "has {} outputs, {} expects {}",
                node.num_outputs(),
                node.node_type(),
                kind.num_outputs()
            )));
        }
        for (idx, desc) in graph.output_descriptors(nid).into_iter().enumerate() {
            match desc {
                Some(d) if d.shape.rank() > 0 && d.num_elements() > 0 => {}
                _ => return Err(fail(format!("output {idx} has no valid descriptor"))),
            }
        }

        backends
            .get_backend(node.assigned_target())?
            .validate_node(graph, nid)
            .map_err(|e| fail(e.0))?;
    }
    Ok(())
}

/// Builds the workload: one task per node that needs one, in `order`.
pub fn configure_all_nodes(
    graph: &Graph,
    backends: &BackendRegistry,
    ctx: &GraphContext,
    order: &[NodeId],
) -> Result<ExecutionWorkload, GraphError> {
    let mut workload = ExecutionWorkload::new(graph.id());
    for &nid in order {
        let Some(node) = graph.node(nid) else {
            continue;
        };
        let backend = backends.get_backend(node.assigned_target())?;
        if let Some(function) = backend.configure_node(graph, nid, ctx)? {
            workload.tasks.push(ExecutionTask::new(nid, function));
        }
    }
    if workload.tasks.is_empty() {
        return Err(GraphError::InvalidGraph(format!(
            "graph '{}' produced no executable tasks",
            graph.name()
        )));
    }

    workload.inputs = graph
        .nodes_of(NodeType::Input)
        .into_iter()
        .filter_map(|nid| graph.node_output_tensor(nid, 0))
        .collect();
    workload.outputs = graph
        .nodes_of(NodeType::Output)
        .into_iter()
        .filter_map(|nid| graph.node_input_tensor(nid, 0))
        .collect();
    Ok(workload)
}

/// Root handles of the tensors the graph's I/O and constant nodes own:
/// `Input`/`Const` outputs and `Output` inputs.
pub fn const_tensors(graph: &Graph) -> Vec<TensorId> {
    let produced = graph
        .nodes_of(NodeType::Input)
        .into_iter()
        .chain(graph.nodes_of(NodeType::Const))
        .filter_map(|nid| graph.node_output_tensor(nid, 0));
    let consumed = graph
        .nodes_of(NodeType::Output)
        .into_iter()
        .filter_map(|nid| graph.node_input_tensor(nid, 0));
    let mut tids: Vec<TensorId> = produced.chain(consumed).collect();
    tids.sort();
    tids.dedup();
    tids
}

pub fn tensor_handle(graph: &Graph, tid: TensorId) -> Result<Rc<dyn TensorHandle>, GraphError> {
    graph
        .tensor(tid)
        .and_then(|t| t.handle().cloned())
        .ok_or_else(|| GraphError::Resource(format!("tensor {tid} has no handle")))
}

/// Allocates every constant tensor on its own.
pub fn allocate_const_tensors(graph: &Graph) -> Result<(), GraphError> {
    for tid in const_tensors(graph) {
        root_handle(&tensor_handle(graph, tid)?).allocate()?;
    }
    Ok(())
}

/// Calls the accessor of every `Const` node once.
pub fn call_all_const_node_accessors(graph: &mut Graph) {
    for nid in graph.nodes_of(NodeType::Const) {
        let Some(tid) = graph.node_output_tensor(nid, 0) else {
            continue;
        };
        if let Some(tensor) = graph.tensor_mut(tid).filter(|t| t.has_accessor()) {
            if !tensor.call_accessor() {
                tracing::debug!(tensor = %tid, "constant accessor reported no data");
            }
        }
    }
}

/// Prepares every task in order.
///
/// Once the last task that references a tensor is prepared, a tensor its
/// functions marked unused is released.
pub fn prepare_all_tasks(workload: &mut ExecutionWorkload, graph: &Graph) -> Result<(), GraphError> {
    let mut last_use: BTreeMap<TensorId, usize> = BTreeMap::new();
    for (idx, task) in workload.tasks.iter().enumerate() {
        for tid in node_tensors(graph, task.node()) {
            last_use.insert(tid, idx);
        }
    }

    for (idx, task) in workload.tasks.iter_mut().enumerate() {
        task.prepare().map_err(|e| wrap_task_error(graph, task.node(), e))?;
        for (tid, _) in last_use.iter().filter(|(_, last)| **last == idx) {
            if let Some(handle) = graph.tensor(*tid).and_then(|t| t.handle()) {
                if !handle.is_used() {
                    tracing::debug!(tensor = %tid, "releasing unused tensor");
                    handle.release_if_unused();
                }
            }
        }
    }
    Ok(())
}

/// Inputs and outputs of `nid`.
pub fn node_tensors(graph: &Graph, nid: NodeId) -> Vec<TensorId> {
    let Some(node) = graph.node(nid) else {
        return Vec::new();
    };
    (0..node.num_inputs())
        .filter_map(|idx| graph.node_input_tensor(nid, idx))
        .chain(node.outputs().iter().flatten().copied())
        .collect()
}

/// Allocates every used tensor that is not allocated yet.
pub fn allocate_all_tensors(graph: &Graph) -> Result<(), GraphError> {
    for tensor in graph.tensors() {
        let Some(handle) = tensor.handle() else {
            continue;
        };
        let root = root_handle(handle);
        if root.is_used() && !root.is_allocated() {
            root.allocate()?;
        }
    }
    Ok(())
}

// ── Execution ──────────────────────────────────────────────────

/// Acquires every transition memory group for one iteration and
/// releases them when dropped.
#[derive(Debug)]
pub struct TransitionScope {
    _groups: MemoryGroupScope,
}

impl TransitionScope {
    pub fn acquire(workload: &ExecutionWorkload) -> Result<Self, GraphError> {
        Ok(Self {
            _groups: MemoryGroupScope::acquire(workload.transition_groups.iter().cloned())?,
        })
    }
}

/// Calls every accessor in `tensors`. All are called even after one
/// reports exhaustion; returns `false` if any did.
fn call_accessors(graph: &mut Graph, tensors: &[TensorId]) -> bool {
    let mut all_ok = true;
    for tid in tensors {
        let ok = graph.tensor_mut(*tid).is_some_and(|t| t.call_accessor());
        all_ok &= ok;
    }
    all_ok
}

pub fn call_all_input_node_accessors(workload: &ExecutionWorkload, graph: &mut Graph) -> bool {
    call_accessors(graph, &workload.inputs)
}

pub fn call_all_output_node_accessors(workload: &ExecutionWorkload, graph: &mut Graph) -> bool {
    call_accessors(graph, &workload.outputs)
}

/// Runs every task in order, timing each one when `metrics` is given.
pub fn call_all_tasks(
    workload: &mut ExecutionWorkload,
    graph: &Graph,
    mut metrics: Option<&mut ExecutionMetrics>,
) -> Result<(), GraphError> {
    for (idx, task) in workload.tasks.iter_mut().enumerate() {
        let start = Instant::now();
        task.run().map_err(|e| wrap_task_error(graph, task.node(), e))?;
        if let Some(m) = metrics.as_deref_mut() {
            let name = graph.node(task.node()).map_or("", |n| n.name());
            m.record_task(idx, name, start.elapsed());
        }
    }
    Ok(())
}

fn wrap_task_error(graph: &Graph, nid: NodeId, error: GraphError) -> GraphError {
    match error {
        GraphError::Execution { .. } => error,
        other => GraphError::Execution {
            node: graph.node(nid).map_or_else(|| nid.to_string(), |n| n.name().to_string()),
            detail: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph_ir::{
        ActivationFunction, ActivationInfo, DummyAccessor, GraphBuilder, GraphConfig, NodeIdxPair, NodeParams,
    };
    use reference_backend::ReferenceBackend;
    use tensor_core::{DType, Target, TensorDescriptor};

    fn registry() -> BackendRegistry {
        let mut registry = BackendRegistry::new();
        registry.add_backend(Target::Neon, ReferenceBackend::new(Target::Neon));
        registry
    }

    /// in → relu → out, with the input accessor limited to `calls`.
    fn relu_chain(calls: usize) -> Graph {
        let mut g = Graph::new("chain");
        let desc = TensorDescriptor::new([1, 2, 2, 2], DType::F32);
        let input = GraphBuilder::add_input_node(&mut g, NodeParams::new("in"), desc, Some(Box::new(DummyAccessor::new(calls))));
        let relu = GraphBuilder::add_activation_node(
            &mut g,
            NodeParams::new("relu"),
            NodeIdxPair::new(input, 0),
            ActivationInfo::new(ActivationFunction::Relu),
        )
        .unwrap();
        GraphBuilder::add_output_node(&mut g, NodeParams::new("out"), NodeIdxPair::new(relu, 0), None).unwrap();
        g.force_target(Target::Neon);
        g
    }

    #[test]
    fn test_configure_all_tensors_and_nodes() {
        let backends = registry();
        let mut g = relu_chain(1);
        let mut ctx = GraphContext::new(GraphConfig::default());
        backends.get_backend(Target::Neon).unwrap().setup_backend_context(&mut ctx).unwrap();

        configure_all_tensors(&mut g, &backends, &ctx).unwrap();
        assert!(g.tensors().all(|t| t.handle().is_some()));

        let order = graph_ir::algorithms::dfs(&g).unwrap();
        validate_all_nodes(&g, &backends, &order).unwrap();
        let workload = configure_all_nodes(&g, &backends, &ctx, &order).unwrap();
        assert_eq!(workload.num_tasks(), 1);
        assert_eq!(workload.inputs.len(), 1);
        assert_eq!(workload.outputs.len(), 1);
        assert_eq!(const_tensors(&g).len(), 2);
    }

    #[test]
    fn test_validation_reports_unconnected_input() {
        let backends = registry();
        let mut g = Graph::new("dangling");
        let relu = g.add_node(
            NodeParams::new("lonely").with_target(Target::Neon),
            graph_ir::NodeKind::Activation(ActivationInfo::new(ActivationFunction::Relu)),
        );
        g.force_target(Target::Neon);
        let err = validate_all_nodes(&g, &backends, &[relu]).unwrap_err();
        assert!(matches!(err, GraphError::Validation { ref node, .. } if node == "lonely"));
    }

    #[test]
    fn test_accessors_all_called_before_stopping() {
        let mut g = Graph::new("two-inputs");
        let desc = TensorDescriptor::new([4], DType::F32);
        let a = GraphBuilder::add_input_node(&mut g, NodeParams::new("a"), desc.clone(), Some(Box::new(DummyAccessor::new(0))));
        let calls = Rc::new(std::cell::Cell::new(0));
        let counter = Rc::clone(&calls);
        let b = GraphBuilder::add_input_node(
            &mut g,
            NodeParams::new("b"),
            desc,
            Some(Box::new(move |_: &dyn TensorHandle| {
                counter.set(counter.get() + 1);
                true
            })),
        );
        g.force_target(Target::Neon);

        let backends = registry();
        let mut ctx = GraphContext::default();
        backends.get_backend(Target::Neon).unwrap().setup_backend_context(&mut ctx).unwrap();
        configure_all_tensors(&mut g, &backends, &ctx).unwrap();
        allocate_const_tensors(&g).unwrap();

        let mut workload = ExecutionWorkload::new(g.id());
        workload.inputs = vec![
            g.node_output_tensor(a, 0).unwrap(),
            g.node_output_tensor(b, 0).unwrap(),
        ];
        assert!(!call_all_input_node_accessors(&workload, &mut g));
        assert_eq!(calls.get(), 1);
    }
}
