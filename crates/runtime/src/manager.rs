// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The graph manager: finalizes graphs into workloads and runs them.
//!
//! ```text
//!   Unregistered ──finalize_graph──▶ Registered ──execute_graph──▶ (loop)
//!        ▲                               │
//!        └──────── invalidate_graph ─────┘
//! ```
//!
//! A graph is registered at most once. Finalization either completes every
//! phase and registers the workload, or fails and registers nothing.

use crate::helpers::{
    allocate_all_tensors, allocate_const_tensors, call_all_const_node_accessors, call_all_input_node_accessors,
    call_all_output_node_accessors, call_all_tasks, configure_all_nodes, configure_all_tensors, prepare_all_tasks,
    validate_all_nodes, TransitionScope,
};
use crate::transition::configure_transition_manager;
use crate::{ExecutionMetrics, RuntimeError};
use graph_ir::{algorithms, BackendRegistry, ExecutionWorkload, Graph, GraphContext, GraphError, GraphId};
use graph_passes::{MutationType, PassManager};
use memory_manager::{AllocationStats, Allocator};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;
use tensor_core::Target;

/// A finalized workload plus what execution needs from its context.
struct Registration {
    workload: ExecutionWorkload,
    allocators: Vec<Rc<dyn Allocator>>,
    profiling: bool,
}

/// Owns the workloads of every finalized graph.
pub struct GraphManager {
    backends: Rc<BackendRegistry>,
    workloads: BTreeMap<GraphId, Registration>,
}

impl GraphManager {
    pub fn new(backends: Rc<BackendRegistry>) -> Self {
        Self {
            backends,
            workloads: BTreeMap::new(),
        }
    }

    pub fn backends(&self) -> &BackendRegistry {
        &self.backends
    }

    /// Turns `graph` into a registered workload.
    ///
    /// `target` falls back to the registry's default target when it has
    /// no supported backend. Passes of `pass_manager` rewrite the graph
    /// along the way.
    pub fn finalize_graph(
        &mut self,
        graph: &mut Graph,
        ctx: &mut GraphContext,
        pass_manager: &PassManager,
        target: Target,
    ) -> Result<(), RuntimeError> {
        let graph_id = graph.id();
        if self.workloads.contains_key(&graph_id) {
            return Err(GraphError::GraphAlreadyRegistered(graph_id).into());
        }
        let backends = Rc::clone(&self.backends);

        let target = self.resolve_target(target)?;
        graph.force_target(target);
        tracing::info!(graph = %graph.name(), device = %target, "finalizing graph");

        pass_manager.run_type(graph, &backends, MutationType::Ir)?;

        backends.get_backend(target)?.setup_backend_context(ctx)?;
        configure_all_tensors(graph, &backends, ctx)?;

        pass_manager.run_type(graph, &backends, MutationType::Backend)?;

        let order = algorithms::dfs(graph)?;
        validate_all_nodes(graph, &backends, &order)?;

        let mut workload = configure_all_nodes(graph, &backends, ctx, &order)?;
        tracing::debug!(graph = %graph.name(), tasks = workload.num_tasks(), "nodes configured");

        allocate_const_tensors(graph)?;
        call_all_const_node_accessors(graph);

        prepare_all_tasks(&mut workload, graph)?;

        if ctx.config().use_transition_memory_manager {
            configure_transition_manager(graph, ctx, &mut workload)?;
        } else {
            allocate_all_tensors(graph)?;
        }

        ctx.finalize()?;

        let registration = Registration {
            allocators: ctx.memory_managers().filter_map(|c| c.allocator.clone()).collect(),
            profiling: ctx.config().enable_profiling,
            workload,
        };
        tracing::info!(
            graph = %graph.name(),
            tasks = registration.workload.num_tasks(),
            transition_groups = registration.workload.transition_groups.len(),
            "graph registered"
        );
        self.workloads.insert(graph_id, registration);
        Ok(())
    }

    /// Runs the workload of `graph` until an accessor reports exhaustion.
    pub fn execute_graph(&mut self, graph: &mut Graph) -> Result<ExecutionMetrics, RuntimeError> {
        self.execute_graph_with_limit(graph, None)
    }

    /// Like [`execute_graph`](Self::execute_graph), stopping after at most
    /// `max_iterations` iterations.
    pub fn execute_graph_with_limit(
        &mut self,
        graph: &mut Graph,
        max_iterations: Option<usize>,
    ) -> Result<ExecutionMetrics, RuntimeError> {
        let graph_id = graph.id();
        let registration = self
            .workloads
            .get_mut(&graph_id)
            .ok_or(GraphError::GraphNotRegistered(graph_id))?;
        let workload = &mut registration.workload;

        let mut metrics = ExecutionMetrics::new(workload.num_tasks());
        let start = Instant::now();
        while max_iterations.map_or(true, |max| metrics.iterations < max) {
            let _scope = TransitionScope::acquire(workload)?;
            if !call_all_input_node_accessors(workload, graph) {
                break;
            }
            let task_metrics = registration.profiling.then_some(&mut metrics);
            call_all_tasks(workload, graph, task_metrics)?;
            let outputs_ok = call_all_output_node_accessors(workload, graph);
            metrics.iterations += 1;
            if !outputs_ok {
                break;
            }
        }

        let mut allocation = AllocationStats::default();
        for allocator in &registration.allocators {
            allocation.accumulate(&allocator.stats());
        }
        metrics.finalise(start.elapsed(), allocation);
        tracing::info!(graph = %graph.name(), iterations = metrics.iterations, "execution finished");
        Ok(metrics)
    }

    /// Drops the workload of `graph`. Returns whether one was registered.
    pub fn invalidate_graph(&mut self, graph: &Graph) -> bool {
        let removed = self.workloads.remove(&graph.id()).is_some();
        if removed {
            tracing::debug!(graph = %graph.name(), "workload invalidated");
        }
        removed
    }

    pub fn is_registered(&self, graph_id: GraphId) -> bool {
        self.workloads.contains_key(&graph_id)
    }

    pub fn workload(&self, graph_id: GraphId) -> Option<&ExecutionWorkload> {
        self.workloads.get(&graph_id).map(|r| &r.workload)
    }

    fn resolve_target(&self, requested: Target) -> Result<Target, GraphError> {
        if self.backends.is_target_supported(requested) {
            return Ok(requested);
        }
        let fallback = self.backends.default_target()?;
        tracing::info!(requested = %requested, fallback = %fallback, "target unavailable, falling back");
        Ok(fallback)
    }
}

impl fmt::Debug for GraphManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphManager")
            .field("backends", &self.backends.targets().collect::<Vec<_>>())
            .field("workloads", &self.workloads.keys().collect::<Vec<_>>())
            .finish()
    }
}
