// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Executable functions, tasks and the finalized workload of a graph.

use crate::{GraphError, GraphId, NodeId, TensorId};
use memory_manager::MemoryGroup;
use std::fmt;

/// A configured operation ready to run.
///
/// Functions hold the tensor handles they read and write; running one
/// takes no arguments.
pub trait ExecutableFunction {
    fn run(&mut self) -> Result<(), GraphError>;

    /// One-time warm-up before the first run, such as repacking weights.
    fn prepare(&mut self) -> Result<(), GraphError> {
        Ok(())
    }
}

impl<F> ExecutableFunction for F
where
    F: FnMut() -> Result<(), GraphError>,
{
    fn run(&mut self) -> Result<(), GraphError> {
        self()
    }
}

/// A function paired with the node it was configured from.
pub struct ExecutionTask {
    node: NodeId,
    function: Box<dyn ExecutableFunction>,
    prepared: bool,
}

impl ExecutionTask {
    pub fn new(node: NodeId, function: Box<dyn ExecutableFunction>) -> Self {
        Self {
            node,
            function,
            prepared: false,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn run(&mut self) -> Result<(), GraphError> {
        self.function.run()
    }

    /// Prepares the function. Later calls are no-ops.
    pub fn prepare(&mut self) -> Result<(), GraphError> {
        if !self.prepared {
            self.function.prepare()?;
            self.prepared = true;
        }
        Ok(())
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }
}

impl fmt::Debug for ExecutionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionTask")
            .field("node", &self.node)
            .field("prepared", &self.prepared)
            .finish()
    }
}

/// The finalized plan of one graph.
#[derive(Debug)]
pub struct ExecutionWorkload {
    pub graph_id: GraphId,
    /// Tasks in topological order.
    pub tasks: Vec<ExecutionTask>,
    /// Outputs of the graph's `Input` nodes.
    pub inputs: Vec<TensorId>,
    /// Inputs of the graph's `Output` nodes.
    pub outputs: Vec<TensorId>,
    /// Cross-layer groups acquired around every iteration.
    pub transition_groups: Vec<MemoryGroup>,
}

impl ExecutionWorkload {
    pub fn new(graph_id: GraphId) -> Self {
        Self {
            graph_id,
            tasks: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            transition_groups: Vec::new(),
        }
    }

    pub fn num_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Nodes of the tasks, in execution order.
    pub fn task_nodes(&self) -> Vec<NodeId> {
        self.tasks.iter().map(ExecutionTask::node).collect()
    }
}
