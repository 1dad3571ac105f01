// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The [`GraphMutator`] trait and mutator implementations.

pub mod concat_subtensor;
pub mod execution_method;
pub mod fusion;
pub mod grouped_convolution;
pub mod in_place;
pub mod split_subtensor;

use crate::PassError;
use graph_ir::{BackendRegistry, Graph, GraphError, TensorHandle, TensorId};
use std::fmt;
use std::rc::Rc;

/// When a mutator runs relative to tensor handle creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationType {
    /// Rewrites nodes and edges. Runs before handles exist.
    Ir,
    /// Rewrites handle bindings and execution choices. Runs after
    /// handles exist.
    Backend,
}

impl fmt::Display for MutationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ir => f.write_str("ir"),
            Self::Backend => f.write_str("backend"),
        }
    }
}

/// Trait for graph rewrites.
///
/// A mutator takes a graph and the backends its nodes are assigned to and
/// rewrites the graph in place. Applying a mutator twice must leave the
/// graph as the first application did.
pub trait GraphMutator {
    /// Human-readable name of this mutator.
    fn name(&self) -> &str;

    fn mutation_type(&self) -> MutationType;

    fn mutate(&self, graph: &mut Graph, backends: &BackendRegistry) -> Result<(), PassError>;
}

/// The handle of a tensor that a backend pass expects to exist.
pub(crate) fn require_handle(graph: &Graph, tid: TensorId) -> Result<Rc<dyn TensorHandle>, PassError> {
    graph
        .tensor(tid)
        .and_then(|t| t.handle().cloned())
        .ok_or_else(|| PassError::Graph(GraphError::Resource(format!("tensor {tid} has no handle"))))
}
