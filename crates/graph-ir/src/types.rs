// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Identifiers and small value types shared across the graph.
//!
//! Node, edge and tensor ids are indices into the graph's arenas. Removed
//! elements leave a hole, so an id stays valid (or dangling) for the life
//! of the graph and is never reused. "No connection" is `Option::None`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tensor_core::Target;

/// Identity of a tensor handle. Handles share the memory-manager object id
/// so groups can track them directly.
pub type HandleId = memory_manager::ObjectId;

/// Index of a node in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Index of a tensor in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct TensorId(usize);

impl TensorId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Index of an edge in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct EdgeId(usize);

impl EdgeId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

static NEXT_GRAPH: AtomicU64 = AtomicU64::new(0);

/// Process-unique graph identifier; workloads are registered under it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct GraphId(u64);

impl GraphId {
    pub fn next() -> Self {
        Self(NEXT_GRAPH.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A node together with one of its output (or input) slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIdxPair {
    pub node: NodeId,
    pub index: usize,
}

impl NodeIdxPair {
    pub fn new(node: NodeId, index: usize) -> Self {
        Self { node, index }
    }
}

/// Parameters every node carries regardless of its kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeParams {
    pub name: String,
    /// Requested target; `Unspecified` defers to the graph manager.
    pub target: Target,
}

impl NodeParams {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: Target::Unspecified,
        }
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }
}
