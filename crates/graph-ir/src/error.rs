// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for graph construction, finalization and execution.

use crate::GraphId;
use memory_manager::MemoryError;
use tensor_core::{Target, TensorError};

/// Errors that can occur while building, finalizing or running a graph.
///
/// Accessor exhaustion is not an error: accessors report it by returning
/// `false` and the execution loop stops cleanly.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// No backend was ever registered for the target.
    #[error("no backend registered for target '{0}'")]
    MissingBackend(Target),

    /// The backend is registered but cannot run on this host.
    #[error("backend for target '{0}' is not supported on this host")]
    UnsupportedBackend(Target),

    /// Target fallback found no usable backend at all.
    #[error("no supported backend is registered")]
    NoSupportedBackend,

    /// `finalize_graph` was called for a graph that already has a workload.
    #[error("graph {0} is already registered")]
    GraphAlreadyRegistered(GraphId),

    /// `execute_graph` was called for a graph without a workload.
    #[error("graph {0} is not registered")]
    GraphNotRegistered(GraphId),

    /// A node is incompatible with its assigned backend or malformed.
    #[error("validation failed for node '{node}': {detail}")]
    Validation { node: String, detail: String },

    /// The graph structure is malformed (cycle, dangling id, empty plan).
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// A connection refers to a missing node or an out-of-range slot.
    #[error("invalid connection: {0}")]
    InvalidConnection(String),

    /// A handle or memory context required by the plan is missing.
    #[error("resource error: {0}")]
    Resource(String),

    /// A task failed while running.
    #[error("execution failed in node '{node}': {detail}")]
    Execution { node: String, detail: String },

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// A backend's reason for rejecting an operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self(detail.into())
    }
}
