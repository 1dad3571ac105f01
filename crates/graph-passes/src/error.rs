// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for graph passes.

use graph_ir::GraphError;

/// Errors that can occur while mutating a graph.
#[derive(Debug, thiserror::Error)]
pub enum PassError {
    /// A graph operation inside a pass failed.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A pass found a node it must rewrite but cannot.
    #[error("pass '{pass}' cannot rewrite node '{node}': {detail}")]
    RewriteFailed {
        pass: String,
        node: String,
        detail: String,
    },
}
