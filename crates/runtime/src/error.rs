// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the graph runtime.

/// Errors surfaced by finalization, execution and configuration.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Graph construction, validation, backend or execution failure.
    #[error(transparent)]
    Graph(#[from] graph_ir::GraphError),

    /// A mutator could not rewrite the graph.
    #[error(transparent)]
    Pass(#[from] graph_passes::PassError),

    /// Memory management failed outside a backend call.
    #[error("memory error: {0}")]
    Memory(#[from] memory_manager::MemoryError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}
