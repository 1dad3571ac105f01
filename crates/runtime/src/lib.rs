// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # runtime
//!
//! Finalizes graphs into workloads and drives their execution.
//!
//! The runtime takes:
//! - A [`Graph`](graph_ir::Graph) built with `graph-ir`.
//! - A [`PassManager`](graph_passes::PassManager) from `graph-passes`.
//! - A [`BackendRegistry`](graph_ir::BackendRegistry) with a backend per target.
//!
//! [`GraphManager::finalize_graph`] runs the whole pipeline once:
//!
//! ```text
//!   resolve target ─▶ IR passes ─▶ backend context ─▶ tensor handles
//!          ─▶ backend passes ─▶ topological sort ─▶ validate ─▶ configure
//!          ─▶ allocate constants ─▶ prepare ─▶ transition memory
//!          ─▶ populate pools ─▶ register
//! ```
//!
//! [`GraphManager::execute_graph`] then loops until an accessor runs dry:
//!
//! | Step | Action |
//! |------|--------|
//! | 1 | Acquire every transition memory group |
//! | 2 | Call every input accessor, stop if one is exhausted |
//! | 3 | Run every task in topological order |
//! | 4 | Call every output accessor, stop if one is exhausted |
//! | 5 | Release the transition groups |
//!
//! [`Stream`] wraps a graph, its context and a manager for sequential
//! network building.

mod config;
mod error;
pub mod helpers;
mod manager;
mod metrics;
mod stream;
mod transition;

pub use config::RuntimeConfig;
pub use error::RuntimeError;
pub use helpers::TransitionScope;
pub use manager::GraphManager;
pub use metrics::{ExecutionMetrics, TaskMetrics};
pub use stream::Stream;
pub use transition::configure_transition_manager;
