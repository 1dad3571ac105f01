// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # graph-ir
//!
//! The network description and the contracts the graph runtime is built
//! on:
//!
//! - [`Graph`]: an arena of [`Node`]s, [`Edge`]s and [`Tensor`]s addressed
//!   by stable ids.
//! - [`NodeKind`]: operations with their parameters, slot counts and
//!   output inference.
//! - [`GraphBuilder`]: layer helpers that create weights and other
//!   constants alongside the main node.
//! - [`DeviceBackend`] / [`BackendRegistry`]: per-target validation, tensor
//!   handle creation and function configuration.
//! - [`TensorHandle`] / [`TensorAccessor`]: backend memory bindings and the
//!   callbacks that feed and drain them.
//! - [`GraphContext`]: configuration and per-target memory managers.
//! - [`ExecutionWorkload`]: the ordered tasks of a finalized graph.
//!
//! # Example
//! ```
//! use graph_ir::{algorithms, GraphBuilder, Graph, NodeIdxPair, NodeParams};
//! use graph_ir::{ActivationFunction, ActivationInfo};
//! use tensor_core::{DType, TensorDescriptor};
//!
//! let mut g = Graph::new("tiny");
//! let desc = TensorDescriptor::new([1, 8, 4, 4], DType::F32);
//! let input = GraphBuilder::add_input_node(&mut g, NodeParams::new("in"), desc, None);
//! let relu = GraphBuilder::add_activation_node(
//!     &mut g,
//!     NodeParams::new("relu"),
//!     NodeIdxPair::new(input, 0),
//!     ActivationInfo::new(ActivationFunction::Relu),
//! )
//! .unwrap();
//! GraphBuilder::add_output_node(&mut g, NodeParams::new("out"), NodeIdxPair::new(relu, 0), None).unwrap();
//!
//! let order = algorithms::dfs(&g).unwrap();
//! assert_eq!(order.first(), Some(&input));
//! assert_eq!(g.num_nodes(), 3);
//! ```

mod accessor;
pub mod algorithms;
mod backend;
mod builder;
mod context;
mod edge;
mod error;
mod graph;
mod handle;
mod info;
mod node;
mod printer;
mod tensor;
mod types;
mod workload;

pub use accessor::{CaptureAccessor, DummyAccessor, FillAccessor, TensorAccessor, VecAccessor};
pub use backend::{BackendRegistry, DeviceBackend};
pub use builder::{Accessor, GraphBuilder};
pub use context::{GraphConfig, GraphContext, MemoryManagerContext};
pub use edge::Edge;
pub use error::{GraphError, ValidationError};
pub use graph::Graph;
pub use handle::{read_f32, root_handle, write_f32, TensorHandle};
pub use info::{
    ActivationFunction, ActivationInfo, ConvolutionInfo, ConvolutionMethod, EltwiseOperation, PadStrideInfo,
    PoolingInfo, PoolingType,
};
pub use node::{Node, NodeKind, NodeType};
pub use printer::DotGraphPrinter;
pub use tensor::Tensor;
pub use types::{EdgeId, GraphId, HandleId, NodeId, NodeIdxPair, NodeParams, TensorId};
pub use workload::{ExecutableFunction, ExecutionTask, ExecutionWorkload};
