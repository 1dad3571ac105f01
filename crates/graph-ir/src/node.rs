// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Graph nodes: operation kinds, slot counts and output inference.
//!
//! A node has a fixed number of input slots and outputs determined by its
//! [`NodeKind`]. Some input slots are optional (bias, beta, gamma); the
//! rest must be connected before the node can be validated.
//!
//! Output descriptors are inferred from the connected inputs by
//! [`NodeKind::infer_output`]; the graph re-runs inference downstream
//! whenever a connection changes.

use crate::{
    ActivationInfo, ConvolutionInfo, EdgeId, EltwiseOperation, NodeId, NodeParams, PoolingInfo, TensorId,
};
use std::collections::BTreeSet;
use std::fmt;
use tensor_core::{DataLayoutDimension, Shape, Target, TensorDescriptor};

/// Discriminant of [`NodeKind`], used for tagging and lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub enum NodeType {
    Input,
    Output,
    Const,
    Activation,
    BatchNormalization,
    Convolution,
    Concatenate,
    Split,
    Eltwise,
    FullyConnected,
    Pooling,
    Softmax,
    Flatten,
    Reshape,
}

impl NodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "Input",
            Self::Output => "Output",
            Self::Const => "Const",
            Self::Activation => "Activation",
            Self::BatchNormalization => "BatchNormalization",
            Self::Convolution => "Convolution",
            Self::Concatenate => "Concatenate",
            Self::Split => "Split",
            Self::Eltwise => "Eltwise",
            Self::FullyConnected => "FullyConnected",
            Self::Pooling => "Pooling",
            Self::Softmax => "Softmax",
            Self::Flatten => "Flatten",
            Self::Reshape => "Reshape",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The operation a node performs, with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Graph input. Its descriptor is fixed at construction.
    Input { desc: TensorDescriptor },
    /// Graph output sink. Has one input and no outputs.
    Output,
    /// Constant data (weights, biases) filled once by an accessor.
    Const { desc: TensorDescriptor },
    Activation(ActivationInfo),
    /// Inputs: src, mean, var, beta (optional), gamma (optional).
    BatchNormalization {
        epsilon: f32,
        fused_activation: Option<ActivationInfo>,
    },
    /// Inputs: src, weights, bias (optional).
    Convolution(ConvolutionInfo),
    /// A disabled concatenation has had its inputs turned into views of
    /// its output and produces no task.
    Concatenate {
        num_inputs: usize,
        axis: DataLayoutDimension,
        enabled: bool,
    },
    /// Splits along a raw dimension index. Disabled like `Concatenate`.
    Split {
        num_splits: usize,
        axis: usize,
        enabled: bool,
    },
    Eltwise(EltwiseOperation),
    /// Inputs: src, weights, bias (optional).
    FullyConnected { num_outputs: usize },
    Pooling(PoolingInfo),
    Softmax { beta: f32 },
    /// Collapses every dimension after the first.
    Flatten,
    Reshape { shape: Shape },
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Input { .. } => NodeType::Input,
            Self::Output => NodeType::Output,
            Self::Const { .. } => NodeType::Const,
            Self::Activation(_) => NodeType::Activation,
            Self::BatchNormalization { .. } => NodeType::BatchNormalization,
            Self::Convolution(_) => NodeType::Convolution,
            Self::Concatenate { .. } => NodeType::Concatenate,
            Self::Split { .. } => NodeType::Split,
            Self::Eltwise(_) => NodeType::Eltwise,
            Self::FullyConnected { .. } => NodeType::FullyConnected,
            Self::Pooling(_) => NodeType::Pooling,
            Self::Softmax { .. } => NodeType::Softmax,
            Self::Flatten => NodeType::Flatten,
            Self::Reshape { .. } => NodeType::Reshape,
        }
    }

    /// Number of input slots.
    pub fn num_input_slots(&self) -> usize {
        match self {
            Self::Input { .. } | Self::Const { .. } => 0,
            Self::BatchNormalization { .. } => 5,
            Self::Convolution(_) | Self::FullyConnected { .. } => 3,
            Self::Concatenate { num_inputs, .. } => *num_inputs,
            Self::Eltwise(_) => 2,
            _ => 1,
        }
    }

    /// Number of leading input slots that must be connected.
    pub fn num_required_inputs(&self) -> usize {
        match self {
            Self::BatchNormalization { .. } => 3,
            Self::Convolution(_) | Self::FullyConnected { .. } => 2,
            other => other.num_input_slots(),
        }
    }

    pub fn num_outputs(&self) -> usize {
        match self {
            Self::Output => 0,
            Self::Split { num_splits, .. } => *num_splits,
            _ => 1,
        }
    }

    /// `false` for concatenations and splits that were turned into views.
    pub fn is_enabled(&self) -> bool {
        match self {
            Self::Concatenate { enabled, .. } | Self::Split { enabled, .. } => *enabled,
            _ => true,
        }
    }

    pub fn fused_activation(&self) -> Option<ActivationInfo> {
        match self {
            Self::Convolution(info) => info.fused_activation,
            Self::BatchNormalization {
                fused_activation, ..
            } => *fused_activation,
            _ => None,
        }
    }

    /// Infers the descriptor of output `idx` from the input descriptors.
    ///
    /// Returns `None` when a required input is missing or the shapes are
    /// incompatible with the operation.
    pub fn infer_output(&self, idx: usize, inputs: &[Option<&TensorDescriptor>]) -> Option<TensorDescriptor> {
        if idx >= self.num_outputs() {
            return None;
        }
        match self {
            Self::Input { desc } | Self::Const { desc } => Some(desc.clone()),
            Self::Output => None,
            Self::Activation(_) | Self::BatchNormalization { .. } | Self::Softmax { .. } => {
                input(inputs, 0).cloned()
            }
            Self::Convolution(info) => {
                convolution_output(input(inputs, 0)?, input(inputs, 1)?, info)
            }
            Self::Concatenate {
                num_inputs, axis, ..
            } => concatenate_output(inputs, *num_inputs, *axis),
            Self::Split {
                num_splits, axis, ..
            } => {
                let src = input(inputs, 0)?;
                let dim = src.shape.dim(*axis)?;
                if *num_splits == 0 || dim % num_splits != 0 {
                    return None;
                }
                let shape = src.shape.with_dim(*axis, dim / num_splits).ok()?;
                Some(src.clone().with_shape(shape))
            }
            Self::Eltwise(_) => {
                let (lhs, rhs) = (input(inputs, 0)?, input(inputs, 1)?);
                (lhs.shape == rhs.shape).then(|| lhs.clone())
            }
            Self::FullyConnected { num_outputs } => {
                let src = input(inputs, 0)?;
                let shape = match src.shape.rank() {
                    0 => return None,
                    1 => Shape::vector(*num_outputs),
                    _ => Shape::matrix(src.shape.dims()[0], *num_outputs),
                };
                Some(src.clone().with_shape(shape))
            }
            Self::Pooling(info) => pooling_output(input(inputs, 0)?, info),
            Self::Flatten => {
                let src = input(inputs, 0)?;
                let batches = *src.shape.dims().first()?;
                let rest = src.shape.num_elements() / batches.max(1);
                Some(src.clone().with_shape(Shape::matrix(batches, rest)))
            }
            Self::Reshape { shape } => {
                let src = input(inputs, 0)?;
                (src.shape.num_elements() == shape.num_elements()).then(|| src.clone().with_shape(shape.clone()))
            }
        }
    }
}

fn input<'a>(inputs: &[Option<&'a TensorDescriptor>], idx: usize) -> Option<&'a TensorDescriptor> {
    inputs.get(idx).copied().flatten()
}

fn convolution_output(
    src: &TensorDescriptor,
    weights: &TensorDescriptor,
    info: &ConvolutionInfo,
) -> Option<TensorDescriptor> {
    let w_idx = src.dimension_idx(DataLayoutDimension::Width).ok()?;
    let h_idx = src.dimension_idx(DataLayoutDimension::Height).ok()?;
    let c_idx = src.dimension_idx(DataLayoutDimension::Channel).ok()?;

    let kernel_w = weights.dimension(DataLayoutDimension::Width).ok()?;
    let kernel_h = weights.dimension(DataLayoutDimension::Height).ok()?;
    let ofm = weights.dimension(DataLayoutDimension::Batches).ok()?;

    let out_w = info.pad_stride.output_width(src.shape.dim(w_idx)?, kernel_w)?;
    let out_h = info.pad_stride.output_height(src.shape.dim(h_idx)?, kernel_h)?;
    let shape = src
        .shape
        .with_dim(w_idx, out_w)
        .and_then(|s| s.with_dim(h_idx, out_h))
        .and_then(|s| s.with_dim(c_idx, ofm))
        .ok()?;
    Some(src.clone().with_shape(shape))
}

fn pooling_output(src: &TensorDescriptor, info: &PoolingInfo) -> Option<TensorDescriptor> {
    let w_idx = src.dimension_idx(DataLayoutDimension::Width).ok()?;
    let h_idx = src.dimension_idx(DataLayoutDimension::Height).ok()?;
    let (out_w, out_h) = if info.global {
        (1, 1)
    } else {
        (
            info.pad_stride.output_width(src.shape.dim(w_idx)?, info.pool_size.0)?,
            info.pad_stride.output_height(src.shape.dim(h_idx)?, info.pool_size.1)?,
        )
    };
    let shape = src
        .shape
        .with_dim(w_idx, out_w)
        .and_then(|s| s.with_dim(h_idx, out_h))
        .ok()?;
    Some(src.clone().with_shape(shape))
}

fn concatenate_output(
    inputs: &[Option<&TensorDescriptor>],
    num_inputs: usize,
    axis: DataLayoutDimension,
) -> Option<TensorDescriptor> {
    let first = input(inputs, 0)?;
    let axis_idx = first.dimension_idx(axis).ok()?;
    let mut total = 0;
    for idx in 0..num_inputs {
        let desc = input(inputs, idx)?;
        if desc.shape.rank() != first.shape.rank() {
            return None;
        }
        total += desc.shape.dim(axis_idx)?;
    }
    let shape = first.shape.with_dim(axis_idx, total).ok()?;
    Some(first.clone().with_shape(shape))
}

/// A vertex of the graph.
///
/// Nodes refer to their edges and output tensors by id; the owning
/// [`crate::Graph`] resolves them.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) params: NodeParams,
    pub(crate) assigned_target: Target,
    pub(crate) kind: NodeKind,
    pub(crate) input_edges: Vec<Option<EdgeId>>,
    pub(crate) outputs: Vec<Option<TensorId>>,
    pub(crate) output_edges: BTreeSet<EdgeId>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.params.name
    }

    pub fn params(&self) -> &NodeParams {
        &self.params
    }

    /// Target chosen at finalization.
    pub fn assigned_target(&self) -> Target {
        self.assigned_target
    }

    pub fn set_assigned_target(&mut self, target: Target) {
        self.assigned_target = target;
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut NodeKind {
        &mut self.kind
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }

    pub fn input_edges(&self) -> &[Option<EdgeId>] {
        &self.input_edges
    }

    pub fn input_edge(&self, idx: usize) -> Option<EdgeId> {
        self.input_edges.get(idx).copied().flatten()
    }

    pub fn num_inputs(&self) -> usize {
        self.input_edges.len()
    }

    pub fn outputs(&self) -> &[Option<TensorId>] {
        &self.outputs
    }

    pub fn output_id(&self, idx: usize) -> Option<TensorId> {
        self.outputs.get(idx).copied().flatten()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn output_edges(&self) -> &BTreeSet<EdgeId> {
        &self.output_edges
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' ({})", self.id, self.params.name, self.node_type())
    }
}
