// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Function factory and the naive f32 kernels behind it.
//!
//! Every function captures the handles it reads and writes when it is
//! configured. Kernels read inputs fully before writing outputs, so a
//! function may run in place.

mod convolution;
mod data;
mod gemm;
mod pointwise;
mod pooling;
mod scratch;

pub use convolution::{ConvolutionLayer, FullyConnectedLayer};
pub use data::{ConcatenateLayer, CopyLayer, SplitLayer};
pub use pointwise::{ActivationLayer, BatchNormalizationLayer, EltwiseLayer};
pub use pooling::{PoolingLayer, SoftmaxLayer};

use graph_ir::{ExecutableFunction, Graph, GraphContext, GraphError, Node, NodeId, NodeKind, TensorHandle};
use std::rc::Rc;
use tensor_core::{DataLayout, DataLayoutDimension, Target, TensorDescriptor};

/// Builds the function for `nid`, or `None` if the node needs no task.
pub(crate) fn configure(
    graph: &Graph,
    nid: NodeId,
    ctx: &GraphContext,
    target: Target,
) -> Result<Option<Box<dyn ExecutableFunction>>, GraphError> {
    let node = graph
        .node(nid)
        .ok_or_else(|| GraphError::InvalidGraph(format!("node {nid} does not exist")))?;
    if !node.kind().is_enabled() {
        tracing::debug!(node = node.name(), "disabled node needs no function");
        return Ok(None);
    }
    let io = NodeIo { graph, node };

    let function: Box<dyn ExecutableFunction> = match node.kind() {
        NodeKind::Input { .. } | NodeKind::Output | NodeKind::Const { .. } => return Ok(None),
        NodeKind::Activation(info) => Box::new(ActivationLayer::new(io.input(0)?, io.output(0)?, *info)),
        NodeKind::BatchNormalization {
            epsilon,
            fused_activation,
        } => Box::new(BatchNormalizationLayer::new(
            io.input(0)?,
            [io.input(1)?, io.input(2)?],
            io.optional_input(3),
            io.optional_input(4),
            io.output(0)?,
            *epsilon,
            *fused_activation,
        )?),
        NodeKind::Convolution(info) => Box::new(ConvolutionLayer::new(
            io.input(0)?,
            io.input(1)?,
            io.optional_input(2),
            io.output(0)?,
            *info,
            ctx,
            target,
        )?),
        NodeKind::Concatenate { axis, .. } => {
            let inputs = (0..node.num_inputs()).map(|i| io.input(i)).collect::<Result<Vec<_>, _>>()?;
            Box::new(ConcatenateLayer::new(inputs, io.output(0)?, *axis)?)
        }
        NodeKind::Split { axis, .. } => {
            let outputs = (0..node.num_outputs()).map(|i| io.output(i)).collect::<Result<Vec<_>, _>>()?;
            Box::new(SplitLayer::new(io.input(0)?, outputs, *axis))
        }
        NodeKind::Eltwise(op) => Box::new(EltwiseLayer::new(io.input(0)?, io.input(1)?, io.output(0)?, *op)),
        NodeKind::FullyConnected { num_outputs } => Box::new(FullyConnectedLayer::new(
            io.input(0)?,
            io.input(1)?,
            io.optional_input(2),
            io.output(0)?,
            *num_outputs,
        )),
        NodeKind::Pooling(info) => Box::new(PoolingLayer::new(io.input(0)?, io.output(0)?, *info)?),
        NodeKind::Softmax { beta } => Box::new(SoftmaxLayer::new(io.input(0)?, io.output(0)?, *beta)),
        NodeKind::Flatten | NodeKind::Reshape { .. } => Box::new(CopyLayer::new(io.input(0)?, io.output(0)?)),
    };

    tracing::debug!(node = node.name(), kind = %node.node_type(), "function configured");
    Ok(Some(function))
}

/// Handle lookup for one node's inputs and outputs.
struct NodeIo<'g> {
    graph: &'g Graph,
    node: &'g Node,
}

impl NodeIo<'_> {
    fn input(&self, idx: usize) -> Result<Rc<dyn TensorHandle>, GraphError> {
        self.optional_input(idx).ok_or_else(|| {
            GraphError::Resource(format!("input {idx} of node '{}' has no handle", self.node.name()))
        })
    }

    fn optional_input(&self, idx: usize) -> Option<Rc<dyn TensorHandle>> {
        let tid = self.graph.node_input_tensor(self.node.id(), idx)?;
        self.graph.tensor(tid)?.handle().cloned()
    }

    fn output(&self, idx: usize) -> Result<Rc<dyn TensorHandle>, GraphError> {
        self.node
            .output_id(idx)
            .and_then(|tid| self.graph.tensor(tid))
            .and_then(|t| t.handle().cloned())
            .ok_or_else(|| GraphError::Resource(format!("output {idx} of node '{}' has no handle", self.node.name())))
    }
}

/// Extents of a rank-4 image tensor and its element order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Geometry {
    pub n: usize,
    pub c: usize,
    pub h: usize,
    pub w: usize,
    layout: DataLayout,
}

impl Geometry {
    pub fn of(desc: &TensorDescriptor) -> Result<Self, GraphError> {
        Ok(Self {
            n: desc.dimension(DataLayoutDimension::Batches)?,
            c: desc.dimension(DataLayoutDimension::Channel)?,
            h: desc.dimension(DataLayoutDimension::Height)?,
            w: desc.dimension(DataLayoutDimension::Width)?,
            layout: desc.layout,
        })
    }

    /// Flat index of element `(n, c, y, x)`.
    #[inline]
    pub fn index(&self, n: usize, c: usize, y: usize, x: usize) -> usize {
        match self.layout {
            DataLayout::Nchw => ((n * self.c + c) * self.h + y) * self.w + x,
            DataLayout::Nhwc => ((n * self.h + y) * self.w + x) * self.c + c,
        }
    }

    pub fn len(&self) -> usize {
        self.n * self.c * self.h * self.w
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensor_core::DType;

    #[test]
    fn test_geometry_index_follows_layout() {
        let nchw = Geometry::of(&TensorDescriptor::new([1, 2, 3, 4], DType::F32)).unwrap();
        assert_eq!((nchw.c, nchw.h, nchw.w), (2, 3, 4));
        assert_eq!(nchw.index(0, 1, 0, 0), 12);
        assert_eq!(nchw.index(0, 0, 1, 2), 6);

        let nhwc = Geometry::of(&TensorDescriptor::new([1, 3, 4, 2], DType::F32).with_layout(DataLayout::Nhwc)).unwrap();
        assert_eq!((nhwc.c, nhwc.h, nhwc.w), (2, 3, 4));
        assert_eq!(nhwc.index(0, 1, 0, 0), 1);
        assert_eq!(nhwc.index(0, 0, 1, 2), 12);
        assert_eq!(nhwc.len(), 24);
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use crate::HostTensorHandle;
    use graph_ir::{write_f32, TensorHandle};
    use memory_manager::HeapAllocator;
    use std::rc::Rc;
    use tensor_core::TensorDescriptor;

    /// An allocated host handle, filled with `values` if any are given.
    pub fn tensor(desc: TensorDescriptor, values: &[f32]) -> Rc<dyn TensorHandle> {
        let handle: Rc<dyn TensorHandle> = Rc::new(HostTensorHandle::new(desc, Rc::new(HeapAllocator::unbounded())));
        handle.allocate().unwrap();
        if !values.is_empty() {
            write_f32(&*handle, values).unwrap();
        }
        handle
    }
}
