// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The [`DeviceBackend`] implementation for host memory.

use crate::functions;
use crate::{HostTensorHandle, SubTensorHandle};
use graph_ir::{
    root_handle, ConvolutionInfo, ConvolutionMethod, DeviceBackend, ExecutableFunction, Graph, GraphContext, GraphError,
    MemoryManagerContext, NodeId, NodeKind, TensorHandle, ValidationError,
};
use memory_manager::HeapAllocator;
use std::rc::Rc;
use tensor_core::{DType, DataLayoutDimension, Shape, Target, TensorDescriptor};

/// Host backend serving one target with naive f32 kernels.
///
/// Stands in for a vendor backend: it can be registered for any target,
/// reported as unsupported to exercise fallback, and told whether it runs
/// grouped convolutions natively.
#[derive(Debug, Clone)]
pub struct ReferenceBackend {
    target: Target,
    supported: bool,
    grouped_convolution: bool,
}

impl ReferenceBackend {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            supported: true,
            grouped_convolution: false,
        }
    }

    /// Sets whether [`DeviceBackend::is_backend_supported`] reports `true`.
    pub fn with_support(mut self, supported: bool) -> Self {
        self.supported = supported;
        self
    }

    /// Accepts convolutions with more than one group.
    pub fn with_grouped_convolution(mut self, enabled: bool) -> Self {
        self.grouped_convolution = enabled;
        self
    }

    pub fn target(&self) -> Target {
        self.target
    }

    fn validate_convolution(
        &self,
        info: &ConvolutionInfo,
        src: &TensorDescriptor,
        weights: &TensorDescriptor,
        bias: Option<&TensorDescriptor>,
    ) -> Result<(), ValidationError> {
        if info.num_groups > 1 && !self.grouped_convolution {
            return Err(ValidationError::new(format!(
                "grouped convolution ({} groups) is not supported",
                info.num_groups
            )));
        }
        if info.method == ConvolutionMethod::Winograd {
            return Err(ValidationError::new("winograd convolution is not supported"));
        }
        if src.shape.rank() != 4 || weights.shape.rank() != 4 {
            return Err(ValidationError::new(format!(
                "convolution needs rank-4 input and weights, got {} and {}",
                src.shape, weights.shape
            )));
        }
        let channels = src.dimension(DataLayoutDimension::Channel).map_err(invalid)?;
        let kernel_channels = weights.dimension(DataLayoutDimension::Channel).map_err(invalid)?;
        if kernel_channels * info.num_groups.max(1) != channels {
            return Err(ValidationError::new(format!(
                "weights cover {kernel_channels} channels per group, input has {channels} in {} groups",
                info.num_groups
            )));
        }
        let ofm = weights.shape.dims()[0];
        match bias {
            Some(b) if b.shape != Shape::vector(ofm) => Err(ValidationError::new(format!(
                "bias shape {} does not match {ofm} output feature maps",
                b.shape
            ))),
            _ => Ok(()),
        }
    }
}

fn invalid(e: impl std::fmt::Display) -> ValidationError {
    ValidationError::new(e.to_string())
}

fn required<'a>(descs: &[Option<&'a TensorDescriptor>], idx: usize) -> Result<&'a TensorDescriptor, ValidationError> {
    descs
        .get(idx)
        .copied()
        .flatten()
        .ok_or_else(|| ValidationError::new(format!("input {idx} is not connected")))
}

impl DeviceBackend for ReferenceBackend {
    fn name(&self) -> &str {
        "reference"
    }

    fn is_backend_supported(&self) -> bool {
        self.supported
    }

    fn setup_backend_context(&self, ctx: &mut GraphContext) -> Result<(), GraphError> {
        if ctx.memory_management_ctx(self.target).is_some() {
            return Ok(());
        }
        let allocator = Rc::new(HeapAllocator::with_budget(ctx.config().memory_budget));
        ctx.insert_memory_management_ctx(MemoryManagerContext::new(self.target, allocator).with_memory_managers());
        tracing::debug!(device = %self.target, "backend context created");
        Ok(())
    }

    fn release_backend_context(&self, ctx: &mut GraphContext) {
        if ctx.remove_memory_management_ctx(self.target).is_some() {
            tracing::debug!(device = %self.target, "backend context released");
        }
    }

    fn create_tensor(&self, desc: &TensorDescriptor, ctx: &GraphContext) -> Result<Rc<dyn TensorHandle>, GraphError> {
        let target = match desc.target {
            Target::Unspecified => self.target,
            t => t,
        };
        let allocator = ctx
            .memory_management_ctx(target)
            .and_then(|c| c.allocator.clone())
            .ok_or_else(|| GraphError::Resource(format!("no allocator set up for target '{target}'")))?;
        Ok(Rc::new(HostTensorHandle::new(desc.clone(), allocator)))
    }

    fn create_subtensor(
        &self,
        parent: &Rc<dyn TensorHandle>,
        desc: TensorDescriptor,
        byte_offset: usize,
    ) -> Result<Rc<dyn TensorHandle>, GraphError> {
        // Views always point at the root, so nested views flatten.
        let root = root_handle(parent);
        let offset = parent.byte_offset() + byte_offset;
        if offset + desc.total_size() > root.size_bytes() {
            return Err(GraphError::Resource(format!(
                "view of {} bytes at offset {offset} exceeds its parent's {} bytes",
                desc.total_size(),
                root.size_bytes()
            )));
        }
        Ok(Rc::new(SubTensorHandle::new(&root, desc, offset)))
    }

    fn validate_operation(
        &self,
        kind: &NodeKind,
        inputs: &[Option<&TensorDescriptor>],
        outputs: &[Option<&TensorDescriptor>],
    ) -> Result<(), ValidationError> {
        if let Some(desc) = inputs
            .iter()
            .chain(outputs)
            .flatten()
            .find(|d| d.data_type != DType::F32)
        {
            return Err(ValidationError::new(format!("data type {} is not supported", desc.data_type)));
        }

        match kind {
            NodeKind::Convolution(info) => {
                self.validate_convolution(info, required(inputs, 0)?, required(inputs, 1)?, inputs.get(2).copied().flatten())
            }
            NodeKind::BatchNormalization { .. } => {
                let channels = required(inputs, 0)?
                    .dimension(DataLayoutDimension::Channel)
                    .map_err(invalid)?;
                let expected = Shape::vector(channels);
                inputs
                    .iter()
                    .enumerate()
                    .skip(1)
                    .filter_map(|(idx, d)| d.map(|d| (idx, d)))
                    .find(|(_, d)| d.shape != expected)
                    .map_or(Ok(()), |(idx, d)| {
                        Err(ValidationError::new(format!(
                            "parameter {idx} has shape {}, expected {expected}",
                            d.shape
                        )))
                    })
            }
            NodeKind::FullyConnected { num_outputs } => {
                let src = required(inputs, 0)?;
                let weights = required(inputs, 1)?;
                let batches = match src.shape.rank() {
                    0 | 1 => 1,
                    _ => src.shape.dims()[0].max(1),
                };
                let expected = Shape::matrix(*num_outputs, src.num_elements() / batches);
                if weights.shape != expected {
                    return Err(ValidationError::new(format!(
                        "weights shape {} does not match expected {expected}",
                        weights.shape
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn configure_node(
        &self,
        graph: &Graph,
        node: NodeId,
        ctx: &GraphContext,
    ) -> Result<Option<Box<dyn ExecutableFunction>>, GraphError> {
        functions::configure(graph, node, ctx, self.target)
    }
}
