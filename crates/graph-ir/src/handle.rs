// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Backend tensor handles.
//!
//! A [`TensorHandle`] binds a graph tensor's descriptor to backend memory.
//! Root handles own their memory, either directly or through a memory
//! group. View handles (sub-tensors) alias a byte range of a root handle
//! and hold only a weak reference to it:
//!
//! ```text
//!   root handle ────────────── memory region
//!     ▲   ▲                    [ view A | view B ]
//!     │   └── view B (weak, offset = |A|)
//!     └────── view A (weak, offset = 0)
//! ```
//!
//! Views of views are flattened at creation, so `parent_handle` always
//! returns a root.

use crate::{GraphError, HandleId};
use memory_manager::MemoryGroup;
use std::fmt;
use std::rc::Rc;
use tensor_core::{DType, Target, TensorDescriptor, TensorError};

/// Concrete memory binding of a graph tensor.
///
/// Handles are shared as `Rc<dyn TensorHandle>` between the graph, the
/// tasks that read or write them and the memory managers. All state
/// changes go through `&self`.
pub trait TensorHandle: fmt::Debug {
    fn id(&self) -> HandleId;

    fn descriptor(&self) -> &TensorDescriptor;

    fn target(&self) -> Target {
        self.descriptor().target
    }

    /// Bytes this handle covers.
    fn size_bytes(&self) -> usize {
        self.descriptor().total_size()
    }

    /// Gives the handle backing memory.
    ///
    /// For a handle managed by a memory group this ends its lifetime in
    /// the group instead; memory is bound when the group is acquired.
    fn allocate(&self) -> Result<(), GraphError>;

    /// Drops the backing memory.
    fn free(&self);

    /// Starts the handle's lifetime in `group`.
    fn manage(&self, group: &MemoryGroup) -> Result<(), GraphError>;

    /// Returns `false` once a task has consumed the handle's content
    /// during preparation (e.g. weights repacked into a private buffer).
    fn is_used(&self) -> bool;

    fn mark_as_unused(&self);

    /// Frees the memory if the handle is no longer used.
    fn release_if_unused(&self) {
        if !self.is_used() {
            self.free();
        }
    }

    /// Returns `true` if the handle can be read and written right now.
    fn is_allocated(&self) -> bool;

    /// The root handle this view aliases, or `None` for a root.
    fn parent_handle(&self) -> Option<Rc<dyn TensorHandle>> {
        None
    }

    fn is_subtensor(&self) -> bool {
        false
    }

    /// Byte offset of this view inside its root.
    fn byte_offset(&self) -> usize {
        0
    }

    fn with_bytes(&self, f: &mut dyn FnMut(&[u8])) -> Result<(), GraphError>;

    fn with_bytes_mut(&self, f: &mut dyn FnMut(&mut [u8])) -> Result<(), GraphError>;
}

/// Follows `parent_handle` to the handle that owns the memory.
pub fn root_handle(handle: &Rc<dyn TensorHandle>) -> Rc<dyn TensorHandle> {
    let mut current = Rc::clone(handle);
    while let Some(parent) = current.parent_handle() {
        current = parent;
    }
    current
}

/// Reads an F32 handle into a vector.
pub fn read_f32(handle: &dyn TensorHandle) -> Result<Vec<f32>, GraphError> {
    check_f32(handle, "read_f32")?;
    let mut values = Vec::with_capacity(handle.descriptor().num_elements());
    handle.with_bytes(&mut |bytes| {
        values.extend(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
        );
    })?;
    Ok(values)
}

/// Writes `values` into an F32 handle. The length must match exactly.
pub fn write_f32(handle: &dyn TensorHandle, values: &[f32]) -> Result<(), GraphError> {
    check_f32(handle, "write_f32")?;
    let expected = handle.descriptor().num_elements();
    if values.len() != expected {
        return Err(TensorError::BufferSizeMismatch {
            expected: expected * 4,
            actual: values.len() * 4,
        }
        .into());
    }
    handle.with_bytes_mut(&mut |bytes| {
        for (chunk, v) in bytes.chunks_exact_mut(4).zip(values) {
            chunk.copy_from_slice(&v.to_le_bytes());
        }
    })
}

fn check_f32(handle: &dyn TensorHandle, op: &'static str) -> Result<(), GraphError> {
    let dtype = handle.descriptor().data_type;
    if dtype != DType::F32 {
        return Err(TensorError::UnsupportedDType { op, dtype }.into());
    }
    Ok(())
}
