// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Graph tensors: descriptor, backend handle and accessor.

use crate::{EdgeId, TensorAccessor, TensorHandle, TensorId};
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;
use tensor_core::TensorDescriptor;

/// A logical tensor owned by the graph.
///
/// The handle is created at finalization; until then only the descriptor
/// exists. Edges bound to the tensor are those that carry it.
pub struct Tensor {
    pub(crate) id: TensorId,
    pub(crate) desc: TensorDescriptor,
    pub(crate) handle: Option<Rc<dyn TensorHandle>>,
    pub(crate) accessor: Option<Box<dyn TensorAccessor>>,
    pub(crate) bound_edges: BTreeSet<EdgeId>,
}

impl Tensor {
    pub(crate) fn new(id: TensorId, desc: TensorDescriptor) -> Self {
        Self {
            id,
            desc,
            handle: None,
            accessor: None,
            bound_edges: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> TensorId {
        self.id
    }

    pub fn desc(&self) -> &TensorDescriptor {
        &self.desc
    }

    pub fn desc_mut(&mut self) -> &mut TensorDescriptor {
        &mut self.desc
    }

    pub fn handle(&self) -> Option<&Rc<dyn TensorHandle>> {
        self.handle.as_ref()
    }

    pub fn set_handle(&mut self, handle: Option<Rc<dyn TensorHandle>>) {
        self.handle = handle;
    }

    pub fn has_accessor(&self) -> bool {
        self.accessor.is_some()
    }

    pub fn set_accessor(&mut self, accessor: Option<Box<dyn TensorAccessor>>) {
        self.accessor = accessor;
    }

    pub fn take_accessor(&mut self) -> Option<Box<dyn TensorAccessor>> {
        self.accessor.take()
    }

    pub fn bound_edges(&self) -> &BTreeSet<EdgeId> {
        &self.bound_edges
    }

    /// Runs the accessor on the handle.
    ///
    /// Returns `false` when there is no accessor, the handle is missing or
    /// unallocated, or the accessor reports exhaustion.
    pub fn call_accessor(&mut self) -> bool {
        let (Some(accessor), Some(handle)) = (self.accessor.as_mut(), self.handle.as_ref()) else {
            return false;
        };
        if !handle.is_allocated() {
            tracing::debug!(tensor = %self.id, "accessor skipped: handle not allocated");
            return false;
        }
        accessor.access_tensor(handle.as_ref())
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("id", &self.id)
            .field("desc", &self.desc)
            .field("handle", &self.handle.as_ref().map(|h| h.id()))
            .field("has_accessor", &self.accessor.is_some())
            .field("bound_edges", &self.bound_edges)
            .finish()
    }
}
