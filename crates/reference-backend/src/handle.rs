// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host tensor handles.
//!
//! A [`HostTensorHandle`] owns a [`Memory`] slot. Unmanaged, it binds a
//! region from the target's allocator on `allocate`. Managed by a memory
//! group, `allocate` only ends its lifetime and the group binds a pooled
//! blob whenever it is acquired.
//!
//! A [`SubTensorHandle`] is a byte window into a root host handle.

use graph_ir::{GraphError, HandleId, TensorHandle};
use memory_manager::{Allocator, Memory, MemoryGroup, ObjectId};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use tensor_core::TensorDescriptor;

/// A root handle backed by host memory.
pub struct HostTensorHandle {
    id: HandleId,
    desc: TensorDescriptor,
    memory: Memory,
    allocator: Rc<dyn Allocator>,
    group: RefCell<Option<MemoryGroup>>,
    used: Cell<bool>,
}

impl HostTensorHandle {
    pub fn new(desc: TensorDescriptor, allocator: Rc<dyn Allocator>) -> Self {
        Self {
            id: ObjectId::next(),
            desc,
            memory: Memory::new(),
            allocator,
            group: RefCell::new(None),
            used: Cell::new(true),
        }
    }

    /// The memory group that manages this handle, if any.
    pub fn group(&self) -> Option<MemoryGroup> {
        self.group.borrow().clone()
    }
}

impl TensorHandle for HostTensorHandle {
    fn id(&self) -> HandleId {
        self.id
    }

    fn descriptor(&self) -> &TensorDescriptor {
        &self.desc
    }

    fn allocate(&self) -> Result<(), GraphError> {
        if let Some(group) = self.group.borrow().as_ref() {
            group.finalize_memory(self.id, self.memory.clone(), self.size_bytes(), 0)?;
            return Ok(());
        }
        if self.memory.is_bound() || self.size_bytes() == 0 {
            return Ok(());
        }
        let region = self.allocator.make_region(self.size_bytes())?;
        self.memory.bind(region);
        Ok(())
    }

    fn free(&self) {
        if self.memory.unbind().is_some() {
            tracing::trace!(handle = self.id.as_u64(), "host memory freed");
        }
    }

    fn manage(&self, group: &MemoryGroup) -> Result<(), GraphError> {
        if group.manage(self.id)? {
            *self.group.borrow_mut() = Some(group.clone());
        }
        Ok(())
    }

    fn is_used(&self) -> bool {
        self.used.get()
    }

    fn mark_as_unused(&self) {
        self.used.set(false);
    }

    fn is_allocated(&self) -> bool {
        self.memory.is_bound()
    }

    fn with_bytes(&self, f: &mut dyn FnMut(&[u8])) -> Result<(), GraphError> {
        self.memory.with_bytes(0, self.size_bytes(), |bytes| f(bytes))?;
        Ok(())
    }

    fn with_bytes_mut(&self, f: &mut dyn FnMut(&mut [u8])) -> Result<(), GraphError> {
        self.memory.with_bytes_mut(0, self.size_bytes(), |bytes| f(bytes))?;
        Ok(())
    }
}

impl fmt::Debug for HostTensorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostTensorHandle")
            .field("id", &self.id)
            .field("shape", &self.desc.shape)
            .field("bytes", &self.size_bytes())
            .field("allocated", &self.is_allocated())
            .field("managed", &self.group.borrow().is_some())
            .field("used", &self.used.get())
            .finish()
    }
}

/// A view of `desc.total_size()` bytes at `offset` inside a root handle.
pub struct SubTensorHandle {
    id: HandleId,
    desc: TensorDescriptor,
    parent: Weak<dyn TensorHandle>,
    offset: usize,
    used: Cell<bool>,
}

impl SubTensorHandle {
    /// `parent` must be a root handle.
    pub fn new(parent: &Rc<dyn TensorHandle>, desc: TensorDescriptor, offset: usize) -> Self {
        Self {
            id: ObjectId::next(),
            desc,
            parent: Rc::downgrade(parent),
            offset,
            used: Cell::new(true),
        }
    }

    fn root(&self) -> Result<Rc<dyn TensorHandle>, GraphError> {
        self.parent
            .upgrade()
            .ok_or_else(|| GraphError::Resource(format!("parent of view {} was dropped", self.id.as_u64())))
    }

    fn window_error(&self, available: usize) -> GraphError {
        GraphError::Resource(format!(
            "view of {} bytes at offset {} exceeds its parent's {available} bytes",
            self.size_bytes(),
            self.offset
        ))
    }
}

impl TensorHandle for SubTensorHandle {
    fn id(&self) -> HandleId {
        self.id
    }

    fn descriptor(&self) -> &TensorDescriptor {
        &self.desc
    }

    // Memory belongs to the root.
    fn allocate(&self) -> Result<(), GraphError> {
        Ok(())
    }

    fn free(&self) {}

    fn manage(&self, _group: &MemoryGroup) -> Result<(), GraphError> {
        Ok(())
    }

    fn is_used(&self) -> bool {
        self.used.get()
    }

    fn mark_as_unused(&self) {
        self.used.set(false);
    }

    fn is_allocated(&self) -> bool {
        self.parent.upgrade().is_some_and(|p| p.is_allocated())
    }

    fn parent_handle(&self) -> Option<Rc<dyn TensorHandle>> {
        self.parent.upgrade()
    }

    fn is_subtensor(&self) -> bool {
        true
    }

    fn byte_offset(&self) -> usize {
        self.offset
    }

    fn with_bytes(&self, f: &mut dyn FnMut(&[u8])) -> Result<(), GraphError> {
        let (start, end) = (self.offset, self.offset + self.size_bytes());
        let mut available = None;
        self.root()?.with_bytes(&mut |bytes| match bytes.get(start..end) {
            Some(window) => f(window),
            None => available = Some(bytes.len()),
        })?;
        match available {
            Some(len) => Err(self.window_error(len)),
            None => Ok(()),
        }
    }

    fn with_bytes_mut(&self, f: &mut dyn FnMut(&mut [u8])) -> Result<(), GraphError> {
        let (start, end) = (self.offset, self.offset + self.size_bytes());
        let mut available = None;
        self.root()?.with_bytes_mut(&mut |bytes| {
            let len = bytes.len();
            match bytes.get_mut(start..end) {
                Some(window) => f(window),
                None => available = Some(len),
            }
        })?;
        match available {
            Some(len) => Err(self.window_error(len)),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for SubTensorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubTensorHandle")
            .field("id", &self.id)
            .field("shape", &self.desc.shape)
            .field("offset", &self.offset)
            .field("parent_alive", &(self.parent.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph_ir::{read_f32, write_f32};
    use memory_manager::{HeapAllocator, MemoryManager};
    use tensor_core::DType;

    fn heap() -> Rc<dyn Allocator> {
        Rc::new(HeapAllocator::unbounded())
    }

    #[test]
    fn test_unmanaged_allocate_and_free() {
        let h = HostTensorHandle::new(TensorDescriptor::new([2, 3], DType::F32), heap());
        assert!(!h.is_allocated());
        h.allocate().unwrap();
        assert!(h.is_allocated());
        write_f32(&h, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(read_f32(&h).unwrap()[5], 6.0);

        h.mark_as_unused();
        h.release_if_unused();
        assert!(!h.is_allocated());
    }

    #[test]
    fn test_view_reads_parent_window() {
        let root: Rc<dyn TensorHandle> = Rc::new(HostTensorHandle::new(TensorDescriptor::new([4], DType::F32), heap()));
        root.allocate().unwrap();
        write_f32(root.as_ref(), &[1.0, 2.0, 3.0, 4.0]).unwrap();

        let view = SubTensorHandle::new(&root, TensorDescriptor::new([2], DType::F32), 8);
        assert!(view.is_allocated());
        assert_eq!(read_f32(&view).unwrap(), vec![3.0, 4.0]);
        write_f32(&view, &[7.0, 8.0]).unwrap();
        assert_eq!(read_f32(root.as_ref()).unwrap(), vec![1.0, 2.0, 7.0, 8.0]);

        let outside = SubTensorHandle::new(&root, TensorDescriptor::new([2], DType::F32), 12);
        assert!(matches!(read_f32(&outside), Err(GraphError::Resource(_))));
    }

    #[test]
    fn test_view_outlived_by_parent_reports_error() {
        let root: Rc<dyn TensorHandle> = Rc::new(HostTensorHandle::new(TensorDescriptor::new([4], DType::F32), heap()));
        let view = SubTensorHandle::new(&root, TensorDescriptor::new([2], DType::F32), 0);
        drop(root);
        assert!(!view.is_allocated());
        assert!(view.parent_handle().is_none());
        assert!(matches!(read_f32(&view), Err(GraphError::Resource(_))));
    }

    #[test]
    fn test_managed_handle_binds_on_acquire() {
        let alloc = heap();
        let mm = MemoryManager::on_demand();
        let group = MemoryGroup::new(Some(mm.clone()));
        let h = HostTensorHandle::new(TensorDescriptor::new([8], DType::F32), Rc::clone(&alloc));

        h.manage(&group).unwrap();
        h.allocate().unwrap();
        assert!(!h.is_allocated());
        assert!(h.group().is_some());
        group.finalize().unwrap();

        mm.populate(alloc, 1).unwrap();
        group.acquire().unwrap();
        assert!(h.is_allocated());
        group.release();
        assert!(!h.is_allocated());
    }
}
