// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Allocated regions and the rebindable memory slots that view them.
//!
//! ```text
//! HeapAllocator::make_region(size)
//!       │
//!       ▼
//!    Region ◄── Rc<RegionInner>: buffer + handle back to the allocator
//!       │
//!       │  last clone dropped
//!       ▼
//!   AllocatorInner::return_buffer() ──► free list
//! ```
//!
//! A [`Memory`] is what a tensor holds. The memory manager binds and
//! unbinds pooled regions into it, so several tensors with disjoint
//! lifetimes can read the same region through their own slots.

use crate::allocator::AllocatorInner;
use crate::MemoryError;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

struct RegionInner {
    data: RefCell<Vec<u8>>,
    size_bytes: usize,
    allocator: Rc<AllocatorInner>,
}

impl Drop for RegionInner {
    fn drop(&mut self) {
        let buffer = std::mem::take(self.data.get_mut());
        self.allocator.return_buffer(buffer, self.size_bytes);
    }
}

/// A shared handle to one allocation.
///
/// Clones share the buffer. The buffer goes back to its allocator when the
/// last clone is dropped.
#[derive(Clone)]
pub struct Region {
    inner: Rc<RegionInner>,
}

impl Region {
    pub(crate) fn new(data: Vec<u8>, size_bytes: usize, allocator: Rc<AllocatorInner>) -> Self {
        Self {
            inner: Rc::new(RegionInner {
                data: RefCell::new(data),
                size_bytes,
                allocator,
            }),
        }
    }

    /// Returns the size of this allocation in bytes.
    pub fn size_bytes(&self) -> usize {
        self.inner.size_bytes
    }

    /// Returns `true` if both handles point at the same allocation.
    pub fn same_region(&self, other: &Region) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Runs `f` over `len` bytes starting at `offset`.
    pub fn with_bytes<R>(
        &self,
        offset: usize,
        len: usize,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Result<R, MemoryError> {
        self.check_range(offset, len)?;
        let data = self
            .inner
            .data
            .try_borrow()
            .map_err(|_| MemoryError::BorrowConflict)?;
        Ok(f(&data[offset..offset + len]))
    }

    /// Runs `f` over `len` mutable bytes starting at `offset`.
    pub fn with_bytes_mut<R>(
        &self,
        offset: usize,
        len: usize,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, MemoryError> {
        self.check_range(offset, len)?;
        let mut data = self
            .inner
            .data
            .try_borrow_mut()
            .map_err(|_| MemoryError::BorrowConflict)?;
        Ok(f(&mut data[offset..offset + len]))
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<(), MemoryError> {
        let size = self.inner.size_bytes;
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok(()),
            _ => Err(MemoryError::OutOfBounds { offset, len, size }),
        }
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("size_bytes", &self.inner.size_bytes)
            .field("addr", &Rc::as_ptr(&self.inner))
            .finish()
    }
}

/// A slot through which a tensor sees its current region.
///
/// Clones share the slot, so the memory manager can bind a pooled blob
/// into a tensor it only knows through its mapping.
#[derive(Clone, Default)]
pub struct Memory {
    slot: Rc<RefCell<Option<Region>>>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `region`, replacing any previous binding.
    pub fn bind(&self, region: Region) {
        *self.slot.borrow_mut() = Some(region);
    }

    /// Removes the current binding and returns it.
    pub fn unbind(&self) -> Option<Region> {
        self.slot.borrow_mut().take()
    }

    /// Returns the bound region, if any.
    pub fn region(&self) -> Option<Region> {
        self.slot.borrow().clone()
    }

    pub fn is_bound(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Returns `true` if both handles share the same slot.
    pub fn same_slot(&self, other: &Memory) -> bool {
        Rc::ptr_eq(&self.slot, &other.slot)
    }

    /// Runs `f` over the bound region's bytes in `offset..offset + len`.
    pub fn with_bytes<R>(
        &self,
        offset: usize,
        len: usize,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Result<R, MemoryError> {
        self.region()
            .ok_or(MemoryError::Unbound)?
            .with_bytes(offset, len, f)
    }

    /// Mutable variant of [`Memory::with_bytes`].
    pub fn with_bytes_mut<R>(
        &self,
        offset: usize,
        len: usize,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, MemoryError> {
        self.region()
            .ok_or(MemoryError::Unbound)?
            .with_bytes_mut(offset, len, f)
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory")
            .field("region", &*self.slot.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{Allocator, HeapAllocator, Memory, MemoryBudget, MemoryError};

    #[test]
    fn test_region_bytes() {
        let alloc = HeapAllocator::new(MemoryBudget::from_mb(1));
        let region = alloc.make_region(16).unwrap();
        region.with_bytes_mut(4, 4, |b| b.fill(7)).unwrap();
        let sum: u32 = region
            .with_bytes(0, 16, |b| b.iter().map(|&x| x as u32).sum())
            .unwrap();
        assert_eq!(sum, 28);
    }

    #[test]
    fn test_region_out_of_bounds() {
        let alloc = HeapAllocator::new(MemoryBudget::from_mb(1));
        let region = alloc.make_region(16).unwrap();
        let err = region.with_bytes(8, 16, |_| ()).unwrap_err();
        assert!(matches!(err, MemoryError::OutOfBounds { size: 16, .. }));
    }

    #[test]
    fn test_region_returns_on_last_drop() {
        let alloc = HeapAllocator::new(MemoryBudget::from_mb(1));
        let region = alloc.make_region(1024).unwrap();
        let clone = region.clone();
        drop(region);
        assert_eq!(alloc.allocated_bytes(), 1024);
        drop(clone);
        assert_eq!(alloc.allocated_bytes(), 0);
    }

    #[test]
    fn test_memory_bind_unbind() {
        let alloc = HeapAllocator::new(MemoryBudget::from_mb(1));
        let mem = Memory::new();
        assert!(matches!(mem.with_bytes(0, 1, |_| ()), Err(MemoryError::Unbound)));

        let view = mem.clone();
        mem.bind(alloc.make_region(64).unwrap());
        assert!(view.is_bound());
        assert!(view.same_slot(&mem));

        view.unbind();
        assert!(!mem.is_bound());
        assert_eq!(alloc.allocated_bytes(), 0);
    }

    #[test]
    fn test_nested_mutable_borrow_is_reported() {
        let alloc = HeapAllocator::new(MemoryBudget::from_mb(1));
        let region = alloc.make_region(8).unwrap();
        let inner = region.clone();
        let nested = region
            .with_bytes_mut(0, 8, |_| inner.with_bytes(0, 8, |_| ()))
            .unwrap();
        assert_eq!(nested, Err(MemoryError::BorrowConflict));
    }
}
