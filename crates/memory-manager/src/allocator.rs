// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Budget-enforced host allocator.
//!
//! The [`HeapAllocator`] backs every region a backend hands out, whether
//! a tensor owns it alone or a blob pool shares it between tensors. It:
//!
//! 1. Enforces an optional hard ceiling. Allocations that would exceed the
//!    budget return `Err(OutOfMemory)`.
//! 2. Keeps returned buffers in a free list binned by size class, so
//!    repopulating pools after a graph is re-finalized reuses memory.
//! 3. Tracks allocation statistics, including the peak live byte count the
//!    cross-layer memory manager is meant to lower.
//!
//! # Size Classes
//! Returned buffers are binned by size class (the next power of two, at
//! least 4 KiB). A request is served from the free list when a buffer of
//! its class is available.

use crate::{AllocationStats, MemoryBudget, MemoryError, Region};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Minimum size class: 4 KB. Anything smaller is rounded up.
const MIN_SIZE_CLASS: usize = 4096;

/// Source of [`Region`]s for tensors and blob pools.
pub trait Allocator: fmt::Debug {
    /// Allocates a zeroed region of `size_bytes`.
    fn make_region(&self, size_bytes: usize) -> Result<Region, MemoryError>;

    /// Bytes currently held by live regions.
    fn allocated_bytes(&self) -> usize;

    /// Snapshot of the allocator's statistics.
    fn stats(&self) -> AllocationStats;
}

/// State shared between the allocator and the regions it handed out.
pub(crate) struct AllocatorInner {
    budget: Option<MemoryBudget>,
    allocated_bytes: Cell<usize>,
    free_buffers: RefCell<HashMap<usize, Vec<Vec<u8>>>>,
    free_list_bytes: Cell<usize>,
    stats: RefCell<AllocationStats>,
}

impl AllocatorInner {
    /// Called when the last clone of a [`Region`] is dropped.
    pub(crate) fn return_buffer(&self, buffer: Vec<u8>, size_bytes: usize) {
        self.allocated_bytes
            .set(self.allocated_bytes.get().saturating_sub(size_bytes));
        self.stats.borrow_mut().record_release(size_bytes);

        let size_class = size_class_for(size_bytes);
        self.free_list_bytes
            .set(self.free_list_bytes.get() + buffer.capacity());
        self.free_buffers
            .borrow_mut()
            .entry(size_class)
            .or_default()
            .push(buffer);
    }
}

/// The default host allocator.
///
/// Clones share the same budget, free list and statistics.
///
/// # Example
/// ```
/// use memory_manager::{Allocator, HeapAllocator, MemoryBudget};
///
/// let alloc = HeapAllocator::new(MemoryBudget::from_mb(64));
/// let region = alloc.make_region(1024 * 1024).unwrap();
/// assert_eq!(alloc.allocated_bytes(), 1024 * 1024);
///
/// drop(region);
/// assert_eq!(alloc.allocated_bytes(), 0);
/// ```
#[derive(Clone)]
pub struct HeapAllocator {
    inner: Rc<AllocatorInner>,
}

impl HeapAllocator {
    /// Creates an allocator that refuses to exceed `budget`.
    pub fn new(budget: MemoryBudget) -> Self {
        Self::with_budget(Some(budget))
    }

    /// Creates an allocator without a ceiling.
    pub fn unbounded() -> Self {
        Self::with_budget(None)
    }

    /// Creates an allocator with an optional ceiling.
    pub fn with_budget(budget: Option<MemoryBudget>) -> Self {
        Self {
            inner: Rc::new(AllocatorInner {
                budget,
                allocated_bytes: Cell::new(0),
                free_buffers: RefCell::new(HashMap::new()),
                free_list_bytes: Cell::new(0),
                stats: RefCell::new(AllocationStats::default()),
            }),
        }
    }

    /// Returns the number of bytes remaining before hitting the budget.
    pub fn available_bytes(&self) -> usize {
        match self.inner.budget {
            Some(budget) => budget.as_bytes().saturating_sub(self.inner.allocated_bytes.get()),
            None => usize::MAX,
        }
    }

    /// Returns the memory budget, if one is set.
    pub fn budget(&self) -> Option<MemoryBudget> {
        self.inner.budget
    }

    /// Drops every cached free buffer.
    pub fn shrink(&self) {
        self.inner.free_buffers.borrow_mut().clear();
        self.inner.free_list_bytes.set(0);
    }

    /// Returns the approximate number of bytes held in the free list.
    pub fn free_list_bytes(&self) -> usize {
        self.inner.free_list_bytes.get()
    }

    fn take_cached(&self, size_bytes: usize) -> Option<Vec<u8>> {
        let size_class = size_class_for(size_bytes);
        let mut free = self.inner.free_buffers.borrow_mut();
        let mut buf = free.get_mut(&size_class)?.pop()?;
        self.inner
            .free_list_bytes
            .set(self.inner.free_list_bytes.get().saturating_sub(buf.capacity()));
        buf.clear();
        buf.resize(size_bytes, 0);
        Some(buf)
    }
}

impl Allocator for HeapAllocator {
    fn make_region(&self, size_bytes: usize) -> Result<Region, MemoryError> {
        if size_bytes == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }

        let current = self.inner.allocated_bytes.get();
        if let Some(budget) = self.inner.budget {
            let budget = budget.as_bytes();
            if current + size_bytes > budget {
                self.inner.stats.borrow_mut().record_oom();
                tracing::warn!(
                    requested = size_bytes,
                    allocated = current,
                    budget,
                    "allocation exceeds memory budget"
                );
                return Err(MemoryError::OutOfMemory {
                    requested_bytes: size_bytes,
                    available_bytes: budget.saturating_sub(current),
                    budget_bytes: budget,
                });
            }
        }

        let cached = self.take_cached(size_bytes);
        let is_hit = cached.is_some();
        let data = cached.unwrap_or_else(|| {
            let mut buf = Vec::with_capacity(size_class_for(size_bytes));
            buf.resize(size_bytes, 0);
            buf
        });

        let live = current + size_bytes;
        self.inner.allocated_bytes.set(live);
        {
            let mut stats = self.inner.stats.borrow_mut();
            if is_hit {
                stats.record_cache_hit(size_bytes);
            } else {
                stats.record_cache_miss(size_bytes);
            }
            stats.update_peak(live);
        }

        Ok(Region::new(data, size_bytes, Rc::clone(&self.inner)))
    }

    fn allocated_bytes(&self) -> usize {
        self.inner.allocated_bytes.get()
    }

    fn stats(&self) -> AllocationStats {
        self.inner.stats.borrow().clone()
    }
}

/// Computes the size class for a given allocation size.
///
/// Returns the smallest power of 2 that is ≥ `size` and ≥ `MIN_SIZE_CLASS`.
fn size_class_for(size: usize) -> usize {
    size.max(MIN_SIZE_CLASS).next_power_of_two()
}

impl fmt::Debug for HeapAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapAllocator")
            .field("budget", &self.inner.budget)
            .field("allocated_bytes", &self.allocated_bytes())
            .field("free_list_bytes", &self.free_list_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_drop() {
        let alloc = HeapAllocator::new(MemoryBudget::from_mb(1));

        let region = alloc.make_region(1024).unwrap();
        assert_eq!(alloc.allocated_bytes(), 1024);
        assert_eq!(region.size_bytes(), 1024);

        drop(region);
        assert_eq!(alloc.allocated_bytes(), 0);
    }

    #[test]
    fn test_oom() {
        let alloc = HeapAllocator::new(MemoryBudget::from_bytes(1024));

        let _r1 = alloc.make_region(512).unwrap();
        let _r2 = alloc.make_region(512).unwrap();

        let result = alloc.make_region(1);
        assert!(matches!(result, Err(MemoryError::OutOfMemory { .. })));
        assert_eq!(alloc.stats().oom_count, 1);
    }

    #[test]
    fn test_unbounded() {
        let alloc = HeapAllocator::unbounded();
        let _r = alloc.make_region(64 * 1024 * 1024).unwrap();
        assert_eq!(alloc.available_bytes(), usize::MAX);
        assert!(alloc.budget().is_none());
    }

    #[test]
    fn test_zero_allocation() {
        let alloc = HeapAllocator::unbounded();
        assert!(matches!(
            alloc.make_region(0),
            Err(MemoryError::ZeroSizedAllocation)
        ));
    }

    #[test]
    fn test_free_list_reuse_is_zeroed() {
        let alloc = HeapAllocator::new(MemoryBudget::from_mb(1));

        let region = alloc.make_region(4096).unwrap();
        region.with_bytes_mut(0, 4096, |b| b.fill(0xFF)).unwrap();
        drop(region);
        assert!(alloc.free_list_bytes() > 0);

        let again = alloc.make_region(4000).unwrap();
        assert!(again.with_bytes(0, 4000, |b| b.iter().all(|&x| x == 0)).unwrap());

        let stats = alloc.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
    }

    #[test]
    fn test_peak_tracking() {
        let alloc = HeapAllocator::new(MemoryBudget::from_mb(1));
        let a = alloc.make_region(1000).unwrap();
        let b = alloc.make_region(2000).unwrap();
        drop(a);
        drop(b);
        assert_eq!(alloc.stats().peak_allocated_bytes, 3000);
        assert_eq!(alloc.stats().live_regions, 0);
    }

    #[test]
    fn test_shrink() {
        let alloc = HeapAllocator::unbounded();
        drop(alloc.make_region(8192).unwrap());
        alloc.shrink();
        assert_eq!(alloc.free_list_bytes(), 0);
    }

    #[test]
    fn test_size_class() {
        assert_eq!(size_class_for(1), MIN_SIZE_CLASS);
        assert_eq!(size_class_for(4096), 4096);
        assert_eq!(size_class_for(5000), 8192);
    }
}
