// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Blob pools and the manager that hands them out.
//!
//! A [`BlobMemoryPool`] owns one region per blob. Acquiring it for a group
//! binds every mapped [`crate::Memory`] to its blob; releasing unbinds
//! them. The [`PoolManager`] holds the interchangeable pools of one memory
//! manager and lends them out one at a time.

use crate::{Allocator, BlobInfo, MemoryError, MemoryMapping, Region};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

/// A set of allocated blobs matching a lifetime manager's requirements.
pub struct BlobMemoryPool {
    allocator: Rc<dyn Allocator>,
    infos: Vec<BlobInfo>,
    blobs: Vec<Region>,
}

impl BlobMemoryPool {
    /// Allocates one region per blob.
    pub fn new(allocator: Rc<dyn Allocator>, infos: Vec<BlobInfo>) -> Result<Self, MemoryError> {
        let blobs = infos
            .iter()
            .map(|info| allocator.make_region(info.size.max(1)))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(
            blobs = blobs.len(),
            bytes = infos.iter().map(|i| i.size).sum::<usize>(),
            "blob pool allocated"
        );
        Ok(Self {
            allocator,
            infos,
            blobs,
        })
    }

    /// Binds each mapping's memory to its blob.
    pub fn acquire(&self, mappings: &[MemoryMapping]) -> Result<(), MemoryError> {
        for mapping in mappings {
            let blob = self.blobs.get(mapping.blob).ok_or(MemoryError::InvalidBlob {
                index: mapping.blob,
                blobs: self.blobs.len(),
            })?;
            mapping.memory.bind(blob.clone());
        }
        Ok(())
    }

    /// Unbinds each mapping's memory.
    pub fn release(&self, mappings: &[MemoryMapping]) {
        for mapping in mappings {
            mapping.memory.unbind();
        }
    }

    /// Allocates a second pool with the same blob layout.
    pub fn duplicate(&self) -> Result<Self, MemoryError> {
        Self::new(Rc::clone(&self.allocator), self.infos.clone())
    }

    pub fn num_blobs(&self) -> usize {
        self.blobs.len()
    }

    /// Total bytes held by this pool.
    pub fn size_bytes(&self) -> usize {
        self.blobs.iter().map(Region::size_bytes).sum()
    }
}

impl fmt::Debug for BlobMemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobMemoryPool")
            .field("blobs", &self.infos)
            .finish()
    }
}

/// Lends pools to memory groups.
///
/// Locking takes a pool out of the free list; unlocking puts it back.
/// With a single-threaded runtime there is nothing to wait for, so locking
/// with every pool out is an error rather than a block.
#[derive(Debug, Default)]
pub struct PoolManager {
    free_pools: VecDeque<BlobMemoryPool>,
    occupied: usize,
}

impl PoolManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_pool(&mut self, pool: BlobMemoryPool) {
        self.free_pools.push_back(pool);
    }

    pub fn lock_pool(&mut self) -> Result<BlobMemoryPool, MemoryError> {
        let pool = self.free_pools.pop_front().ok_or(MemoryError::NoFreePools)?;
        self.occupied += 1;
        Ok(pool)
    }

    pub fn unlock_pool(&mut self, pool: BlobMemoryPool) {
        self.occupied = self.occupied.saturating_sub(1);
        self.free_pools.push_front(pool);
    }

    /// Number of pools, free or locked.
    pub fn num_pools(&self) -> usize {
        self.free_pools.len() + self.occupied
    }

    /// Drops every pool. Fails while any pool is locked.
    pub fn clear_pools(&mut self) -> Result<(), MemoryError> {
        if self.occupied > 0 {
            return Err(MemoryError::PoolsInUse(self.occupied));
        }
        self.free_pools.clear();
        Ok(())
    }

    /// Bytes held by the free pools.
    pub fn free_bytes(&self) -> usize {
        self.free_pools.iter().map(BlobMemoryPool::size_bytes).sum()
    }
}
