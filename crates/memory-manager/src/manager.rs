// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! On-demand memory manager.

use crate::{
    Allocator, BlobInfo, BlobLifetimeManager, BlobMemoryPool, GroupId, Memory, MemoryError,
    MemoryMapping, ObjectId, PoolManager,
};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

struct ManagerInner {
    lifetime: RefCell<BlobLifetimeManager>,
    pools: RefCell<PoolManager>,
}

/// A lifetime manager paired with the pools built from its requirements.
///
/// Groups register their objects while the graph is being finalized; the
/// pools are only allocated by [`MemoryManager::populate`], once the last
/// registering group has been finalized. Clones share state.
#[derive(Clone)]
pub struct MemoryManager {
    inner: Rc<ManagerInner>,
}

impl MemoryManager {
    pub fn on_demand() -> Self {
        Self {
            inner: Rc::new(ManagerInner {
                lifetime: RefCell::new(BlobLifetimeManager::new()),
                pools: RefCell::new(PoolManager::new()),
            }),
        }
    }

    /// Allocates `num_pools` pools sized for every group registered so far.
    ///
    /// Existing pools are dropped first, so a manager can be repopulated
    /// after more groups registered.
    pub fn populate(&self, allocator: Rc<dyn Allocator>, num_pools: usize) -> Result<(), MemoryError> {
        let lifetime = self.inner.lifetime.borrow();
        if lifetime.active_group().is_some() || !lifetime.are_all_finalized() {
            return Err(MemoryError::NotFinalized);
        }
        let mut pools = self.inner.pools.borrow_mut();
        pools.clear_pools()?;
        if num_pools == 0 {
            return Ok(());
        }

        let template = lifetime.create_pool(allocator)?;
        for _ in 1..num_pools {
            pools.register_pool(template.duplicate()?);
        }
        pools.register_pool(template);
        tracing::debug!(
            num_pools,
            blobs = lifetime.blobs().len(),
            "memory manager populated"
        );
        Ok(())
    }

    /// Drops every pool.
    pub fn clear(&self) -> Result<(), MemoryError> {
        self.inner.pools.borrow_mut().clear_pools()
    }

    pub fn num_pools(&self) -> usize {
        self.inner.pools.borrow().num_pools()
    }

    /// Blob requirements accumulated from every finalized group.
    pub fn blob_infos(&self) -> Vec<BlobInfo> {
        self.inner.lifetime.borrow().blobs().to_vec()
    }

    /// Sum of blob sizes, i.e. the bytes one pool occupies.
    pub fn pool_size_bytes(&self) -> usize {
        self.inner
            .lifetime
            .borrow()
            .blobs()
            .iter()
            .map(|b| b.size)
            .sum()
    }

    /// Returns `true` if both handles refer to the same manager.
    pub fn same_manager(&self, other: &MemoryManager) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn register_and_start(&self, group: GroupId, object: ObjectId) -> Result<(), MemoryError> {
        let mut lifetime = self.inner.lifetime.borrow_mut();
        lifetime.register_group(group)?;
        lifetime.start_lifetime(object)
    }

    pub(crate) fn end_lifetime(
        &self,
        object: ObjectId,
        memory: Memory,
        size: usize,
        alignment: usize,
    ) -> Result<(), MemoryError> {
        self.inner
            .lifetime
            .borrow_mut()
            .end_lifetime(object, memory, size, alignment)
    }

    pub(crate) fn finalize_group(&self, group: GroupId) -> Result<Vec<MemoryMapping>, MemoryError> {
        self.inner.lifetime.borrow_mut().finalize_group(group)
    }

    pub(crate) fn lock_pool(&self) -> Result<BlobMemoryPool, MemoryError> {
        self.inner.pools.borrow_mut().lock_pool()
    }

    pub(crate) fn unlock_pool(&self, pool: BlobMemoryPool) {
        self.inner.pools.borrow_mut().unlock_pool(pool)
    }
}

impl fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryManager")
            .field("blobs", &self.blob_infos())
            .field("num_pools", &self.num_pools())
            .finish()
    }
}
