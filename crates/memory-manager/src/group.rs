// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Memory groups: the objects of one scope that share a pool.

use crate::{BlobMemoryPool, Memory, MemoryError, MemoryManager, MemoryMapping};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_OBJECT: AtomicU64 = AtomicU64::new(1);
static NEXT_GROUP: AtomicU64 = AtomicU64::new(1);

/// Identifies an object whose memory a group manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Returns a process-unique id.
    pub fn next() -> Self {
        Self(NEXT_OBJECT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Identifies a memory group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(u64);

impl GroupId {
    pub fn next() -> Self {
        Self(NEXT_GROUP.fetch_add(1, Ordering::Relaxed))
    }
}

struct GroupInner {
    id: GroupId,
    manager: Option<MemoryManager>,
    mappings: RefCell<Vec<MemoryMapping>>,
    pool: RefCell<Option<BlobMemoryPool>>,
    finalized: Cell<bool>,
}

/// A set of managed objects that are bound to one pool together.
///
/// Objects join with [`manage`](MemoryGroup::manage) when their lifetime
/// starts and leave with [`finalize_memory`](MemoryGroup::finalize_memory)
/// when it ends. [`finalize`](MemoryGroup::finalize) closes the group: it
/// then holds its mappings and stops accepting new objects. Clones share
/// state.
#[derive(Clone)]
pub struct MemoryGroup {
    inner: Rc<GroupInner>,
}

impl MemoryGroup {
    /// Creates a group. Without a manager every call is a no-op.
    pub fn new(manager: Option<MemoryManager>) -> Self {
        Self {
            inner: Rc::new(GroupInner {
                id: GroupId::next(),
                manager,
                mappings: RefCell::new(Vec::new()),
                pool: RefCell::new(None),
                finalized: Cell::new(false),
            }),
        }
    }

    pub fn id(&self) -> GroupId {
        self.inner.id
    }

    pub fn manager(&self) -> Option<&MemoryManager> {
        self.inner.manager.as_ref()
    }

    /// Starts the lifetime of `object` in this group.
    ///
    /// Returns `false` when the group has no manager or is already
    /// finalized; the caller then owns its memory directly.
    pub fn manage(&self, object: ObjectId) -> Result<bool, MemoryError> {
        match &self.inner.manager {
            Some(mm) if !self.inner.finalized.get() => {
                mm.register_and_start(self.inner.id, object)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Ends the lifetime of `object`, recording where its memory is bound.
    ///
    /// The blob it occupied becomes free for objects managed later.
    pub fn finalize_memory(
        &self,
        object: ObjectId,
        memory: Memory,
        size: usize,
        alignment: usize,
    ) -> Result<(), MemoryError> {
        match &self.inner.manager {
            Some(mm) => mm.end_lifetime(object, memory, size, alignment),
            None => Ok(()),
        }
    }

    /// Closes the group and takes its object → blob mappings.
    ///
    /// Every managed object must have ended. Finalizing twice is a no-op.
    pub fn finalize(&self) -> Result<(), MemoryError> {
        let Some(mm) = &self.inner.manager else {
            return Ok(());
        };
        if self.inner.finalized.get() {
            return Ok(());
        }
        let mappings = mm.finalize_group(self.inner.id)?;
        tracing::debug!(group = ?self.inner.id, objects = mappings.len(), "memory group finalized");
        *self.inner.mappings.borrow_mut() = mappings;
        self.inner.finalized.set(true);
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.inner.finalized.get()
    }

    /// Locks a pool and binds every mapped object to its blob.
    pub fn acquire(&self) -> Result<(), MemoryError> {
        let Some(mm) = &self.inner.manager else {
            return Ok(());
        };
        let mappings = self.inner.mappings.borrow();
        if mappings.is_empty() || self.inner.pool.borrow().is_some() {
            return Ok(());
        }
        let pool = mm.lock_pool()?;
        if let Err(e) = pool.acquire(&mappings) {
            pool.release(&mappings);
            mm.unlock_pool(pool);
            return Err(e);
        }
        *self.inner.pool.borrow_mut() = Some(pool);
        Ok(())
    }

    /// Unbinds every mapped object and unlocks the pool.
    pub fn release(&self) {
        let Some(mm) = &self.inner.manager else {
            return;
        };
        if let Some(pool) = self.inner.pool.borrow_mut().take() {
            pool.release(&self.inner.mappings.borrow());
            mm.unlock_pool(pool);
        }
    }

    pub fn is_acquired(&self) -> bool {
        self.inner.pool.borrow().is_some()
    }

    pub fn mappings(&self) -> Vec<MemoryMapping> {
        self.inner.mappings.borrow().clone()
    }
}

impl fmt::Debug for MemoryGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryGroup")
            .field("id", &self.inner.id)
            .field("managed", &self.inner.manager.is_some())
            .field("finalized", &self.inner.finalized.get())
            .field("mappings", &self.inner.mappings.borrow().len())
            .field("acquired", &self.is_acquired())
            .finish()
    }
}

/// Acquires a set of groups and releases them when dropped.
#[derive(Debug)]
pub struct MemoryGroupScope {
    groups: Vec<MemoryGroup>,
}

impl MemoryGroupScope {
    /// Acquires every group in order.
    ///
    /// On failure the groups acquired so far are released again.
    pub fn acquire(groups: impl IntoIterator<Item = MemoryGroup>) -> Result<Self, MemoryError> {
        let mut scope = Self { groups: Vec::new() };
        for group in groups {
            group.acquire()?;
            scope.groups.push(group);
        }
        Ok(scope)
    }
}

impl Drop for MemoryGroupScope {
    fn drop(&mut self) {
        for group in self.groups.iter().rev() {
            group.release();
        }
    }
}
