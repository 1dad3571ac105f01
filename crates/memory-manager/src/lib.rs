// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # memory-manager
//!
//! Memory substrate for the graph runtime: a budgeted host allocator and
//! an on-demand memory manager that lets tensors with disjoint lifetimes
//! share backing blobs.
//!
//! # Key Components
//!
//! - [`MemoryBudget`]: a hard memory ceiling with human-readable parsing
//!   (`"512M"`, `"1G"`, etc.).
//! - [`HeapAllocator`]: the [`Allocator`]. Enforces the budget, keeps a
//!   free list binned by size class, and tracks [`AllocationStats`].
//! - [`Region`]: an RAII allocation. Dropping the last clone returns the
//!   buffer to the allocator.
//! - [`Memory`]: a rebindable slot a tensor reads its region through.
//! - [`BlobLifetimeManager`]: assigns managed objects to blobs from the
//!   order their lifetimes start and end.
//! - [`BlobMemoryPool`] / [`PoolManager`]: concrete blob allocations and
//!   the set of interchangeable pools.
//! - [`MemoryManager`]: ties a lifetime manager to a pool manager.
//! - [`MemoryGroup`]: the objects of one scope (a function, a graph's
//!   transition tensors) and their blob mappings.
//!
//! # Lifecycle
//!
//! ```text
//! group.manage(obj)            ── start_lifetime: take freed blob or new one
//!     ...
//! group.finalize_memory(obj)   ── end_lifetime: blob returns to free list
//!     ...
//! group.finalize()             ── close the group
//!     │
//!     ▼
//! group mappings: obj ──► blob index
//!
//! manager.populate(allocator, n)  ── n pools of blobs, sized by max use
//!
//! group.acquire()   ── lock a pool, bind every mapped Memory to its blob
//! group.release()   ── unbind, unlock the pool
//! ```
//!
//! Everything is single-threaded: shared state uses `Rc` with `Cell` and
//! `RefCell`. No locks are taken anywhere.
//!
//! # Example
//! ```
//! use memory_manager::{
//!     Allocator, HeapAllocator, Memory, MemoryBudget, MemoryGroup, MemoryManager, ObjectId,
//! };
//! use std::rc::Rc;
//!
//! let mm = MemoryManager::on_demand();
//! let group = MemoryGroup::new(Some(mm.clone()));
//!
//! let (a, b) = (ObjectId::next(), ObjectId::next());
//! let (mem_a, mem_b) = (Memory::new(), Memory::new());
//!
//! group.manage(a).unwrap();
//! group.finalize_memory(a, mem_a.clone(), 1024, 0).unwrap();
//! group.manage(b).unwrap();
//! group.finalize_memory(b, mem_b.clone(), 512, 0).unwrap();
//! group.finalize().unwrap();
//!
//! let allocator: Rc<dyn Allocator> = Rc::new(HeapAllocator::new(MemoryBudget::from_mb(1)));
//! mm.populate(allocator.clone(), 1).unwrap();
//!
//! group.acquire().unwrap();
//! assert!(mem_a.region().unwrap().same_region(&mem_b.region().unwrap()));
//! assert_eq!(allocator.allocated_bytes(), 1024);
//! group.release();
//! assert!(!mem_a.is_bound());
//! ```

mod allocator;
mod budget;
mod error;
mod group;
mod lifetime;
mod manager;
mod pool;
mod region;
mod stats;

pub use allocator::{Allocator, HeapAllocator};
pub use budget::MemoryBudget;
pub use error::MemoryError;
pub use group::{GroupId, MemoryGroup, MemoryGroupScope, ObjectId};
pub use lifetime::{BlobInfo, BlobLifetimeManager, MemoryMapping};
pub use manager::MemoryManager;
pub use pool::{BlobMemoryPool, PoolManager};
pub use region::{Memory, Region};
pub use stats::AllocationStats;
