// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for memory management.

use crate::{GroupId, ObjectId};

/// Errors that can occur during allocation and memory-group management.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    /// The requested allocation would exceed the memory budget.
    #[error("out of memory: requested {requested_bytes} bytes, but only {available_bytes} available (budget: {budget_bytes})")]
    OutOfMemory {
        requested_bytes: usize,
        available_bytes: usize,
        budget_bytes: usize,
    },

    /// Attempted to allocate a zero-sized buffer.
    #[error("cannot allocate zero-sized buffer")]
    ZeroSizedAllocation,

    /// A budget string could not be parsed.
    #[error("invalid memory budget: {0}")]
    InvalidBudget(String),

    /// A byte range falls outside the region it addresses.
    #[error("{len} bytes at offset {offset} out of bounds for region of {size} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    /// A region is already borrowed in a conflicting way.
    #[error("region is already borrowed")]
    BorrowConflict,

    /// A memory slot was read while no region is bound to it.
    #[error("memory is not bound to a region")]
    Unbound,

    /// Another group is still registering objects with the lifetime manager.
    #[error("lifetime manager is busy with group {active:?}, cannot register group {requested:?}")]
    GroupConflict { active: GroupId, requested: GroupId },

    /// The object's lifetime has already started.
    #[error("object {0:?} is already managed")]
    AlreadyManaged(ObjectId),

    /// The object was never registered with the lifetime manager.
    #[error("object {0:?} is not managed")]
    UnknownObject(ObjectId),

    /// Pools were requested while objects are still in flight.
    #[error("memory manager has objects whose lifetime has not ended")]
    NotFinalized,

    /// All registered pools are locked.
    #[error("no free memory pool available")]
    NoFreePools,

    /// Pools cannot be cleared while some are locked.
    #[error("{0} memory pool(s) still in use")]
    PoolsInUse(usize),

    /// A mapping references a blob the pool does not have.
    #[error("blob index {index} out of range for pool with {blobs} blobs")]
    InvalidBlob { index: usize, blobs: usize },
}
