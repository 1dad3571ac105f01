// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Function-internal workspace memory.
//!
//! With the function memory manager enabled, a workspace joins its own
//! group on the target's intra manager. Every function's group shares
//! the intra pool, which is sized for the largest workspace, and binds it
//! only while the function runs. Without it, the workspace owns a private
//! region for the life of the function.

use graph_ir::{GraphContext, GraphError};
use memory_manager::{Allocator, Memory, MemoryGroup, ObjectId};
use std::rc::Rc;
use tensor_core::Target;

pub(crate) struct Scratch {
    memory: Memory,
    size: usize,
    group: Option<MemoryGroup>,
    allocator: Rc<dyn Allocator>,
}

impl Scratch {
    pub fn new(size: usize, ctx: &GraphContext, target: Target) -> Result<Self, GraphError> {
        let mm_ctx = ctx
            .memory_management_ctx(target)
            .ok_or_else(|| GraphError::Resource(format!("no memory context for target '{target}'")))?;
        let allocator = mm_ctx
            .allocator
            .clone()
            .ok_or_else(|| GraphError::Resource(format!("no allocator for target '{target}'")))?;
        let memory = Memory::new();

        let group = match &mm_ctx.intra_mm {
            Some(mm) if ctx.config().use_function_memory_manager => {
                let group = MemoryGroup::new(Some(mm.clone()));
                let object = ObjectId::next();
                group.manage(object)?;
                group.finalize_memory(object, memory.clone(), size, 0)?;
                group.finalize()?;
                Some(group)
            }
            _ => None,
        };
        Ok(Self {
            memory,
            size,
            group,
            allocator,
        })
    }

    pub fn is_managed(&self) -> bool {
        self.group.is_some()
    }

    /// Runs `f` over the workspace bytes, binding them for the call.
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R, GraphError> {
        match &self.group {
            Some(group) => {
                group.acquire()?;
                let result = self.memory.with_bytes_mut(0, self.size, f);
                group.release();
                Ok(result?)
            }
            None => {
                if !self.memory.is_bound() {
                    self.memory.bind(self.allocator.make_region(self.size)?);
                }
                Ok(self.memory.with_bytes_mut(0, self.size, f)?)
            }
        }
    }
}
